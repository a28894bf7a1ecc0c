use quire_parser::Loc;

/// Errors raised while compiling a template.
///
/// Unknown names and unterminated constructs never reach this type; the
/// parser keeps them as literal text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// A template includes itself, directly or through other templates.
    #[error("circular dependency: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    /// A directive or element handler rejected its node.
    #[error("{path}:{line}:{column}: {message}")]
    Handler {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },

    /// The loader could not provide a template.
    #[error("cannot load '{path}': {message}")]
    Load { path: String, message: String },
}

impl CompileError {
    pub fn handler(path: impl Into<String>, loc: Loc, message: impl Into<String>) -> Self {
        CompileError::Handler {
            path: path.into(),
            line: loc.line,
            column: loc.column,
            message: message.into(),
        }
    }

    pub fn load(path: impl Into<String>, message: impl ToString) -> Self {
        CompileError::Load {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Source location, when the error has one.
    pub fn location(&self) -> Option<(&str, Loc)> {
        match self {
            CompileError::Handler {
                path, line, column, ..
            } => Some((path, Loc::new(*line, *column))),
            _ => None,
        }
    }
}
