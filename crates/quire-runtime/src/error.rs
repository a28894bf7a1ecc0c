use ariadne::{Color, Config, Label, Report, ReportKind, Source};
use quire_compiler::{CompileError, SourceLocation};

/// Errors raised while preparing or rendering a template.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The generated chunk is not valid Lua.
    #[error("{}", located(path, location.as_ref(), message))]
    HostGeneration {
        path: String,
        location: Option<SourceLocation>,
        message: String,
    },

    /// The chunk raised an error while rendering.
    #[error("{}", located(path, location.as_ref(), message))]
    Runtime {
        path: String,
        location: Option<SourceLocation>,
        message: String,
    },

    /// Release-mode stand-in for a runtime error; the detail is only logged.
    #[error("rendering '{path}' failed")]
    Fault { path: String },

    #[error("'{path}' is asynchronous and must be rendered with render_async")]
    AsyncRequired { path: String },

    #[error("lua: {0}")]
    Lua(#[from] mlua::Error),
}

fn located(path: &str, location: Option<&SourceLocation>, message: &str) -> String {
    match location {
        Some(l) => format!("{}:{}:{}: {message}", l.path, l.line, l.column),
        None => format!("{path}: {message}"),
    }
}

impl RenderError {
    /// Template position of the failure, when known.
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            RenderError::Compile(err) => err.location().map(|(path, loc)| SourceLocation {
                path: path.to_string(),
                line: loc.line,
                column: loc.column,
            }),
            RenderError::HostGeneration { location, .. } | RenderError::Runtime { location, .. } => {
                location.clone()
            }
            _ => None,
        }
    }

    fn detail(&self) -> String {
        match self {
            RenderError::HostGeneration { message, .. } | RenderError::Runtime { message, .. } => {
                message.clone()
            }
            RenderError::Compile(CompileError::Handler { message, .. }) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Render a labelled excerpt of `source`, the template the location
    /// points into. Errors without a location render as their message.
    pub fn report(&self, source: &str) -> String {
        let Some(location) = self.location() else {
            return self.to_string();
        };

        let offset = byte_offset(source, location.line, location.column);
        let end = (offset + 1).min(source.len()).max(offset);
        let path = location.path.as_str();

        let mut buf = Vec::new();
        let written = Report::build(ReportKind::Error, path, offset)
            .with_config(Config::default().with_color(false))
            .with_message(self.to_string())
            .with_label(
                Label::new((path, offset..end))
                    .with_message(self.detail())
                    .with_color(Color::Red),
            )
            .finish()
            .write((path, Source::from(source)), &mut buf);

        match written {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => self.to_string(),
        }
    }
}

/// Byte offset of a one-based line and column, clamped to the source.
fn byte_offset(source: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (index, text) in source.split_inclusive('\n').enumerate() {
        if index + 1 == line {
            let within: usize = text
                .chars()
                .take(column.saturating_sub(1))
                .map(char::len_utf8)
                .sum();
            return offset + within;
        }
        offset += text.len();
    }
    source.len().saturating_sub(1)
}
