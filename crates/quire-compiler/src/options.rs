use quire_parser::ParserOptions;
use serde::{Deserialize, Serialize};

/// Compiler configuration.
///
/// Deserializable with defaults for every field, so a partial table in a
/// config file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Drop position annotations, the position map and the artifact trailer.
    pub release: bool,
    /// Identifier that marks an expression as suspending.
    pub async_marker: String,
    /// Upper bound on identifier-hook resolution passes.
    pub hook_iteration_limit: usize,
    /// Tags whose body is copied verbatim.
    pub raw_text_tags: Vec<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            release: false,
            async_marker: "await".into(),
            hook_iteration_limit: 16,
            raw_text_tags: ParserOptions::default().raw_text_tags,
        }
    }
}

impl CompilerOptions {
    pub fn release() -> Self {
        Self {
            release: true,
            ..Self::default()
        }
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            raw_text_tags: self.raw_text_tags.clone(),
        }
    }
}
