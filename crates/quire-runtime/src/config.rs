//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! release = true
//! async_marker = "await"
//! hook_iteration_limit = 16
//! raw_text_tags = ["script", "style"]
//! cache = "release"
//! ```
//!
//! Every key is optional. `cache` follows `release` unless set.

use std::fs;
use std::path::{Path, PathBuf};

use quire_compiler::{CacheMode, CompilerOptions};
use serde::{Deserialize, Serialize};

/// Configuration loading failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(flatten)]
    pub compiler: CompilerOptions,
    pub cache: Option<CacheMode>,
}

impl EngineConfig {
    pub fn release() -> Self {
        Self {
            compiler: CompilerOptions::release(),
            cache: None,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// The configured cache mode, or the one matching `release`.
    pub fn cache_mode(&self) -> CacheMode {
        self.cache.unwrap_or(if self.compiler.release {
            CacheMode::Release
        } else {
            CacheMode::Development
        })
    }
}
