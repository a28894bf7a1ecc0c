//! Quire Runtime
//!
//! Hosts compiled Quire templates in an embedded Lua 5.4 state. The
//! [`Engine`] compiles through an artifact cache, installs the helper
//! functions generated code relies on (`__escape`, `__raw`, `__scope`,
//! `await`) and maps Lua failures back to template positions.
//!
//! ```
//! use std::sync::Arc;
//! use quire_compiler::{Compiler, MemoryLoader, Registry};
//! use quire_runtime::{Engine, EngineConfig};
//!
//! let loader = Arc::new(MemoryLoader::new().with("hello.quire", "Hello {{ name }}!"));
//! let compiler = Compiler::new(Arc::new(Registry::new()), loader);
//! let engine = Engine::new(compiler, EngineConfig::default()).unwrap();
//!
//! let mut locals = std::collections::HashMap::new();
//! locals.insert("name", "<you>");
//! assert_eq!(engine.render("hello", &locals, &()).unwrap(), "Hello &lt;you&gt;!");
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod helpers;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, Prepared};
pub use error::RenderError;
pub use quire_compiler::escape_html;
