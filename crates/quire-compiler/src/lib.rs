//! Quire Compiler
//!
//! Turns Quire templates into self-contained Lua render chunks. A chunk
//! takes `(locals, globals)` and returns the rendered text.
//!
//! ```text
//! Registry ─┐
//! Loader ───┼─▶ Compiler::compile(path) ─▶ CompiledArtifact ─▶ ArtifactCache
//! Resolver ─┘
//! ```
//!
//! Directives and elements are extensions: a [`Definition`] pairs a name
//! pattern and block shape with a [`Handler`] that writes code through the
//! [`CompilerApi`].
//!
//! ```
//! use std::sync::Arc;
//! use quire_compiler::{CompileError, Compiler, CompilerApi, Definition, MemoryLoader, Registry};
//!
//! fn rule(api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
//!     api.text("<hr>");
//!     Ok(())
//! }
//!
//! let mut registry = Registry::new();
//! registry.register_directive(Definition::new("hr", rule));
//! let loader = Arc::new(MemoryLoader::new().with("page.quire", "a@hr b"));
//! let artifact = Compiler::new(Arc::new(registry), loader).compile("page").unwrap();
//! assert!(artifact.code.contains("<hr>"));
//! ```

pub mod api;
pub mod artifact;
pub mod cache;
pub mod compiler;
pub mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod html;
pub mod lua;
pub mod matcher;
pub mod options;
pub mod position_map;
pub mod registry;
pub mod resolver;
mod state;

pub use api::{CompilerApi, Dependency};
pub use artifact::{CompiledArtifact, SourceLocation};
pub use cache::{ArtifactCache, CacheMode};
pub use compiler::Compiler;
pub use error::CompileError;
pub use html::escape_html;
pub use matcher::{NamePattern, PatternSet};
pub use options::CompilerOptions;
pub use position_map::{MappedPosition, PositionMap, Segment};
pub use registry::{
    Definition, DirectiveDefinition, ElementDefinition, Handler, IdentifierHook, Registry,
};
pub use resolver::{DefaultResolver, FsLoader, Loader, MemoryLoader, PathResolver, Resource};
