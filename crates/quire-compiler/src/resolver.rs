//! Template loading and include-path resolution.
//!
//! The compiler only needs two things from its surroundings: a way to turn
//! an include request into a canonical template path, and a way to read the
//! text and modification stamp of that path.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

use parking_lot::RwLock;

use crate::error::CompileError;

/// A loaded template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub path: String,
    pub source: String,
    /// Opaque modification stamp; any change means the source changed.
    pub modified: u64,
}

/// Reads templates by canonical path.
pub trait Loader: Send + Sync {
    fn load(&self, path: &str) -> Result<Resource, CompileError>;

    /// Current modification stamp without reading the text.
    fn modified(&self, path: &str) -> Result<u64, CompileError>;
}

/// Turns an include request into a canonical template path.
pub trait PathResolver: Send + Sync {
    /// `from` is the path of the including template, if any.
    fn resolve(&self, request: &str, from: Option<&str>) -> String;
}

// =========================================================================
// MemoryLoader
// =========================================================================

/// In-memory templates. Every write bumps a monotonic stamp.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    files: RwLock<HashMap<String, (String, u64)>>,
    clock: AtomicU64,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryLoader::insert`].
    pub fn with(self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    /// Add or replace a template.
    pub fn insert(&self, path: impl Into<String>, source: impl Into<String>) {
        let stamp = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.files.write().insert(path.into(), (source.into(), stamp));
    }

    pub fn remove(&self, path: &str) -> bool {
        self.files.write().remove(path).is_some()
    }
}

impl Loader for MemoryLoader {
    fn load(&self, path: &str) -> Result<Resource, CompileError> {
        let files = self.files.read();
        let (source, modified) = files
            .get(path)
            .ok_or_else(|| CompileError::load(path, "template not found"))?;
        Ok(Resource {
            path: path.to_string(),
            source: source.clone(),
            modified: *modified,
        })
    }

    fn modified(&self, path: &str) -> Result<u64, CompileError> {
        self.files
            .read()
            .get(path)
            .map(|(_, stamp)| *stamp)
            .ok_or_else(|| CompileError::load(path, "template not found"))
    }
}

// =========================================================================
// FsLoader
// =========================================================================

/// Templates under a base directory.
///
/// Rejects absolute paths and any `..` component so a request can never
/// leave the base directory.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, CompileError> {
        let relative = Path::new(path);
        for component in relative.components() {
            match component {
                Component::ParentDir => {
                    return Err(CompileError::load(path, "directory traversal is not allowed"));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(CompileError::load(path, "absolute paths are not allowed"));
                }
                _ => {}
            }
        }

        let full = self.root.join(relative);
        if let (Ok(canonical), Ok(base)) = (full.canonicalize(), self.root.canonicalize()) {
            if !canonical.starts_with(&base) {
                return Err(CompileError::load(path, "path escapes the template root"));
            }
        }
        Ok(full)
    }
}

impl Loader for FsLoader {
    fn load(&self, path: &str) -> Result<Resource, CompileError> {
        let full = self.full_path(path)?;
        let source = fs::read_to_string(&full).map_err(|e| CompileError::load(path, e))?;
        Ok(Resource {
            path: path.to_string(),
            source,
            modified: self.modified(path)?,
        })
    }

    fn modified(&self, path: &str) -> Result<u64, CompileError> {
        let full = self.full_path(path)?;
        let modified = fs::metadata(&full)
            .and_then(|m| m.modified())
            .map_err(|e| CompileError::load(path, e))?;
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Ok(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

// =========================================================================
// DefaultResolver
// =========================================================================

/// `./` and `../` requests resolve against the including template's
/// directory; everything else is relative to the template root. A default
/// extension is appended when the last segment has none.
#[derive(Debug, Clone)]
pub struct DefaultResolver {
    extension: String,
}

impl DefaultResolver {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }
}

impl Default for DefaultResolver {
    fn default() -> Self {
        Self::new(".quire")
    }
}

impl PathResolver for DefaultResolver {
    fn resolve(&self, request: &str, from: Option<&str>) -> String {
        let relative = request.starts_with("./") || request.starts_with("../");
        let joined = match from.and_then(|f| f.rsplit_once('/')) {
            Some((dir, _)) if relative => format!("{dir}/{request}"),
            _ => request.trim_start_matches('/').to_string(),
        };

        let mut segments: Vec<&str> = Vec::new();
        for segment in joined.split('/') {
            match segment {
                "" | "." => {}
                ".." if segments.last().is_some_and(|s| *s != "..") => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }

        let mut path = segments.join("/");
        let has_extension = segments.last().is_some_and(|s| s.contains('.'));
        if !has_extension && !self.extension.is_empty() {
            path.push_str(&self.extension);
        }
        path
    }
}
