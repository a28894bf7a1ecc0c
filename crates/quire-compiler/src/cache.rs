//! Path-keyed store of compiled artifacts.
//!
//! In development mode every lookup compares the modification stamps an
//! artifact was built from against the loader and recompiles on any change
//! (including a change in an inlined dependency). In release mode entries
//! are permanent until explicitly invalidated.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::artifact::CompiledArtifact;
use crate::compiler::Compiler;
use crate::error::CompileError;
use crate::resolver::Loader;

/// Freshness policy of an [`ArtifactCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Revalidate modification stamps on every lookup.
    #[default]
    Development,
    /// Never revalidate.
    Release,
}

/// Compiled artifacts keyed by resolved template path.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    mode: CacheMode,
    entries: RwLock<HashMap<String, Arc<CompiledArtifact>>>,
}

impl ArtifactCache {
    pub fn new(mode: CacheMode) -> Self {
        Self {
            mode,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// A cached artifact that is still fresh.
    pub fn get(&self, path: &str, loader: &dyn Loader) -> Option<Arc<CompiledArtifact>> {
        let artifact = self.entries.read().get(path).cloned()?;
        if self.mode == CacheMode::Release || is_fresh(&artifact, loader) {
            tracing::debug!(path, "artifact cache hit");
            Some(artifact)
        } else {
            tracing::debug!(path, "artifact cache entry is stale");
            None
        }
    }

    pub fn insert(&self, artifact: Arc<CompiledArtifact>) {
        self.entries.write().insert(artifact.path.clone(), artifact);
    }

    /// Return the cached artifact for `request` or compile and store it.
    pub fn get_or_compile(
        &self,
        request: &str,
        compiler: &Compiler,
    ) -> Result<Arc<CompiledArtifact>, CompileError> {
        let path = compiler.resolve(request);
        if let Some(artifact) = self.get(&path, compiler.loader()) {
            return Ok(artifact);
        }

        tracing::debug!(path = %path, "artifact cache miss");
        let artifact = Arc::new(compiler.compile(&path)?);
        self.insert(Arc::clone(&artifact));
        Ok(artifact)
    }

    /// Drop one entry. Returns whether it was present.
    pub fn invalidate(&self, path: &str) -> bool {
        self.entries.write().remove(path).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Every loader-backed source still carries the stamp seen at compile time.
fn is_fresh(artifact: &CompiledArtifact, loader: &dyn Loader) -> bool {
    artifact.sources.iter().all(|(path, stamp)| match stamp {
        Some(stamp) => loader.modified(path).is_ok_and(|current| current == *stamp),
        None => true,
    })
}
