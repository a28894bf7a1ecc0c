//! The render-time invoker.
//!
//! An [`Engine`] owns one Lua state. Templates are compiled through the
//! artifact cache, loaded once per artifact and called with the two data
//! bags. Lua errors are mapped back to template positions.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use mlua::{Function, IntoLua, Lua, LuaSerdeExt, SerializeOptions, Table, Value};
use quire_compiler::{ArtifactCache, CompiledArtifact, Compiler, Loader, SourceLocation};
use regex::Regex;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::RenderError;
use crate::helpers;

/// A compiled artifact loaded into the Lua state.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub artifact: Arc<CompiledArtifact>,
    function: Function,
}

pub struct Engine {
    lua: Lua,
    compiler: Compiler,
    cache: ArtifactCache,
    /// Host globals, the fallback of every `globals` bag.
    shared: Table,
    loaded: RefCell<HashMap<String, Prepared>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("compiler", &self.compiler)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine; `config` replaces the compiler's options.
    pub fn new(compiler: Compiler, config: EngineConfig) -> Result<Self, RenderError> {
        let lua = Lua::new();
        helpers::install(&lua, &config.compiler.async_marker)?;
        let shared = lua.create_table()?;
        let cache = ArtifactCache::new(config.cache_mode());

        Ok(Self {
            lua,
            compiler: compiler.with_options(config.compiler),
            cache,
            shared,
            loaded: RefCell::new(HashMap::new()),
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Expose a host value (for example an async function) to every render
    /// through the `globals` bag.
    pub fn set_global(&self, name: &str, value: impl IntoLua) -> Result<(), RenderError> {
        self.shared.set(name, value)?;
        Ok(())
    }

    /// Compile `path` through the cache and load it into Lua.
    pub fn prepare(&self, path: &str) -> Result<Prepared, RenderError> {
        let artifact = self.cache.get_or_compile(path, &self.compiler)?;
        if let Some(prepared) = self.loaded.borrow().get(&artifact.path) {
            if Arc::ptr_eq(&prepared.artifact, &artifact) {
                return Ok(prepared.clone());
            }
        }

        let prepared = self.load(artifact)?;
        self.loaded
            .borrow_mut()
            .insert(prepared.artifact.path.clone(), prepared.clone());
        Ok(prepared)
    }

    /// Drop a template from the artifact cache and the Lua state.
    pub fn invalidate(&self, path: &str) {
        let path = self.compiler.resolve(path);
        self.cache.invalidate(&path);
        self.loaded.borrow_mut().remove(&path);
    }

    /// Render a synchronous template.
    pub fn render<L, G>(&self, path: &str, locals: &L, globals: &G) -> Result<String, RenderError>
    where
        L: Serialize + ?Sized,
        G: Serialize + ?Sized,
    {
        let prepared = self.prepare(path)?;
        self.call(&prepared, locals, globals)
    }

    /// Render any template, awaiting its suspension points.
    pub async fn render_async<L, G>(&self, path: &str, locals: &L, globals: &G) -> Result<String, RenderError>
    where
        L: Serialize + ?Sized,
        G: Serialize + ?Sized,
    {
        let prepared = self.prepare(path)?;
        let (locals, globals) = self.bags(locals, globals)?;
        prepared
            .function
            .call_async::<String>((locals, globals))
            .await
            .map_err(|e| self.runtime_fault(&prepared.artifact, e))
    }

    /// Compile and render template text without caching.
    pub fn render_source<L, G>(
        &self,
        path: &str,
        source: &str,
        locals: &L,
        globals: &G,
    ) -> Result<String, RenderError>
    where
        L: Serialize + ?Sized,
        G: Serialize + ?Sized,
    {
        let artifact = Arc::new(self.compiler.compile_source(path, source)?);
        let prepared = self.load(artifact)?;
        self.call(&prepared, locals, globals)
    }

    /// An annotated excerpt of the template `error` points into, read back
    /// through the loader.
    pub fn diagnostic(&self, error: &RenderError) -> String {
        let source = error
            .location()
            .and_then(|location| self.compiler.loader().load(&location.path).ok());
        match source {
            Some(resource) => error.report(&resource.source),
            None => error.to_string(),
        }
    }

    fn call<L, G>(&self, prepared: &Prepared, locals: &L, globals: &G) -> Result<String, RenderError>
    where
        L: Serialize + ?Sized,
        G: Serialize + ?Sized,
    {
        if prepared.artifact.is_async {
            return Err(RenderError::AsyncRequired {
                path: prepared.artifact.path.clone(),
            });
        }
        let (locals, globals) = self.bags(locals, globals)?;
        prepared
            .function
            .call::<String>((locals, globals))
            .map_err(|e| self.runtime_fault(&prepared.artifact, e))
    }

    fn load(&self, artifact: Arc<CompiledArtifact>) -> Result<Prepared, RenderError> {
        let function = self
            .lua
            .load(artifact.code.as_str())
            .set_name(format!("={}", artifact.path))
            .into_function();

        match function {
            Ok(function) => Ok(Prepared { artifact, function }),
            Err(error) => {
                let (location, message) = self.map_error(&artifact, &error);
                Err(RenderError::HostGeneration {
                    path: artifact.path.clone(),
                    location,
                    message,
                })
            }
        }
    }

    /// Convert the data bags; `globals` falls back to the host globals.
    fn bags<L, G>(&self, locals: &L, globals: &G) -> Result<(Value, Value), RenderError>
    where
        L: Serialize + ?Sized,
        G: Serialize + ?Sized,
    {
        let locals = self.lua.to_value_with(locals, bag_options())?;
        let globals = self.lua.to_value_with(globals, bag_options())?;

        let scope: Function = self.lua.globals().get("__scope")?;
        let globals: Value = scope.call((self.shared.clone(), globals))?;
        Ok((locals, globals))
    }

    fn runtime_fault(&self, artifact: &CompiledArtifact, error: mlua::Error) -> RenderError {
        let (location, message) = self.map_error(artifact, &error);
        if self.compiler.options().release {
            tracing::error!(path = %artifact.path, error = %error, "template render failed");
            return RenderError::Fault {
                path: artifact.path.clone(),
            };
        }
        RenderError::Runtime {
            path: artifact.path.clone(),
            location,
            message,
        }
    }

    /// Find `<path>:<line>:` in a Lua message and map the line back to the
    /// template. Release artifacts carry no position data.
    fn map_error(
        &self,
        artifact: &CompiledArtifact,
        error: &mlua::Error,
    ) -> (Option<SourceLocation>, String) {
        let text = error.to_string();
        let pattern = format!(r"{}:(\d+): ([^\n]*)", regex::escape(&artifact.path));
        let captures = Regex::new(&pattern).ok().and_then(|re| {
            let caps = re.captures(&text)?;
            let line: usize = caps.get(1)?.as_str().parse().ok()?;
            Some((line, caps.get(2)?.as_str().to_string()))
        });

        match captures {
            Some((line, message)) => (artifact.locate(line), message),
            None => (None, text.lines().next().unwrap_or_default().to_string()),
        }
    }
}

/// `None` and `()` become `nil` so missing values render as nothing.
fn bag_options() -> SerializeOptions {
    SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false)
}
