//! Directive/element definitions and the registry that holds them.
//!
//! A registry is built once and then shared read-only behind an `Arc` by
//! every parser and compiler that uses it. [`Registry::fork`] layers a
//! private table in front of a shared parent: lookups try the fork first and
//! fall back to the parent, which is never mutated.

use std::fmt;
use std::sync::Arc;

use quire_parser::{BlockSyntax, ChildrenMode, SyntaxTable};

use crate::api::CompilerApi;
use crate::error::CompileError;
use crate::matcher::{NamePattern, PatternSet};

/// Code generation callback of a directive, element or identifier hook.
pub trait Handler: Send + Sync {
    fn call(&self, api: &mut CompilerApi<'_>) -> Result<(), CompileError>;
}

impl<F> Handler for F
where
    F: Fn(&mut CompilerApi<'_>) -> Result<(), CompileError> + Send + Sync,
{
    fn call(&self, api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
        self(api)
    }
}

type InitHook = Arc<dyn Fn(&mut Registry) + Send + Sync>;

/// A directive or element definition.
#[derive(Clone)]
pub struct Definition {
    pattern: NamePattern,
    syntax: BlockSyntax,
    handler: Arc<dyn Handler>,
    on_init: Option<InitHook>,
}

/// Definition of an `@name(...)` directive.
pub type DirectiveDefinition = Definition;
/// Definition of a tag-like element.
pub type ElementDefinition = Definition;

impl Definition {
    /// Define `name` (a trailing `*` makes it a wildcard) with no children.
    pub fn new<H>(name: &str, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        Self::with_pattern(NamePattern::parse(name), handler)
    }

    pub fn with_pattern<H>(pattern: NamePattern, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        Self {
            pattern,
            syntax: BlockSyntax::default(),
            handler: Arc::new(handler),
            on_init: None,
        }
    }

    pub fn children(mut self, mode: ChildrenMode) -> Self {
        self.syntax.children = mode;
        self
    }

    /// Continuation names that attach to this node (`else`, `empty`).
    pub fn related<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.syntax.related = names.into_iter().map(Into::into).collect();
        self
    }

    /// Capture element children verbatim.
    pub fn raw_content(mut self) -> Self {
        self.syntax.raw_content = true;
        self
    }

    /// Run `init` against the registry once this definition is registered.
    pub fn on_init<F>(mut self, init: F) -> Self
    where
        F: Fn(&mut Registry) + Send + Sync + 'static,
    {
        self.on_init = Some(Arc::new(init));
        self
    }

    pub fn pattern(&self) -> &NamePattern {
        &self.pattern
    }

    pub fn syntax(&self) -> &BlockSyntax {
        &self.syntax
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("pattern", &self.pattern)
            .field("syntax", &self.syntax)
            .finish_non_exhaustive()
    }
}

/// Callback fired the first time a watched name is referenced.
#[derive(Clone)]
pub struct IdentifierHook {
    name: String,
    unique: bool,
    handler: Arc<dyn Handler>,
}

impl IdentifierHook {
    pub fn new<H>(name: impl Into<String>, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        Self {
            name: name.into(),
            unique: false,
            handler: Arc::new(handler),
        }
    }

    /// Fire at most once per compilation, even when the name is only
    /// referenced by inlined dependencies.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub(crate) fn fire(&self, api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
        self.handler.call(api)
    }
}

impl fmt::Debug for IdentifierHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifierHook")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .finish_non_exhaustive()
    }
}

/// Directive, element and identifier-hook catalog.
#[derive(Debug, Default)]
pub struct Registry {
    parent: Option<Arc<Registry>>,
    directives: Vec<Arc<Definition>>,
    elements: Vec<Arc<Definition>>,
    hooks: Vec<IdentifierHook>,
    directive_patterns: PatternSet,
    element_patterns: PatternSet,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A private override table in front of `parent`.
    pub fn fork(parent: &Arc<Registry>) -> Self {
        Self {
            parent: Some(Arc::clone(parent)),
            ..Self::default()
        }
    }

    pub fn parent(&self) -> Option<&Arc<Registry>> {
        self.parent.as_ref()
    }

    pub fn register_directive(&mut self, definition: DirectiveDefinition) -> &mut Self {
        let init = definition.on_init.clone();
        self.directives.push(Arc::new(definition));
        self.directive_patterns = PatternSet::build(self.directives.iter().map(|d| &d.pattern));
        if let Some(init) = init {
            init(self);
        }
        self
    }

    pub fn register_element(&mut self, definition: ElementDefinition) -> &mut Self {
        let init = definition.on_init.clone();
        self.elements.push(Arc::new(definition));
        self.element_patterns = PatternSet::build(self.elements.iter().map(|d| &d.pattern));
        if let Some(init) = init {
            init(self);
        }
        self
    }

    /// Watch for a name being referenced by compiled templates.
    pub fn watch(&mut self, hook: IdentifierHook) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    pub fn find_directive(&self, name: &str) -> Option<Arc<Definition>> {
        if self.directive_patterns.is_match(name) {
            if let Some(found) = best_match(&self.directives, name) {
                return Some(found);
            }
        }
        self.parent.as_ref()?.find_directive(name)
    }

    pub fn find_element(&self, tag: &str) -> Option<Arc<Definition>> {
        if self.element_patterns.is_match(tag) {
            if let Some(found) = best_match(&self.elements, tag) {
                return Some(found);
            }
        }
        self.parent.as_ref()?.find_element(tag)
    }

    /// All identifier hooks, fork-local ones shadowing the parent's by name.
    pub fn hooks(&self) -> Vec<IdentifierHook> {
        let mut hooks: Vec<IdentifierHook> = Vec::new();
        for hook in self.hooks.iter().rev() {
            if !hooks.iter().any(|h| h.name == hook.name) {
                hooks.push(hook.clone());
            }
        }
        if let Some(parent) = &self.parent {
            for hook in parent.hooks() {
                if !hooks.iter().any(|h| h.name == hook.name) {
                    hooks.push(hook);
                }
            }
        }
        hooks
    }

    /// Literal directive names visible through this registry.
    fn directive_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .directives
            .iter()
            .filter_map(|d| d.pattern.literal().map(str::to_string))
            .collect();
        if let Some(parent) = &self.parent {
            names.extend(parent.directive_names());
        }
        names
    }
}

/// Later registrations first; literal beats wildcard beats pattern.
fn best_match(definitions: &[Arc<Definition>], name: &str) -> Option<Arc<Definition>> {
    definitions
        .iter()
        .rev()
        .filter(|d| d.pattern.matches(name))
        .min_by_key(|d| d.pattern.rank())
        .cloned()
}

impl SyntaxTable for Registry {
    fn directive(&self, name: &str) -> Option<BlockSyntax> {
        self.find_directive(name).map(|d| d.syntax.clone())
    }

    fn element(&self, tag: &str) -> Option<BlockSyntax> {
        self.find_element(tag).map(|d| d.syntax.clone())
    }

    fn longest_directive_prefix(&self, name: &str) -> Option<usize> {
        self.directive_names()
            .iter()
            .filter(|n| n.len() < name.len() && name.starts_with(n.as_str()))
            .map(String::len)
            .max()
    }
}
