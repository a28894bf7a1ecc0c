//! The capability object handed to directive, element and hook handlers.
//!
//! A handler sees the node it was called for and can read its parameters,
//! write to the prologue, body or epilogue of the template being compiled,
//! render child nodes, request dependencies and register further hooks.

use std::collections::BTreeSet;

use quire_parser::{AttributeValue, Directive, Element, Loc, Node};

use crate::compiler::Compiler;
use crate::error::CompileError;
use crate::lua;
use crate::registry::IdentifierHook;
use crate::state::{CompilerState, Line, Origin, Section, Session, Unit};

/// An inlined template, callable from generated code.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    /// Resolved template path.
    pub path: String,
    /// Local identifier bound to the inlined callable.
    pub ident: String,
    pub is_async: bool,
    /// Names the dependency reads from its data bags.
    pub free: BTreeSet<String>,
}

/// Compiler capabilities available to one handler invocation.
pub struct CompilerApi<'a> {
    pub(crate) compiler: &'a Compiler,
    pub(crate) session: &'a mut Session,
    pub(crate) state: &'a mut CompilerState,
    pub(crate) node: Option<&'a Node>,
}

impl<'a> CompilerApi<'a> {
    // =========================================================================
    // The node
    // =========================================================================

    /// The node being compiled; `None` inside identifier hooks.
    pub fn node(&self) -> Option<&'a Node> {
        self.node
    }

    pub fn directive(&self) -> Option<&'a Directive> {
        match self.node? {
            Node::Directive(d) => Some(d),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<&'a Element> {
        match self.node? {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Directive name or element tag.
    pub fn name(&self) -> Option<&'a str> {
        match self.node? {
            Node::Directive(d) => Some(&d.name),
            Node::Element(e) => Some(&e.tag_name),
            _ => None,
        }
    }

    pub fn loc(&self) -> Loc {
        self.node.map(Node::loc).unwrap_or_default()
    }

    /// Path of the template being compiled.
    pub fn path(&self) -> &str {
        &self.state.path
    }

    /// Raw directive argument text.
    pub fn args(&self) -> Option<&'a str> {
        self.directive()?.args.as_deref()
    }

    pub fn children(&self) -> &'a [Node] {
        match self.node {
            Some(Node::Directive(d)) => &d.children,
            Some(Node::Element(e)) => &e.children,
            _ => &[],
        }
    }

    /// Continuation members attached to this node, in source order.
    pub fn related(&self) -> &'a [Node] {
        match self.node {
            Some(Node::Directive(d)) => &d.related,
            Some(Node::Element(e)) => &e.related,
            _ => &[],
        }
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Positional directive arguments (named `x = y` segments excluded).
    pub fn params(&self) -> Vec<String> {
        self.args()
            .map(lua::split_args)
            .unwrap_or_default()
            .into_iter()
            .filter(|s| lua::named_segment(s).is_none())
            .collect()
    }

    pub fn param(&self, index: usize) -> Option<String> {
        self.params().into_iter().nth(index)
    }

    /// A named parameter as a Lua expression: a `name = expr` directive
    /// segment, or an element attribute (static values are quoted, bare
    /// attributes are `true`).
    pub fn named_param(&self, name: &str) -> Option<String> {
        if let Some(element) = self.element() {
            return element.attribute(name).map(|a| match &a.value {
                AttributeValue::Bare => "true".to_string(),
                AttributeValue::Expression(expr) => expr.clone(),
                AttributeValue::Quoted(text) | AttributeValue::Unquoted(text) => lua::quote(text),
            });
        }
        lua::split_args(self.args()?)
            .iter()
            .find_map(|s| lua::named_segment(s).filter(|(n, _)| *n == name).map(|(_, e)| e.to_string()))
    }

    /// A positional parameter that must be a static string literal.
    pub fn string_param(&self, index: usize) -> Option<String> {
        lua::unquote(&self.param(index)?)
    }

    pub fn attribute(&self, name: &str) -> Option<&'a AttributeValue> {
        self.element()?.attribute(name).map(|a| &a.value)
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn origin(&self) -> Option<Origin> {
        let loc = self.node?.loc();
        Some(Origin {
            source: self.state.path.clone(),
            line: loc.line,
            column: loc.column,
        })
    }

    /// Append a line to the prologue (runs before the body).
    pub fn prologue(&mut self, code: impl Into<String>) {
        let line = Line::new(code, self.origin());
        self.state.push(Section::Prologue, line);
    }

    /// Append a line at the body cursor.
    pub fn write(&mut self, code: impl Into<String>) {
        let line = Line::new(code, self.origin());
        self.state.push(Section::Body, line);
    }

    /// Append a body line attributed to `loc` (continuation members).
    pub fn write_at(&mut self, loc: Loc, code: impl Into<String>) {
        let origin = Origin {
            source: self.state.path.clone(),
            line: loc.line,
            column: loc.column,
        };
        self.state.push(Section::Body, Line::new(code, Some(origin)));
    }

    /// Literal output at the body cursor.
    pub fn text(&mut self, content: &str) {
        let origin = self.origin();
        self.state.text(content, origin);
    }

    /// Append a line to the epilogue (runs after the body).
    pub fn epilogue(&mut self, code: impl Into<String>) {
        let line = Line::new(code, self.origin());
        self.state.push(Section::Epilogue, line);
    }

    /// Append a line to the root chunk, ahead of every inlined dependency.
    pub fn hoist(&mut self, code: impl Into<String>) {
        self.session.hoisted.push(Line::new(code, None));
    }

    pub fn indent(&mut self) {
        self.state.indent();
    }

    pub fn dedent(&mut self) {
        self.state.dedent();
    }

    /// A fresh local name, unique within the template.
    pub fn unique_name(&mut self, prefix: &str) -> String {
        self.state.unique_name(prefix)
    }

    /// Emit `nodes` at the body cursor.
    pub fn render(&mut self, nodes: &[Node]) -> Result<(), CompileError> {
        self.compiler.emit_nodes(self.session, self.state, nodes)
    }

    /// Render `nodes` into a fresh local and return its name.
    pub fn capture(&mut self, nodes: &[Node]) -> Result<String, CompileError> {
        let var = self.unique_name("capture");
        self.write(format!("local {var}"));
        self.write("do");
        self.indent();
        self.write("local __out = {}");
        self.render(nodes)?;
        self.write(format!("{var} = table.concat(__out)"));
        self.dedent();
        self.write("end");
        Ok(var)
    }

    // =========================================================================
    // Dependencies
    // =========================================================================

    /// Compile `request` (relative to this template) and inline it as a
    /// local callable. Repeated requests share one callable.
    pub fn depend(&mut self, request: &str) -> Result<Dependency, CompileError> {
        let path = self.compiler.resolver().resolve(request, Some(&self.state.path));
        if let Some(dependency) = self.state.dependencies.get(&path) {
            return Ok(dependency.clone());
        }

        let unit = self.compiler.compile_unit(self.session, &path)?;
        let ident = self.state.unique_name("dep");

        let origin = self.origin();
        self.state.push(
            Section::Prologue,
            Line::new(format!("local {ident} = function(...)"), origin.clone()),
        );
        let inlined = Unit::header()
            .into_iter()
            .chain(unit.lines.iter().cloned())
            .chain([Unit::footer()]);
        for line in inlined {
            self.state.push(Section::Prologue, line.indented(1));
        }
        self.state.push(Section::Prologue, Line::new("end", origin));

        self.state.is_async |= unit.is_async;
        self.state.transitive.extend(unit.referenced());

        let dependency = Dependency {
            path: path.clone(),
            ident,
            is_async: unit.is_async,
            free: unit.free.clone(),
        };
        self.state.dependencies.insert(path, dependency.clone());
        Ok(dependency)
    }

    /// Call expression for an inlined dependency. Template-local names the
    /// dependency reads are overlaid on the locals bag; asynchronous
    /// dependencies are awaited.
    pub fn call(&self, dependency: &Dependency) -> String {
        let shared: Vec<&String> = dependency.free.intersection(&self.state.declared).collect();
        let scope = if shared.is_empty() {
            "locals".to_string()
        } else {
            let fields: Vec<String> = shared.iter().map(|n| format!("{n} = {n}")).collect();
            format!("__scope(locals, {{ {} }})", fields.join(", "))
        };
        let call = format!("{}({scope}, globals)", dependency.ident);
        if dependency.is_async {
            format!("{}({call})", self.compiler.options().async_marker)
        } else {
            call
        }
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    /// Mark `name` as bound inside the template so it gets no hygiene binding.
    pub fn declare(&mut self, name: impl Into<String>) {
        self.state.declared.insert(name.into());
    }

    /// Watch `name` for the rest of this compilation.
    pub fn watch(&mut self, hook: IdentifierHook) {
        self.state.hooks.push(hook);
    }

    pub fn mark_async(&mut self) {
        self.state.is_async = true;
    }

    pub fn is_async(&self) -> bool {
        self.state.is_async
    }

    /// A located error for the current node.
    pub fn reject(&self, message: impl Into<String>) -> CompileError {
        CompileError::handler(&self.state.path, self.loc(), message)
    }
}
