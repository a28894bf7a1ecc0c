//! Code generator: turns a parsed template into a Lua render chunk.
//!
//! ```text
//! source ─ parse ─▶ Document ─ collect ─▶ free/declared names
//!                       │
//!                       └─ emit ─▶ prologue/body/epilogue ─ hooks ─▶ hygiene ─▶ Unit ─ finish ─▶ CompiledArtifact
//! ```
//!
//! Dependencies requested by handlers are compiled through the same path
//! (`compile_unit`) inside one session, which owns the cycle guard, the
//! per-compilation unit memo and the hoisted root lines.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use quire_lexer::{contains_identifier, declarations, references};
use quire_parser::{AttributeValue, Document, Node};

use crate::api::CompilerApi;
use crate::artifact::{CompiledArtifact, ANNOTATION, TRAILER, VERBATIM_ANNOTATION};
use crate::error::CompileError;
use crate::lua;
use crate::options::CompilerOptions;
use crate::position_map::{PositionMap, Segment};
use crate::registry::{IdentifierHook, Registry};
use crate::resolver::{DefaultResolver, Loader, PathResolver};
use crate::state::{CompilerState, Line, Origin, Section, Session, Unit};

/// Most hygiene bindings a unit emits as Lua locals.
const LOCAL_BINDING_LIMIT: usize = 120;

/// Compiles templates against one registry.
///
/// Every call runs in a fresh session, so a compiler can be shared between
/// threads.
#[derive(Clone)]
pub struct Compiler {
    registry: Arc<Registry>,
    loader: Arc<dyn Loader>,
    resolver: Arc<dyn PathResolver>,
    options: CompilerOptions,
}

impl fmt::Debug for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Compiler {
    pub fn new(registry: Arc<Registry>, loader: Arc<dyn Loader>) -> Self {
        Self {
            registry,
            loader,
            resolver: Arc::new(DefaultResolver::default()),
            options: CompilerOptions::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn PathResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn loader(&self) -> &dyn Loader {
        self.loader.as_ref()
    }

    pub fn resolver(&self) -> &dyn PathResolver {
        self.resolver.as_ref()
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Canonical path of a top-level request.
    pub fn resolve(&self, request: &str) -> String {
        self.resolver.resolve(request, None)
    }

    /// Resolve, load and compile a template.
    pub fn compile(&self, request: &str) -> Result<CompiledArtifact, CompileError> {
        let path = self.resolve(request);
        let mut session = Session::default();
        let unit = self.compile_unit(&mut session, &path)?;
        Ok(self.finish(&session, &unit))
    }

    /// Compile in-memory template text. `path` names it in diagnostics and
    /// anchors relative includes.
    pub fn compile_source(&self, path: &str, source: &str) -> Result<CompiledArtifact, CompileError> {
        let document = quire_parser::parse(source, self.registry.as_ref(), &self.options.parser_options());
        self.compile_document(path, source, &document)
    }

    /// Compile an already parsed template.
    pub fn compile_document(
        &self,
        path: &str,
        source: &str,
        document: &Document,
    ) -> Result<CompiledArtifact, CompileError> {
        let mut session = Session::default();
        session.sources.insert(path.to_string(), None);
        session.compiling.push(path.to_string());
        let unit = self.build_unit(&mut session, path, source, document)?;
        Ok(self.finish(&session, &unit))
    }

    // =========================================================================
    // Units
    // =========================================================================

    pub(crate) fn compile_unit(&self, session: &mut Session, path: &str) -> Result<Arc<Unit>, CompileError> {
        if let Some(at) = session.compiling.iter().position(|p| p == path) {
            let mut chain = session.compiling[at..].to_vec();
            chain.push(path.to_string());
            return Err(CompileError::CircularDependency { chain });
        }
        if let Some(unit) = session.units.get(path) {
            return Ok(Arc::clone(unit));
        }

        let resource = self.loader.load(path)?;
        session.sources.insert(path.to_string(), Some(resource.modified));
        tracing::debug!(path, "compiling template");

        let document =
            quire_parser::parse(&resource.source, self.registry.as_ref(), &self.options.parser_options());
        session.compiling.push(path.to_string());
        let built = self.build_unit(session, path, &resource.source, &document);
        session.compiling.pop();

        let unit = Arc::new(built?);
        session.units.insert(path.to_string(), Arc::clone(&unit));
        Ok(unit)
    }

    fn build_unit(
        &self,
        session: &mut Session,
        path: &str,
        source: &str,
        document: &Document,
    ) -> Result<Unit, CompileError> {
        let mut state = CompilerState::new(path);
        self.collect(&document.nodes, &mut state);
        self.emit_nodes(session, &mut state, &document.nodes)?;
        state.flush_text();
        self.resolve_hooks(session, &mut state)?;

        let identifiers = self.bindable(session, &state);
        let mut lines = bindings(&identifiers);
        lines.append(&mut state.prologue);
        lines.append(&mut state.body);
        lines.append(&mut state.epilogue);

        Ok(Unit {
            path: path.to_string(),
            source: source.to_string(),
            lines,
            is_async: state.is_async,
            free: state.free,
            transitive: state.transitive,
            dependencies: state
                .dependencies
                .into_iter()
                .map(|(path, dependency)| (path, dependency.ident))
                .collect(),
            identifiers,
        })
    }

    // =========================================================================
    // Identifier collection
    // =========================================================================

    fn collect(&self, nodes: &[Node], state: &mut CompilerState) {
        for node in nodes {
            match node {
                Node::Text { .. } => {}
                Node::Interpolation { content, .. } => self.scan_expression(content, state),
                Node::RawCode { content, .. } => {
                    self.scan_expression(content, state);
                    state.declared.extend(declarations(content));
                }
                Node::Directive(directive) => {
                    for segment in directive.args.as_deref().map(lua::split_args).unwrap_or_default() {
                        let expression = lua::named_segment(&segment).map_or(segment.as_str(), |(_, e)| e);
                        self.scan_expression(expression, state);
                    }
                    self.collect(&directive.children, state);
                    self.collect(&directive.related, state);
                }
                Node::Element(element) => {
                    for attribute in &element.attributes {
                        if let AttributeValue::Expression(expression) = &attribute.value {
                            self.scan_expression(expression, state);
                        }
                    }
                    self.collect(&element.children, state);
                    self.collect(&element.related, state);
                }
            }
        }
    }

    fn scan_expression(&self, expression: &str, state: &mut CompilerState) {
        if contains_identifier(expression, &self.options.async_marker) {
            state.is_async = true;
        }
        state.free.extend(references(expression));
    }

    /// Free names that get a data-bag binding. Names the template declares
    /// itself are bound too: loop variables and raw-code locals shadow the
    /// binding inside their own block only.
    fn bindable(&self, session: &Session, state: &CompilerState) -> BTreeSet<String> {
        state
            .free
            .iter()
            .filter(|name| {
                !state.fired.contains(*name)
                    && !session.unique_fired.contains(*name)
                    && !lua::is_reserved(name)
                    && **name != self.options.async_marker
            })
            .cloned()
            .collect()
    }

    // =========================================================================
    // Emission
    // =========================================================================

    pub(crate) fn emit_nodes(
        &self,
        session: &mut Session,
        state: &mut CompilerState,
        nodes: &[Node],
    ) -> Result<(), CompileError> {
        for node in nodes {
            self.emit_node(session, state, node)?;
        }
        Ok(())
    }

    fn emit_node(&self, session: &mut Session, state: &mut CompilerState, node: &Node) -> Result<(), CompileError> {
        let loc = node.loc();
        let origin = Origin {
            source: state.path.clone(),
            line: loc.line,
            column: loc.column,
        };

        match node {
            Node::Text { content, .. } => state.text(content, Some(origin)),
            Node::Interpolation { content, raw, .. } => {
                let expression = content.trim();
                if !expression.is_empty() {
                    let helper = if *raw { "__raw" } else { "__escape" };
                    let leading = &content[..content.len() - content.trim_start().len()];
                    let origin = match leading.matches('\n').count() {
                        0 => origin,
                        skipped => Origin {
                            line: origin.line + skipped,
                            column: 1,
                            ..origin
                        },
                    };
                    let line = Line::new(format!("__out[#__out + 1] = {helper}({expression})"), Some(origin));
                    state.push(Section::Body, line);
                }
            }
            Node::RawCode { content, .. } => {
                for (offset, text) in content.lines().enumerate() {
                    let origin = Origin {
                        source: origin.source.clone(),
                        line: loc.line + offset,
                        column: if offset == 0 { loc.column + "@code".len() } else { 1 },
                    };
                    state.push(Section::Body, Line::verbatim(text, origin));
                }
            }
            Node::Directive(directive) => match self.registry.find_directive(&directive.name) {
                Some(definition) => {
                    let mut api = CompilerApi {
                        compiler: self,
                        session,
                        state,
                        node: Some(node),
                    };
                    definition.handler().call(&mut api)?;
                }
                None => {
                    let mut markup = format!("@{}", directive.name);
                    if let Some(args) = &directive.args {
                        markup.push_str(&format!("({args})"));
                    }
                    state.text(&markup, Some(origin));
                    self.emit_nodes(session, state, &directive.children)?;
                    self.emit_nodes(session, state, &directive.related)?;
                }
            },
            Node::Element(element) => match self.registry.find_element(&element.tag_name) {
                Some(definition) => {
                    let mut api = CompilerApi {
                        compiler: self,
                        session,
                        state,
                        node: Some(node),
                    };
                    definition.handler().call(&mut api)?;
                }
                None => {
                    state.text(&format!("<{}", element.tag_name), Some(origin.clone()));
                    for attribute in &element.attributes {
                        match &attribute.value {
                            AttributeValue::Bare => state.text(&format!(" {}", attribute.name), None),
                            AttributeValue::Quoted(value) => {
                                state.text(&format!(" {}=\"{value}\"", attribute.name), None)
                            }
                            AttributeValue::Unquoted(value) => {
                                state.text(&format!(" {}={value}", attribute.name), None)
                            }
                            AttributeValue::Expression(expression) => {
                                state.text(&format!(" {}=\"", attribute.name), None);
                                let at = Origin {
                                    source: state.path.clone(),
                                    line: attribute.loc.line,
                                    column: attribute.loc.column,
                                };
                                let line = Line::new(
                                    format!("__out[#__out + 1] = __escape({expression})"),
                                    Some(at),
                                );
                                state.push(Section::Body, line);
                                state.text("\"", None);
                            }
                        }
                    }
                    if element.void && element.children.is_empty() {
                        state.text(" />", None);
                    } else {
                        state.text(">", None);
                        self.emit_nodes(session, state, &element.children)?;
                        state.text(&format!("</{}>", element.tag_name), None);
                    }
                    self.emit_nodes(session, state, &element.related)?;
                }
            },
        }
        Ok(())
    }

    // =========================================================================
    // Identifier-used hooks
    // =========================================================================

    /// Fire hooks whose names show up in the free names or the emitted code
    /// until a pass fires nothing new.
    fn resolve_hooks(&self, session: &mut Session, state: &mut CompilerState) -> Result<(), CompileError> {
        let mut hooks = self.registry.hooks();

        for _ in 0..self.options.hook_iteration_limit {
            hooks.append(&mut state.hooks);

            let mut seen: BTreeSet<String> = state.free.union(&state.transitive).cloned().collect();
            seen.extend(references(&state.code_text()));
            for line in &session.hoisted {
                seen.extend(references(&line.text));
            }

            let mut pending: Vec<IdentifierHook> = Vec::new();
            for hook in &hooks {
                let name = hook.name();
                let fresh = seen.contains(name)
                    && !state.fired.contains(name)
                    && !(hook.is_unique() && session.unique_fired.contains(name))
                    && !pending.iter().any(|h| h.name() == name);
                if fresh {
                    pending.push(hook.clone());
                }
            }
            if pending.is_empty() {
                return Ok(());
            }

            for hook in pending {
                state.fired.insert(hook.name().to_string());
                if hook.is_unique() {
                    session.unique_fired.insert(hook.name().to_string());
                }
                tracing::debug!(hook = hook.name(), path = %state.path, "identifier hook fired");
                let mut api = CompilerApi {
                    compiler: self,
                    session: &mut *session,
                    state: &mut *state,
                    node: None,
                };
                hook.fire(&mut api)?;
                state.flush_text();
            }
        }

        tracing::warn!(
            path = %state.path,
            limit = self.options.hook_iteration_limit,
            "identifier hooks still firing at the iteration limit"
        );
        Ok(())
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    fn finish(&self, session: &Session, unit: &Unit) -> CompiledArtifact {
        let lines: Vec<Line> = Unit::header()
            .into_iter()
            .chain(session.hoisted.iter().cloned())
            .chain(unit.lines.iter().cloned())
            .chain([Unit::footer()])
            .flat_map(physical_lines)
            .collect();

        let (code, position_map) = if self.options.release {
            let code = lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n");
            (code, None)
        } else {
            let (code, map) = annotate(&unit.path, &lines);
            (code, Some(map))
        };

        CompiledArtifact {
            path: unit.path.clone(),
            source: unit.source.clone(),
            code,
            is_async: unit.is_async,
            dependencies: unit.dependencies.clone(),
            position_map,
            identifiers: unit.identifiers.clone(),
            sources: session.sources.clone(),
        }
    }
}

/// Split a generated line holding newlines. Pieces of a line with an origin
/// advance one template line each, like raw code, so an expression spanning
/// template lines maps line for line.
fn physical_lines(line: Line) -> Vec<Line> {
    if !line.text.contains('\n') {
        return vec![line];
    }
    line.text
        .split('\n')
        .enumerate()
        .map(|(offset, text)| Line {
            text: text.to_string(),
            origin: line.origin.as_ref().map(|o| Origin {
                source: o.source.clone(),
                line: o.line + offset,
                column: if offset == 0 { o.column } else { 1 },
            }),
            verbatim: line.verbatim || line.origin.is_some(),
        })
        .collect()
}

/// Hygiene bindings for `names`. Past [`LOCAL_BINDING_LIMIT`] the names are
/// served by one environment table instead, as Lua caps a function at 200
/// locals.
fn bindings(names: &BTreeSet<String>) -> Vec<Line> {
    if names.len() > LOCAL_BINDING_LIMIT {
        let list: Vec<String> = names.iter().map(|name| lua::quote(name)).collect();
        let line = format!("local _ENV = __env(locals, globals, _ENV, {{ {} }})", list.join(", "));
        return vec![Line::new(line, None)];
    }
    names
        .iter()
        .map(|name| {
            Line::new(
                format!("local {name} = locals.{name}; if {name} == nil then {name} = globals.{name} end"),
                None,
            )
        })
        .collect()
}

/// Interleave position annotations and build the matching position map.
fn annotate(path: &str, lines: &[Line]) -> (String, PositionMap) {
    let mut out: Vec<String> = Vec::new();
    let mut segments: Vec<Vec<Segment>> = Vec::new();
    let mut sources: IndexMap<String, ()> = IndexMap::new();
    let mut current: Option<(Option<&Origin>, bool)> = None;
    let mut previous: Option<&Line> = None;

    for line in lines {
        let continues_run = line.verbatim
            && previous.is_some_and(|p| {
                p.verbatim
                    && match (&p.origin, &line.origin) {
                        (Some(a), Some(b)) => a.source == b.source && a.line + 1 == b.line,
                        _ => false,
                    }
            });

        if !continues_run && current != Some((line.origin.as_ref(), line.verbatim)) {
            out.push(match &line.origin {
                Some(o) if line.verbatim => format!("{VERBATIM_ANNOTATION} {}:{}:{}", o.source, o.line, o.column),
                Some(o) => format!("{ANNOTATION} {}:{}:{}", o.source, o.line, o.column),
                None => ANNOTATION.to_string(),
            });
            segments.push(Vec::new());
            current = Some((line.origin.as_ref(), line.verbatim));
        }

        let mapped = line.origin.as_ref().map(|o| {
            let (source, _) = sources.insert_full(o.source.clone(), ());
            Segment {
                generated_column: line.text.len() - line.text.trim_start().len(),
                source,
                line: o.line.saturating_sub(1),
                column: o.column.saturating_sub(1),
            }
        });
        out.push(line.text.clone());
        segments.push(mapped.into_iter().collect());
        previous = Some(line);
    }

    out.push(format!("{TRAILER} {path}"));
    segments.push(Vec::new());

    let map = PositionMap::encode(sources.into_keys().collect(), &segments);
    (out.join("\n"), map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::resolver::MemoryLoader;
    use pretty_assertions::assert_eq;
    use quire_parser::{Attribute, Element, Loc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        fixtures::install(&mut registry);
        registry
    }

    fn compiler_with(registry: Registry, files: &[(&str, &str)]) -> Compiler {
        let loader = files
            .iter()
            .fold(MemoryLoader::new(), |loader, (path, source)| loader.with(*path, *source));
        Compiler::new(Arc::new(registry), Arc::new(loader))
    }

    fn compiler(files: &[(&str, &str)]) -> Compiler {
        compiler_with(registry(), files)
    }

    fn release(source: &str) -> CompiledArtifact {
        compiler(&[])
            .with_options(CompilerOptions::release())
            .compile_source("t.quire", source)
            .unwrap()
    }

    fn body(code: &str) -> Vec<&str> {
        code.lines().skip(4).collect()
    }

    fn line_of(code: &str, needle: &str) -> usize {
        code.lines().position(|l| l.contains(needle)).unwrap() + 1
    }

    // =========================================================================
    // Body emission
    // =========================================================================

    #[test]
    fn test_plain_text_is_one_append() {
        let artifact = release("Hello\n<b>world</b>");
        assert_eq!(
            artifact.code,
            [
                "local locals, globals = ...",
                "locals = locals or {}",
                "globals = globals or {}",
                "local __out = {}",
                "__out[#__out + 1] = \"Hello\\n<b>world</b>\"",
                "return table.concat(__out)",
            ]
            .join("\n")
        );
        assert!(artifact.identifiers.is_empty());
        assert!(!artifact.is_async);
    }

    #[test]
    fn test_if_else_chain() {
        let artifact = release("@if(cond)YES@else NO@endif");
        assert_eq!(
            body(&artifact.code),
            [
                "local cond = locals.cond; if cond == nil then cond = globals.cond end",
                "if cond then",
                "  __out[#__out + 1] = \"YES\"",
                "else",
                "  __out[#__out + 1] = \" NO\"",
                "end",
                "return table.concat(__out)",
            ]
        );
    }

    #[test]
    fn test_interpolation_helpers() {
        let artifact = release("{{ a }}{{{ b }}}{{ }}");
        assert_eq!(
            body(&artifact.code)[2..4].to_vec(),
            vec!["__out[#__out + 1] = __escape(a)", "__out[#__out + 1] = __raw(b)"]
        );
        assert_eq!(artifact.code.matches("__escape").count(), 1);
    }

    #[test]
    fn test_unknown_element_is_reserialized() {
        let loc = Loc::new(1, 1);
        let document = Document {
            nodes: vec![Node::Element(Element {
                tag_name: "y-box".into(),
                attributes: vec![
                    Attribute {
                        name: "id".into(),
                        value: AttributeValue::Quoted("a".into()),
                        loc,
                    },
                    Attribute {
                        name: "hidden".into(),
                        value: AttributeValue::Bare,
                        loc,
                    },
                ],
                void: false,
                children: vec![Node::Text {
                    content: "hi".into(),
                    loc,
                }],
                related: Vec::new(),
                loc,
            })],
        };
        let artifact = compiler(&[])
            .with_options(CompilerOptions::release())
            .compile_document("t.quire", "", &document)
            .unwrap();
        assert!(artifact
            .code
            .contains(r#"__out[#__out + 1] = "<y-box id=\"a\" hidden>hi</y-box>""#));
    }

    #[test]
    fn test_raw_code_is_verbatim() {
        let artifact = release("@code\n  local total = price * qty\n@endcode{{ total }}");
        assert!(artifact.code.contains("\n  local total = price * qty\n"));
        assert_eq!(
            artifact.identifiers.into_iter().collect::<Vec<_>>(),
            vec!["price".to_string(), "qty".to_string(), "total".to_string()]
        );
    }

    // =========================================================================
    // Hygiene
    // =========================================================================

    #[test]
    fn test_hygiene_skips_reserved() {
        let artifact = release("@each(item in items){{ item.name }} {{ tostring(count) }}{{ loop.index }}@endeach");
        assert_eq!(
            artifact.identifiers.into_iter().collect::<Vec<_>>(),
            vec!["count".to_string(), "item".to_string(), "items".to_string(), "loop".to_string()]
        );
    }

    #[test]
    fn test_loop_variable_keeps_outer_binding() {
        let artifact = release("@each(item in items){{ item }}@endeach|{{ item }}");
        let code = &artifact.code;
        let binding = line_of(code, "local item = locals.item; if item == nil then item = globals.item end");
        assert!(binding < line_of(code, "for _, item in ipairs(__list_1 or {}) do"));
    }

    #[test]
    fn test_many_identifiers_share_one_environment() {
        let source: String = (0..210).map(|n| format!("{{{{ v{n} }}}}")).collect();
        let artifact = release(&source);
        assert_eq!(artifact.identifiers.len(), 210);
        assert!(artifact
            .code
            .contains(r#"local _ENV = __env(locals, globals, _ENV, { "v0", "v1", "v10", "#));
        assert!(!artifact.code.contains("locals.v0"));
        let locals = artifact.code.lines().filter(|l| l.starts_with("local ")).count();
        assert_eq!(locals, 3);
    }

    #[test]
    fn test_binding_limit_keeps_locals() {
        let source: String = (0..LOCAL_BINDING_LIMIT).map(|n| format!("{{{{ v{n} }}}}")).collect();
        let artifact = release(&source);
        assert!(!artifact.code.contains("_ENV"));
        assert!(artifact.code.contains("local v0 = locals.v0;"));
    }

    #[test]
    fn test_hygiene_ignores_strings_and_fields() {
        let artifact = release("{{ user.name .. ' and friends' }}{{ t:method() }}");
        assert_eq!(
            artifact.identifiers.into_iter().collect::<Vec<_>>(),
            vec!["t".to_string(), "user".to_string()]
        );
    }

    #[test]
    fn test_recompile_is_deterministic() {
        let source = "@each(k, v in rows){{ k }}={{ v }}@endeach{{ z }}{{ a }}@include('part')";
        let compiler = compiler(&[("part.quire", "{{ b }}{{ await(c) }}")]);
        let first = compiler.compile_source("t.quire", source).unwrap();
        let second = compiler.compile_source("t.quire", source).unwrap();
        assert_eq!(first.code, second.code);
        assert_eq!(first.is_async, second.is_async);
        assert_eq!(first.position_map, second.position_map);
    }

    #[test]
    fn test_shared_compiler_across_threads() {
        let compiler = compiler(&[
            ("page.quire", "@each(item in items)@include('row')@endeach{{ await(x) }}"),
            ("row.quire", "<x-card title=(item)>{{ item }}</x-card>"),
        ]);
        let expected = compiler.compile("page").unwrap();
        let artifacts: Vec<CompiledArtifact> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| compiler.compile("page").unwrap()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        for artifact in artifacts {
            assert_eq!(artifact.code, expected.code);
            assert_eq!(artifact.is_async, expected.is_async);
            assert_eq!(artifact.position_map, expected.position_map);
        }
    }

    // =========================================================================
    // Dependencies
    // =========================================================================

    #[test]
    fn test_circular_dependency() {
        let compiler = compiler(&[("a.quire", "@include('b')"), ("b.quire", "@include('a')")]);
        let err = compiler.compile("a").unwrap_err();
        assert_eq!(
            err,
            CompileError::CircularDependency {
                chain: vec!["a.quire".into(), "b.quire".into(), "a.quire".into()],
            }
        );
        assert!(err.to_string().contains("a.quire -> b.quire"));
    }

    #[test]
    fn test_self_include_is_circular() {
        let compiler = compiler(&[("a.quire", "x @include('a')")]);
        assert!(matches!(
            compiler.compile("a"),
            Err(CompileError::CircularDependency { chain }) if chain.len() == 2
        ));
    }

    #[test]
    fn test_dependency_is_inlined_once() {
        let compiler = compiler(&[("page.quire", "@include('row') @include('row')"), ("row.quire", "<tr>")]);
        let artifact = compiler.compile("page").unwrap();
        assert_eq!(artifact.code.matches("local __dep_1 = function(...)").count(), 1);
        assert_eq!(artifact.code.matches("__dep_1(locals, globals)").count(), 2);
        assert!(!artifact.code.contains("__dep_2"));
        assert_eq!(artifact.dependencies.get("row.quire").map(String::as_str), Some("__dep_1"));
    }

    #[test]
    fn test_relative_include() {
        let compiler = compiler(&[("pages/list.quire", "@include('./row')"), ("pages/row.quire", "row")]);
        let artifact = compiler.compile("pages/list").unwrap();
        assert!(artifact.dependencies.contains_key("pages/row.quire"));
        assert_eq!(
            artifact.sources.keys().cloned().collect::<Vec<_>>(),
            vec!["pages/list.quire".to_string(), "pages/row.quire".to_string()]
        );
    }

    #[test]
    fn test_missing_dependency_fails() {
        let compiler = compiler(&[("page.quire", "@include('ghost')")]);
        assert!(matches!(
            compiler.compile("page"),
            Err(CompileError::Load { path, .. }) if path == "ghost.quire"
        ));
    }

    #[test]
    fn test_loop_variable_is_passed_to_dependency() {
        let compiler = compiler(&[("row.quire", "{{ item }}{{ title }}")]);
        let artifact = compiler
            .compile_source("list.quire", "@each(item in items)@include('row')@endeach")
            .unwrap();
        assert!(artifact
            .code
            .contains("__dep_1(__scope(locals, { item = item }), globals)"));
    }

    // =========================================================================
    // Async detection
    // =========================================================================

    #[test]
    fn test_async_marker_token() {
        assert!(release("{{ await(fetch()) }}").is_async);
        assert!(!release("{{ awaited }}{{ 'await' }}").is_async);
        assert!(!release("{{ await_all }}").identifiers.contains("await"));
    }

    #[test]
    fn test_async_dependency_upgrades_includer() {
        let compiler = compiler(&[("part.quire", "{{ await(load()) }}")]);
        let artifact = compiler.compile_source("page.quire", "{{ title }}@include('part')").unwrap();
        assert!(artifact.is_async);
        assert!(artifact.code.contains("await(__dep_1(locals, globals))"));
        assert!(!artifact.identifiers.contains("await"));
    }

    // =========================================================================
    // Identifier hooks
    // =========================================================================

    #[test]
    fn test_hook_claims_identifier() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let mut registry = registry();
        registry.watch(IdentifierHook::new("csrf", |api: &mut CompilerApi<'_>| -> Result<(), CompileError> {
            CALLS.fetch_add(1, Ordering::SeqCst);
            api.prologue("local csrf = \"token\"");
            Ok(())
        }));

        let artifact = compiler_with(registry, &[])
            .compile_source("t.quire", "{{ csrf }}{{ csrf }}{{ user }}")
            .unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(artifact.code.contains("local csrf = \"token\""));
        assert!(!artifact.identifiers.contains("csrf"));
        assert!(artifact.identifiers.contains("user"));
    }

    #[test]
    fn test_hooks_reach_fixpoint() {
        let artifact = release("@stack('js')");
        assert!(artifact.code.contains("local __stack_slots = {}"));
        assert!(artifact.code.contains("local __stacks = {}"));
        assert!(artifact.code.contains("for _, slot in ipairs(__stack_slots) do"));
    }

    #[test]
    fn test_hook_iteration_limit() {
        let options = CompilerOptions {
            hook_iteration_limit: 1,
            ..CompilerOptions::release()
        };
        let artifact = compiler(&[])
            .with_options(options)
            .compile_source("t.quire", "@stack('js')")
            .unwrap();
        assert!(artifact.code.contains("local __stack_slots = {}"));
        assert!(!artifact.code.contains("local __stacks = {}"));
    }

    #[test]
    fn test_unique_hook_fires_once_across_dependencies() {
        let compiler = compiler(&[
            ("page.quire", "@push('js')a@endpush@include('part')@stack('js')"),
            ("part.quire", "@push('js')b@endpush"),
        ]);
        let artifact = compiler.compile("page").unwrap();
        assert_eq!(artifact.code.matches("local __stacks = {}").count(), 1);
    }

    #[test]
    fn test_hook_registered_through_api() {
        let mut registry = registry();
        registry.register_directive(crate::registry::Definition::new(
            "mark",
            |api: &mut CompilerApi<'_>| -> Result<(), CompileError> {
                api.watch(IdentifierHook::new("__marker", |api: &mut CompilerApi<'_>| -> Result<(), CompileError> {
                    api.prologue("local __marker = function() end");
                    Ok(())
                }));
                api.write("__marker()");
                Ok(())
            },
        ));

        let artifact = compiler_with(registry, &[])
            .compile_source("t.quire", "@mark")
            .unwrap();
        assert!(artifact.code.contains("local __marker = function() end"));
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[test]
    fn test_handler_rejection_is_located() {
        let err = compiler(&[])
            .compile_source("t.quire", "line one\n  @include(name)")
            .unwrap_err();
        assert_eq!(err.location(), Some(("t.quire", Loc::new(2, 3))));
    }

    #[test]
    fn test_stray_else_is_rejected() {
        let err = compiler(&[]).compile_source("t.quire", "a @else b").unwrap_err();
        assert!(matches!(err, CompileError::Handler { line: 1, column: 3, .. }));
    }

    // =========================================================================
    // Position annotations
    // =========================================================================

    #[test]
    fn test_annotations_locate_template_lines() {
        let artifact = compiler(&[])
            .compile_source("t.quire", "first\nsecond\n  {{ x.y }}")
            .unwrap();
        let line = line_of(&artifact.code, "__escape(x.y)");
        let found = artifact.locate(line).unwrap();
        assert_eq!((found.path.as_str(), found.line, found.column), ("t.quire", 3, 3));
        assert!(artifact.code.ends_with("-- @artifact t.quire"));
    }

    #[test]
    fn test_position_map_agrees_with_annotations() {
        let artifact = compiler(&[])
            .compile_source("t.quire", "a\n@if(ok)\n{{ v }}\n@endif")
            .unwrap();
        let map = artifact.position_map.as_ref().unwrap();
        for needle in ["if ok then", "__escape(v)"] {
            let line = line_of(&artifact.code, needle);
            let annotated = artifact.locate(line).unwrap();
            let mapped = map.lookup(line, 1).unwrap();
            assert_eq!((mapped.line, mapped.column), (annotated.line, annotated.column));
        }
        assert_eq!(map.sources, vec!["t.quire".to_string()]);
    }

    #[test]
    fn test_multiline_expression_maps_each_line() {
        let artifact = compiler(&[]).compile_source("t.quire", "{{ 1 +\n  user.name }}").unwrap();
        let first = line_of(&artifact.code, "__escape(1 +");
        let second = line_of(&artifact.code, "user.name)");
        assert_eq!(second, first + 1);
        assert_eq!(artifact.locate(first).map(|l| (l.line, l.column)), Some((1, 1)));
        assert_eq!(artifact.locate(second).map(|l| (l.line, l.column)), Some((2, 1)));
        let map = artifact.position_map.as_ref().unwrap();
        assert_eq!(map.lookup(second, 1).map(|p| p.line), Some(2));
    }

    #[test]
    fn test_leading_newline_in_interpolation() {
        let artifact = compiler(&[]).compile_source("t.quire", "a {{\n   user.name }}").unwrap();
        let line = line_of(&artifact.code, "__escape(user.name)");
        assert_eq!(artifact.locate(line).map(|l| l.line), Some(2));
    }

    #[test]
    fn test_attribute_expression_is_located() {
        let artifact = compiler(&[])
            .compile_source("t.quire", "<x-card\n  title=(t.x)>b</x-card>")
            .unwrap();
        let line = line_of(&artifact.code, "__escape(t.x)");
        let found = artifact.locate(line).unwrap();
        assert_eq!((found.line, found.column), (2, 3));
    }

    #[test]
    fn test_reserialized_attribute_expression_is_located() {
        let document = Document {
            nodes: vec![Node::Element(Element {
                tag_name: "y-box".into(),
                attributes: vec![Attribute {
                    name: "title".into(),
                    value: AttributeValue::Expression("t.x".into()),
                    loc: Loc::new(2, 3),
                }],
                void: false,
                children: Vec::new(),
                related: Vec::new(),
                loc: Loc::new(1, 1),
            })],
        };
        let artifact = compiler(&[]).compile_document("t.quire", "", &document).unwrap();
        let line = line_of(&artifact.code, "__escape(t.x)");
        assert_eq!(artifact.locate(line).map(|l| l.line), Some(2));
    }

    #[test]
    fn test_hook_lines_have_no_location() {
        let artifact = compiler(&[])
            .compile_source("t.quire", "a\n@stack('js')\n@push('js')x@endpush")
            .unwrap();
        let line = line_of(&artifact.code, "for _, slot in ipairs(__stack_slots) do");
        assert_eq!(artifact.locate(line), None);
    }

    #[test]
    fn test_raw_code_lines_advance() {
        let artifact = compiler(&[])
            .compile_source("t.quire", "@code\nlocal a = 1\nlocal b = 2\n@endcode")
            .unwrap();
        assert!(artifact.code.contains("--@+ t.quire:1:6"));
        let line = line_of(&artifact.code, "local b = 2");
        assert_eq!(artifact.locate(line).map(|l| l.line), Some(3));
    }

    #[test]
    fn test_dependency_lines_keep_their_source() {
        let compiler = compiler(&[("part.quire", "\n{{ boom() }}")]);
        let artifact = compiler.compile_source("page.quire", "@include('part')").unwrap();
        let line = line_of(&artifact.code, "__escape(boom())");
        let found = artifact.locate(line).unwrap();
        assert_eq!((found.path.as_str(), found.line), ("part.quire", 2));
        assert!(artifact
            .position_map
            .unwrap()
            .sources
            .contains(&"part.quire".to_string()));
    }

    #[test]
    fn test_release_mode_has_no_annotations() {
        let artifact = release("a\n{{ b }}");
        assert!(!artifact.code.contains("--@"));
        assert!(!artifact.code.contains("@artifact"));
        assert!(artifact.position_map.is_none());
    }
}
