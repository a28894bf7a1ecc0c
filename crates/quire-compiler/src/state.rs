//! Per-compilation buffers and bookkeeping.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::api::Dependency;
use crate::lua;
use crate::registry::IdentifierHook;

/// Template position a generated line came from (one-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Origin {
    pub source: String,
    pub line: usize,
    pub column: usize,
}

/// One generated line. `verbatim` lines are copied from raw code and
/// advance one template line each.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Line {
    pub text: String,
    pub origin: Option<Origin>,
    pub verbatim: bool,
}

impl Line {
    pub fn new(text: impl Into<String>, origin: Option<Origin>) -> Self {
        Self {
            text: text.into(),
            origin,
            verbatim: false,
        }
    }

    pub fn verbatim(text: impl Into<String>, origin: Origin) -> Self {
        Self {
            text: text.into(),
            origin: Some(origin),
            verbatim: true,
        }
    }

    /// Verbatim lines keep their text untouched.
    pub fn indented(&self, levels: usize) -> Self {
        let mut line = self.clone();
        if self.verbatim {
            return line;
        }
        line.text = format!("{}{}", "  ".repeat(levels), self.text);
        line
    }
}

/// The three write ordinates of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Section {
    Prologue,
    Body,
    Epilogue,
}

/// Buffers of the template currently being compiled.
#[derive(Debug)]
pub(crate) struct CompilerState {
    pub path: String,
    pub prologue: Vec<Line>,
    pub body: Vec<Line>,
    pub epilogue: Vec<Line>,
    pub indent: usize,
    counters: HashMap<String, usize>,
    /// Resolved path to inlined callable.
    pub dependencies: IndexMap<String, Dependency>,
    /// Names read by this template's own expressions.
    pub free: BTreeSet<String>,
    /// Names read by inlined dependencies.
    pub transitive: BTreeSet<String>,
    /// Names bound inside the template (loop variables, raw-code locals).
    pub declared: BTreeSet<String>,
    /// Hooks registered through the API for this compilation.
    pub hooks: Vec<IdentifierHook>,
    /// Hooks fired so far; their names are never hygiene-bound.
    pub fired: BTreeSet<String>,
    pub is_async: bool,
    pending: Option<(String, Option<Origin>)>,
}

impl CompilerState {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            prologue: Vec::new(),
            body: Vec::new(),
            epilogue: Vec::new(),
            indent: 0,
            counters: HashMap::new(),
            dependencies: IndexMap::new(),
            free: BTreeSet::new(),
            transitive: BTreeSet::new(),
            declared: BTreeSet::new(),
            hooks: Vec::new(),
            fired: BTreeSet::new(),
            is_async: false,
            pending: None,
        }
    }

    pub fn push(&mut self, section: Section, line: Line) {
        match section {
            Section::Prologue => self.prologue.push(line),
            Section::Epilogue => self.epilogue.push(line),
            Section::Body => {
                self.flush_text();
                let line = line.indented(self.indent);
                self.body.push(line);
            }
        }
    }

    /// Buffer literal output; consecutive runs become one append.
    pub fn text(&mut self, content: &str, origin: Option<Origin>) {
        if content.is_empty() {
            return;
        }
        match &mut self.pending {
            Some((buffered, _)) => buffered.push_str(content),
            None => self.pending = Some((content.to_string(), origin)),
        }
    }

    pub fn flush_text(&mut self) {
        if let Some((content, origin)) = self.pending.take() {
            let line = Line::new(format!("__out[#__out + 1] = {}", lua::quote(&content)), origin);
            self.body.push(line.indented(self.indent));
        }
    }

    /// `__<prefix>_<n>`, counted per template.
    pub fn unique_name(&mut self, prefix: &str) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        format!("__{prefix}_{counter}")
    }

    pub fn indent(&mut self) {
        self.flush_text();
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.flush_text();
        self.indent = self.indent.saturating_sub(1);
    }

    /// Everything emitted so far, for reference scanning.
    pub fn code_text(&self) -> String {
        self.prologue
            .iter()
            .chain(&self.body)
            .chain(&self.epilogue)
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A compiled template, ready to be wrapped as a chunk or inlined.
#[derive(Debug, Clone)]
pub(crate) struct Unit {
    pub path: String,
    pub source: String,
    /// Hygiene bindings, prologue, body and epilogue.
    pub lines: Vec<Line>,
    pub is_async: bool,
    pub free: BTreeSet<String>,
    pub transitive: BTreeSet<String>,
    pub dependencies: IndexMap<String, String>,
    /// Names bound from the data bags.
    pub identifiers: BTreeSet<String>,
}

impl Unit {
    /// Lines binding the data bags and the output accumulator.
    pub fn header() -> Vec<Line> {
        [
            "local locals, globals = ...",
            "locals = locals or {}",
            "globals = globals or {}",
            "local __out = {}",
        ]
        .into_iter()
        .map(|text| Line::new(text, None))
        .collect()
    }

    pub fn footer() -> Line {
        Line::new("return table.concat(__out)", None)
    }

    /// Every name this unit reads, its dependencies included.
    pub fn referenced(&self) -> BTreeSet<String> {
        self.free.union(&self.transitive).cloned().collect()
    }
}

/// State shared by one root compilation and every template it inlines.
#[derive(Debug, Default)]
pub(crate) struct Session {
    /// Templates currently being compiled, outermost first.
    pub compiling: Vec<String>,
    /// Every template loaded, with its modification stamp.
    pub sources: IndexMap<String, Option<u64>>,
    pub units: HashMap<String, Arc<Unit>>,
    /// Unique hooks already fired anywhere in this compilation.
    pub unique_fired: HashSet<String>,
    /// Root-level lines shared with all inlined dependencies.
    pub hoisted: Vec<Line>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(line: usize) -> Option<Origin> {
        Some(Origin {
            source: "t.quire".into(),
            line,
            column: 1,
        })
    }

    #[test]
    fn test_text_runs_are_batched() {
        let mut state = CompilerState::new("t.quire");
        state.text("a", origin(1));
        state.text("b\n", origin(1));
        state.text("c", origin(2));
        state.flush_text();

        assert_eq!(state.body.len(), 1);
        assert_eq!(state.body[0].text, "__out[#__out + 1] = \"ab\\nc\"");
        assert_eq!(state.body[0].origin, origin(1));
    }

    #[test]
    fn test_body_write_flushes_and_indents() {
        let mut state = CompilerState::new("t.quire");
        state.push(Section::Body, Line::new("if x then", None));
        state.indent();
        state.text("yes", None);
        state.dedent();
        state.push(Section::Body, Line::new("end", None));

        let texts: Vec<&str> = state.body.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["if x then", "  __out[#__out + 1] = \"yes\"", "end"]);
    }

    #[test]
    fn test_prologue_does_not_flush_text() {
        let mut state = CompilerState::new("t.quire");
        state.text("pending", None);
        state.push(Section::Prologue, Line::new("local a = 1", None));
        assert!(state.body.is_empty());
        assert_eq!(state.prologue.len(), 1);
    }

    #[test]
    fn test_unique_names_count_per_prefix() {
        let mut state = CompilerState::new("t.quire");
        assert_eq!(state.unique_name("dep"), "__dep_1");
        assert_eq!(state.unique_name("dep"), "__dep_2");
        assert_eq!(state.unique_name("loop"), "__loop_1");
    }
}
