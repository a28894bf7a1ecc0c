//! The seam between the parser and whoever owns the directive/element catalog.
//!
//! The parser only needs to know which names are registered and how their
//! blocks are shaped. The compiler's registry implements [`SyntaxTable`];
//! [`SyntaxMap`] is a plain map-backed table for standalone use.

use std::collections::HashMap;

/// How a directive or element takes child content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChildrenMode {
    /// Never opens a block.
    #[default]
    None,
    /// Always opens a block, closed explicitly or at end of input.
    Required,
    /// Opens a block only if a matching close token appears later in the source.
    Auto,
}

/// The block shape of a registered directive or element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSyntax {
    pub children: ChildrenMode,
    /// Names of continuation members that attach to this node (`else`, `empty`).
    pub related: Vec<String>,
    /// Capture children verbatim (only interpolation applies).
    pub raw_content: bool,
}

impl BlockSyntax {
    pub fn new(children: ChildrenMode) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }

    pub fn with_related<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_raw_content(mut self) -> Self {
        self.raw_content = true;
        self
    }
}

/// Name lookups the parser performs while scanning.
pub trait SyntaxTable {
    /// Block shape of a registered directive.
    fn directive(&self, name: &str) -> Option<BlockSyntax>;

    /// Block shape of a registered element tag.
    fn element(&self, tag: &str) -> Option<BlockSyntax>;

    /// Length of the longest registered directive name that is a strict
    /// prefix of `name`.
    fn longest_directive_prefix(&self, name: &str) -> Option<usize>;
}

/// A literal-name syntax table.
#[derive(Debug, Clone, Default)]
pub struct SyntaxMap {
    directives: HashMap<String, BlockSyntax>,
    elements: HashMap<String, BlockSyntax>,
}

impl SyntaxMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directive(mut self, name: impl Into<String>, syntax: BlockSyntax) -> Self {
        self.directives.insert(name.into(), syntax);
        self
    }

    pub fn element(mut self, tag: impl Into<String>, syntax: BlockSyntax) -> Self {
        self.elements.insert(tag.into(), syntax);
        self
    }
}

impl SyntaxTable for SyntaxMap {
    fn directive(&self, name: &str) -> Option<BlockSyntax> {
        self.directives.get(name).cloned()
    }

    fn element(&self, tag: &str) -> Option<BlockSyntax> {
        self.elements.get(tag).cloned()
    }

    fn longest_directive_prefix(&self, name: &str) -> Option<usize> {
        self.directives
            .keys()
            .filter(|k| k.len() < name.len() && name.starts_with(k.as_str()))
            .map(String::len)
            .max()
    }
}
