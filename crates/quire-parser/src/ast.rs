//! Abstract Syntax Tree for Quire templates.
//!
//! The tree is a closed sum of five node kinds. Expression text inside
//! interpolations, directive arguments and dynamic attributes is kept as
//! opaque host-code source; nothing here parses it.

use serde::{Deserialize, Serialize};

/// A position in the template source (1-based line and column).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Loc {
    pub line: usize,
    pub column: usize,
}

impl Loc {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A parsed template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub nodes: Vec<Node>,
}

/// A node in the template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal output text.
    Text { content: String, loc: Loc },

    /// `{{ expr }}` (escaped) or `{{{ expr }}}` (raw).
    Interpolation { content: String, raw: bool, loc: Loc },

    /// `@code ... @endcode`, emitted into the generated chunk verbatim.
    RawCode { content: String, loc: Loc },

    /// `@name(args)` with optional block content.
    Directive(Directive),

    /// A registered tag-like element.
    Element(Element),
}

impl Node {
    pub fn loc(&self) -> Loc {
        match self {
            Node::Text { loc, .. } | Node::Interpolation { loc, .. } | Node::RawCode { loc, .. } => {
                *loc
            }
            Node::Directive(d) => d.loc,
            Node::Element(e) => e.loc,
        }
    }

    /// True for text nodes that contain only whitespace.
    pub fn is_blank_text(&self) -> bool {
        matches!(self, Node::Text { content, .. } if content.trim().is_empty())
    }
}

/// A directive node: `@if(cond) ... @endif`.
///
/// `related` holds continuation members of a chain (`@elseif`, `@else`,
/// `@empty`) in source order. Only the chain head appears in its parent's
/// `children`.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: String,
    /// Raw text between the parentheses, `None` when no parentheses follow the name.
    pub args: Option<String>,
    pub children: Vec<Node>,
    pub related: Vec<Node>,
    pub loc: Loc,
}

/// An element node: `<x-card title="Hi" open>...</x-card>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag_name: String,
    /// Attributes in source order.
    pub attributes: Vec<Attribute>,
    /// Self-closed or childless.
    pub void: bool,
    pub children: Vec<Node>,
    pub related: Vec<Node>,
    pub loc: Loc,
}

impl Element {
    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// An attribute on an element.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
    pub loc: Loc,
}

/// The four attribute value forms.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// `disabled`
    Bare,
    /// `count=(items + 1)`, host-code expression.
    Expression(String),
    /// `title="Hello"` or `title='Hello'`
    Quoted(String),
    /// `size=large`
    Unquoted(String),
}
