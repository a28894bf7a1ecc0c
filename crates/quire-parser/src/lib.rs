//! Quire Parser
//!
//! Turns template text into a [`Document`] tree. Directive and element names
//! are recognized through a [`SyntaxTable`], so the same parser serves any
//! catalog of extensions. Expression text is carried through untouched.
//!
//! # Example
//!
//! ```
//! use quire_parser::{parse, BlockSyntax, ChildrenMode, Node, ParserOptions, SyntaxMap};
//!
//! let table = SyntaxMap::new().directive(
//!     "if",
//!     BlockSyntax::new(ChildrenMode::Required).with_related(["else"]),
//! );
//! let doc = parse("@if(ok)yes@else no@endif", &table, &ParserOptions::default());
//! assert!(matches!(&doc.nodes[0], Node::Directive(d) if d.related.len() == 1));
//! ```

pub mod ast;
mod cursor;
pub mod parser;
pub mod syntax;

pub use ast::{Attribute, AttributeValue, Directive, Document, Element, Loc, Node};
pub use parser::{parse, Parser, ParserOptions};
pub use syntax::{BlockSyntax, ChildrenMode, SyntaxMap, SyntaxTable};
