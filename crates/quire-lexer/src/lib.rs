//! Quire Lexer
//!
//! Tokenizes the host-language (Lua) text embedded in templates: interpolated
//! expressions, directive arguments, dynamic attribute values and raw code
//! blocks. The template compiler never parses this text; it only inspects
//! tokens to find referenced names, local declarations and the suspension
//! marker.
//!
//! # Example
//!
//! ```
//! use quire_lexer::{references, Scanner};
//!
//! let tokens = Scanner::tokenize("");
//! assert_eq!(tokens.len(), 1); // Just EOF
//!
//! let names = references("user.name .. suffix");
//! assert!(names.contains("user") && names.contains("suffix"));
//! ```

pub mod analysis;
pub mod scanner;
pub mod token;

pub use analysis::{contains_identifier, declarations, references};
pub use scanner::Scanner;
pub use token::{is_keyword, Keyword, Span, Token, TokenKind};
