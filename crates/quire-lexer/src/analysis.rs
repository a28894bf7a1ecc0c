//! Token-level inspection of host-code text.
//!
//! Expression text is opaque to the template language; these helpers only
//! look at token shapes to answer three questions: which bare names a piece
//! of code reads, which names it binds locally, and whether a given name
//! appears at all. String contents and comments are never inspected.

use std::collections::BTreeSet;

use crate::scanner::Scanner;
use crate::token::{Keyword, Token, TokenKind};

/// Tokens that carry meaning (comments and end-of-input removed).
fn significant(source: &str) -> Vec<Token> {
    Scanner::tokenize(source)
        .into_iter()
        .filter(|t| !matches!(t.kind, TokenKind::Comment(_) | TokenKind::Eof))
        .collect()
}

/// Collect the bare identifiers referenced by `source`.
///
/// Skips keywords, field and method names (`a.b`, `a:b`), labels and goto
/// targets, and keys of table constructors (`{ key = value }`).
pub fn references(source: &str) -> BTreeSet<String> {
    let tokens = significant(source);
    let mut found = BTreeSet::new();
    let mut brackets: Vec<&TokenKind> = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| &tokens[p].kind);
        let next = tokens.get(i + 1).map(|t| &t.kind);

        match &token.kind {
            TokenKind::LParen | TokenKind::LBrace | TokenKind::LBracket => {
                brackets.push(&token.kind);
            }
            TokenKind::RParen | TokenKind::RBrace | TokenKind::RBracket => {
                brackets.pop();
            }
            TokenKind::Identifier(name) => {
                let qualified = matches!(
                    prev,
                    Some(TokenKind::Dot | TokenKind::Colon | TokenKind::DoubleColon)
                        | Some(TokenKind::Keyword(Keyword::Goto))
                );
                let table_key = matches!(brackets.last(), Some(TokenKind::LBrace))
                    && matches!(
                        prev,
                        Some(TokenKind::LBrace | TokenKind::Comma | TokenKind::Semicolon)
                    )
                    && matches!(next, Some(TokenKind::Assign));

                if !qualified && !table_key {
                    found.insert(name.clone());
                }
            }
            _ => {}
        }
    }

    found
}

/// Collect the names `source` binds locally: `local` names (including
/// `local function`), numeric and generic `for` variables, and function
/// parameters (plus the implicit `self` of `function a:b()`).
pub fn declarations(source: &str) -> BTreeSet<String> {
    let tokens = significant(source);
    let mut found = BTreeSet::new();
    let mut i = 0;

    while i < tokens.len() {
        match &tokens[i].kind {
            TokenKind::Keyword(Keyword::Local) => {
                i += 1;
                if matches!(tokens.get(i).map(|t| &t.kind), Some(TokenKind::Keyword(Keyword::Function))) {
                    if let Some(name) = tokens.get(i + 1).and_then(Token::identifier) {
                        found.insert(name.to_string());
                    }
                    continue;
                }
                i = collect_name_list(&tokens, i, &mut found);
            }
            TokenKind::Keyword(Keyword::For) => {
                i = collect_name_list(&tokens, i + 1, &mut found);
            }
            TokenKind::Keyword(Keyword::Function) => {
                i += 1;
                // Skip the (possibly qualified) function name up to the parameter list.
                while let Some(token) = tokens.get(i) {
                    match &token.kind {
                        TokenKind::LParen => break,
                        TokenKind::Colon => {
                            found.insert("self".to_string());
                        }
                        _ => {}
                    }
                    i += 1;
                }
                i += 1;
                while let Some(token) = tokens.get(i) {
                    match &token.kind {
                        TokenKind::RParen => break,
                        TokenKind::Identifier(name) => {
                            found.insert(name.clone());
                        }
                        _ => {}
                    }
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    found
}

/// Read a comma-separated name list starting at `i`, tolerating Lua 5.4
/// attributes (`local x <const>`). Returns the index after the list.
fn collect_name_list(tokens: &[Token], mut i: usize, found: &mut BTreeSet<String>) -> usize {
    loop {
        let Some(name) = tokens.get(i).and_then(Token::identifier) else {
            return i;
        };
        found.insert(name.to_string());
        i += 1;

        if matches!(tokens.get(i).map(|t| &t.kind), Some(TokenKind::Operator(op)) if op == "<") {
            i += 3; // `<` attrib `>`
        }
        if !matches!(tokens.get(i).map(|t| &t.kind), Some(TokenKind::Comma)) {
            return i;
        }
        i += 1;
    }
}

/// True when `name` appears as a bare identifier reference in `source`.
pub fn contains_identifier(source: &str, name: &str) -> bool {
    references(source).contains(name)
}
