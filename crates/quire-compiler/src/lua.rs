//! Small helpers for reading and writing Lua source fragments.
//!
//! Directive arguments are opaque host code; these functions only split
//! them at top-level commas and recognize `name = expr` segments and plain
//! string literals.

/// Reserved context names that never receive a hygiene binding.
const RESERVED: &[&str] = &[
    "locals", "globals", "self", "_G", "_ENV", "_VERSION", "assert", "collectgarbage", "error",
    "getmetatable", "ipairs", "next", "pairs", "pcall", "print", "rawequal", "rawget", "rawlen",
    "rawset", "require", "select", "setmetatable", "tonumber", "tostring", "type", "xpcall",
    "coroutine", "math", "os", "string", "table", "utf8", "io", "debug", "load", "dofile",
    "loadfile",
];

/// True for names the generated chunk or the host already provides.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with("__") || RESERVED.contains(&name)
}

/// Split argument text at commas outside brackets and string literals.
/// Segments are trimmed; an empty input yields no segments.
pub fn split_args(args: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in args.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            current.push(c);
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                segments.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }

    if !current.trim().is_empty() || !segments.is_empty() {
        segments.push(current.trim().to_string());
    }
    segments
}

/// Recognize a `name = expr` segment (a single `=`, not a comparison).
pub fn named_segment(segment: &str) -> Option<(&str, &str)> {
    let bytes = segment.as_bytes();
    let at = segment.find('=')?;
    let next = bytes.get(at + 1).copied();
    let prev = at.checked_sub(1).and_then(|p| bytes.get(p)).copied();
    if next == Some(b'=') || matches!(prev, Some(b'~' | b'<' | b'>' | b'=')) {
        return None;
    }

    let name = segment[..at].trim();
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| (name, segment[at + 1..].trim()))
}

/// Decode a plain single- or double-quoted string literal.
pub fn unquote(literal: &str) -> Option<String> {
    let literal = literal.trim();
    let quote = literal.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = literal.strip_prefix(quote)?.strip_suffix(quote)?;

    let mut out = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == quote {
            return None;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            other => out.push(other),
        }
    }
    Some(out)
}

/// Encode `text` as a double-quoted Lua string literal. Control characters
/// use three-digit decimal escapes so the literal stays on one line.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\{:03}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
