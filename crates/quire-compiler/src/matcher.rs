//! Name patterns for directive and element definitions.
//!
//! A definition is registered under a literal name (`if`), a wildcard
//! (`x-*`) or an arbitrary regular expression. All patterns of one kind are
//! folded into a single anchored alternation that the parser uses as a cheap
//! membership pre-check before the precise per-definition lookup.

use regex::Regex;

/// How a definition name is matched.
#[derive(Debug, Clone)]
pub enum NamePattern {
    /// Exact name.
    Literal(String),
    /// Any name starting with the prefix (`x-*`).
    Wildcard(String),
    /// Arbitrary pattern, anchored on both ends when matching.
    Regex(Regex),
}

impl NamePattern {
    /// Interpret a registration name: a trailing `*` makes it a wildcard.
    pub fn parse(name: &str) -> Self {
        match name.strip_suffix('*') {
            Some(prefix) => NamePattern::Wildcard(prefix.to_string()),
            None => NamePattern::Literal(name.to_string()),
        }
    }

    /// Build an arbitrary-pattern matcher.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!("^(?:{pattern})$")).map(NamePattern::Regex)
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Literal(literal) => literal == name,
            NamePattern::Wildcard(prefix) => name.starts_with(prefix.as_str()),
            NamePattern::Regex(re) => re.is_match(name),
        }
    }

    /// Lookup precedence: literal before wildcard before arbitrary pattern.
    pub fn rank(&self) -> u8 {
        match self {
            NamePattern::Literal(_) => 0,
            NamePattern::Wildcard(_) => 1,
            NamePattern::Regex(_) => 2,
        }
    }

    pub fn literal(&self) -> Option<&str> {
        match self {
            NamePattern::Literal(name) => Some(name),
            _ => None,
        }
    }

    /// Regex fragment for the combined alternation.
    fn fragment(&self) -> String {
        match self {
            NamePattern::Literal(name) => regex::escape(name),
            NamePattern::Wildcard(prefix) => format!("{}.*", regex::escape(prefix)),
            NamePattern::Regex(re) => re.as_str().to_string(),
        }
    }
}

/// The combined fast-match pattern of one definition kind.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    combined: Option<Regex>,
}

impl PatternSet {
    /// Fold `patterns` into one anchored alternation, longest fragment first
    /// so no alternative is shadowed by a shorter prefix.
    pub fn build<'a>(patterns: impl IntoIterator<Item = &'a NamePattern>) -> Self {
        let mut fragments: Vec<String> = patterns.into_iter().map(NamePattern::fragment).collect();
        if fragments.is_empty() {
            return Self::default();
        }
        fragments.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        fragments.dedup();

        let combined = Regex::new(&format!("^(?:{})$", fragments.join("|"))).ok();
        Self { combined }
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.combined.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// The combined pattern source, if any patterns are registered.
    pub fn as_str(&self) -> Option<&str> {
        self.combined.as_ref().map(Regex::as_str)
    }
}
