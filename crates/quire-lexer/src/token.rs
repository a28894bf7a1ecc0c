/// A position in host-code text, tracking line and column for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }
}

/// Reserved words of the host language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,
}

impl Keyword {
    /// Look up a keyword by its source spelling.
    pub fn lookup(word: &str) -> Option<Self> {
        let keyword = match word {
            "and" => Keyword::And,
            "break" => Keyword::Break,
            "do" => Keyword::Do,
            "else" => Keyword::Else,
            "elseif" => Keyword::Elseif,
            "end" => Keyword::End,
            "false" => Keyword::False,
            "for" => Keyword::For,
            "function" => Keyword::Function,
            "goto" => Keyword::Goto,
            "if" => Keyword::If,
            "in" => Keyword::In,
            "local" => Keyword::Local,
            "nil" => Keyword::Nil,
            "not" => Keyword::Not,
            "or" => Keyword::Or,
            "repeat" => Keyword::Repeat,
            "return" => Keyword::Return,
            "then" => Keyword::Then,
            "true" => Keyword::True,
            "until" => Keyword::Until,
            "while" => Keyword::While,
            _ => return None,
        };
        Some(keyword)
    }
}

/// Check if a word is a reserved word of the host language.
pub fn is_keyword(word: &str) -> bool {
    Keyword::lookup(word).is_some()
}

/// Token classification for host-code text.
///
/// Data-carrying variants embed their value directly. String and comment
/// tokens carry their content so callers can scrub them from identifier scans.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals (carry data)
    Identifier(String),
    Keyword(Keyword),
    String(String),
    Number(String),
    Comment(String),

    // Punctuation
    Dot,         // .
    Concat,      // ..
    Ellipsis,    // ...
    Colon,       // :
    DoubleColon, // ::
    Comma,
    Semicolon,
    Assign, // =
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    /// Any other operator (`+`, `==`, `~=`, `<=`, `#`, ...).
    Operator(String),

    // End of input
    Eof,
}

/// A token produced by the host-code scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// The identifier name, if this token is one.
    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Identifier(name) => Some(name),
            _ => None,
        }
    }
}
