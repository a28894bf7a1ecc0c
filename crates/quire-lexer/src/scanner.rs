use crate::token::{Keyword, Span, Token, TokenKind};

/// Host-code scanner.
///
/// Tokenizes expression and raw-code text embedded in templates. The scanner
/// never fails: unterminated strings and comments run to the end of input,
/// and unknown characters become single-character operators. Whether the
/// text is valid host code is decided later, when the generated chunk is loaded.
///
/// - `Vec<char>` source for index-based navigation
/// - Long-bracket aware strings and comments (`[[ ]]`, `[==[ ]==]`)
/// - Position tracking on every token
pub struct Scanner<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl<'a> Scanner<'a> {
    /// Create a new scanner for the given source.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    /// Tokenize the entire source into a vector of tokens ending with `Eof`.
    pub fn tokenize(source: &str) -> Vec<Token> {
        let mut scanner = Scanner::new(source);
        scanner.scan_tokens();
        scanner.tokens
    }

    /// The text this scanner was created for.
    pub fn source(&self) -> &'a str {
        self.source
    }

    fn scan_tokens(&mut self) {
        while !self.is_at_end() {
            self.scan_token();
        }
        self.emit(TokenKind::Eof, self.pos, self.line, self.column);
    }

    fn scan_token(&mut self) {
        let ch = self.peek();
        let (start, line, column) = (self.pos, self.line, self.column);

        match ch {
            c if c.is_whitespace() => self.advance(),

            '-' if self.peek_next() == '-' => self.scan_comment(),

            '"' | '\'' => self.scan_string(),

            '[' if matches!(self.peek_next(), '[' | '=') && self.long_bracket_level().is_some() => {
                let content = self.scan_long_bracket();
                self.emit(TokenKind::String(content), start, line, column);
            }

            '0'..='9' => self.scan_number(),
            '.' if self.peek_next().is_ascii_digit() => self.scan_number(),

            c if c.is_ascii_alphabetic() || c == '_' => self.scan_identifier(),

            '.' => {
                self.advance();
                let kind = if self.peek() == '.' {
                    self.advance();
                    if self.peek() == '.' {
                        self.advance();
                        TokenKind::Ellipsis
                    } else {
                        TokenKind::Concat
                    }
                } else {
                    TokenKind::Dot
                };
                self.emit(kind, start, line, column);
            }
            ':' => {
                self.advance();
                let kind = if self.peek() == ':' {
                    self.advance();
                    TokenKind::DoubleColon
                } else {
                    TokenKind::Colon
                };
                self.emit(kind, start, line, column);
            }
            '=' => {
                self.advance();
                let kind = if self.peek() == '=' {
                    self.advance();
                    TokenKind::Operator("==".into())
                } else {
                    TokenKind::Assign
                };
                self.emit(kind, start, line, column);
            }

            ',' => self.single(TokenKind::Comma),
            ';' => self.single(TokenKind::Semicolon),
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '{' => self.single(TokenKind::LBrace),
            '}' => self.single(TokenKind::RBrace),
            '[' => self.single(TokenKind::LBracket),
            ']' => self.single(TokenKind::RBracket),

            _ => self.scan_operator(),
        }
    }

    // --- Scanners ---

    /// Scan a quoted string. The token carries the raw content between the quotes.
    fn scan_string(&mut self) {
        let quote = self.peek();
        let (start, line, column) = (self.pos, self.line, self.column);
        self.advance(); // consume opening quote

        let mut value = String::new();
        while !self.is_at_end() && self.peek() != quote && self.peek() != '\n' {
            if self.peek() == '\\' {
                value.push(self.peek());
                self.advance();
                if self.is_at_end() {
                    break;
                }
            }
            value.push(self.peek());
            self.advance();
        }

        if self.peek() == quote {
            self.advance(); // consume closing quote
        }
        self.emit(TokenKind::String(value), start, line, column);
    }

    /// Scan `--` comments, both line and long-bracket forms.
    fn scan_comment(&mut self) {
        let (start, line, column) = (self.pos, self.line, self.column);
        self.advance();
        self.advance();

        let content = if self.peek() == '[' && self.long_bracket_level().is_some() {
            self.scan_long_bracket()
        } else {
            let mut content = String::new();
            while !self.is_at_end() && self.peek() != '\n' {
                content.push(self.peek());
                self.advance();
            }
            content
        };

        self.emit(TokenKind::Comment(content), start, line, column);
    }

    /// Scan `[[ ... ]]` or `[==[ ... ]==]`, returning the enclosed text.
    /// Callers must have checked `long_bracket_level()` first.
    fn scan_long_bracket(&mut self) -> String {
        let level = self.long_bracket_level().unwrap_or(0);
        for _ in 0..level + 2 {
            self.advance();
        }

        let closing: Vec<char> = std::iter::once(']')
            .chain(std::iter::repeat('=').take(level))
            .chain(std::iter::once(']'))
            .collect();

        let mut content = String::new();
        while !self.is_at_end() {
            if self.chars[self.pos..].starts_with(&closing) {
                for _ in 0..closing.len() {
                    self.advance();
                }
                return content;
            }
            content.push(self.peek());
            self.advance();
        }
        content
    }

    /// Level of a long bracket opening at the cursor (`[[` is 0, `[=[` is 1).
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != '[' {
            return None;
        }
        let mut offset = self.pos + 1;
        let mut level = 0;
        while self.chars.get(offset) == Some(&'=') {
            level += 1;
            offset += 1;
        }
        (self.chars.get(offset) == Some(&'[')).then_some(level)
    }

    /// Scan an identifier or keyword.
    fn scan_identifier(&mut self) {
        let (start, line, column) = (self.pos, self.line, self.column);

        let mut ident = String::new();
        while !self.is_at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == '_') {
            ident.push(self.peek());
            self.advance();
        }

        let kind = match Keyword::lookup(&ident) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Identifier(ident),
        };
        self.emit(kind, start, line, column);
    }

    /// Scan a numeric literal: decimal, hexadecimal, fractions and exponents.
    fn scan_number(&mut self) {
        let (start, line, column) = (self.pos, self.line, self.column);
        let hex = self.peek() == '0' && matches!(self.peek_next(), 'x' | 'X');
        if hex {
            self.advance();
            self.advance();
        }

        while !self.is_at_end() {
            let c = self.peek();
            let exponent = if hex { matches!(c, 'p' | 'P') } else { matches!(c, 'e' | 'E') };
            if exponent && matches!(self.peek_next(), '+' | '-') {
                self.advance();
                self.advance();
            } else if c.is_ascii_alphanumeric() || (c == '.' && self.peek_next() != '.') {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        self.emit(TokenKind::Number(text), start, line, column);
    }

    /// Scan an operator, preferring two-character forms.
    fn scan_operator(&mut self) {
        let (start, line, column) = (self.pos, self.line, self.column);
        let pair: String = [self.peek(), self.peek_next()].iter().collect();

        let text = if matches!(pair.as_str(), "~=" | "<=" | ">=" | "<<" | ">>" | "//") {
            self.advance();
            self.advance();
            pair
        } else {
            let c = self.peek();
            self.advance();
            c.to_string()
        };

        self.emit(TokenKind::Operator(text), start, line, column);
    }

    // --- Helpers ---

    fn single(&mut self, kind: TokenKind) {
        let (start, line, column) = (self.pos, self.line, self.column);
        self.advance();
        self.emit(kind, start, line, column);
    }

    fn emit(&mut self, kind: TokenKind, start: usize, line: usize, column: usize) {
        let span = Span::new(start, self.pos, line, column);
        self.tokens.push(Token::new(kind, span));
    }

    fn peek(&self) -> char {
        self.chars.get(self.pos).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.chars.get(self.pos + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) {
        if let Some(&c) = self.chars.get(self.pos) {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }
}
