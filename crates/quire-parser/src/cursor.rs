use crate::ast::Loc;

/// Character cursor over template source with running line/column.
///
/// Positions are char indices. A [`Mark`] captures the cursor so a failed
/// recognition can rewind and degrade to text.
pub(crate) struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

/// A saved cursor position.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Mark {
    pos: usize,
    line: usize,
    column: usize,
}

impl Cursor {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn loc(&self) -> Loc {
        Loc::new(self.line, self.column)
    }

    pub fn mark(&self) -> Mark {
        Mark {
            pos: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    pub fn reset(&mut self, mark: Mark) {
        self.pos = mark.pos;
        self.line = mark.line;
        self.column = mark.column;
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn peek(&self) -> char {
        self.peek_at(0)
    }

    pub fn peek_at(&self, offset: usize) -> char {
        self.chars.get(self.pos + offset).copied().unwrap_or('\0')
    }

    pub fn advance(&mut self) {
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

    pub fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Does the remaining input start with `pattern`?
    pub fn starts_with(&self, pattern: &str) -> bool {
        self.starts_with_at(self.pos, pattern)
    }

    /// [`Cursor::starts_with`] with ASCII case folding.
    pub fn starts_with_ignore_case(&self, pattern: &str) -> bool {
        self.matches_at(self.pos, pattern, |a, b| a.eq_ignore_ascii_case(&b))
    }

    fn starts_with_at(&self, at: usize, pattern: &str) -> bool {
        self.matches_at(at, pattern, |a, b| a == b)
    }

    fn matches_at(&self, at: usize, pattern: &str, eq: impl Fn(char, char) -> bool) -> bool {
        let mut i = at;
        for p in pattern.chars() {
            match self.chars.get(i) {
                Some(&c) if eq(c, p) => i += 1,
                _ => return false,
            }
        }
        true
    }

    /// Char offset of the next occurrence of `pattern` at or after the cursor.
    pub fn find(&self, pattern: &str) -> Option<usize> {
        (self.pos..self.chars.len()).find(|&i| self.starts_with_at(i, pattern))
    }

    /// [`Cursor::find`] with ASCII case folding.
    pub fn find_ignore_case(&self, pattern: &str) -> Option<usize> {
        (self.pos..self.chars.len()).find(|&i| self.matches_at(i, pattern, |a, b| a.eq_ignore_ascii_case(&b)))
    }

    /// Consume and return everything up to (not including) char offset `end`.
    pub fn take_until(&mut self, end: usize) -> String {
        let mut out = String::new();
        while self.pos < end && !self.is_at_end() {
            out.push(self.peek());
            self.advance();
        }
        out
    }

    /// Consume and return the rest of the input.
    pub fn take_rest(&mut self) -> String {
        self.take_until(self.chars.len())
    }

    /// Consume a run of chars satisfying `pred`.
    pub fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while !self.is_at_end() && pred(self.peek()) {
            out.push(self.peek());
            self.advance();
        }
        out
    }

    /// Char offset of the first closing `close` at nesting depth zero,
    /// skipping over quoted strings and nested brackets. The cursor must
    /// sit just inside the opening bracket.
    pub fn find_balanced(&self, close: char) -> Option<usize> {
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut i = self.pos;

        while let Some(&c) = self.chars.get(i) {
            match quote {
                Some(q) => {
                    if c == '\\' {
                        i += 1;
                    } else if c == q {
                        quote = None;
                    }
                }
                None => match c {
                    '"' | '\'' => quote = Some(c),
                    '(' | '[' | '{' => depth += 1,
                    _ if c == close && depth == 0 => return Some(i),
                    ')' | ']' | '}' => depth = depth.saturating_sub(1),
                    _ => {}
                },
            }
            i += 1;
        }
        None
    }

    /// Char offset of the first `pattern` outside quoted strings.
    pub fn find_unquoted(&self, pattern: &str) -> Option<usize> {
        let mut quote: Option<char> = None;
        let mut i = self.pos;

        while let Some(&c) = self.chars.get(i) {
            match quote {
                Some(q) => {
                    if c == '\\' {
                        i += 1;
                    } else if c == q {
                        quote = None;
                    }
                }
                None if c == '"' || c == '\'' => quote = Some(c),
                None if self.starts_with_at(i, pattern) => return Some(i),
                None => {}
            }
            i += 1;
        }
        None
    }
}
