//! Template parser for Quire.
//!
//! A single forward pass over the source with an explicit stack of open
//! blocks. Recognition priority at each position:
//!
//! 1. `{{-- --}}` comment (dropped), `{{{ }}}` raw and `{{ }}` escaped interpolation
//! 2. `@@` / `@{{` escapes, `@code ... @endcode`, `@end...` closes, `@name(args)` directives
//! 3. `<` raw-text containers, registered element tags, closing tags
//! 4. literal text up to the next marker
//!
//! The parser never fails. Unknown names stay literal text and unterminated
//! constructs turn the rest of the input into text.

use serde::{Deserialize, Serialize};

use crate::ast::{Attribute, AttributeValue, Directive, Document, Element, Loc, Node};
use crate::cursor::{Cursor, Mark};
use crate::syntax::{BlockSyntax, ChildrenMode, SyntaxTable};

/// Parser configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Tags whose content is copied verbatim (only interpolation applies).
    pub raw_text_tags: Vec<String>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            raw_text_tags: vec!["script".into(), "style".into()],
        }
    }
}

/// Parse a template with the given syntax table.
pub fn parse(source: &str, table: &dyn SyntaxTable, options: &ParserOptions) -> Document {
    Parser::new(source, table, options).parse()
}

/// Marker for a construct that runs off the end of the input.
struct Unterminated;

/// How a closed frame joins its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attach {
    /// Appended to the parent's children.
    Child,
    /// Appended to the `related` list of the parent's last child (the chain head).
    Related,
}

enum Open {
    Directive(Directive),
    Element(Element),
}

/// An open block on the parser stack.
struct Frame {
    node: Open,
    /// Name of the chain head (equals the node's own name for heads).
    chain: String,
    /// Continuation names the chain accepts.
    related: Vec<String>,
    attach: Attach,
}

impl Frame {
    fn name(&self) -> &str {
        match &self.node {
            Open::Directive(d) => &d.name,
            Open::Element(e) => &e.tag_name,
        }
    }

    fn is_element(&self) -> bool {
        matches!(self.node, Open::Element(_))
    }

    fn matches(&self, name: &str) -> bool {
        self.name() == name || self.chain == name
    }

    fn children(&self) -> &Vec<Node> {
        match &self.node {
            Open::Directive(d) => &d.children,
            Open::Element(e) => &e.children,
        }
    }

    fn children_mut(&mut self) -> &mut Vec<Node> {
        match &mut self.node {
            Open::Directive(d) => &mut d.children,
            Open::Element(e) => &mut e.children,
        }
    }

    fn into_node(self) -> Node {
        match self.node {
            Open::Directive(d) => Node::Directive(d),
            Open::Element(e) => Node::Element(e),
        }
    }
}

/// Quire template parser.
///
/// Holds the cursor, the syntax table used for name recognition, the
/// finished top-level nodes and the stack of open blocks.
pub struct Parser<'t> {
    cursor: Cursor,
    table: &'t dyn SyntaxTable,
    options: &'t ParserOptions,
    root: Vec<Node>,
    stack: Vec<Frame>,
}

impl<'t> Parser<'t> {
    /// Create a new parser for the given source.
    pub fn new(source: &str, table: &'t dyn SyntaxTable, options: &'t ParserOptions) -> Self {
        Self {
            cursor: Cursor::new(source),
            table,
            options,
            root: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Parse the whole source. Blocks still open at end of input are closed.
    pub fn parse(mut self) -> Document {
        while !self.cursor.is_at_end() {
            self.step();
        }
        while !self.stack.is_empty() {
            self.close_top();
        }
        Document { nodes: self.root }
    }

    fn step(&mut self) {
        match self.cursor.peek() {
            '{' if self.cursor.starts_with("{{") => self.scan_mustache(),
            '@' => self.scan_at(),
            '<' => self.scan_tag(),
            _ => self.scan_text(),
        }
    }

    // =========================================================================
    // Text and interpolation
    // =========================================================================

    fn scan_text(&mut self) {
        let loc = self.cursor.loc();
        let mut text = String::new();
        while !self.cursor.is_at_end() {
            let c = self.cursor.peek();
            if c == '@' || c == '<' || (c == '{' && self.cursor.peek_at(1) == '{') {
                break;
            }
            text.push(c);
            self.cursor.advance();
        }
        self.push_text(text, loc);
    }

    /// Scan `{{-- --}}`, `{{{ }}}` or `{{ }}` at the cursor.
    fn scan_mustache(&mut self) {
        let loc = self.cursor.loc();
        let mark = self.cursor.mark();

        if self.cursor.starts_with("{{--") {
            self.cursor.advance_by(4);
            match self.cursor.find("--}}") {
                Some(end) => {
                    self.cursor.take_until(end);
                    self.cursor.advance_by(4);
                }
                None => self.degrade(mark),
            }
            return;
        }

        let (open, close, raw) = if self.cursor.starts_with("{{{") {
            (3, "}}}", true)
        } else {
            (2, "}}", false)
        };

        self.cursor.advance_by(open);
        match self.cursor.find_unquoted(close) {
            Some(end) => {
                let content = self.cursor.take_until(end).trim().to_string();
                self.cursor.advance_by(open);
                self.push_node(Node::Interpolation { content, raw, loc });
            }
            None => self.degrade(mark),
        }
    }

    /// Copy text verbatim up to `</tag`, applying only interpolation.
    fn scan_raw_until(&mut self, tag: &str) {
        let close = format!("</{tag}");
        let end = self.cursor.find_ignore_case(&close).unwrap_or(usize::MAX);

        while !self.cursor.is_at_end() && self.cursor.pos() < end {
            if self.cursor.starts_with("{{") {
                self.scan_mustache();
                continue;
            }
            let loc = self.cursor.loc();
            let mut text = String::new();
            while !self.cursor.is_at_end() && self.cursor.pos() < end && !self.cursor.starts_with("{{") {
                text.push(self.cursor.peek());
                self.cursor.advance();
            }
            self.push_text(text, loc);
        }
    }

    // =========================================================================
    // Directives
    // =========================================================================

    fn scan_at(&mut self) {
        let loc = self.cursor.loc();

        if self.cursor.starts_with("@@") {
            self.cursor.advance_by(2);
            self.push_text("@".into(), loc);
            return;
        }
        if self.cursor.starts_with("@{{") {
            self.cursor.advance_by(3);
            self.push_text("{{".into(), loc);
            return;
        }

        let mark = self.cursor.mark();
        self.cursor.advance(); // consume @

        let first = self.cursor.peek();
        if !(first.is_ascii_alphabetic() || first == '_') {
            self.push_text("@".into(), loc);
            return;
        }

        let name = self.cursor.take_while(is_directive_char);
        self.dispatch_directive(name, loc, mark);
    }

    fn dispatch_directive(&mut self, name: String, loc: Loc, mark: Mark) {
        if name == "code" {
            self.scan_code(loc, mark);
        } else if self.continues_chain(&name) {
            self.open_continuation(name, loc, mark);
        } else if let Some(syntax) = self.table.directive(&name) {
            self.open_directive(name, syntax.children, syntax.related, loc, mark);
        } else if let Some(target) = name.strip_prefix("end").filter(|t| self.is_close_target(t)) {
            self.close_named(target);
        } else if let Some(len) = self.prefix_fallback(&name) {
            // A registered name glued to trailing text (`@elseFoo`).
            self.cursor.reset(mark);
            self.cursor.advance_by(len + 1);
            self.dispatch_directive(name[..len].to_string(), loc, mark);
        } else {
            self.cursor.reset(mark);
            self.cursor.advance();
            self.push_text("@".into(), loc);
        }
    }

    /// Longest registered directive or open-chain continuation that is a
    /// strict prefix of `name`.
    fn prefix_fallback(&self, name: &str) -> Option<usize> {
        let continuation = self
            .stack
            .last()
            .filter(|f| !f.is_element())
            .into_iter()
            .flat_map(|f| f.related.iter())
            .filter(|r| r.len() < name.len() && name.starts_with(r.as_str()))
            .map(String::len)
            .max();

        continuation.max(self.table.longest_directive_prefix(name))
    }

    /// `@end<target>` is a close token when `target` names an open frame or
    /// anything that could have opened one; otherwise it is plain text.
    fn is_close_target(&self, target: &str) -> bool {
        target.is_empty()
            || self.table.directive(target).is_some()
            || self
                .stack
                .iter()
                .any(|f| f.matches(target) || f.related.iter().any(|r| r == target))
    }

    fn continues_chain(&self, name: &str) -> bool {
        self.stack
            .last()
            .is_some_and(|f| !f.is_element() && f.related.iter().any(|r| r == name))
    }

    /// Scan the parenthesized argument text directly following a directive name.
    fn scan_args(&mut self) -> Result<Option<String>, Unterminated> {
        if self.cursor.peek() != '(' {
            return Ok(None);
        }
        self.cursor.advance();
        let end = self.cursor.find_balanced(')').ok_or(Unterminated)?;
        let args = self.cursor.take_until(end);
        self.cursor.advance(); // consume )
        Ok(Some(args))
    }

    fn open_directive(
        &mut self,
        name: String,
        children: ChildrenMode,
        related: Vec<String>,
        loc: Loc,
        mark: Mark,
    ) {
        let Ok(args) = self.scan_args() else {
            self.degrade(mark);
            return;
        };

        let opens = match children {
            ChildrenMode::None => false,
            ChildrenMode::Required => true,
            ChildrenMode::Auto => self.cursor.find(&format!("@end{name}")).is_some(),
        };

        let directive = Directive {
            name: name.clone(),
            args,
            children: Vec::new(),
            related: Vec::new(),
            loc,
        };

        if opens {
            self.stack.push(Frame {
                node: Open::Directive(directive),
                chain: name,
                related,
                attach: Attach::Child,
            });
        } else {
            self.push_node(Node::Directive(directive));
        }
    }

    /// Close the current chain member and open `name` as the next one.
    fn open_continuation(&mut self, name: String, loc: Loc, mark: Mark) {
        let Ok(args) = self.scan_args() else {
            self.degrade(mark);
            return;
        };

        let Some(top) = self.stack.last() else {
            return;
        };
        let chain = top.chain.clone();
        let related = top.related.clone();
        self.close_top();

        self.stack.push(Frame {
            node: Open::Directive(Directive {
                name,
                args,
                children: Vec::new(),
                related: Vec::new(),
                loc,
            }),
            chain,
            related,
            attach: Attach::Related,
        });
    }

    fn scan_code(&mut self, loc: Loc, mark: Mark) {
        match self.cursor.find("@endcode") {
            Some(end) => {
                let content = self.cursor.take_until(end);
                self.cursor.advance_by("@endcode".len());
                self.push_node(Node::RawCode { content, loc });
            }
            None => self.degrade(mark),
        }
    }

    // =========================================================================
    // Elements
    // =========================================================================

    fn scan_tag(&mut self) {
        let loc = self.cursor.loc();
        let mark = self.cursor.mark();

        if self.cursor.peek_at(1) == '/' {
            self.scan_closing_tag(loc, mark);
            return;
        }

        self.cursor.advance(); // consume <
        let name = if self.cursor.peek().is_ascii_alphabetic() {
            self.cursor.take_while(is_tag_char)
        } else {
            String::new()
        };

        if name.is_empty() {
            self.push_text("<".into(), loc);
        } else if self.is_raw_text_tag(&name) {
            self.scan_raw_text_tag(name, loc, mark);
        } else if let Some(syntax) = self.table.element(&name) {
            self.open_element(name, syntax, loc, mark);
        } else {
            self.cursor.reset(mark);
            self.cursor.advance();
            self.push_text("<".into(), loc);
        }
    }

    fn is_raw_text_tag(&self, name: &str) -> bool {
        self.options
            .raw_text_tags
            .iter()
            .any(|t| t.eq_ignore_ascii_case(name))
    }

    /// `<script ...>` and friends: the tags stay literal text and the body
    /// is copied verbatim apart from interpolation.
    fn scan_raw_text_tag(&mut self, name: String, loc: Loc, mark: Mark) {
        self.cursor.reset(mark);
        let Some(end) = self.cursor.find_unquoted(">") else {
            self.degrade(mark);
            return;
        };
        let open_tag = self.cursor.take_until(end + 1);
        self.push_text(open_tag, loc);

        self.scan_raw_until(&name);

        if self.cursor.starts_with_ignore_case(&format!("</{name}")) {
            let loc = self.cursor.loc();
            let close_tag = match self.cursor.find(">") {
                Some(end) => self.cursor.take_until(end + 1),
                None => self.cursor.take_rest(),
            };
            self.push_text(close_tag, loc);
        }
    }

    fn open_element(&mut self, name: String, syntax: BlockSyntax, loc: Loc, mark: Mark) {
        let Ok((attributes, self_closing)) = self.scan_attributes() else {
            self.degrade(mark);
            return;
        };

        let opens = !self_closing
            && match syntax.children {
                ChildrenMode::None => false,
                ChildrenMode::Required => true,
                ChildrenMode::Auto => self.cursor.find(&format!("</{name}")).is_some(),
            };

        let element = Element {
            tag_name: name.clone(),
            attributes,
            void: !opens,
            children: Vec::new(),
            related: Vec::new(),
            loc,
        };

        let (chain, related, attach) = match self.element_chain(&name) {
            Some((head, related)) => {
                self.drop_trailing_blank_text();
                (head, related, Attach::Related)
            }
            None => (name.clone(), syntax.related, Attach::Child),
        };

        let frame = Frame {
            node: Open::Element(element),
            chain,
            related,
            attach,
        };

        if opens {
            self.stack.push(frame);
            if syntax.raw_content {
                self.scan_raw_until(&name);
            }
        } else {
            self.attach(frame.attach, frame.into_node());
        }
    }

    /// If the last non-blank sibling is an element chain accepting `tag`,
    /// return the chain head's name and continuation list.
    fn element_chain(&self, tag: &str) -> Option<(String, Vec<String>)> {
        let head = self.children().iter().rev().find(|n| !n.is_blank_text())?;
        let Node::Element(head) = head else {
            return None;
        };
        let syntax = self.table.element(&head.tag_name)?;
        syntax
            .related
            .iter()
            .any(|r| r == tag)
            .then(|| (head.tag_name.clone(), syntax.related.clone()))
    }

    fn drop_trailing_blank_text(&mut self) {
        let children = self.children_mut();
        while children.last().is_some_and(Node::is_blank_text) {
            children.pop();
        }
    }

    fn scan_attributes(&mut self) -> Result<(Vec<Attribute>, bool), Unterminated> {
        let mut attributes = Vec::new();

        loop {
            self.cursor.take_while(char::is_whitespace);
            if self.cursor.is_at_end() {
                return Err(Unterminated);
            }

            match self.cursor.peek() {
                '>' => {
                    self.cursor.advance();
                    return Ok((attributes, false));
                }
                '/' if self.cursor.peek_at(1) == '>' => {
                    self.cursor.advance_by(2);
                    return Ok((attributes, true));
                }
                _ => {}
            }

            let loc = self.cursor.loc();
            let name = self.cursor.take_while(is_attribute_char);
            if name.is_empty() {
                return Err(Unterminated);
            }

            let value = if self.cursor.peek() == '=' {
                self.cursor.advance();
                self.scan_attribute_value()?
            } else {
                AttributeValue::Bare
            };

            attributes.push(Attribute { name, value, loc });
        }
    }

    fn scan_attribute_value(&mut self) -> Result<AttributeValue, Unterminated> {
        match self.cursor.peek() {
            '(' => {
                self.cursor.advance();
                let end = self.cursor.find_balanced(')').ok_or(Unterminated)?;
                let expr = self.cursor.take_until(end);
                self.cursor.advance();
                Ok(AttributeValue::Expression(expr))
            }
            quote @ ('"' | '\'') => {
                self.cursor.advance();
                let end = self.cursor.find(&quote.to_string()).ok_or(Unterminated)?;
                let value = self.cursor.take_until(end);
                self.cursor.advance();
                Ok(AttributeValue::Quoted(value))
            }
            _ => self.scan_unquoted_value().map(AttributeValue::Unquoted),
        }
    }

    /// Balanced scan stopping at top-level whitespace, `>` or `/>`.
    fn scan_unquoted_value(&mut self) -> Result<String, Unterminated> {
        let mut value = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;

        while !self.cursor.is_at_end() {
            let c = self.cursor.peek();
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '"' | '\'' => quote = Some(c),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' | '}' => depth = depth.saturating_sub(1),
                    _ if depth == 0
                        && (c.is_whitespace()
                            || c == '>'
                            || (c == '/' && self.cursor.peek_at(1) == '>')) =>
                    {
                        return Ok(value);
                    }
                    _ => {}
                },
            }
            value.push(c);
            self.cursor.advance();
        }

        Err(Unterminated)
    }

    fn scan_closing_tag(&mut self, loc: Loc, mark: Mark) {
        self.cursor.advance_by(2); // consume </
        let name = self.cursor.take_while(is_tag_char);

        let open = !name.is_empty() && self.stack.iter().any(|f| f.is_element() && f.matches(&name));
        let stray = !name.is_empty() && !open && self.table.element(&name).is_some();

        if open || stray {
            self.cursor.take_while(|c| c != '>');
            self.cursor.advance(); // consume >
            if open {
                self.close_named(&name);
            }
        } else {
            self.cursor.reset(mark);
            self.cursor.advance();
            self.push_text("<".into(), loc);
        }
    }

    // =========================================================================
    // Stack management
    // =========================================================================

    fn children(&self) -> &Vec<Node> {
        match self.stack.last() {
            Some(frame) => frame.children(),
            None => &self.root,
        }
    }

    fn children_mut(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(frame) => frame.children_mut(),
            None => &mut self.root,
        }
    }

    fn push_node(&mut self, node: Node) {
        self.children_mut().push(node);
    }

    /// Append literal text, merging with a preceding text node.
    fn push_text(&mut self, text: String, loc: Loc) {
        if text.is_empty() {
            return;
        }
        let children = self.children_mut();
        if let Some(Node::Text { content, .. }) = children.last_mut() {
            content.push_str(&text);
        } else {
            children.push(Node::Text { content: text, loc });
        }
    }

    /// Turn everything from `mark` to the end of input into literal text.
    fn degrade(&mut self, mark: Mark) {
        self.cursor.reset(mark);
        let loc = self.cursor.loc();
        let rest = self.cursor.take_rest();
        self.push_text(rest, loc);
    }

    fn attach(&mut self, attach: Attach, node: Node) {
        let children = self.children_mut();
        match attach {
            Attach::Child => children.push(node),
            Attach::Related => {
                if let Some(
                    Node::Directive(Directive { related, .. })
                    | Node::Element(Element { related, .. }),
                ) = children.last_mut()
                {
                    related.push(node);
                } else {
                    children.push(node);
                }
            }
        }
    }

    fn close_top(&mut self) {
        if let Some(frame) = self.stack.pop() {
            let attach = frame.attach;
            self.attach(attach, frame.into_node());
        }
    }

    /// Close the nearest frame named `name` (own or chain name) and every
    /// frame above it. An empty name closes the innermost frame. Nothing
    /// happens when no frame matches.
    fn close_named(&mut self, name: &str) {
        if name.is_empty() {
            self.close_top();
            return;
        }
        if let Some(index) = self.stack.iter().rposition(|f| f.matches(name)) {
            while self.stack.len() > index {
                self.close_top();
            }
        }
    }
}

fn is_directive_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':')
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')
}

fn is_attribute_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '=' | '>' | '/' | '"' | '\'' | '(' | ')')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{BlockSyntax, SyntaxMap};
    use pretty_assertions::assert_eq;

    fn table() -> SyntaxMap {
        SyntaxMap::new()
            .directive(
                "if",
                BlockSyntax::new(ChildrenMode::Required).with_related(["elseif", "else"]),
            )
            .directive(
                "each",
                BlockSyntax::new(ChildrenMode::Required).with_related(["empty"]),
            )
            .directive("else", BlockSyntax::new(ChildrenMode::None))
            .directive("include", BlockSyntax::new(ChildrenMode::None))
            .directive("section", BlockSyntax::new(ChildrenMode::Auto))
            .element("x-card", BlockSyntax::new(ChildrenMode::Required))
            .element(
                "x-if",
                BlockSyntax::new(ChildrenMode::Required).with_related(["x-else"]),
            )
            .element("x-else", BlockSyntax::new(ChildrenMode::Required))
            .element("x-icon", BlockSyntax::new(ChildrenMode::None))
            .element("x-panel", BlockSyntax::new(ChildrenMode::Auto))
            .element(
                "x-pre",
                BlockSyntax::new(ChildrenMode::Required).with_raw_content(),
            )
    }

    fn parse(source: &str) -> Document {
        super::parse(source, &table(), &ParserOptions::default())
    }

    fn text(content: &str, line: usize, column: usize) -> Node {
        Node::Text {
            content: content.into(),
            loc: Loc::new(line, column),
        }
    }

    fn directive(node: &Node) -> &Directive {
        match node {
            Node::Directive(d) => d,
            other => panic!("Expected Directive, got {other:?}"),
        }
    }

    fn element(node: &Node) -> &Element {
        match node {
            Node::Element(e) => e,
            other => panic!("Expected Element, got {other:?}"),
        }
    }

    fn text_of(node: &Node) -> &str {
        match node {
            Node::Text { content, .. } => content,
            other => panic!("Expected Text, got {other:?}"),
        }
    }

    // =========================================================================
    // Text
    // =========================================================================

    #[test]
    fn test_empty_document() {
        assert!(parse("").nodes.is_empty());
    }

    #[test]
    fn test_plain_text_is_one_node() {
        let doc = parse("Hello, <b>world</b> & co\nline two");
        assert_eq!(
            doc.nodes,
            vec![text("Hello, <b>world</b> & co\nline two", 1, 1)]
        );
    }

    #[test]
    fn test_email_address_stays_text() {
        let doc = parse("mail me@example.com now");
        assert_eq!(doc.nodes, vec![text("mail me@example.com now", 1, 1)]);
    }

    #[test]
    fn test_escapes() {
        let doc = parse("@@if @{{ x }}");
        assert_eq!(doc.nodes, vec![text("@if {{ x }}", 1, 1)]);
    }

    // =========================================================================
    // Interpolation
    // =========================================================================

    #[test]
    fn test_escaped_and_raw_interpolation() {
        let doc = parse("{{ a }}{{{ b }}}");
        assert_eq!(
            doc.nodes,
            vec![
                Node::Interpolation {
                    content: "a".into(),
                    raw: false,
                    loc: Loc::new(1, 1),
                },
                Node::Interpolation {
                    content: "b".into(),
                    raw: true,
                    loc: Loc::new(1, 8),
                },
            ]
        );
    }

    #[test]
    fn test_comment_is_dropped() {
        let doc = parse("a{{-- {{ hidden }} --}}b");
        assert_eq!(doc.nodes, vec![text("ab", 1, 1)]);
    }

    #[test]
    fn test_interpolation_with_braces_in_string() {
        let doc = parse(r#"{{ t["}}"] }}"#);
        match &doc.nodes[0] {
            Node::Interpolation { content, .. } => assert_eq!(content, r#"t["}}"]"#),
            other => panic!("Expected Interpolation, got {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_interpolation_degrades_to_text() {
        let doc = parse("a {{ b @if(x)");
        assert_eq!(doc.nodes, vec![text("a {{ b @if(x)", 1, 1)]);
    }

    // =========================================================================
    // Directives
    // =========================================================================

    #[test]
    fn test_directive_without_children() {
        let doc = parse("@include('card')");
        let d = directive(&doc.nodes[0]);
        assert_eq!(d.name, "include");
        assert_eq!(d.args.as_deref(), Some("'card'"));
        assert!(d.children.is_empty());
    }

    #[test]
    fn test_directive_args_are_balanced() {
        let doc = parse("@include(f(\")\", 2)) tail");
        let d = directive(&doc.nodes[0]);
        assert_eq!(d.args.as_deref(), Some("f(\")\", 2)"));
        assert_eq!(text_of(&doc.nodes[1]), " tail");
    }

    #[test]
    fn test_unknown_directive_is_text() {
        let doc = parse("@unknown(x) done");
        assert_eq!(doc.nodes, vec![text("@unknown(x) done", 1, 1)]);
    }

    #[test]
    fn test_unterminated_args_degrade_to_text() {
        let doc = parse("x @if(a");
        assert_eq!(doc.nodes, vec![text("x @if(a", 1, 1)]);
    }

    #[test]
    fn test_if_else_chain() {
        let doc = parse("@if(cond)YES@else NO@endif");
        assert_eq!(doc.nodes.len(), 1);

        let head = directive(&doc.nodes[0]);
        assert_eq!(head.name, "if");
        assert_eq!(head.args.as_deref(), Some("cond"));
        assert_eq!(head.children, vec![text("YES", 1, 10)]);

        assert_eq!(head.related.len(), 1);
        let branch = directive(&head.related[0]);
        assert_eq!(branch.name, "else");
        assert_eq!(branch.args, None);
        assert_eq!(branch.children, vec![text(" NO", 1, 18)]);
    }

    #[test]
    fn test_elseif_chain_order() {
        let doc = parse("@if(a)A@elseif(b)B@else C@endif!");
        let head = directive(&doc.nodes[0]);
        let names: Vec<&str> = head
            .related
            .iter()
            .map(|n| directive(n).name.as_str())
            .collect();
        assert_eq!(names, vec!["elseif", "else"]);
        assert_eq!(directive(&head.related[0]).args.as_deref(), Some("b"));
        assert_eq!(text_of(&doc.nodes[1]), "!");
    }

    #[test]
    fn test_each_empty_chain() {
        let doc = parse("@each(x in xs){{ x }}@empty none@endeach");
        let head = directive(&doc.nodes[0]);
        assert_eq!(head.children.len(), 1);
        assert_eq!(directive(&head.related[0]).name, "empty");
    }

    #[test]
    fn test_nested_blocks() {
        let doc = parse("@if(a)@each(x in xs)X@endeach@endif");
        let outer = directive(&doc.nodes[0]);
        let inner = directive(&outer.children[0]);
        assert_eq!(inner.name, "each");
        assert_eq!(inner.children, vec![text("X", 1, 21)]);
    }

    #[test]
    fn test_end_closes_implied_frames() {
        let doc = parse("@if(a)@each(x in xs)X@endif after");
        let outer = directive(&doc.nodes[0]);
        assert_eq!(directive(&outer.children[0]).children.len(), 1);
        assert_eq!(text_of(&doc.nodes[1]), " after");
    }

    #[test]
    fn test_bare_end_closes_innermost() {
        let doc = parse("@if(a)@each(x in xs)X@end Y@end Z");
        let outer = directive(&doc.nodes[0]);
        assert_eq!(outer.children.len(), 2);
        assert_eq!(text_of(&outer.children[1]), " Y");
        assert_eq!(text_of(&doc.nodes[1]), " Z");
    }

    #[test]
    fn test_stray_end_is_noop() {
        let doc = parse("a@endif b");
        assert_eq!(doc.nodes, vec![text("a b", 1, 1)]);
    }

    #[test]
    fn test_end_of_input_closes_blocks() {
        let doc = parse("@if(a)@each(x in xs)X");
        let outer = directive(&doc.nodes[0]);
        assert_eq!(directive(&outer.children[0]).children.len(), 1);
    }

    #[test]
    fn test_end_prefixed_text_is_not_a_close() {
        let doc = parse("@if(a)mail x@endpoint.io@endif");
        let head = directive(&doc.nodes[0]);
        assert_eq!(head.children, vec![text("mail x@endpoint.io", 1, 7)]);
    }

    #[test]
    fn test_else_without_open_chain_is_standalone() {
        let doc = parse("@else x");
        assert_eq!(directive(&doc.nodes[0]).name, "else");
        assert_eq!(text_of(&doc.nodes[1]), " x");
    }

    #[test]
    fn test_auto_children_with_end() {
        let doc = parse("@section('a')body@endsection");
        let d = directive(&doc.nodes[0]);
        assert_eq!(d.children.len(), 1);
    }

    #[test]
    fn test_auto_children_without_end() {
        let doc = parse("@section('a')body");
        let d = directive(&doc.nodes[0]);
        assert!(d.children.is_empty());
        assert_eq!(text_of(&doc.nodes[1]), "body");
    }

    #[test]
    fn test_prefix_fallback_registered_directive() {
        let doc = parse("@includeMe");
        assert_eq!(directive(&doc.nodes[0]).name, "include");
        assert_eq!(text_of(&doc.nodes[1]), "Me");
    }

    #[test]
    fn test_prefix_fallback_continuation() {
        let doc = parse("@if(a)A@elseB@endif");
        let head = directive(&doc.nodes[0]);
        let branch = directive(&head.related[0]);
        assert_eq!(branch.name, "else");
        assert_eq!(text_of(&branch.children[0]), "B");
    }

    #[test]
    fn test_directive_location() {
        let doc = parse("line one\n  @include('x')");
        assert_eq!(directive(&doc.nodes[1]).loc, Loc::new(2, 3));
    }

    // =========================================================================
    // Raw code
    // =========================================================================

    #[test]
    fn test_code_block() {
        let doc = parse("@code local x = 1 @endcode{{ x }}");
        assert_eq!(
            doc.nodes[0],
            Node::RawCode {
                content: " local x = 1 ".into(),
                loc: Loc::new(1, 1),
            }
        );
        assert_eq!(doc.nodes.len(), 2);
    }

    #[test]
    fn test_unterminated_code_block_is_text() {
        let doc = parse("@code local x = 1");
        assert_eq!(doc.nodes, vec![text("@code local x = 1", 1, 1)]);
    }

    // =========================================================================
    // Elements
    // =========================================================================

    #[test]
    fn test_unregistered_tags_are_text() {
        let doc = parse("<div class=\"a\"></div>");
        assert_eq!(doc.nodes, vec![text("<div class=\"a\"></div>", 1, 1)]);
    }

    #[test]
    fn test_element_with_children() {
        let doc = parse("<x-card>Hi {{ name }}</x-card>!");
        let el = element(&doc.nodes[0]);
        assert_eq!(el.tag_name, "x-card");
        assert!(!el.void);
        assert_eq!(el.children.len(), 2);
        assert_eq!(text_of(&doc.nodes[1]), "!");
    }

    #[test]
    fn test_attribute_forms() {
        let doc = parse("<x-icon open size=large title=\"A b\" alt='c' n=(count + 1) />");
        let el = element(&doc.nodes[0]);
        assert!(el.void);
        let values: Vec<(&str, &AttributeValue)> = el
            .attributes
            .iter()
            .map(|a| (a.name.as_str(), &a.value))
            .collect();
        assert_eq!(
            values,
            vec![
                ("open", &AttributeValue::Bare),
                ("size", &AttributeValue::Unquoted("large".into())),
                ("title", &AttributeValue::Quoted("A b".into())),
                ("alt", &AttributeValue::Quoted("c".into())),
                ("n", &AttributeValue::Expression("count + 1".into())),
            ]
        );
    }

    #[test]
    fn test_unquoted_value_balanced_scan() {
        let doc = parse("<x-icon data=f(a, 'b c')>");
        let el = element(&doc.nodes[0]);
        assert_eq!(
            el.attribute("data").map(|a| &a.value),
            Some(&AttributeValue::Unquoted("f(a, 'b c')".into()))
        );
    }

    #[test]
    fn test_self_closing_required_element() {
        let doc = parse("<x-card title=\"t\"/>after");
        let el = element(&doc.nodes[0]);
        assert!(el.void);
        assert!(el.children.is_empty());
        assert_eq!(text_of(&doc.nodes[1]), "after");
    }

    #[test]
    fn test_auto_element() {
        let open = parse("<x-panel>a</x-panel>");
        assert!(!element(&open.nodes[0]).void);

        let bare = parse("<x-panel>a");
        assert!(element(&bare.nodes[0]).void);
        assert_eq!(text_of(&bare.nodes[1]), "a");
    }

    #[test]
    fn test_stray_closing_tag_is_noop() {
        let doc = parse("a</x-card>b");
        assert_eq!(doc.nodes, vec![text("ab", 1, 1)]);
    }

    #[test]
    fn test_unterminated_tag_degrades() {
        let doc = parse("a<x-card title=\"x");
        assert_eq!(doc.nodes, vec![text("a<x-card title=\"x", 1, 1)]);
    }

    #[test]
    fn test_element_continuation_drops_whitespace() {
        let doc = parse("<x-if c=(a)>A</x-if>\n  <x-else>B</x-else>");
        assert_eq!(doc.nodes.len(), 1);
        let head = element(&doc.nodes[0]);
        assert_eq!(head.related.len(), 1);
        assert_eq!(element(&head.related[0]).tag_name, "x-else");
    }

    #[test]
    fn test_element_without_head_is_sibling() {
        let doc = parse("<x-else>B</x-else>");
        assert_eq!(element(&doc.nodes[0]).tag_name, "x-else");
    }

    #[test]
    fn test_raw_content_element() {
        let doc = parse("<x-pre>@if(a) <x-card> {{ v }}</x-pre>");
        let el = element(&doc.nodes[0]);
        assert_eq!(text_of(&el.children[0]), "@if(a) <x-card> ");
        assert!(matches!(el.children[1], Node::Interpolation { .. }));
    }

    #[test]
    fn test_raw_text_tag() {
        let doc = parse("<script>if (a < b) { @x }; var v = {{ v }};</script>");
        assert_eq!(doc.nodes.len(), 3);
        assert_eq!(
            text_of(&doc.nodes[0]),
            "<script>if (a < b) { @x }; var v = "
        );
        assert_eq!(text_of(&doc.nodes[2]), ";</script>");
    }

    #[test]
    fn test_raw_text_tag_close_ignores_case() {
        let doc = parse("<Script>a < b</SCRIPT><x-icon>");
        assert_eq!(doc.nodes.len(), 2);
        assert_eq!(text_of(&doc.nodes[0]), "<Script>a < b</SCRIPT>");
        assert_eq!(element(&doc.nodes[1]).tag_name, "x-icon");
    }
}
