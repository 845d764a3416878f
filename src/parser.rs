use bytes::Bytes;

use crate::ast::{Anchor, Bound, Node, NodeKind, Quantifier};
use crate::error::ParseError;

/// Surface syntax of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Syntax {
    /// `a(?:b|c)*?d{2,3}$`
    #[default]
    Perl5,
    /// `a [ b | c ]*? d**{2..3} $$`, whitespace is insignificant.
    Perl6,
}

/// Parse `pattern` into a tree with unique node ids.
pub fn parse(pattern: &str, syntax: Syntax) -> Result<Node, ParseError> {
    Parser::new(pattern, syntax).parse()
}

/// Parser for rule patterns.
///
/// The `Parser` struct holds the pattern and the current position.
/// It also hands out node ids and capture group indices.
pub struct Parser<'a> {
    pub pattern: &'a str,
    pub pos: usize,
    syntax: Syntax,
    next_id: u32,
    next_group: u32,
}

impl<'a> Parser<'a> {
    /// Create a new parser for the given pattern.
    pub fn new(pattern: &'a str, syntax: Syntax) -> Self {
        Self {
            pattern,
            pos: 0,
            syntax,
            next_id: 1,
            // Index 0 is the whole match.
            next_group: 1,
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Allocate a new group index for capturing groups.
    fn alloc_group(&mut self) -> u32 {
        let index = self.next_group;
        self.next_group += 1;
        index
    }

    fn node(&mut self, kind: NodeKind) -> Node {
        let id = self.alloc_id();
        Node::new(id, kind)
    }

    /// Peek at the next character in the pattern without advancing.
    fn peek(&self) -> Option<char> {
        self.pattern[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.pattern[self.pos..].starts_with(s)
    }

    /// Advance the parser by one character and return it.
    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    /// Expect a specific character and advance if it matches.
    fn expect(&mut self, expected: char, what: &'static str) -> Result<(), ParseError> {
        self.skip_trivia();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(found) => Err(ParseError::Unexpected {
                found,
                pos: self.pos,
            }),
            None => Err(ParseError::UnexpectedEnd { expected: what }),
        }
    }

    /// Whitespace and `#` comments are insignificant in Perl 6 rules.
    fn skip_trivia(&mut self) {
        if self.syntax != Syntax::Perl6 {
            return;
        }
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '#' {
                while let Some(c) = self.advance() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Entry point for parsing a pattern.
    ///
    /// Example:
    /// - Pattern: `a|b` → Alternation(Literal("a"), Literal("b"))
    pub fn parse(&mut self) -> Result<Node, ParseError> {
        let node = self.parse_alt()?;
        self.skip_trivia();
        match self.peek() {
            Some(found) => Err(ParseError::Unexpected {
                found,
                pos: self.pos,
            }),
            None => Ok(node),
        }
    }

    /// Parse alternation (`|`) in the pattern.
    ///
    /// Example:
    /// - Pattern: `a|b|c` → Alternation(Literal("a"), Alternation(Literal("b"), Literal("c")))
    fn parse_alt(&mut self) -> Result<Node, ParseError> {
        let first = self.parse_seq()?;
        self.skip_trivia();
        if self.peek() != Some('|') {
            return Ok(first);
        }
        self.advance();
        let rest = self.parse_alt()?;
        Ok(self.node(NodeKind::Alternation(Box::new(first), Box::new(rest))))
    }

    fn at_seq_end(&self) -> bool {
        match self.peek() {
            None | Some(')') | Some('|') => true,
            Some(']') => self.syntax == Syntax::Perl6,
            _ => false,
        }
    }

    /// Parse a sequence of atoms (concatenation). Adjacent unquantified
    /// characters are merged into a single literal run.
    ///
    /// Example:
    /// - Pattern: `abc`  → Literal("abc")
    /// - Pattern: `ab+c` → Concat(Literal("a"), Concat(Literal("b"){1..Inf}, Literal("c")))
    /// - Pattern: ``     → EmptyMatch
    fn parse_seq(&mut self) -> Result<Node, ParseError> {
        let mut nodes: Vec<Node> = Vec::new();
        loop {
            self.skip_trivia();
            if self.at_seq_end() {
                break;
            }
            let node = self.parse_repeat()?;
            if let (Some(prev), NodeKind::Literal { bytes, quant }) =
                (nodes.last_mut(), &node.kind)
            {
                if let NodeKind::Literal {
                    bytes: prev_bytes,
                    quant: prev_quant,
                } = &mut prev.kind
                {
                    if prev_quant.is_once() && quant.is_once() {
                        let mut merged = prev_bytes.to_vec();
                        merged.extend_from_slice(bytes);
                        *prev_bytes = Bytes::from(merged);
                        continue;
                    }
                }
            }
            nodes.push(node);
        }

        let Some(mut tail) = nodes.pop() else {
            return Ok(self.node(NodeKind::EmptyMatch));
        };
        while let Some(prev) = nodes.pop() {
            tail = self.node(NodeKind::Concat(Box::new(prev), Box::new(tail)));
        }
        Ok(tail)
    }

    /// Parse an atom and the quantifier that follows it, if any.
    ///
    /// Example:
    /// - Pattern: `a?`  → Literal("a"){0..1}
    /// - Pattern: `b+?` → Literal("b"){1..Inf}?
    /// - Pattern: `c`   → Literal("c")
    fn parse_repeat(&mut self) -> Result<Node, ParseError> {
        let mut atom = self.parse_atom()?;
        self.skip_trivia();
        let start = self.pos;
        let Some(quant) = self.parse_quantifier()? else {
            return Ok(atom);
        };
        match &mut atom.kind {
            NodeKind::Wildcard(q)
            | NodeKind::Literal { quant: q, .. }
            | NodeKind::Group { quant: q, .. } => {
                *q = quant;
                Ok(atom)
            }
            _ => Err(ParseError::InvalidQuantifier { pos: start }),
        }
    }

    fn parse_quantifier(&mut self) -> Result<Option<Quantifier>, ParseError> {
        let start = self.pos;
        let quant = match (self.syntax, self.peek()) {
            (Syntax::Perl6, Some('*')) if self.peek_str("**") => {
                self.pos += 2;
                self.skip_trivia();
                self.parse_p6_range(start)?
            }
            (_, Some('*')) => {
                self.advance();
                Quantifier::new(0, Bound::Unbounded)
            }
            (_, Some('+')) => {
                self.advance();
                Quantifier::new(1, Bound::Unbounded)
            }
            (_, Some('?')) => {
                self.advance();
                Quantifier::new(0, Bound::Finite(1))
            }
            (Syntax::Perl5, Some('{')) => self.parse_p5_range(start)?,
            _ => return Ok(None),
        };
        if !quant.is_valid() {
            return Err(ParseError::InvalidQuantifier { pos: start });
        }
        if self.peek() == Some('?') {
            self.advance();
            return Ok(Some(quant.lazy()));
        }
        Ok(Some(quant))
    }

    fn parse_number(&mut self) -> Option<u32> {
        let digits = self.pattern[self.pos..]
            .chars()
            .take_while(char::is_ascii_digit)
            .count();
        let n = self.pattern[self.pos..self.pos + digits].parse().ok()?;
        self.pos += digits;
        Some(n)
    }

    /// `{n}`, `{n,}` or `{n,m}`.
    fn parse_p5_range(&mut self, start: usize) -> Result<Quantifier, ParseError> {
        let invalid = ParseError::InvalidQuantifier { pos: start };
        self.advance();
        let min = self.parse_number().ok_or(invalid.clone())?;
        let max = if self.peek() == Some(',') {
            self.advance();
            match self.parse_number() {
                Some(max) => Bound::Finite(max),
                None => Bound::Unbounded,
            }
        } else {
            Bound::Finite(min)
        };
        if self.advance() != Some('}') {
            return Err(invalid);
        }
        Ok(Quantifier::new(min, max))
    }

    /// `{n}`, `{n..m}` or `{n..*}`.
    fn parse_p6_range(&mut self, start: usize) -> Result<Quantifier, ParseError> {
        let invalid = ParseError::InvalidQuantifier { pos: start };
        if self.advance() != Some('{') {
            return Err(invalid);
        }
        let min = self.parse_number().ok_or(invalid.clone())?;
        let max = if self.peek_str("..") {
            self.pos += 2;
            if self.peek() == Some('*') {
                self.advance();
                Bound::Unbounded
            } else {
                Bound::Finite(self.parse_number().ok_or(invalid.clone())?)
            }
        } else {
            Bound::Finite(min)
        };
        if self.advance() != Some('}') {
            return Err(invalid);
        }
        Ok(Quantifier::new(min, max))
    }

    /// Parse a single atom: group, escape, quoted literal, wildcard, anchor
    /// or character.
    ///
    /// Examples:
    /// - Pattern: `(ab)`   → Group { capture: Some(1), body: Literal("ab") }
    /// - Pattern: `(?:ab)` → Group { capture: None, body: Literal("ab") } (Perl 5)
    /// - Pattern: `[ab]`   → Group { capture: None, body: Literal("ab") } (Perl 6)
    /// - Pattern: `.`      → Wildcard
    /// - Pattern: `^^`     → Anchor(LineStart) (Perl 6)
    /// - Pattern: `a`      → Literal("a")
    fn parse_atom(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        let Some(ch) = self.advance() else {
            return Err(ParseError::UnexpectedEnd { expected: "an atom" });
        };
        match (self.syntax, ch) {
            (Syntax::Perl5, '(') if self.peek_str("?:") => {
                self.pos += 2;
                self.parse_group(None, ')')
            }
            (Syntax::Perl5, '(') if self.peek() == Some('?') => Err(ParseError::Unsupported {
                construct: "(?".to_string(),
                pos: start,
            }),
            (_, '(') => {
                let index = self.alloc_group();
                self.parse_group(Some(index), ')')
            }
            (Syntax::Perl6, '[') => self.parse_group(None, ']'),
            (Syntax::Perl5, '[') => Err(ParseError::Unsupported {
                construct: "character class".to_string(),
                pos: start,
            }),
            (_, '.') => Ok(self.node(NodeKind::Wildcard(Quantifier::ONCE))),
            (Syntax::Perl6, '^') if self.peek() == Some('^') => {
                self.advance();
                Ok(self.node(NodeKind::Anchor(Anchor::LineStart)))
            }
            (Syntax::Perl6, '$') if self.peek() == Some('$') => {
                self.advance();
                Ok(self.node(NodeKind::Anchor(Anchor::LineEnd)))
            }
            (_, '^') => Ok(self.node(NodeKind::Anchor(Anchor::Start))),
            (_, '$') => Ok(self.node(NodeKind::Anchor(Anchor::End))),
            (_, '\\') => self.parse_escape(start),
            (Syntax::Perl6, '\'') => self.parse_quoted(),
            (_, '*' | '+' | '?') | (Syntax::Perl5, '{') => {
                Err(ParseError::InvalidQuantifier { pos: start })
            }
            (_, c) => Ok(self.char_literal(c)),
        }
    }

    fn parse_group(&mut self, capture: Option<u32>, close: char) -> Result<Node, ParseError> {
        let body = self.parse_alt()?;
        self.expect(close, if close == ')' { "`)`" } else { "`]`" })?;
        Ok(self.node(NodeKind::Group {
            body: Box::new(body),
            capture,
            quant: Quantifier::ONCE,
        }))
    }

    /// Parse escape sequences: `\n`, `\t`, `\A`, `\.`, etc.
    fn parse_escape(&mut self, start: usize) -> Result<Node, ParseError> {
        let Some(c) = self.advance() else {
            return Err(ParseError::UnexpectedEnd {
                expected: "an escaped character",
            });
        };
        let byte = match c {
            'n' => b'\n',
            't' => b'\t',
            'r' => b'\r',
            '0' => 0,
            'A' if self.syntax == Syntax::Perl5 => {
                return Ok(self.node(NodeKind::Anchor(Anchor::Start)))
            }
            'z' if self.syntax == Syntax::Perl5 => {
                return Ok(self.node(NodeKind::Anchor(Anchor::End)))
            }
            c if c.is_ascii_alphanumeric() => {
                return Err(ParseError::Unsupported {
                    construct: format!("\\{c}"),
                    pos: start,
                })
            }
            c => return Ok(self.char_literal(c)),
        };
        Ok(self.literal(vec![byte]))
    }

    /// `'...'` quoted literal; `\'` and `\\` escape inside the quotes.
    fn parse_quoted(&mut self) -> Result<Node, ParseError> {
        let mut text = String::new();
        loop {
            match self.advance() {
                Some('\'') => break,
                Some('\\') => match self.advance() {
                    Some(c) => text.push(c),
                    None => return Err(ParseError::UnexpectedEnd { expected: "`'`" }),
                },
                Some(c) => text.push(c),
                None => return Err(ParseError::UnexpectedEnd { expected: "`'`" }),
            }
        }
        if text.is_empty() {
            return Ok(self.node(NodeKind::EmptyMatch));
        }
        Ok(self.literal(text.into_bytes()))
    }

    fn char_literal(&mut self, c: char) -> Node {
        let mut buf = [0; 4];
        self.literal(c.encode_utf8(&mut buf).as_bytes().to_vec())
    }

    fn literal(&mut self, bytes: Vec<u8>) -> Node {
        self.node(NodeKind::Literal {
            bytes: Bytes::from(bytes),
            quant: Quantifier::ONCE,
        })
    }
}
