//! Tokenizer for template source.
//!
//! The tokenizer never fails: malformed input (an unterminated tag, string
//! or comment, or a character that cannot start a token inside a tag) is
//! reported as a single trailing [`TokenKind::Error`] token, after which the
//! stream ends. The parser turns that token into a positioned
//! [`SyntaxError`](crate::SyntaxError).

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Text(String),
    StmtStart, // {%
    StmtEnd,   // %}
    VarStart,  // {{
    VarEnd,    // }}

    // Keywords
    If,
    Elif,
    Else,
    EndIf,
    For,
    In,
    EndFor,
    Block,
    EndBlock,
    Extends,
    Include,
    And,
    Or,
    Not,
    True,
    False,
    None,

    // Symbols
    EqEq,     // ==
    NotEq,    // !=
    Plus,     // +
    Minus,    // -
    Dot,      // .
    Comma,    // ,
    Pipe,     // |
    LBracket, // [
    RBracket, // ]
    LParen,   // (
    RParen,   // )

    // Data
    Ident(String),
    StringLit(String),
    IntLit(i64),
    FloatLit(f64),

    Error(String),
}

impl TokenKind {
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::If
                | TokenKind::Elif
                | TokenKind::Else
                | TokenKind::EndIf
                | TokenKind::For
                | TokenKind::In
                | TokenKind::EndFor
                | TokenKind::Block
                | TokenKind::EndBlock
                | TokenKind::Extends
                | TokenKind::Include
                | TokenKind::And
                | TokenKind::Or
                | TokenKind::Not
                | TokenKind::True
                | TokenKind::False
                | TokenKind::None
        )
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            TokenKind::Text(_) => "text",
            TokenKind::StmtStart => "'{%'",
            TokenKind::StmtEnd => "'%}'",
            TokenKind::VarStart => "'{{'",
            TokenKind::VarEnd => "'}}'",
            TokenKind::If => "'if'",
            TokenKind::Elif => "'elif'",
            TokenKind::Else => "'else'",
            TokenKind::EndIf => "'endif'",
            TokenKind::For => "'for'",
            TokenKind::In => "'in'",
            TokenKind::EndFor => "'endfor'",
            TokenKind::Block => "'block'",
            TokenKind::EndBlock => "'endblock'",
            TokenKind::Extends => "'extends'",
            TokenKind::Include => "'include'",
            TokenKind::And => "'and'",
            TokenKind::Or => "'or'",
            TokenKind::Not => "'not'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::None => "'none'",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Dot => "'.'",
            TokenKind::Comma => "','",
            TokenKind::Pipe => "'|'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::Ident(name) => return write!(f, "identifier '{name}'"),
            TokenKind::StringLit(s) => return write!(f, "string {s:?}"),
            TokenKind::IntLit(i) => return write!(f, "number {i}"),
            TokenKind::FloatLit(x) => return write!(f, "number {x}"),
            TokenKind::Error(message) => return f.write_str(message),
        };
        f.write_str(symbol)
    }
}

/// A token with its byte range and 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Token {
    /// The exact source text this token was produced from.
    pub fn raw<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start..self.end).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Var,
    Stmt,
}

#[derive(Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
    line: usize,
    column: usize,
    in_tag: Option<Tag>,
    trim_blocks: bool,
    after_dot: bool,
    finished: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            cursor: 0,
            line: 1,
            column: 1,
            in_tag: None,
            trim_blocks: false,
            after_dot: false,
            finished: false,
        }
    }

    pub fn with_trim_blocks(mut self, trim_blocks: bool) -> Self {
        self.trim_blocks = trim_blocks;
        self
    }

    /// Current position, used for end-of-input diagnostics.
    pub fn position(&self) -> (usize, usize) {
        (self.line, self.column)
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        let end = (self.cursor + n).min(self.input.len());
        for c in self.input[self.cursor..end].chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.cursor = end;
    }

    /// Consume `n` bytes and wrap them into a token.
    fn emit(&mut self, kind: TokenKind, n: usize) -> Token {
        let (start, line, column) = (self.cursor, self.line, self.column);
        self.advance(n);
        self.after_dot = kind == TokenKind::Dot;
        Token {
            kind,
            start,
            end: self.cursor,
            line,
            column,
        }
    }

    fn error(&mut self, message: impl Into<String>) -> Token {
        self.finished = true;
        let rest = self.remaining().len();
        let token = Token {
            kind: TokenKind::Error(message.into()),
            start: self.cursor,
            end: self.cursor + rest,
            line: self.line,
            column: self.column,
        };
        self.cursor += rest;
        token
    }

    pub fn next_token(&mut self) -> Option<Token> {
        if self.finished {
            return None;
        }
        match self.in_tag {
            None => self.next_text_token(),
            Some(tag) => self.next_tag_token(tag),
        }
    }

    fn next_text_token(&mut self) -> Option<Token> {
        loop {
            let rest = self.remaining();
            if rest.is_empty() {
                return None;
            }

            let next_tag = ["{%", "{{", "{#"]
                .iter()
                .filter_map(|marker| rest.find(marker))
                .min();

            return match next_tag {
                Some(0) if rest.starts_with("{#") => match rest.find("#}") {
                    Some(end) => {
                        self.advance(end + 2);
                        continue;
                    }
                    None => Some(self.error("unterminated comment")),
                },
                Some(0) if rest.starts_with("{%") => {
                    self.in_tag = Some(Tag::Stmt);
                    Some(self.emit(TokenKind::StmtStart, 2))
                }
                Some(0) => {
                    self.in_tag = Some(Tag::Var);
                    Some(self.emit(TokenKind::VarStart, 2))
                }
                Some(idx) => {
                    let text = rest[..idx].to_string();
                    Some(self.emit(TokenKind::Text(text), idx))
                }
                None => {
                    let text = rest.to_string();
                    Some(self.emit(TokenKind::Text(text), rest.len()))
                }
            };
        }
    }

    fn next_tag_token(&mut self, tag: Tag) -> Option<Token> {
        // Whitespace inside markers is insignificant
        let rest = self.remaining();
        let skipped = rest.len() - rest.trim_start().len();
        self.advance(skipped);

        let rest = self.remaining();
        let Some(first) = rest.chars().next() else {
            let expected = match tag {
                Tag::Var => "}}",
                Tag::Stmt => "%}",
            };
            return Some(self.error(format!("unexpected end of template, expected '{expected}'")));
        };

        if rest.starts_with("%}") {
            self.in_tag = None;
            let token = self.emit(TokenKind::StmtEnd, 2);
            if self.trim_blocks {
                let after = self.remaining();
                if after.starts_with('\n') {
                    self.advance(1);
                } else if after.starts_with("\r\n") {
                    self.advance(2);
                }
            }
            return Some(token);
        }
        if rest.starts_with("}}") {
            self.in_tag = None;
            return Some(self.emit(TokenKind::VarEnd, 2));
        }

        let symbols: [(&str, TokenKind); 11] = [
            ("==", TokenKind::EqEq),
            ("!=", TokenKind::NotEq),
            ("+", TokenKind::Plus),
            ("-", TokenKind::Minus),
            (".", TokenKind::Dot),
            (",", TokenKind::Comma),
            ("|", TokenKind::Pipe),
            ("[", TokenKind::LBracket),
            ("]", TokenKind::RBracket),
            ("(", TokenKind::LParen),
            (")", TokenKind::RParen),
        ];
        for (symbol, kind) in symbols {
            if rest.starts_with(symbol) {
                return Some(self.emit(kind, symbol.len()));
            }
        }

        if first == '\'' || first == '"' {
            return Some(self.lex_string(first));
        }

        if first.is_ascii_digit() {
            return Some(self.lex_number());
        }

        if first.is_alphabetic() || first == '_' {
            let len: usize = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .map(char::len_utf8)
                .sum();
            let word = &rest[..len];
            let kind = match word {
                "if" => TokenKind::If,
                "elif" => TokenKind::Elif,
                "else" => TokenKind::Else,
                "endif" => TokenKind::EndIf,
                "for" => TokenKind::For,
                "in" => TokenKind::In,
                "endfor" => TokenKind::EndFor,
                "block" => TokenKind::Block,
                "endblock" => TokenKind::EndBlock,
                "extends" => TokenKind::Extends,
                "include" => TokenKind::Include,
                "and" => TokenKind::And,
                "or" => TokenKind::Or,
                "not" => TokenKind::Not,
                "true" | "True" => TokenKind::True,
                "false" | "False" => TokenKind::False,
                "none" | "None" => TokenKind::None,
                _ => TokenKind::Ident(word.to_string()),
            };
            return Some(self.emit(kind, len));
        }

        Some(self.error(format!("unexpected character '{first}' inside tag")))
    }

    fn lex_string(&mut self, quote: char) -> Token {
        let rest = self.remaining();
        let mut value = String::new();
        let mut chars = rest.char_indices().skip(1);
        while let Some((idx, c)) = chars.next() {
            if c == quote {
                return self.emit(TokenKind::StringLit(value), idx + c.len_utf8());
            }
            if c == '\\' {
                match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, esc)) => value.push(esc),
                    None => break,
                }
            } else {
                value.push(c);
            }
        }
        self.error("unterminated string literal")
    }

    fn lex_number(&mut self) -> Token {
        let rest = self.remaining();
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let after = &rest[int_len..];
        // `rows.0.1` is a path, not `rows` followed by the float `0.1`
        let frac_len = if !self.after_dot
            && after.starts_with('.')
            && after[1..].bytes().next().is_some_and(|b| b.is_ascii_digit())
        {
            1 + after[1..].bytes().take_while(u8::is_ascii_digit).count()
        } else {
            0
        };

        let literal = &rest[..int_len + frac_len];
        if frac_len > 0 {
            match literal.parse::<f64>() {
                Ok(f) => self.emit(TokenKind::FloatLit(f), literal.len()),
                Err(_) => self.error(format!("invalid number '{literal}'")),
            }
        } else {
            match literal.parse::<i64>() {
                Ok(i) => self.emit(TokenKind::IntLit(i), literal.len()),
                Err(_) => self.error(format!("integer literal '{literal}' out of range")),
            }
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.next_token()
    }
}

/// Tokenize a complete template source.
pub fn tokenize(input: &str) -> Vec<Token> {
    Tokenizer::new(input).collect()
}
