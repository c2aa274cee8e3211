use std::collections::{HashSet, VecDeque};

use crate::ast::*;
use crate::error::SyntaxError;
use crate::lexer::{Token, TokenKind, Tokenizer};
use crate::registry::resolve_relative;

type ParseResult<T> = Result<T, SyntaxError>;

pub struct Parser<'a> {
    lexer: Tokenizer<'a>,
    buffer: VecDeque<Token>,
    /// Identifier of the template being parsed, used for relative lookups.
    name: Option<&'a str>,
    block_names: HashSet<String>,
    has_extends: bool,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            lexer: Tokenizer::new(input),
            buffer: VecDeque::new(),
            name: None,
            block_names: HashSet::new(),
            has_extends: false,
        }
    }

    pub fn with_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_trim_blocks(mut self, trim_blocks: bool) -> Self {
        self.lexer = self.lexer.with_trim_blocks(trim_blocks);
        self
    }

    fn peek(&mut self, n: usize) -> Option<&Token> {
        while self.buffer.len() <= n {
            let token = self.lexer.next_token()?;
            self.buffer.push_back(token);
        }
        self.buffer.get(n)
    }

    fn peek_kind(&mut self, n: usize) -> Option<&TokenKind> {
        self.peek(n).map(|t| &t.kind)
    }

    fn consume(&mut self) -> Option<Token> {
        if self.buffer.is_empty() {
            self.lexer.next_token()
        } else {
            self.buffer.pop_front()
        }
    }

    fn error_at(token: &Token, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, token.line, token.column)
    }

    fn eof_error(&self, message: impl Into<String>) -> SyntaxError {
        let (line, column) = self.lexer.position();
        SyntaxError::new(message, line, column)
    }

    /// Error for a token that is not what the grammar wants here. The lexer's
    /// trailing error token reports its own message.
    fn unexpected(&self, token: Option<Token>, expected: &str) -> SyntaxError {
        match token {
            Some(t) => match &t.kind {
                TokenKind::Error(message) => Self::error_at(&t, message.clone()),
                kind => Self::error_at(&t, format!("expected {expected}, found {kind}")),
            },
            None => self.eof_error(format!("expected {expected}, found end of template")),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        match self.consume() {
            Some(t) if t.kind == kind => Ok(t),
            other => Err(self.unexpected(other, &kind.to_string())),
        }
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<(String, Token)> {
        match self.consume() {
            Some(t) => match &t.kind {
                TokenKind::Ident(name) => Ok((name.clone(), t)),
                _ => Err(self.unexpected(Some(t), what)),
            },
            None => Err(self.unexpected(None, what)),
        }
    }

    /// Parse a whole template into its root node sequence.
    pub fn parse(&mut self) -> ParseResult<Vec<Node>> {
        let nodes = self.parse_body(true)?;
        match self.consume() {
            None => Ok(nodes),
            // parse_body only stops early on `{% <terminator>`
            Some(_) => match self.consume() {
                Some(t) => Err(Self::error_at(&t, format!("unexpected {}", t.kind))),
                None => Err(self.eof_error("unexpected end of template")),
            },
        }
    }

    fn parse_body(&mut self, top_level: bool) -> ParseResult<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            if let Some(TokenKind::StmtStart) = self.peek_kind(0) {
                if let Some(
                    TokenKind::EndFor
                    | TokenKind::EndIf
                    | TokenKind::EndBlock
                    | TokenKind::Else
                    | TokenKind::Elif,
                ) = self.peek_kind(1)
                {
                    break;
                }
            }

            let Some(token) = self.consume() else {
                break;
            };

            match token.kind {
                TokenKind::Text(s) => nodes.push(Node::Text(s)),
                TokenKind::VarStart => {
                    let expr = self.parse_expr()?;
                    self.expect(TokenKind::VarEnd)?;
                    nodes.push(Node::Var(expr));
                }
                TokenKind::StmtStart => {
                    let first_node = top_level && nodes.is_empty();
                    nodes.push(self.parse_statement(first_node)?);
                }
                _ => return Err(self.unexpected(Some(token), "text or tag")),
            }
        }
        Ok(nodes)
    }

    fn parse_statement(&mut self, first_node: bool) -> ParseResult<Node> {
        let Some(token) = self.consume() else {
            return Err(self.eof_error("unexpected end of template inside tag"));
        };
        match token.kind {
            TokenKind::For => self.parse_for(&token),
            TokenKind::If => self.parse_if(&token),
            TokenKind::Block => self.parse_block(&token),
            TokenKind::Extends => {
                if self.has_extends {
                    return Err(Self::error_at(&token, "template may only extend one parent"));
                }
                if !first_node {
                    return Err(Self::error_at(
                        &token,
                        "'extends' must be the first statement of the template",
                    ));
                }
                self.has_extends = true;
                let parent = self.parse_template_ref()?;
                Ok(Node::Extends(parent))
            }
            TokenKind::Include => Ok(Node::Include(self.parse_template_ref()?)),
            _ => Err(self.unexpected(Some(token), "statement keyword")),
        }
    }

    /// `"name" %}` following `extends` or `include`.
    fn parse_template_ref(&mut self) -> ParseResult<String> {
        let target = match self.consume() {
            Some(Token {
                kind: TokenKind::StringLit(target),
                line,
                column,
                ..
            }) => match resolve_relative(self.name, &target) {
                Some(resolved) => resolved,
                None => {
                    return Err(SyntaxError::new(
                        format!("template path '{target}' escapes the template root"),
                        line,
                        column,
                    ))
                }
            },
            other => return Err(self.unexpected(other, "quoted template name")),
        };
        self.expect(TokenKind::StmtEnd)?;
        Ok(target)
    }

    fn parse_for(&mut self, open: &Token) -> ParseResult<Node> {
        let (target, _) = self.expect_ident("loop variable name")?;
        self.expect(TokenKind::In)?;
        let iterable = self.parse_expr()?;
        self.expect(TokenKind::StmtEnd)?;

        let body = self.parse_body(false)?;
        self.expect_end(open, TokenKind::EndFor, "for loop")?;
        self.expect(TokenKind::StmtEnd)?;

        Ok(Node::For {
            target,
            iterable,
            body,
        })
    }

    fn parse_if(&mut self, open: &Token) -> ParseResult<Node> {
        let condition = self.parse_expr()?;
        self.expect(TokenKind::StmtEnd)?;

        let body = self.parse_body(false)?;
        let mut cases = vec![(condition, body)];
        let mut else_body = None;

        loop {
            // parse_body stopped at `{% <terminator>` or end of template
            if self.peek(0).is_none() {
                return Err(self.unterminated(open, "if"));
            }
            self.expect(TokenKind::StmtStart)?;
            let Some(token) = self.consume() else {
                return Err(self.unterminated(open, "if"));
            };
            match token.kind {
                TokenKind::Elif if else_body.is_none() => {
                    let cond = self.parse_expr()?;
                    self.expect(TokenKind::StmtEnd)?;
                    cases.push((cond, self.parse_body(false)?));
                }
                TokenKind::Else if else_body.is_none() => {
                    self.expect(TokenKind::StmtEnd)?;
                    else_body = Some(self.parse_body(false)?);
                }
                TokenKind::EndIf => {
                    self.expect(TokenKind::StmtEnd)?;
                    break;
                }
                _ => {
                    return Err(Self::error_at(
                        &token,
                        format!("expected 'endif', found {}", token.kind),
                    ))
                }
            }
        }

        Ok(Node::If { cases, else_body })
    }

    fn parse_block(&mut self, open: &Token) -> ParseResult<Node> {
        let (name, name_token) = self.expect_ident("block name")?;
        if !self.block_names.insert(name.clone()) {
            return Err(Self::error_at(
                &name_token,
                format!("block '{name}' defined twice"),
            ));
        }
        self.expect(TokenKind::StmtEnd)?;

        let body = self.parse_body(false)?;
        self.expect_end(open, TokenKind::EndBlock, "block")?;

        // `{% endblock name %}` must repeat the opening name when given
        if let Some(TokenKind::Ident(_)) = self.peek_kind(0) {
            let (closing, closing_token) = self.expect_ident("block name")?;
            if closing != name {
                return Err(Self::error_at(
                    &closing_token,
                    format!("endblock '{closing}' does not match block '{name}'"),
                ));
            }
        }
        self.expect(TokenKind::StmtEnd)?;

        Ok(Node::Block { name, body })
    }

    /// Consume `{% <end>` closing a construct opened at `open`.
    fn expect_end(&mut self, open: &Token, end: TokenKind, what: &str) -> ParseResult<()> {
        if self.peek(0).is_none() {
            return Err(self.unterminated(open, what));
        }
        self.expect(TokenKind::StmtStart)?;
        match self.consume() {
            Some(t) if t.kind == end => Ok(()),
            None => Err(self.unterminated(open, what)),
            other => Err(self.unexpected(other, &end.to_string())),
        }
    }

    fn unterminated(&self, open: &Token, what: &str) -> SyntaxError {
        self.eof_error(format!(
            "unterminated {what} opened at {}:{}",
            open.line, open.column
        ))
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_and()?;
        while let Some(TokenKind::Or) = self.peek_kind(0) {
            self.consume();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_not()?;
        while let Some(TokenKind::And) = self.peek_kind(0) {
            self.consume();
            let rhs = self.parse_not()?;
            lhs = Expr::BinOp(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if let Some(TokenKind::Not) = self.peek_kind(0) {
            self.consume();
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_eq()
    }

    fn parse_eq(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_add()?;
        loop {
            let op = match self.peek_kind(0) {
                Some(TokenKind::EqEq) => BinOp::Eq,
                Some(TokenKind::NotEq) => BinOp::NotEq,
                _ => break,
            };
            self.consume();
            let rhs = self.parse_add()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_add(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_postfix()?;
        while let Some(TokenKind::Plus) = self.peek_kind(0) {
            self.consume();
            let rhs = self.parse_postfix()?;
            lhs = Expr::BinOp(Box::new(lhs), BinOp::Add, Box::new(rhs));
        }
        Ok(lhs)
    }

    /// A primary expression followed by `.attr`, `[index]` and `| filter`.
    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek_kind(0) {
                Some(TokenKind::Dot) => {
                    self.consume();
                    match self.consume() {
                        Some(Token {
                            kind: TokenKind::Ident(attr),
                            ..
                        }) => expr = Expr::Attribute(Box::new(expr), attr),
                        Some(Token {
                            kind: TokenKind::IntLit(i),
                            ..
                        }) => expr = Expr::Attribute(Box::new(expr), i.to_string()),
                        other => return Err(self.unexpected(other, "attribute name after '.'")),
                    }
                }
                Some(TokenKind::LBracket) => {
                    self.consume();
                    let idx = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                Some(TokenKind::Pipe) => {
                    self.consume();
                    let (name, _) = self.expect_ident("filter name")?;
                    let args = if let Some(TokenKind::LParen) = self.peek_kind(0) {
                        self.consume();
                        self.parse_list(TokenKind::RParen)?
                    } else {
                        Vec::new()
                    };
                    expr = Expr::Filter {
                        expr: Box::new(expr),
                        name,
                        args,
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.consume();
        let expr = match token.as_ref().map(|t| &t.kind) {
            Some(TokenKind::StringLit(s)) => Expr::StringLit(s.clone()),
            Some(TokenKind::IntLit(i)) => Expr::IntLit(*i),
            Some(TokenKind::FloatLit(f)) => Expr::FloatLit(*f),
            Some(TokenKind::True) => Expr::BoolLit(true),
            Some(TokenKind::False) => Expr::BoolLit(false),
            Some(TokenKind::None) => Expr::NoneLit,
            Some(TokenKind::Ident(s)) => Expr::Var(s.clone()),
            Some(TokenKind::Minus) => match self.consume() {
                Some(Token {
                    kind: TokenKind::IntLit(i),
                    ..
                }) => Expr::IntLit(-i),
                Some(Token {
                    kind: TokenKind::FloatLit(f),
                    ..
                }) => Expr::FloatLit(-f),
                other => return Err(self.unexpected(other, "number after '-'")),
            },
            Some(TokenKind::LBracket) => Expr::List(self.parse_list(TokenKind::RBracket)?),
            Some(TokenKind::LParen) => {
                let e = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                e
            }
            _ => return Err(self.unexpected(token.clone(), "expression")),
        };
        Ok(expr)
    }

    /// Comma separated expressions up to `close`; the opener is already consumed.
    fn parse_list(&mut self, close: TokenKind) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            if self.peek_kind(0) == Some(&close) {
                self.consume();
                return Ok(items);
            }
            items.push(self.parse_expr()?);
            match self.consume() {
                Some(t) if t.kind == TokenKind::Comma => {}
                Some(t) if t.kind == close => return Ok(items),
                other => return Err(self.unexpected(other, &format!("',' or {close}"))),
            }
        }
    }
}

/// Parse `source` as an anonymous template.
pub fn parse(source: &str) -> Result<Vec<Node>, SyntaxError> {
    Parser::new(source).parse()
}
