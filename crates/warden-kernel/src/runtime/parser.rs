//! Recursive-descent parser for agent scripts.

use super::ast::{BinaryOp, Expr, ExprKind, Pos, Program, Stmt, StmtKind, UnaryOp};
use super::lexer::{tokenize, LexError, Tok, Token};

/// Parse error with location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// What went wrong.
    pub message: String,
    /// Where.
    pub pos: Pos,
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            pos: err.pos,
        }
    }
}

/// Parses a script into a program.
///
/// # Errors
///
/// Returns the first lexical or syntactic error.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, at: 0 };
    let body = parser.block_body(false)?;
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Token>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at)
    }

    fn pos(&self) -> Pos {
        self.peek().map_or(
            Pos {
                line: u32::MAX,
                column: 0,
            },
            |t| t.pos,
        )
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.at).cloned();
        if token.is_some() {
            self.at += 1;
        }
        token
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek().is_some_and(|t| &t.tok == tok) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<Pos, ParseError> {
        let pos = self.pos();
        if self.eat(tok) {
            Ok(pos)
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            message,
            pos: self.pos(),
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Tok::Newline) {}
    }

    /// Parses statements until EOF (`inside_brace = false`) or a closing
    /// brace (left unconsumed).
    fn block_body(&mut self, inside_brace: bool) -> Result<Vec<Stmt>, ParseError> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                None => {
                    if inside_brace {
                        return Err(self.error("expected '}'".into()));
                    }
                    break;
                }
                Some(Token { tok: Tok::RBrace, .. }) if inside_brace => break,
                Some(Token { tok: Tok::RBrace, .. }) => {
                    return Err(self.error("unexpected '}'".into()))
                }
                Some(_) => body.push(self.statement()?),
            }
        }
        Ok(body)
    }

    fn braced_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.skip_newlines();
        self.expect(&Tok::LBrace, "'{'")?;
        let body = self.block_body(true)?;
        self.expect(&Tok::RBrace, "'}'")?;
        Ok(body)
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        let kind = match self.peek().map(|t| t.tok.clone()) {
            Some(Tok::Ident(word)) => match word.as_str() {
                "import" => {
                    self.advance();
                    match self.advance() {
                        Some(Token {
                            tok: Tok::Ident(module),
                            ..
                        }) => StmtKind::Import { module },
                        _ => return Err(self.error("expected module name after 'import'".into())),
                    }
                }
                "let" => {
                    self.advance();
                    let name = self.ident("binding name")?;
                    self.expect(&Tok::Assign, "'=' in let binding")?;
                    let value = self.expression()?;
                    StmtKind::Let { name, value }
                }
                "if" => {
                    self.advance();
                    let cond = self.expression()?;
                    let then = self.braced_block()?;
                    let mut otherwise = Vec::new();
                    let checkpoint = self.at;
                    self.skip_newlines();
                    if let Some(Token {
                        tok: Tok::Ident(word),
                        ..
                    }) = self.peek()
                    {
                        if word == "else" {
                            self.advance();
                            // `else if` chains nest.
                            if let Some(Token {
                                tok: Tok::Ident(word),
                                ..
                            }) = self.peek()
                            {
                                if word == "if" {
                                    otherwise.push(self.statement()?);
                                } else {
                                    otherwise = self.braced_block()?;
                                }
                            } else {
                                otherwise = self.braced_block()?;
                            }
                        } else {
                            self.at = checkpoint;
                        }
                    } else {
                        self.at = checkpoint;
                    }
                    StmtKind::If {
                        cond,
                        then,
                        otherwise,
                    }
                }
                "for" => {
                    self.advance();
                    let var = self.ident("loop variable")?;
                    match self.advance() {
                        Some(Token { tok: Tok::Ident(kw), .. }) if kw == "in" => {}
                        _ => return Err(self.error("expected 'in' in for loop".into())),
                    }
                    let iter = self.expression()?;
                    let body = self.braced_block()?;
                    StmtKind::For { var, iter, body }
                }
                "return" => {
                    self.advance();
                    let value = match self.peek() {
                        None
                        | Some(Token { tok: Tok::Newline, .. })
                        | Some(Token { tok: Tok::RBrace, .. }) => None,
                        Some(_) => Some(self.expression()?),
                    };
                    StmtKind::Return(value)
                }
                _ => self.assign_or_expr()?,
            },
            Some(_) => self.assign_or_expr()?,
            None => return Err(self.error("expected a statement".into())),
        };
        Ok(Stmt { kind, pos })
    }

    fn assign_or_expr(&mut self) -> Result<StmtKind, ParseError> {
        // `name = expr` only when the target is a bare identifier.
        if let Some(Token {
            tok: Tok::Ident(name),
            ..
        }) = self.peek().cloned()
        {
            if self
                .tokens
                .get(self.at + 1)
                .is_some_and(|t| t.tok == Tok::Assign)
            {
                self.at += 2;
                let value = self.expression()?;
                return Ok(StmtKind::Assign { name, value });
            }
        }
        Ok(StmtKind::Expr(self.expression()?))
    }

    fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.advance() {
            Some(Token {
                tok: Tok::Ident(name),
                ..
            }) => Ok(name),
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.keyword("or") {
            let rhs = self.and_expr()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.comparison()?;
        while self.keyword("and") {
            let rhs = self.comparison()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn keyword(&mut self, word: &str) -> bool {
        if let Some(Token {
            tok: Tok::Ident(name),
            ..
        }) = self.peek()
        {
            if name == word {
                self.at += 1;
                return true;
            }
        }
        false
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.additive()?;
        let op = match self.peek().map(|t| &t.tok) {
            Some(Tok::Eq) => Some(BinaryOp::Eq),
            Some(Tok::Ne) => Some(BinaryOp::Ne),
            Some(Tok::Lt) => Some(BinaryOp::Lt),
            Some(Tok::Le) => Some(BinaryOp::Le),
            Some(Tok::Gt) => Some(BinaryOp::Gt),
            Some(Tok::Ge) => Some(BinaryOp::Ge),
            _ => None,
        };
        match op {
            Some(op) => {
                self.at += 1;
                let rhs = self.additive()?;
                Ok(binary(op, lhs, rhs))
            }
            None => Ok(lhs),
        }
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek().map(|t| &t.tok) {
                Some(Tok::Plus) => BinaryOp::Add,
                Some(Tok::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.at += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos();
        if self.eat(&Tok::Bang) || self.keyword("not") {
            let expr = self.unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                },
                pos,
            });
        }
        if self.eat(&Tok::Minus) {
            let expr = self.unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(expr),
                },
                pos,
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Tok::Dot) {
                let pos = self.pos();
                let name = self.ident("member name")?;
                expr = Expr {
                    kind: ExprKind::Member {
                        object: Box::new(expr),
                        name,
                    },
                    pos,
                };
            } else if self.eat(&Tok::LParen) {
                let pos = expr.pos;
                let mut args = Vec::new();
                self.skip_newlines();
                if !self.eat(&Tok::RParen) {
                    loop {
                        args.push(self.expression()?);
                        self.skip_newlines();
                        if self.eat(&Tok::Comma) {
                            self.skip_newlines();
                            continue;
                        }
                        self.expect(&Tok::RParen, "')' after arguments")?;
                        break;
                    }
                }
                expr = Expr {
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    pos,
                };
            } else if self.eat(&Tok::LBracket) {
                let pos = expr.pos;
                let index = self.expression()?;
                self.expect(&Tok::RBracket, "']' after index")?;
                expr = Expr {
                    kind: ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    pos,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos();
        let Some(token) = self.advance() else {
            return Err(self.error("unexpected end of input".into()));
        };
        let kind = match token.tok {
            Tok::Str(s) => ExprKind::Str(s),
            Tok::Int(n) => ExprKind::Int(n),
            Tok::Float(f) => ExprKind::Float(f),
            Tok::Ident(name) => match name.as_str() {
                "true" => ExprKind::Bool(true),
                "false" => ExprKind::Bool(false),
                "null" => ExprKind::Null,
                _ => ExprKind::Var(name),
            },
            Tok::LParen => {
                let inner = self.expression()?;
                self.expect(&Tok::RParen, "')'")?;
                return Ok(inner);
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                self.skip_newlines();
                if !self.eat(&Tok::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        self.skip_newlines();
                        if self.eat(&Tok::Comma) {
                            self.skip_newlines();
                            continue;
                        }
                        self.expect(&Tok::RBracket, "']' after list")?;
                        break;
                    }
                }
                ExprKind::List(items)
            }
            Tok::LBrace => {
                let mut pairs = Vec::new();
                self.skip_newlines();
                if !self.eat(&Tok::RBrace) {
                    loop {
                        let key = match self.advance() {
                            Some(Token { tok: Tok::Str(s), .. }) => s,
                            Some(Token {
                                tok: Tok::Ident(s), ..
                            }) => s,
                            _ => return Err(self.error("expected map key".into())),
                        };
                        self.expect(&Tok::Colon, "':' after map key")?;
                        self.skip_newlines();
                        pairs.push((key, self.expression()?));
                        self.skip_newlines();
                        if self.eat(&Tok::Comma) {
                            self.skip_newlines();
                            continue;
                        }
                        self.expect(&Tok::RBrace, "'}' after map")?;
                        break;
                    }
                }
                ExprKind::MapLit(pairs)
            }
            other => {
                return Err(ParseError {
                    message: format!("unexpected token {other:?}"),
                    pos,
                })
            }
        };
        Ok(Expr { kind, pos })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let pos = lhs.pos;
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        pos,
    }
}
