//! Recursive-descent parser with a Pratt parser for infix expressions (§4.1).
//!
//! Errors never abort a parse: every `parse_*` function that hits an
//! unexpected token reports a diagnostic, marks the node `has_error`, and
//! either synthesizes a placeholder or resyncs to a caller-supplied token
//! set before continuing. `parseFile` always returns a `File`.

use std::collections::VecDeque;

use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::intern::StringTable;
use crate::lexer::{Lexer, LexerMode, Token, TokenKind, TokenPayload};
use crate::span::Span;

/// Parses a whole source file into a [`File`]. Public contract named in §4.1.
#[must_use]
pub fn parse_file(src: &str, strings: &mut StringTable, diagnostics: &mut Diagnostics) -> File {
    let mut parser = Parser::new(src, strings, diagnostics);
    parser.parse_file()
}

/// Expression-level entry point used for embedding tests (§4.1).
#[must_use]
pub fn parse_expr_standalone(src: &str, strings: &mut StringTable, diagnostics: &mut Diagnostics) -> Expr {
    let mut parser = Parser::new(src, strings, diagnostics);
    parser.parse_expr(0)
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    diags: &'a mut Diagnostics,
    ids: NodeIdGen,
    buf: VecDeque<Token>,
}

#[derive(Clone, Copy)]
enum OpKind {
    Assign(Option<BinaryOp>),
    Binary(BinaryOp),
}

fn op_info(kind: TokenKind) -> Option<(OpKind, u8, bool)> {
    use TokenKind as K;
    Some(match kind {
        K::Eq => (OpKind::Assign(None), 0, true),
        K::PlusEq => (OpKind::Assign(Some(BinaryOp::Add)), 0, true),
        K::MinusEq => (OpKind::Assign(Some(BinaryOp::Sub)), 0, true),
        K::StarEq => (OpKind::Assign(Some(BinaryOp::Mul)), 0, true),
        K::SlashEq => (OpKind::Assign(Some(BinaryOp::Div)), 0, true),
        K::PercentEq => (OpKind::Assign(Some(BinaryOp::Mod)), 0, true),
        K::StarStarEq => (OpKind::Assign(Some(BinaryOp::Pow)), 0, true),
        K::OrOr => (OpKind::Binary(BinaryOp::Or), 1, false),
        K::AndAnd => (OpKind::Binary(BinaryOp::And), 2, false),
        K::QQ => (OpKind::Binary(BinaryOp::NullCoalesce), 3, false),
        K::Pipe => (OpKind::Binary(BinaryOp::BitOr), 4, false),
        K::Caret => (OpKind::Binary(BinaryOp::BitXor), 5, false),
        K::Amp => (OpKind::Binary(BinaryOp::BitAnd), 6, false),
        K::EqEq => (OpKind::Binary(BinaryOp::Eq), 7, false),
        K::BangEq => (OpKind::Binary(BinaryOp::Ne), 7, false),
        K::Lt => (OpKind::Binary(BinaryOp::Lt), 8, false),
        K::Le => (OpKind::Binary(BinaryOp::Le), 8, false),
        K::Gt => (OpKind::Binary(BinaryOp::Gt), 8, false),
        K::Ge => (OpKind::Binary(BinaryOp::Ge), 8, false),
        K::Shl => (OpKind::Binary(BinaryOp::Shl), 9, false),
        K::Shr => (OpKind::Binary(BinaryOp::Shr), 9, false),
        K::Plus => (OpKind::Binary(BinaryOp::Add), 10, false),
        K::Minus => (OpKind::Binary(BinaryOp::Sub), 10, false),
        K::Star => (OpKind::Binary(BinaryOp::Mul), 11, false),
        K::Slash => (OpKind::Binary(BinaryOp::Div), 11, false),
        K::Percent => (OpKind::Binary(BinaryOp::Mod), 11, false),
        K::StarStar => (OpKind::Binary(BinaryOp::Pow), 12, true),
        _ => return None,
    })
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, strings: &'a mut StringTable, diags: &'a mut Diagnostics) -> Self {
        Self {
            lexer: Lexer::new(src, strings),
            diags,
            ids: NodeIdGen::new(),
            buf: VecDeque::new(),
        }
    }

    fn fill(&mut self, n: usize) {
        while self.buf.len() <= n {
            let t = self.lexer.next();
            self.buf.push_back(t);
        }
    }

    fn peek(&mut self) -> Token {
        self.fill(0);
        self.buf[0]
    }

    fn peek2(&mut self) -> Token {
        self.fill(1);
        self.buf[1]
    }

    fn bump(&mut self) -> Token {
        self.fill(0);
        self.buf.pop_front().expect("just filled")
    }

    fn at(&mut self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Span {
        let tok = self.peek();
        if tok.kind == kind {
            self.bump().span
        } else {
            self.diags.error(tok.span, format!("expected {what}"));
            Span::empty_at(tok.span.start)
        }
    }

    /// Skips tokens until one in `sync` (or EOF) is next, without consuming it.
    fn recover_to(&mut self, sync: &[TokenKind]) {
        while !matches!(self.peek().kind, TokenKind::Eof) && !sync.contains(&self.peek().kind) {
            self.bump();
        }
    }

    fn parse_file(&mut self) -> File {
        let id = self.ids.next();
        let start = self.peek().span;
        let mut items = Vec::new();
        let mut has_error = false;
        while !self.at(TokenKind::Eof) {
            let item = self.parse_item();
            has_error |= item.has_error;
            items.push(item);
        }
        let end = self.peek().span;
        File {
            id,
            span: start.to(end),
            has_error,
            items,
        }
    }

    fn parse_item(&mut self) -> Item {
        let id = self.ids.next();
        if self.is_decl_start() {
            let decl = self.parse_decl();
            Item {
                id,
                span: decl.span,
                has_error: decl.has_error,
                kind: ItemKind::Decl(decl),
            }
        } else {
            let stmt = self.parse_stmt();
            Item {
                id,
                span: stmt.span,
                has_error: stmt.has_error,
                kind: ItemKind::Stmt(stmt),
            }
        }
    }

    fn is_decl_start(&mut self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::KwVar | TokenKind::KwConst | TokenKind::KwFunc | TokenKind::KwImport
        )
    }

    fn parse_decl(&mut self) -> Decl {
        match self.peek().kind {
            TokenKind::KwVar | TokenKind::KwConst => self.parse_binding_decl(),
            TokenKind::KwFunc => self.parse_func_decl(),
            TokenKind::KwImport => self.parse_import_decl(),
            _ => unreachable!("caller checked is_decl_start"),
        }
    }

    fn parse_binding_decl(&mut self) -> Decl {
        let id = self.ids.next();
        let kw = self.bump();
        let modifier = if kw.kind == TokenKind::KwVar {
            Modifier::Var
        } else {
            Modifier::Const
        };
        let binding = self.parse_binding();
        let mut has_error = false;
        let value = if self.eat(TokenKind::Eq) {
            Some(self.parse_expr(0))
        } else {
            if modifier == Modifier::Const {
                self.diags.error(self.peek().span, "const declaration requires an initializer");
                has_error = true;
            }
            None
        };
        let end = self.peek().span;
        self.expect_semi(&mut has_error);
        Decl {
            id,
            span: kw.span.to(end),
            has_error,
            kind: DeclKind::Binding { modifier, binding, value },
        }
    }

    fn expect_semi(&mut self, has_error: &mut bool) {
        if !self.eat(TokenKind::Semi) {
            self.diags.error(self.peek().span, "expected ';'");
            *has_error = true;
            self.recover_to(&[TokenKind::Semi, TokenKind::RBrace, TokenKind::Eof]);
            self.eat(TokenKind::Semi);
        }
    }

    fn parse_binding(&mut self) -> Binding {
        let id = self.ids.next();
        if self.at(TokenKind::LParen) {
            let start = self.bump().span;
            let mut parts = Vec::new();
            while !self.at(TokenKind::RParen) && !self.at(TokenKind::Eof) {
                parts.push(self.parse_binding_spec());
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            let end = self.expect(TokenKind::RParen, "')'");
            Binding {
                id,
                span: start.to(end),
                spec: BindingSpec::Tuple(parts),
            }
        } else {
            let ident = self.parse_identifier();
            Binding {
                id,
                span: ident.span,
                spec: BindingSpec::Name(ident),
            }
        }
    }

    fn parse_binding_spec(&mut self) -> BindingSpec {
        if self.at(TokenKind::LParen) {
            self.bump();
            let mut parts = Vec::new();
            while !self.at(TokenKind::RParen) && !self.at(TokenKind::Eof) {
                parts.push(self.parse_binding_spec());
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen, "')'");
            BindingSpec::Tuple(parts)
        } else {
            BindingSpec::Name(self.parse_identifier())
        }
    }

    fn parse_identifier(&mut self) -> Identifier {
        let id = self.ids.next();
        let tok = self.peek();
        if tok.kind == TokenKind::Ident {
            self.bump();
            let name = match tok.payload {
                TokenPayload::Str(s) => s,
                _ => unreachable!("lexer always attaches Str payload to Ident"),
            };
            Identifier { id, span: tok.span, name }
        } else {
            self.diags.error(tok.span, "expected identifier");
            Identifier {
                id,
                span: Span::empty_at(tok.span.start),
                name: self.lexer.strings_mut().intern(""),
            }
        }
    }

    fn parse_func_decl(&mut self) -> Decl {
        let id = self.ids.next();
        let kw = self.bump();
        let name = Some(self.parse_identifier());
        let (params, body, has_error) = self.parse_func_tail();
        let func = FuncDef {
            id: self.ids.next(),
            span: kw.span.to(body.span),
            has_error,
            name,
            params,
            body: Box::new(body),
        };
        Decl {
            id,
            span: func.span,
            has_error: func.has_error,
            kind: DeclKind::Func(func),
        }
    }

    /// Parses `(params) (= expr | block)`, shared by `func` declarations and
    /// closure literals.
    fn parse_func_tail(&mut self) -> (Vec<Identifier>, Expr, bool) {
        let mut has_error = false;
        self.expect(TokenKind::LParen, "'('");
        let mut params = Vec::new();
        while !self.at(TokenKind::RParen) && !self.at(TokenKind::Eof) {
            params.push(self.parse_identifier());
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'");
        let body = if self.eat(TokenKind::Eq) {
            self.parse_expr(0)
        } else if self.at(TokenKind::LBrace) {
            self.parse_block_expr()
        } else {
            let tok = self.peek();
            self.diags.error(tok.span, "expected function body");
            has_error = true;
            Expr {
                id: self.ids.next(),
                span: Span::empty_at(tok.span.start),
                has_error: true,
                kind: ExprKind::Error,
            }
        };
        (params, body, has_error)
    }

    fn parse_import_decl(&mut self) -> Decl {
        let id = self.ids.next();
        let kw = self.bump();
        let name = self.parse_identifier();
        let alias = None;
        let mut has_error = false;
        let end = self.peek().span;
        self.expect_semi(&mut has_error);
        Decl {
            id,
            span: kw.span.to(end),
            has_error,
            kind: DeclKind::Import { name, alias },
        }
    }

    fn parse_stmt(&mut self) -> Stmt {
        let id = self.ids.next();
        if self.is_decl_start() {
            let decl = self.parse_decl();
            return Stmt {
                id,
                span: decl.span,
                has_error: decl.has_error,
                kind: StmtKind::Decl(decl),
            };
        }
        let expr = self.parse_expr(0);
        let mut has_error = expr.has_error;
        let end_before = expr.span;
        // `;` terminates an expression statement; a block-like expression
        // (if/while/for/block) may stand alone without one.
        let needs_semi = !matches!(
            expr.kind,
            ExprKind::If { .. } | ExprKind::While { .. } | ExprKind::For { .. } | ExprKind::Block(_) | ExprKind::Func(_)
        );
        let end = if needs_semi {
            self.expect_semi(&mut has_error);
            end_before
        } else {
            self.eat(TokenKind::Semi);
            end_before
        };
        Stmt {
            id,
            span: expr.span.to(end),
            has_error,
            kind: StmtKind::Expr(expr),
        }
    }

    fn parse_block_expr(&mut self) -> Expr {
        let id = self.ids.next();
        let start = self.expect(TokenKind::LBrace, "'{'");
        let mut stmts = Vec::new();
        let mut has_error = false;
        while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
            let stmt = self.parse_stmt();
            has_error |= stmt.has_error;
            stmts.push(stmt);
        }
        let end = self.expect(TokenKind::RBrace, "'}'");
        Expr {
            id,
            span: start.to(end),
            has_error,
            kind: ExprKind::Block(stmts),
        }
    }

    // ---- expressions ----

    fn parse_expr(&mut self, min_prec: u8) -> Expr {
        let mut lhs = self.parse_unary();
        loop {
            let Some((op, prec, right_assoc)) = op_info(self.peek().kind) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            let op_span = self.bump().span;
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.parse_expr(next_min);
            let span = lhs.span.to(rhs.span);
            let has_error = lhs.has_error || rhs.has_error;
            lhs = match op {
                OpKind::Assign(None) => {
                    if !is_assignable(&lhs) {
                        self.diags.error(op_span, "invalid assignment target");
                    }
                    Expr {
                        id: self.ids.next(),
                        span,
                        has_error,
                        kind: ExprKind::Assign {
                            target: Box::new(lhs),
                            value: Box::new(rhs),
                        },
                    }
                }
                OpKind::Assign(Some(bop)) => {
                    if !is_assignable(&lhs) {
                        self.diags.error(op_span, "invalid assignment target");
                    }
                    Expr {
                        id: self.ids.next(),
                        span,
                        has_error,
                        kind: ExprKind::CompoundAssign {
                            op: bop,
                            target: Box::new(lhs),
                            value: Box::new(rhs),
                        },
                    }
                }
                OpKind::Binary(bop) => Expr {
                    id: self.ids.next(),
                    span,
                    has_error,
                    kind: ExprKind::Binary {
                        op: bop,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                },
            };
        }
        lhs
    }

    fn parse_unary(&mut self) -> Expr {
        let tok = self.peek();
        let op = match tok.kind {
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_unary();
            let span = tok.span.to(operand.span);
            let has_error = operand.has_error;
            return Expr {
                id: self.ids.next(),
                span,
                has_error,
                kind: ExprKind::Unary { op, operand: Box::new(operand) },
            };
        }
        let primary = self.parse_primary();
        self.parse_postfix(primary)
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Expr {
        loop {
            let access = match self.peek().kind {
                TokenKind::Dot => AccessType::Direct,
                TokenKind::QDot => AccessType::Optional,
                TokenKind::LBracket => {
                    self.bump();
                    let index = self.parse_expr(0);
                    let end = self.expect(TokenKind::RBracket, "']'");
                    let span = expr.span.to(end);
                    let has_error = expr.has_error || index.has_error;
                    expr = Expr {
                        id: self.ids.next(),
                        span,
                        has_error,
                        kind: ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                            access: AccessType::Direct,
                        },
                    };
                    continue;
                }
                TokenKind::QLBracket => {
                    self.bump();
                    let index = self.parse_expr(0);
                    let end = self.expect(TokenKind::RBracket, "']'");
                    let span = expr.span.to(end);
                    let has_error = expr.has_error || index.has_error;
                    expr = Expr {
                        id: self.ids.next(),
                        span,
                        has_error,
                        kind: ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                            access: AccessType::Optional,
                        },
                    };
                    continue;
                }
                TokenKind::LParen => {
                    self.bump();
                    let (args, end, arg_err) = self.parse_call_args();
                    let span = expr.span.to(end);
                    expr = Expr {
                        id: self.ids.next(),
                        span,
                        has_error: expr.has_error || arg_err,
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            access: AccessType::Direct,
                        },
                    };
                    continue;
                }
                TokenKind::QLParen => {
                    self.bump();
                    let (args, end, arg_err) = self.parse_call_args();
                    let span = expr.span.to(end);
                    expr = Expr {
                        id: self.ids.next(),
                        span,
                        has_error: expr.has_error || arg_err,
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            access: AccessType::Optional,
                        },
                    };
                    continue;
                }
                _ => break,
            };

            // `.`/`?.`: either a named field or a numeric tuple member.
            self.bump();
            let member_tok = {
                let _guard = self.lexer.push_mode(LexerMode::Member);
                self.buf.clear();
                self.peek()
            };
            if member_tok.kind == TokenKind::NumericMember {
                self.bump();
                let idx = match member_tok.payload {
                    TokenPayload::Int(i) => i as usize,
                    _ => 0,
                };
                let span = expr.span.to(member_tok.span);
                let has_error = expr.has_error;
                let idx_expr = Expr {
                    id: self.ids.next(),
                    span: member_tok.span,
                    has_error: false,
                    kind: ExprKind::Literal(Literal::Int(idx as i64)),
                };
                expr = Expr {
                    id: self.ids.next(),
                    span,
                    has_error,
                    kind: ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(idx_expr),
                        access,
                    },
                };
            } else {
                let name = self.parse_identifier();
                let span = expr.span.to(name.span);
                let has_error = expr.has_error;
                if self.at(TokenKind::LParen) {
                    self.bump();
                    let (args, end, arg_err) = self.parse_call_args();
                    expr = Expr {
                        id: self.ids.next(),
                        span: span.to(end),
                        has_error: has_error || arg_err,
                        kind: ExprKind::MethodCall {
                            receiver: Box::new(expr),
                            method: name,
                            args,
                            access,
                        },
                    };
                } else {
                    expr = Expr {
                        id: self.ids.next(),
                        span,
                        has_error,
                        kind: ExprKind::Field {
                            object: Box::new(expr),
                            name,
                            access,
                        },
                    };
                }
            }
        }
        expr
    }

    fn parse_call_args(&mut self) -> (Vec<Expr>, Span, bool) {
        let mut args = Vec::new();
        let mut has_error = false;
        while !self.at(TokenKind::RParen) && !self.at(TokenKind::Eof) {
            let arg = self.parse_expr(1);
            has_error |= arg.has_error;
            args.push(arg);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(TokenKind::RParen, "')'");
        (args, end, has_error)
    }

    fn parse_primary(&mut self) -> Expr {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Int => {
                self.bump();
                let v = match tok.payload {
                    TokenPayload::Int(i) => i,
                    _ => 0,
                };
                self.leaf(tok.span, ExprKind::Literal(Literal::Int(v)), false)
            }
            TokenKind::Float => {
                self.bump();
                let v = match tok.payload {
                    TokenPayload::Float(f) => f,
                    _ => 0.0,
                };
                self.leaf(tok.span, ExprKind::Literal(Literal::Float(v)), false)
            }
            TokenKind::KwTrue => {
                self.bump();
                self.leaf(tok.span, ExprKind::Literal(Literal::Bool(true)), false)
            }
            TokenKind::KwFalse => {
                self.bump();
                self.leaf(tok.span, ExprKind::Literal(Literal::Bool(false)), false)
            }
            TokenKind::KwNull => {
                self.bump();
                self.leaf(tok.span, ExprKind::Literal(Literal::Null), false)
            }
            TokenKind::Ident => {
                let ident = self.parse_identifier();
                Expr {
                    id: self.ids.next(),
                    span: ident.span,
                    has_error: false,
                    kind: ExprKind::Var(ident),
                }
            }
            TokenKind::StringQuoteStart => self.parse_string_literal(),
            TokenKind::LParen => self.parse_paren_or_tuple(),
            TokenKind::LBrace => self.parse_brace_literal(None),
            TokenKind::KwRecord => {
                let kw = self.bump().span;
                self.parse_brace_literal(Some(kw))
            }
            TokenKind::KwIf => self.parse_if_expr(),
            TokenKind::KwWhile => self.parse_while_expr(),
            TokenKind::KwFor => self.parse_for_expr(),
            TokenKind::KwFunc => self.parse_func_literal(),
            TokenKind::KwReturn => {
                self.bump();
                let value = if self.can_start_expr() { Some(Box::new(self.parse_expr(1))) } else { None };
                let end = value.as_ref().map_or(tok.span, |v| v.span);
                let has_error = value.as_ref().is_some_and(|v| v.has_error);
                self.leaf(tok.span.to(end), ExprKind::Return(value), has_error)
            }
            TokenKind::KwBreak => {
                self.bump();
                self.leaf(tok.span, ExprKind::Break, false)
            }
            TokenKind::KwContinue => {
                self.bump();
                self.leaf(tok.span, ExprKind::Continue, false)
            }
            TokenKind::KwAssert => {
                self.bump();
                self.expect(TokenKind::LParen, "'('");
                let cond = self.parse_expr(1);
                let message = if self.eat(TokenKind::Comma) { Some(Box::new(self.parse_expr(1))) } else { None };
                let end = self.expect(TokenKind::RParen, "')'");
                let has_error = cond.has_error || message.as_ref().is_some_and(|m| m.has_error);
                self.leaf(
                    tok.span.to(end),
                    ExprKind::Assert { cond: Box::new(cond), message },
                    has_error,
                )
            }
            _ => {
                self.diags.error(tok.span, "expected expression");
                self.recover_to(&[TokenKind::Semi, TokenKind::RBrace, TokenKind::RParen, TokenKind::RBracket, TokenKind::Comma, TokenKind::Eof]);
                self.leaf(tok.span, ExprKind::Error, true)
            }
        }
    }

    fn can_start_expr(&mut self) -> bool {
        !matches!(
            self.peek().kind,
            TokenKind::Semi | TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket | TokenKind::Comma | TokenKind::Eof
        )
    }

    fn leaf(&mut self, span: Span, kind: ExprKind, has_error: bool) -> Expr {
        Expr {
            id: self.ids.next(),
            span,
            has_error,
            kind,
        }
    }

    /// `( )` empty tuple, `( e )` parenthesized, `( e , )` 1-tuple,
    /// `( e, e' [, ...] )` n-tuple (§4.1).
    fn parse_paren_or_tuple(&mut self) -> Expr {
        let start = self.bump().span;
        if self.eat(TokenKind::RParen) {
            return self.leaf(start, ExprKind::Tuple(Vec::new()), false);
        }
        let first = self.parse_expr(1);
        if self.eat(TokenKind::Comma) {
            let mut elems = vec![first];
            while !self.at(TokenKind::RParen) && !self.at(TokenKind::Eof) {
                elems.push(self.parse_expr(1));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            let end = self.expect(TokenKind::RParen, "')'");
            let has_error = elems.iter().any(|e| e.has_error);
            self.leaf(start.to(end), ExprKind::Tuple(elems), has_error)
        } else {
            let end = self.expect(TokenKind::RParen, "')'");
            Expr {
                span: start.to(end),
                ..first
            }
        }
    }

    /// Disambiguates `{ }`: block (statements), set (comma-separated
    /// exprs), map (`key: value` pairs), or — with a leading `record`
    /// keyword already consumed — a record literal (`name: value` pairs).
    fn parse_brace_literal(&mut self, record_kw: Option<Span>) -> Expr {
        let start = record_kw.unwrap_or(self.peek().span);
        self.expect(TokenKind::LBrace, "'{'");
        if self.at(TokenKind::RBrace) {
            let end = self.bump().span;
            let kind = if record_kw.is_some() { ExprKind::Record(Vec::new()) } else { ExprKind::Block(Vec::new()) };
            return self.leaf(start.to(end), kind, false);
        }

        if let Some(_kw) = record_kw {
            let mut items = Vec::new();
            let mut has_error = false;
            while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
                let name = self.parse_identifier();
                self.expect(TokenKind::Colon, "':'");
                let value = self.parse_expr(1);
                has_error |= value.has_error;
                items.push(RecordItem { name, value });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            let end = self.expect(TokenKind::RBrace, "'}'");
            return self.leaf(start.to(end), ExprKind::Record(items), has_error);
        }

        // Decide block vs. set/map by peeking for a decl keyword or a `:` / `,`
        // after the first element.
        if self.is_decl_start() {
            return self.parse_block_rest(start);
        }

        let first = self.parse_expr(0);
        if self.eat(TokenKind::Colon) {
            let first_value = self.parse_expr(1);
            let mut items = vec![MapItem { key: first, value: first_value }];
            while self.eat(TokenKind::Comma) {
                if self.at(TokenKind::RBrace) {
                    break;
                }
                let key = self.parse_expr(1);
                self.expect(TokenKind::Colon, "':'");
                let value = self.parse_expr(1);
                items.push(MapItem { key, value });
            }
            let end = self.expect(TokenKind::RBrace, "'}'");
            let has_error = items.iter().any(|i| i.key.has_error || i.value.has_error);
            self.leaf(start.to(end), ExprKind::Map(items), has_error)
        } else if self.at(TokenKind::Comma) || self.at(TokenKind::RBrace) {
            let mut elems = vec![first];
            while self.eat(TokenKind::Comma) {
                if self.at(TokenKind::RBrace) {
                    break;
                }
                elems.push(self.parse_expr(1));
            }
            let end = self.expect(TokenKind::RBrace, "'}'");
            let has_error = elems.iter().any(|e| e.has_error);
            self.leaf(start.to(end), ExprKind::Set(elems), has_error)
        } else {
            // A single expression statement followed by more statements: it
            // was a block all along.
            let mut has_error = first.has_error;
            self.eat(TokenKind::Semi);
            let first_span = first.span;
            let mut stmts = vec![Stmt {
                id: self.ids.next(),
                span: first_span,
                has_error: first.has_error,
                kind: StmtKind::Expr(first),
            }];
            while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
                let stmt = self.parse_stmt();
                has_error |= stmt.has_error;
                stmts.push(stmt);
            }
            let end = self.expect(TokenKind::RBrace, "'}'");
            self.leaf(start.to(end), ExprKind::Block(stmts), has_error)
        }
    }

    fn parse_block_rest(&mut self, start: Span) -> Expr {
        let mut stmts = Vec::new();
        let mut has_error = false;
        while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
            let stmt = self.parse_stmt();
            has_error |= stmt.has_error;
            stmts.push(stmt);
        }
        let end = self.expect(TokenKind::RBrace, "'}'");
        self.leaf(start.to(end), ExprKind::Block(stmts), has_error)
    }

    fn parse_if_expr(&mut self) -> Expr {
        let start = self.bump().span;
        let cond = self.parse_control_cond();
        let then_branch = self.parse_block_expr();
        let (else_branch, end) = if self.eat(TokenKind::KwElse) {
            let e = if self.at(TokenKind::KwIf) { self.parse_if_expr() } else { self.parse_block_expr() };
            let span = e.span;
            (Some(Box::new(e)), span)
        } else {
            (None, then_branch.span)
        };
        let has_error = cond.has_error || then_branch.has_error || else_branch.as_ref().is_some_and(|e| e.has_error);
        self.leaf(
            start.to(end),
            ExprKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch,
            },
            has_error,
        )
    }

    fn parse_while_expr(&mut self) -> Expr {
        let start = self.bump().span;
        let cond = self.parse_control_cond();
        let body = self.parse_block_expr();
        let has_error = cond.has_error || body.has_error;
        let span = start.to(body.span);
        self.leaf(span, ExprKind::While { cond: Box::new(cond), body: Box::new(body) }, has_error)
    }

    fn parse_for_expr(&mut self) -> Expr {
        let start = self.bump().span;
        self.expect(TokenKind::LParen, "'('");
        let init = if self.at(TokenKind::Semi) {
            None
        } else {
            Some(Box::new(self.parse_stmt()))
        };
        if init.is_none() {
            self.expect(TokenKind::Semi, "';'");
        }
        let cond = if self.at(TokenKind::Semi) { None } else { Some(self.parse_expr(0)) };
        self.expect(TokenKind::Semi, "';'");
        let step = if self.at(TokenKind::RParen) { None } else { Some(self.parse_expr(0)) };
        self.expect(TokenKind::RParen, "')'");
        let body = self.parse_block_expr();
        let has_error = init.as_ref().is_some_and(|s| s.has_error)
            || cond.as_ref().is_some_and(|c| c.has_error)
            || step.as_ref().is_some_and(|s| s.has_error)
            || body.has_error;
        let span = start.to(body.span);
        self.leaf(
            span,
            ExprKind::For {
                init,
                cond,
                step,
                body: Box::new(body),
            },
            has_error,
        )
    }

    /// `while`/`if`/`for`'s condition tolerates an optional surrounding
    /// parenthesis: `while (c)` and `while c` both parse.
    fn parse_control_cond(&mut self) -> Expr {
        self.parse_expr(0)
    }

    fn parse_func_literal(&mut self) -> Expr {
        let start = self.bump().span;
        let name = if self.at(TokenKind::Ident) { Some(self.parse_identifier()) } else { None };
        let (params, body, has_error) = self.parse_func_tail();
        let span = start.to(body.span);
        let func = FuncDef {
            id: self.ids.next(),
            span,
            has_error,
            name,
            params,
            body: Box::new(body),
        };
        self.leaf(span, ExprKind::Func(Box::new(func)), has_error)
    }

    fn parse_string_literal(&mut self) -> Expr {
        let open = self.bump();
        let quote = match open.payload {
            TokenPayload::Int(q) => q as u8,
            _ => b'"',
        };
        let mode = if quote == b'\'' {
            LexerMode::StringSingleQuote
        } else {
            LexerMode::StringDoubleQuote
        };
        let start = open.span;
        let mut pieces = Vec::new();
        let mut has_error = false;
        let mut end = start;
        {
            let _guard = self.lexer.push_mode(mode);
            self.buf.clear();
            loop {
                let tok = self.peek();
                match tok.kind {
                    TokenKind::StringQuoteEnd => {
                        self.bump();
                        end = tok.span;
                        break;
                    }
                    TokenKind::StringContent => {
                        self.bump();
                        if let TokenPayload::Str(s) = tok.payload {
                            pieces.push(StringPiece::Literal(s));
                        }
                        end = tok.span;
                    }
                    TokenKind::DollarIdent => {
                        self.bump();
                        if let TokenPayload::Str(s) = tok.payload {
                            let ident = Identifier { id: self.ids.next(), span: tok.span, name: s };
                            pieces.push(StringPiece::Expr(Expr {
                                id: self.ids.next(),
                                span: tok.span,
                                has_error: false,
                                kind: ExprKind::Var(ident),
                            }));
                        }
                        end = tok.span;
                    }
                    TokenKind::InterpStart => {
                        self.bump();
                        self.buf.clear();
                        // expression inside `${ ... }` lexes in Normal mode,
                        // nested one level above the string mode we're in; the
                        // closing `}` must be consumed before popping back.
                        let inner = {
                            let _normal = self.lexer.push_mode(LexerMode::Normal);
                            self.buf.clear();
                            let e = self.parse_expr(0);
                            self.expect(TokenKind::RBrace, "'}'");
                            self.buf.clear();
                            e
                        };
                        has_error |= inner.has_error;
                        end = inner.span;
                        self.buf.clear();
                        pieces.push(StringPiece::Expr(inner));
                    }
                    TokenKind::Error | TokenKind::Eof => {
                        self.diags.error(tok.span, "unterminated string literal");
                        has_error = true;
                        break;
                    }
                    _ => {
                        self.diags.error(tok.span, "unexpected token in string literal");
                        has_error = true;
                        self.bump();
                    }
                }
            }
        }
        self.buf.clear();

        // Collapse a single literal piece to a plain string literal (§4.2).
        if pieces.len() == 1 {
            if let StringPiece::Literal(s) = pieces[0] {
                return self.leaf(start.to(end), ExprKind::Literal(Literal::Str(s)), has_error);
            }
        }
        if pieces.is_empty() {
            let empty = self.lexer.strings_mut().intern("");
            return self.leaf(start.to(end), ExprKind::Literal(Literal::Str(empty)), has_error);
        }
        self.leaf(start.to(end), ExprKind::StringGroup(pieces), has_error)
    }

}

fn is_assignable(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Var(_) | ExprKind::Field { .. } | ExprKind::Index { .. } | ExprKind::Tuple(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (File, Diagnostics) {
        let mut strings = StringTable::new();
        let mut diags = Diagnostics::new();
        let file = parse_file(src, &mut strings, &mut diags);
        (file, diags)
    }

    fn first_expr(file: &File) -> &Expr {
        match &file.items[0].kind {
            ItemKind::Stmt(Stmt { kind: StmtKind::Expr(e), .. }) => e,
            _ => panic!("expected expression item"),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        let (file, diags) = parse("-4**2 + 1234 * (2.34 - 1);");
        assert!(!diags.has_errors());
        let expr = first_expr(&file);
        match &expr.kind {
            ExprKind::Binary { op: BinaryOp::Add, lhs, rhs } => {
                match &lhs.kind {
                    ExprKind::Binary { op: BinaryOp::Pow, lhs: base, .. } => {
                        assert!(matches!(base.kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
                    }
                    other => panic!("expected Pow, got {other:?}"),
                }
                assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected top-level Add, got {other:?}"),
        }
    }

    #[test]
    fn right_assoc_assignment() {
        let (file, diags) = parse("a = b = 3 && 4;");
        assert!(!diags.has_errors());
        let expr = first_expr(&file);
        match &expr.kind {
            ExprKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Assign { .. }));
            }
            other => panic!("expected Assign, got {other:?}"),
        }
    }

    #[test]
    fn tuple_vs_parenthesized() {
        let (file, diags) = parse("(1); (1,); (1, 2, 3); ();");
        assert!(!diags.has_errors());
        let kinds: Vec<_> = file
            .items
            .iter()
            .map(|item| match &item.kind {
                ItemKind::Stmt(Stmt { kind: StmtKind::Expr(e), .. }) => &e.kind,
                _ => panic!("expected expr item"),
            })
            .collect();
        assert!(matches!(kinds[0], ExprKind::Literal(Literal::Int(1))));
        assert!(matches!(kinds[1], ExprKind::Tuple(v) if v.len() == 1));
        assert!(matches!(kinds[2], ExprKind::Tuple(v) if v.len() == 3));
        assert!(matches!(kinds[3], ExprKind::Tuple(v) if v.is_empty()));
    }

    #[test]
    fn optional_chain_parses() {
        let (file, diags) = parse("a?.b?[0]?(1);");
        assert!(!diags.has_errors());
        let expr = first_expr(&file);
        assert!(matches!(expr.kind, ExprKind::Call { access: AccessType::Optional, .. }));
    }

    #[test]
    fn unterminated_brace_recovers() {
        let (file, diags) = parse("var a = 1");
        assert!(diags.has_errors());
        assert!(file.has_error);
    }
}
