//! Recursive-descent parser producing the AST.
//!
//! Statements are separated by newlines or semicolons. Inside parenthesised
//! contexts newlines are insignificant and a semicolon separates positional
//! from named call arguments. In `if`/`for` headers a `{` always opens the
//! body block, never a dict literal.

use crate::{
    ast::{
        AssignOp, AssignTarget, BinTok, CallExpr, ElseArm, Expr, ExprLoc, FuncLit, NamedArgExpr, NamedParamDecl,
        ParamDecl, Stmt, StmtLoc,
    },
    error::{CompileError, Pos},
    lexer::{Token, TokKind, lex},
    token::{BinOp, UnaryOp},
};

type ParseResult<T> = Result<T, CompileError>;

/// Parses a whole source string into a statement list.
pub(crate) fn parse(source: &str) -> ParseResult<Vec<StmtLoc>> {
    let tokens = lex(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        brace_ok: true,
    };
    parser.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// False while parsing an `if`/`for` header, where `{` opens the body.
    brace_ok: bool,
}

impl Parser {
    fn parse_program(&mut self) -> ParseResult<Vec<StmtLoc>> {
        let mut stmts = Vec::new();
        self.skip_separators();
        while self.peek().is_some() {
            stmts.push(self.parse_statement()?);
            self.expect_statement_end()?;
            self.skip_separators();
        }
        Ok(stmts)
    }

    // ------------------------------------------------------------------
    // Token cursor helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&TokKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, n: usize) -> Option<&TokKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn current_pos(&self) -> Pos {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or_else(Pos::default, |t| t.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokKind) -> bool {
        self.peek() == Some(kind)
    }

    fn eat(&mut self, kind: &TokKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokKind, what: &str) -> ParseResult<Pos> {
        let pos = self.current_pos();
        if self.eat(kind) {
            Ok(pos)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> CompileError {
        let found = match self.peek() {
            Some(tok) => format!("{tok:?}"),
            None => "end of input".to_owned(),
        };
        CompileError::new(self.current_pos(), format!("expected {what}, found {found}"))
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokKind::Newline) {
            self.pos += 1;
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(TokKind::Newline | TokKind::Semicolon)) {
            self.pos += 1;
        }
    }

    fn expect_statement_end(&mut self) -> ParseResult<()> {
        match self.peek() {
            None | Some(TokKind::Newline | TokKind::Semicolon | TokKind::RBrace) => Ok(()),
            _ => Err(self.unexpected("end of statement")),
        }
    }

    /// Skips newlines, then consumes the token if it matches. Used for
    /// `else`/`catch`/`finally` which may start on the next line.
    fn eat_after_newlines(&mut self, kind: &TokKind) -> bool {
        let saved = self.pos;
        self.skip_newlines();
        if self.eat(kind) {
            true
        } else {
            self.pos = saved;
            false
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> ParseResult<StmtLoc> {
        let pos = self.current_pos();
        match self.peek() {
            Some(TokKind::Var) => self.parse_var(),
            Some(TokKind::Const) => self.parse_const(),
            Some(TokKind::Param) => self.parse_param(),
            Some(TokKind::Global) => self.parse_global(),
            Some(TokKind::If) => self.parse_if(),
            Some(TokKind::For) => self.parse_for(),
            Some(TokKind::Try) => self.parse_try(),
            Some(TokKind::Throw) => {
                self.advance();
                let value = self.parse_expr()?;
                Ok(StmtLoc::new(Stmt::Throw(value), pos))
            }
            Some(TokKind::Return) => {
                self.advance();
                let value = match self.peek() {
                    None | Some(TokKind::Newline | TokKind::Semicolon | TokKind::RBrace) => None,
                    _ => Some(self.parse_expr()?),
                };
                Ok(StmtLoc::new(Stmt::Return(value), pos))
            }
            Some(TokKind::Break) => {
                self.advance();
                Ok(StmtLoc::new(Stmt::Break, pos))
            }
            Some(TokKind::Continue) => {
                self.advance();
                Ok(StmtLoc::new(Stmt::Continue, pos))
            }
            Some(TokKind::LBrace) if self.brace_ok => {
                let body = self.parse_block()?;
                Ok(StmtLoc::new(Stmt::Block(body), pos))
            }
            Some(TokKind::Func) if matches!(self.peek_at(1), Some(TokKind::Ident(_))) => {
                let lit = self.parse_func_lit(true)?;
                Ok(StmtLoc::new(Stmt::FuncDecl(Box::new(lit)), pos))
            }
            Some(_) => self.parse_simple_statement(),
            None => Err(self.unexpected("statement")),
        }
    }

    /// Expression, define, assignment or inc/dec statement.
    fn parse_simple_statement(&mut self) -> ParseResult<StmtLoc> {
        let pos = self.current_pos();
        let first = self.parse_expr()?;
        let mut exprs = vec![first];
        while self.eat(&TokKind::Comma) {
            self.skip_newlines();
            exprs.push(self.parse_expr()?);
        }

        let assign_op = match self.peek() {
            Some(TokKind::Define) => None,
            Some(TokKind::Assign) => Some(AssignOp::Assign),
            Some(TokKind::PlusAssign) => Some(AssignOp::Bin(BinOp::Add)),
            Some(TokKind::MinusAssign) => Some(AssignOp::Bin(BinOp::Sub)),
            Some(TokKind::StarAssign) => Some(AssignOp::Bin(BinOp::Mul)),
            Some(TokKind::SlashAssign) => Some(AssignOp::Bin(BinOp::Div)),
            Some(TokKind::PercentAssign) => Some(AssignOp::Bin(BinOp::Rem)),
            Some(TokKind::AmpAssign) => Some(AssignOp::Bin(BinOp::BitAnd)),
            Some(TokKind::PipeAssign) => Some(AssignOp::Bin(BinOp::BitOr)),
            Some(TokKind::CaretAssign) => Some(AssignOp::Bin(BinOp::BitXor)),
            Some(TokKind::ShlAssign) => Some(AssignOp::Bin(BinOp::Shl)),
            Some(TokKind::ShrAssign) => Some(AssignOp::Bin(BinOp::Shr)),
            Some(TokKind::NilAssign) => Some(AssignOp::NilCoalesce),
            Some(TokKind::OrAssign) => Some(AssignOp::Or),
            Some(TokKind::PlusPlus | TokKind::MinusMinus) => {
                let inc = self.check(&TokKind::PlusPlus);
                self.advance();
                if exprs.len() != 1 {
                    return Err(CompileError::new(pos, "inc/dec takes a single target"));
                }
                let target = Self::expr_to_target(exprs.pop().expect("one expr"))?;
                return Ok(StmtLoc::new(Stmt::IncDec { target, inc }, pos));
            }
            _ => {
                if exprs.len() != 1 {
                    return Err(CompileError::new(pos, "expected ':=' or '=' after expression list"));
                }
                let expr = exprs.pop().expect("one expr");
                return Ok(StmtLoc::new(Stmt::Expr(expr), pos));
            }
        };

        match assign_op {
            None => {
                // `:=` definition; targets must be plain identifiers.
                self.advance();
                self.skip_newlines();
                let value = self.parse_expr_list()?;
                let mut names = Vec::with_capacity(exprs.len());
                for e in exprs {
                    match e.expr {
                        Expr::Ident(name) => names.push(name),
                        _ => return Err(CompileError::new(e.pos, "':=' target must be an identifier")),
                    }
                }
                Ok(StmtLoc::new(Stmt::Define { names, value }, pos))
            }
            Some(op) => {
                self.advance();
                self.skip_newlines();
                if exprs.len() > 1 && op != AssignOp::Assign {
                    return Err(CompileError::new(pos, "compound assignment takes a single target"));
                }
                let value = self.parse_expr_list()?;
                let targets = exprs.into_iter().map(Self::expr_to_target).collect::<ParseResult<_>>()?;
                Ok(StmtLoc::new(Stmt::Assign { targets, op, value }, pos))
            }
        }
    }

    fn expr_to_target(e: ExprLoc) -> ParseResult<AssignTarget> {
        match e.expr {
            Expr::Ident(name) => Ok(AssignTarget::Ident(name)),
            Expr::Index { target, index } => Ok(AssignTarget::Index {
                target: *target,
                index: *index,
            }),
            Expr::Selector { target, name } => Ok(AssignTarget::Selector { target: *target, name }),
            _ => Err(CompileError::new(e.pos, "cannot assign to this expression")),
        }
    }

    fn parse_ident(&mut self, what: &str) -> ParseResult<String> {
        match self.peek() {
            Some(TokKind::Ident(_)) => {
                let Some(Token {
                    kind: TokKind::Ident(name),
                    ..
                }) = self.advance()
                else {
                    unreachable!("peeked an identifier");
                };
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn parse_var(&mut self) -> ParseResult<StmtLoc> {
        let pos = self.current_pos();
        self.advance();
        let mut decls = Vec::new();
        loop {
            let name = self.parse_ident("variable name")?;
            let value = if self.eat(&TokKind::Assign) {
                self.skip_newlines();
                Some(self.parse_expr()?)
            } else {
                None
            };
            decls.push((name, value));
            if !self.eat(&TokKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        Ok(StmtLoc::new(Stmt::Var { decls }, pos))
    }

    fn parse_const(&mut self) -> ParseResult<StmtLoc> {
        let pos = self.current_pos();
        self.advance();
        let mut decls = Vec::new();
        loop {
            let name = self.parse_ident("constant name")?;
            self.expect(&TokKind::Assign, "'=' in const declaration")?;
            self.skip_newlines();
            let value = self.parse_expr()?;
            decls.push((name, value));
            if !self.eat(&TokKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        Ok(StmtLoc::new(Stmt::Const { decls }, pos))
    }

    fn parse_param(&mut self) -> ParseResult<StmtLoc> {
        let pos = self.current_pos();
        self.advance();
        let mut names = Vec::new();
        let mut var_name = None;
        loop {
            if self.eat(&TokKind::Star) {
                var_name = Some(self.parse_ident("variadic parameter name")?);
                break;
            }
            names.push(self.parse_ident("parameter name")?);
            if !self.eat(&TokKind::Comma) {
                break;
            }
        }
        Ok(StmtLoc::new(Stmt::Param { names, var_name }, pos))
    }

    fn parse_global(&mut self) -> ParseResult<StmtLoc> {
        let pos = self.current_pos();
        self.advance();
        let mut names = Vec::new();
        loop {
            names.push(self.parse_ident("global name")?);
            if !self.eat(&TokKind::Comma) {
                break;
            }
        }
        Ok(StmtLoc::new(Stmt::Global { names }, pos))
    }

    fn parse_if(&mut self) -> ParseResult<StmtLoc> {
        let pos = self.current_pos();
        self.advance();

        let was = self.brace_ok;
        self.brace_ok = false;
        let mut init = None;
        let first = self.parse_simple_statement()?;
        let cond = if self.eat(&TokKind::Semicolon) {
            init = Some(Box::new(first));
            self.parse_expr()?
        } else {
            match first.stmt {
                Stmt::Expr(e) => e,
                _ => return Err(CompileError::new(first.pos, "expected condition expression")),
            }
        };
        self.brace_ok = was;

        let then = self.parse_block()?;
        let otherwise = if self.eat_after_newlines(&TokKind::Else) {
            if self.check(&TokKind::If) {
                Some(ElseArm::If(Box::new(self.parse_if()?)))
            } else {
                Some(ElseArm::Block(self.parse_block()?))
            }
        } else {
            None
        };
        Ok(StmtLoc::new(Stmt::If { init, cond, then, otherwise }, pos))
    }

    fn parse_for(&mut self) -> ParseResult<StmtLoc> {
        let pos = self.current_pos();
        self.advance();

        // Infinite loop: `for { }`
        if self.check(&TokKind::LBrace) {
            let body = self.parse_block()?;
            return Ok(StmtLoc::new(
                Stmt::For {
                    init: None,
                    cond: None,
                    post: None,
                    body,
                },
                pos,
            ));
        }

        // For-in: `for k in e` / `for k, v in e`
        if let Some(stmt) = self.try_parse_for_in(pos)? {
            return Ok(stmt);
        }

        let was = self.brace_ok;
        self.brace_ok = false;
        let mut init = None;
        let mut cond = None;
        let mut post = None;

        if self.eat(&TokKind::Semicolon) {
            // `for ; cond ; post { }`
        } else {
            let first = self.parse_simple_statement()?;
            if self.eat(&TokKind::Semicolon) {
                init = Some(Box::new(first));
            } else {
                // `for cond { }`
                self.brace_ok = was;
                let c = match first.stmt {
                    Stmt::Expr(e) => e,
                    _ => return Err(CompileError::new(first.pos, "expected loop condition")),
                };
                let body = self.parse_block()?;
                return Ok(StmtLoc::new(
                    Stmt::For {
                        init: None,
                        cond: Some(c),
                        post: None,
                        body,
                    },
                    pos,
                ));
            }
        }

        if !self.check(&TokKind::Semicolon) {
            cond = Some(self.parse_expr()?);
        }
        self.expect(&TokKind::Semicolon, "';' in for clause")?;
        if !self.check(&TokKind::LBrace) {
            post = Some(Box::new(self.parse_simple_statement()?));
        }
        self.brace_ok = was;

        let body = self.parse_block()?;
        Ok(StmtLoc::new(Stmt::For { init, cond, post, body }, pos))
    }

    /// Looks ahead for `ident [, ident] in`; restores the cursor when the
    /// shape does not match.
    fn try_parse_for_in(&mut self, pos: Pos) -> ParseResult<Option<StmtLoc>> {
        let saved = self.pos;
        let Some(TokKind::Ident(_)) = self.peek() else {
            return Ok(None);
        };
        let first = self.parse_ident("identifier")?;
        let second = if self.eat(&TokKind::Comma) {
            match self.peek() {
                Some(TokKind::Ident(_)) => Some(self.parse_ident("identifier")?),
                _ => {
                    self.pos = saved;
                    return Ok(None);
                }
            }
        } else {
            None
        };
        if !self.eat(&TokKind::In) {
            self.pos = saved;
            return Ok(None);
        }

        // One identifier binds the value; two bind key and value.
        let (key, value) = match second {
            Some(v) => (first, v),
            None => ("_".to_owned(), first),
        };

        let was = self.brace_ok;
        self.brace_ok = false;
        let iterable = self.parse_expr()?;
        self.brace_ok = was;
        let body = self.parse_block()?;
        let else_body = if self.eat_after_newlines(&TokKind::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Some(StmtLoc::new(
            Stmt::ForIn {
                key,
                value,
                iterable,
                body,
                else_body,
            },
            pos,
        )))
    }

    fn parse_try(&mut self) -> ParseResult<StmtLoc> {
        let pos = self.current_pos();
        self.advance();
        let body = self.parse_block()?;

        let catch = if self.eat_after_newlines(&TokKind::Catch) {
            let ident = match self.peek() {
                Some(TokKind::Ident(_)) => Some(self.parse_ident("catch identifier")?),
                _ => None,
            };
            Some((ident, self.parse_block()?))
        } else {
            None
        };
        let finally = if self.eat_after_newlines(&TokKind::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(CompileError::new(pos, "'try' requires a 'catch' or 'finally' block"));
        }
        Ok(StmtLoc::new(Stmt::Try { body, catch, finally }, pos))
    }

    fn parse_block(&mut self) -> ParseResult<Vec<StmtLoc>> {
        self.skip_newlines();
        self.expect(&TokKind::LBrace, "'{'")?;
        let was = self.brace_ok;
        self.brace_ok = true;
        let mut stmts = Vec::new();
        self.skip_separators();
        while !self.check(&TokKind::RBrace) {
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.parse_statement()?);
            self.expect_statement_end()?;
            self.skip_separators();
        }
        self.expect(&TokKind::RBrace, "'}'")?;
        self.brace_ok = was;
        Ok(stmts)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> ParseResult<ExprLoc> {
        self.parse_ternary()
    }

    /// A comma-separated expression list on the right of an assignment;
    /// more than one expression becomes an implicit array.
    fn parse_expr_list(&mut self) -> ParseResult<ExprLoc> {
        let first = self.parse_expr()?;
        if !self.check(&TokKind::Comma) {
            return Ok(first);
        }
        let pos = first.pos;
        let mut items = vec![first];
        while self.eat(&TokKind::Comma) {
            self.skip_newlines();
            items.push(self.parse_expr()?);
        }
        Ok(ExprLoc::new(Expr::Array(items), pos))
    }

    fn parse_ternary(&mut self) -> ParseResult<ExprLoc> {
        let cond = self.parse_nil_coalesce()?;
        if !self.eat(&TokKind::Question) {
            return Ok(cond);
        }
        self.skip_newlines();
        let then = self.parse_ternary()?;
        self.expect(&TokKind::Colon, "':' in ternary expression")?;
        self.skip_newlines();
        let otherwise = self.parse_ternary()?;
        let pos = cond.pos;
        Ok(ExprLoc::new(
            Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            pos,
        ))
    }

    fn parse_nil_coalesce(&mut self) -> ParseResult<ExprLoc> {
        let mut left = self.parse_or()?;
        while self.eat(&TokKind::QuestionQuestion) {
            self.skip_newlines();
            let right = self.parse_or()?;
            let pos = left.pos;
            left = ExprLoc::new(
                Expr::Binary {
                    op: BinTok::NilCoalesce,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> ParseResult<ExprLoc> {
        let mut left = self.parse_and()?;
        while self.eat(&TokKind::OrOr) {
            self.skip_newlines();
            let right = self.parse_and()?;
            let pos = left.pos;
            left = ExprLoc::new(
                Expr::Binary {
                    op: BinTok::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<ExprLoc> {
        let mut left = self.parse_pipe()?;
        while self.eat(&TokKind::AndAnd) {
            self.skip_newlines();
            let right = self.parse_pipe()?;
            let pos = left.pos;
            left = ExprLoc::new(
                Expr::Binary {
                    op: BinTok::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_pipe(&mut self) -> ParseResult<ExprLoc> {
        let mut left = self.parse_equality()?;
        while self.eat(&TokKind::Pipe) {
            self.skip_newlines();
            let right = self.parse_equality()?;
            let pos = left.pos;
            left = ExprLoc::new(
                Expr::Pipe {
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> ParseResult<ExprLoc> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(TokKind::EqEq) => BinTok::Eq,
                Some(TokKind::NotEq) => BinTok::NotEq,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_relational()?;
            let pos = left.pos;
            left = ExprLoc::new(
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> ParseResult<ExprLoc> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(TokKind::Less) => BinOp::Less,
                Some(TokKind::LessEq) => BinOp::LessEq,
                Some(TokKind::Greater) => BinOp::Greater,
                Some(TokKind::GreaterEq) => BinOp::GreaterEq,
                Some(TokKind::Tilde) => BinOp::Match,
                Some(TokKind::TildeTilde) => BinOp::Find,
                Some(TokKind::TildeTildeTilde) => BinOp::FindAll,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_additive()?;
            let pos = left.pos;
            left = ExprLoc::new(
                Expr::Binary {
                    op: BinTok::Op(op),
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> ParseResult<ExprLoc> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(TokKind::Plus) => BinOp::Add,
                Some(TokKind::Minus) => BinOp::Sub,
                Some(TokKind::Caret) => BinOp::BitXor,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_multiplicative()?;
            let pos = left.pos;
            left = ExprLoc::new(
                Expr::Binary {
                    op: BinTok::Op(op),
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<ExprLoc> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(TokKind::Star) => BinOp::Mul,
                Some(TokKind::Slash) => BinOp::Div,
                Some(TokKind::Percent) => BinOp::Rem,
                Some(TokKind::Shl) => BinOp::Shl,
                Some(TokKind::Shr) => BinOp::Shr,
                Some(TokKind::Amp) => BinOp::BitAnd,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_unary()?;
            let pos = left.pos;
            left = ExprLoc::new(
                Expr::Binary {
                    op: BinTok::Op(op),
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<ExprLoc> {
        let pos = self.current_pos();
        let op = match self.peek() {
            Some(TokKind::Minus) => Some(UnaryOp::Neg),
            Some(TokKind::Plus) => Some(UnaryOp::Pos),
            Some(TokKind::Bang) => Some(UnaryOp::Not),
            Some(TokKind::Caret) => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(ExprLoc::new(
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                },
                pos,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<ExprLoc> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(TokKind::Dot) => {
                    self.advance();
                    let name = self.parse_ident("selector name")?;
                    let pos = expr.pos;
                    expr = ExprLoc::new(
                        Expr::Selector {
                            target: Box::new(expr),
                            name,
                        },
                        pos,
                    );
                }
                Some(TokKind::LBracket) => {
                    self.advance();
                    self.skip_newlines();
                    expr = self.parse_index_or_slice(expr)?;
                }
                Some(TokKind::LParen) => {
                    self.advance();
                    expr = self.parse_call(expr)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_index_or_slice(&mut self, target: ExprLoc) -> ParseResult<ExprLoc> {
        let pos = target.pos;
        let was = self.brace_ok;
        self.brace_ok = true;

        let low = if self.check(&TokKind::Colon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        let expr = if self.eat(&TokKind::Colon) {
            self.skip_newlines();
            let high = if self.check(&TokKind::RBracket) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            Expr::Slice {
                target: Box::new(target),
                low: low.map(Box::new),
                high: high.map(Box::new),
            }
        } else {
            let index = low.ok_or_else(|| self.unexpected("index expression"))?;
            Expr::Index {
                target: Box::new(target),
                index: Box::new(index),
            }
        };
        self.skip_newlines();
        self.expect(&TokKind::RBracket, "']'")?;
        self.brace_ok = was;
        Ok(ExprLoc::new(expr, pos))
    }

    /// Parses call arguments after the opening parenthesis.
    fn parse_call(&mut self, callee: ExprLoc) -> ParseResult<ExprLoc> {
        let pos = callee.pos;
        let was = self.brace_ok;
        self.brace_ok = true;

        let mut args = Vec::new();
        let mut var_arg = None;
        let mut named: Vec<NamedArgExpr> = Vec::new();
        let mut var_named = None;
        let mut in_named = false;

        self.skip_newlines();
        while !self.check(&TokKind::RParen) {
            if self.peek().is_none() {
                return Err(self.unexpected("')'"));
            }
            if in_named {
                if self.eat(&TokKind::StarStar) {
                    if var_named.is_some() {
                        return Err(CompileError::new(self.current_pos(), "duplicate '**' argument"));
                    }
                    var_named = Some(self.parse_expr()?);
                } else {
                    let name = self.parse_ident("named argument")?;
                    let value = if self.eat(&TokKind::Assign) {
                        self.skip_newlines();
                        Some(self.parse_expr()?)
                    } else {
                        None
                    };
                    named.push(NamedArgExpr { name, value });
                }
            } else if self.eat(&TokKind::Star) {
                if var_arg.is_some() {
                    return Err(CompileError::new(self.current_pos(), "duplicate '*' argument"));
                }
                var_arg = Some(self.parse_expr()?);
            } else if matches!(self.peek(), Some(TokKind::Ident(_))) && self.peek_at(1) == Some(&TokKind::Assign) {
                // `name=value` also starts the named section without an
                // explicit ';'.
                in_named = true;
                let name = self.parse_ident("named argument")?;
                self.advance();
                self.skip_newlines();
                named.push(NamedArgExpr {
                    name,
                    value: Some(self.parse_expr()?),
                });
            } else {
                args.push(self.parse_expr()?);
            }

            self.skip_newlines();
            if self.eat(&TokKind::Comma) {
                self.skip_newlines();
            } else if self.eat(&TokKind::Semicolon) {
                if in_named {
                    return Err(CompileError::new(self.current_pos(), "duplicate ';' in argument list"));
                }
                in_named = true;
                self.skip_newlines();
            } else {
                break;
            }
        }
        self.expect(&TokKind::RParen, "')'")?;
        self.brace_ok = was;

        Ok(ExprLoc::new(
            Expr::Call(Box::new(CallExpr {
                callee,
                args,
                var_arg,
                named,
                var_named,
            })),
            pos,
        ))
    }

    fn parse_primary(&mut self) -> ParseResult<ExprLoc> {
        let pos = self.current_pos();
        let Some(kind) = self.peek().cloned() else {
            return Err(self.unexpected("expression"));
        };
        let expr = match kind {
            TokKind::Nil => {
                self.advance();
                Expr::Nil
            }
            TokKind::True => {
                self.advance();
                Expr::True
            }
            TokKind::False => {
                self.advance();
                Expr::False
            }
            TokKind::Yes => {
                self.advance();
                Expr::Yes
            }
            TokKind::No => {
                self.advance();
                Expr::No
            }
            TokKind::Int(v) => {
                self.advance();
                Expr::Int(v)
            }
            TokKind::Uint(v) => {
                self.advance();
                Expr::Uint(v)
            }
            TokKind::Float(v) => {
                self.advance();
                Expr::Float(v)
            }
            TokKind::Decimal(v) => {
                self.advance();
                Expr::Decimal(v)
            }
            TokKind::Char(v) => {
                self.advance();
                Expr::Char(v)
            }
            TokKind::Str(v) => {
                self.advance();
                Expr::Str(v)
            }
            TokKind::RawStr(v) => {
                self.advance();
                Expr::RawStr(v)
            }
            TokKind::Ident(name) => {
                self.advance();
                Expr::Ident(name)
            }
            TokKind::Import => {
                self.advance();
                self.expect(&TokKind::LParen, "'(' after import")?;
                self.skip_newlines();
                let name = match self.peek() {
                    Some(TokKind::Str(_)) => {
                        let Some(Token {
                            kind: TokKind::Str(name),
                            ..
                        }) = self.advance()
                        else {
                            unreachable!("peeked a string");
                        };
                        name
                    }
                    _ => return Err(self.unexpected("module name string")),
                };
                self.skip_newlines();
                self.expect(&TokKind::RParen, "')'")?;
                Expr::Import(name)
            }
            TokKind::Func => {
                let lit = self.parse_func_lit(false)?;
                Expr::Func(Box::new(lit))
            }
            TokKind::LParen => {
                self.advance();
                let was = self.brace_ok;
                self.brace_ok = true;
                self.skip_newlines();
                let inner = self.parse_expr()?;
                self.skip_newlines();
                self.expect(&TokKind::RParen, "')'")?;
                self.brace_ok = was;
                return Ok(ExprLoc::new(inner.expr, pos));
            }
            TokKind::LBracket => {
                self.advance();
                let was = self.brace_ok;
                self.brace_ok = true;
                let mut items = Vec::new();
                self.skip_newlines();
                while !self.check(&TokKind::RBracket) {
                    if self.peek().is_none() {
                        return Err(self.unexpected("']'"));
                    }
                    items.push(self.parse_expr()?);
                    self.skip_newlines();
                    if !self.eat(&TokKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(&TokKind::RBracket, "']'")?;
                self.brace_ok = was;
                Expr::Array(items)
            }
            TokKind::LBrace if self.brace_ok => {
                self.advance();
                let mut entries = Vec::new();
                self.skip_newlines();
                while !self.check(&TokKind::RBrace) {
                    if self.peek().is_none() {
                        return Err(self.unexpected("'}'"));
                    }
                    let key = match self.peek().cloned() {
                        Some(TokKind::Ident(name)) => {
                            self.advance();
                            name
                        }
                        Some(TokKind::Str(s)) => {
                            self.advance();
                            s
                        }
                        Some(TokKind::Int(n)) => {
                            self.advance();
                            n.to_string()
                        }
                        _ => return Err(self.unexpected("dict key")),
                    };
                    self.expect(&TokKind::Colon, "':' after dict key")?;
                    self.skip_newlines();
                    entries.push((key, self.parse_expr()?));
                    self.skip_newlines();
                    if !self.eat(&TokKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(&TokKind::RBrace, "'}'")?;
                Expr::Dict(entries)
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(ExprLoc::new(expr, pos))
    }

    /// Parses a function literal. With `named`, the `func` keyword is
    /// followed by the function's name (declaration form).
    fn parse_func_lit(&mut self, named: bool) -> ParseResult<FuncLit> {
        let pos = self.current_pos();
        self.expect(&TokKind::Func, "'func'")?;
        let name = if named { Some(self.parse_ident("function name")?) } else { None };
        self.expect(&TokKind::LParen, "'('")?;

        let was = self.brace_ok;
        self.brace_ok = true;
        let mut params: Vec<ParamDecl> = Vec::new();
        let mut var_param = None;
        let mut named_params: Vec<NamedParamDecl> = Vec::new();
        let mut var_named_param = None;

        self.skip_newlines();
        while !self.check(&TokKind::RParen) {
            if self.peek().is_none() {
                return Err(self.unexpected("')'"));
            }
            if self.eat(&TokKind::StarStar) {
                if var_named_param.is_some() {
                    return Err(CompileError::new(self.current_pos(), "duplicate '**' parameter"));
                }
                var_named_param = Some(self.parse_ident("'**' parameter name")?);
            } else if self.eat(&TokKind::Star) {
                if var_param.is_some() {
                    return Err(CompileError::new(self.current_pos(), "duplicate '*' parameter"));
                }
                var_param = Some(self.parse_ident("'*' parameter name")?);
            } else {
                let p_pos = self.current_pos();
                let p_name = self.parse_ident("parameter name")?;
                let mut types = Vec::new();
                if let Some(TokKind::Ident(_)) = self.peek() {
                    types.push(self.parse_ident("type name")?);
                    while self.eat(&TokKind::Pipe) {
                        types.push(self.parse_ident("type name")?);
                    }
                }
                if self.eat(&TokKind::Assign) {
                    self.skip_newlines();
                    let default = self.parse_expr()?;
                    named_params.push(NamedParamDecl {
                        name: p_name,
                        types,
                        default,
                    });
                } else {
                    if !named_params.is_empty() {
                        return Err(CompileError::new(
                            p_pos,
                            "positional parameter after a defaulted parameter",
                        ));
                    }
                    params.push(ParamDecl { name: p_name, types });
                }
            }
            self.skip_newlines();
            if !self.eat(&TokKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokKind::RParen, "')'")?;
        self.brace_ok = was;

        let body = self.parse_block()?;
        Ok(FuncLit {
            name,
            params,
            var_param,
            named_params,
            var_named_param,
            body,
            pos,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_define_and_swap() {
        let stmts = parse("a := 1\na, b = b, a").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0].stmt, Stmt::Define { names, .. } if names == &["a"]));
        match &stmts[1].stmt {
            Stmt::Assign { targets, op, .. } => {
                assert_eq!(targets.len(), 2);
                assert_eq!(*op, AssignOp::Assign);
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_if_with_init() {
        let stmts = parse("if a := 1; a > 0 { b := 2 } else { b := 3 }").unwrap();
        match &stmts[0].stmt {
            Stmt::If { init, otherwise, .. } => {
                assert!(init.is_some());
                assert!(matches!(otherwise, Some(ElseArm::Block(_))));
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn test_for_in_two_idents() {
        let stmts = parse("for k, v in m { }").unwrap();
        match &stmts[0].stmt {
            Stmt::ForIn { key, value, .. } => {
                assert_eq!(key, "k");
                assert_eq!(value, "v");
            }
            other => panic!("expected for-in, got {other:?}"),
        }
    }

    #[test]
    fn test_for_in_single_ident_binds_value() {
        let stmts = parse("for x in [1, 2] { } else { }").unwrap();
        match &stmts[0].stmt {
            Stmt::ForIn {
                key, value, else_body, ..
            } => {
                assert_eq!(key, "_");
                assert_eq!(value, "x");
                assert!(else_body.is_some());
            }
            other => panic!("expected for-in, got {other:?}"),
        }
    }

    #[test]
    fn test_three_part_for() {
        let stmts = parse("for i := 0; i < 3; i++ { }").unwrap();
        match &stmts[0].stmt {
            Stmt::For { init, cond, post, .. } => {
                assert!(init.is_some());
                assert!(cond.is_some());
                assert!(post.is_some());
            }
            other => panic!("expected for, got {other:?}"),
        }
    }

    #[test]
    fn test_try_catch_finally() {
        let stmts = parse("try { throw \"x\" } catch e { } finally { }").unwrap();
        match &stmts[0].stmt {
            Stmt::Try { catch, finally, .. } => {
                assert_eq!(catch.as_ref().map(|(ident, _)| ident.clone()), Some(Some("e".into())));
                assert!(finally.is_some());
            }
            other => panic!("expected try, got {other:?}"),
        }
    }

    #[test]
    fn test_call_with_named_args() {
        let stmts = parse("f(1, *xs; k=2, flag, **kw)").unwrap();
        let Stmt::Expr(expr) = &stmts[0].stmt else {
            panic!("expected expression statement");
        };
        let Expr::Call(call) = &expr.expr else {
            panic!("expected call");
        };
        assert_eq!(call.args.len(), 1);
        assert!(call.var_arg.is_some());
        assert_eq!(call.named.len(), 2);
        assert_eq!(call.named[0].name, "k");
        assert!(call.named[1].value.is_none());
        assert!(call.var_named.is_some());
    }

    #[test]
    fn test_func_literal_params() {
        let stmts = parse("f := func(x, y int|str, k=10, *rest, **named) { return x }").unwrap();
        let Stmt::Define { value, .. } = &stmts[0].stmt else {
            panic!("expected define");
        };
        let Expr::Func(lit) = &value.expr else {
            panic!("expected func literal");
        };
        assert_eq!(lit.params.len(), 2);
        assert_eq!(lit.params[1].types, vec!["int".to_owned(), "str".to_owned()]);
        assert_eq!(lit.named_params.len(), 1);
        assert_eq!(lit.var_param.as_deref(), Some("rest"));
        assert_eq!(lit.var_named_param.as_deref(), Some("named"));
    }

    #[test]
    fn test_pipe_chain() {
        let stmts = parse("x | f | g(1)").unwrap();
        let Stmt::Expr(expr) = &stmts[0].stmt else {
            panic!("expected expression statement");
        };
        let Expr::Pipe { left, .. } = &expr.expr else {
            panic!("expected pipe");
        };
        assert!(matches!(&left.expr, Expr::Pipe { .. }));
    }

    #[test]
    fn test_selector_chain_and_slice() {
        let stmts = parse("a.b.c[1][2:3]").unwrap();
        let Stmt::Expr(expr) = &stmts[0].stmt else {
            panic!("expected expression statement");
        };
        assert!(matches!(&expr.expr, Expr::Slice { .. }));
    }

    #[test]
    fn test_const_with_iota() {
        let stmts = parse("const a = iota, b = iota").unwrap();
        assert!(matches!(&stmts[0].stmt, Stmt::Const { decls } if decls.len() == 2));
    }
}
