//! Statement lowering.

use crate::{
    ast::{AssignOp, AssignTarget, ElseArm, Expr, ExprLoc, FuncLit, Stmt, StmtLoc},
    builtins::Builtin,
    bytecode::{Constant, Opcode},
    compiler::{Compiler, LoopCtx},
    error::{CompileError, Pos},
    symbol::ScopeKind,
    token::BinOp,
};

type CompileResult<T> = Result<T, CompileError>;

/// How an `if`/loop condition lowers.
enum CondLowering<'a> {
    /// The condition folded to a constant boolean.
    Const(bool),
    /// A nil check: jump past the then-branch with the given opcode, which
    /// keeps the operand on the stack at the jump target.
    NilJump { operand: &'a ExprLoc, jump: Opcode },
    General,
}

fn lower_cond(cond: &ExprLoc) -> CondLowering<'_> {
    match &cond.expr {
        Expr::True => CondLowering::Const(true),
        Expr::False => CondLowering::Const(false),
        Expr::Binary { op, left, right } => {
            let (eq, other) = match (op, &left.expr, &right.expr) {
                (crate::ast::BinTok::Eq, Expr::Nil, _) => (true, right.as_ref()),
                (crate::ast::BinTok::Eq, _, Expr::Nil) => (true, left.as_ref()),
                (crate::ast::BinTok::NotEq, Expr::Nil, _) => (false, right.as_ref()),
                (crate::ast::BinTok::NotEq, _, Expr::Nil) => (false, left.as_ref()),
                _ => return CondLowering::General,
            };
            CondLowering::NilJump {
                operand: other,
                // `x == nil` falls through when nil; the else-jump fires
                // when the operand is not nil (and vice versa).
                jump: if eq { Opcode::JumpNotNil } else { Opcode::JumpNil },
            }
        }
        _ => CondLowering::General,
    }
}

impl Compiler<'_> {
    pub(super) fn compile_stmt(&mut self, stmt: &StmtLoc) -> CompileResult<()> {
        let pos = stmt.pos;
        match &stmt.stmt {
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                self.b().emit0(Opcode::Pop);
            }
            Stmt::Define { names, value } => self.compile_define(names, value, pos)?,
            Stmt::Var { decls } => {
                for (name, value) in decls {
                    self.forbid_iota(name, pos)?;
                    match value {
                        Some(v) => self.compile_expr(v)?,
                        None => self.b().emit0(Opcode::Nil),
                    }
                    let id = self.intern(name);
                    let sym = self.define_symbol(id, pos)?;
                    let slot = self.symbols.symbol(sym).index;
                    self.b().emit1(Opcode::DefineLocal, slot);
                }
            }
            Stmt::Const { decls } => {
                for (i, (name, value)) in decls.iter().enumerate() {
                    self.forbid_iota(name, pos)?;
                    self.iota = Some(i64::try_from(i).unwrap_or(i64::MAX));
                    let compiled = self.compile_expr(value);
                    self.iota = None;
                    compiled?;
                    let id = self.intern(name);
                    let sym = self
                        .symbols
                        .define_const(id)
                        .map_err(|e| self.symbol_error(e, id, pos))?;
                    let slot = self.symbols.symbol(sym).index;
                    self.b().emit1(Opcode::DefineLocal, slot);
                }
            }
            Stmt::Param { names, var_name } => self.compile_param_decl(names, var_name.as_deref(), pos)?,
            Stmt::Global { names } => {
                if !self.state().module || !self.symbols.at_top_level() {
                    return Err(CompileError::new(pos, "'global' is only valid at the top level"));
                }
                for name in names {
                    let id = self.intern(name);
                    self.symbols
                        .define_global(id)
                        .map_err(|e| self.symbol_error(e, id, pos))?;
                }
            }
            Stmt::Assign { targets, op, value } => self.compile_assign(targets, *op, value, pos)?,
            Stmt::IncDec { target, inc } => {
                let one = ExprLoc::new(Expr::Int(1), pos);
                let op = AssignOp::Bin(if *inc { BinOp::Add } else { BinOp::Sub });
                self.compile_assign(std::slice::from_ref(target), op, &one, pos)?;
            }
            Stmt::If {
                init,
                cond,
                then,
                otherwise,
            } => self.compile_if(init.as_deref(), cond, then, otherwise.as_ref(), pos)?,
            Stmt::For { init, cond, post, body } => {
                self.compile_for(init.as_deref(), cond.as_ref(), post.as_deref(), body, pos)?;
            }
            Stmt::ForIn {
                key,
                value,
                iterable,
                body,
                else_body,
            } => self.compile_for_in(key, value, iterable, body, else_body.as_deref(), pos)?,
            Stmt::Try { body, catch, finally } => self.compile_try(body, catch.as_ref(), finally.as_deref(), pos)?,
            Stmt::Throw(value) => {
                self.compile_expr(value)?;
                self.b().emit1(Opcode::Throw, 1);
            }
            Stmt::Return(value) => {
                if self.state().try_depth > 0 {
                    self.b().emit1(Opcode::Finalizer, 0);
                }
                match value {
                    Some(v) => {
                        self.compile_expr(v)?;
                        self.b().emit1(Opcode::Return, 1);
                    }
                    None => self.b().emit1(Opcode::Return, 0),
                }
            }
            Stmt::Break => self.compile_break_continue(true, pos)?,
            Stmt::Continue => self.compile_break_continue(false, pos)?,
            Stmt::Block(stmts) => {
                self.symbols.fork(true);
                let result = self.compile_stmts(stmts);
                self.symbols.leave();
                result?;
            }
            Stmt::FuncDecl(lit) => self.compile_func_decl(lit, pos)?,
        }
        Ok(())
    }

    fn compile_stmts(&mut self, stmts: &[StmtLoc]) -> CompileResult<()> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn forbid_iota(&self, name: &str, pos: Pos) -> CompileResult<()> {
        if name == "iota" {
            return Err(CompileError::new(pos, "cannot rebind 'iota'"));
        }
        Ok(())
    }

    fn compile_param_decl(&mut self, names: &[String], var_name: Option<&str>, pos: Pos) -> CompileResult<()> {
        if !self.state().module || !self.symbols.at_top_level() {
            return Err(CompileError::new(pos, "'param' is only valid at the top level"));
        }
        let existing_params = self.state().params.names.len();
        let locals_now = usize::from(self.symbols.num_locals(self.symbols.current()));
        if locals_now != existing_params {
            return Err(CompileError::new(pos, "'param' must precede other declarations"));
        }
        for name in names {
            let id = self.intern(name);
            self.symbols
                .define_param(id, false)
                .map_err(|e| self.symbol_error(e, id, pos))?;
            let state = self.state();
            state.params.names.push(id);
            state.params.types.push(Vec::new());
        }
        if let Some(var) = var_name {
            if self.state().params.var {
                return Err(CompileError::new(pos, "duplicate variadic parameter"));
            }
            let id = self.intern(var);
            let sym = self
                .symbols
                .define_param(id, true)
                .map_err(|e| self.symbol_error(e, id, pos))?;
            let variadic = self.symbols.symbol(sym).variadic;
            let state = self.state();
            state.params.names.push(id);
            state.params.types.push(Vec::new());
            state.params.var = variadic;
        }
        Ok(())
    }

    fn compile_define(&mut self, names: &[String], value: &ExprLoc, pos: Pos) -> CompileResult<()> {
        for name in names {
            self.forbid_iota(name, pos)?;
        }
        if names.len() == 1 {
            self.compile_expr(value)?;
            let id = self.intern(&names[0]);
            let sym = self.define_symbol(id, pos)?;
            let slot = self.symbols.symbol(sym).index;
            self.b().emit1(Opcode::DefineLocal, slot);
            return Ok(());
        }

        // Destructuring definition: materialise the right-hand side as an
        // array of exactly `names.len()` slots, then index it out.
        self.emit_make_array(names.len(), value)?;
        let tmp = self.define_hidden("dst", pos)?;
        self.b().emit1(Opcode::DefineLocal, tmp);
        for (i, name) in names.iter().enumerate() {
            let id = self.intern(name);
            let sym = self.define_symbol(id, pos)?;
            let slot = self.symbols.symbol(sym).index;
            self.b().emit1(Opcode::GetLocal, tmp);
            let idx_const = self.add_const(Constant::Int(i64::try_from(i).unwrap_or(i64::MAX)))?;
            self.b().emit1(Opcode::Constant, idx_const);
            self.b().emit1(Opcode::GetIndex, 1);
            self.b().emit1(Opcode::DefineLocal, slot);
        }
        Ok(())
    }

    fn emit_make_array(&mut self, n: usize, value: &ExprLoc) -> CompileResult<()> {
        self.b().emit1(Opcode::GetBuiltin, u16::from(Builtin::MakeArray as u8));
        let n_const = self.add_const(Constant::Int(i64::try_from(n).unwrap_or(i64::MAX)))?;
        self.b().emit1(Opcode::Constant, n_const);
        self.compile_expr(value)?;
        self.b().emit2(Opcode::Call, 2, 0);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    /// Emits everything below the value for a store: object and index for
    /// indexed targets, nothing for identifiers.
    fn prepare_store(&mut self, target: &AssignTarget) -> CompileResult<()> {
        match target {
            AssignTarget::Ident(_) => Ok(()),
            AssignTarget::Index { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)
            }
            AssignTarget::Selector { target, name } => {
                self.compile_expr(target)?;
                self.emit_str_const(name)
            }
        }
    }

    /// Emits the store itself; the value (and, for indexed targets, the
    /// object and index below it) is on the stack.
    fn finish_store(&mut self, target: &AssignTarget, pos: Pos) -> CompileResult<()> {
        match target {
            AssignTarget::Ident(name) => {
                if name == "_" {
                    self.b().emit0(Opcode::Pop);
                    return Ok(());
                }
                self.forbid_iota(name, pos)?;
                let sym = self
                    .resolve_ident(name)
                    .ok_or_else(|| CompileError::new(pos, format!("unresolved reference '{name}'")))?;
                self.store_symbol(sym, pos)
            }
            AssignTarget::Index { .. } | AssignTarget::Selector { .. } => {
                self.b().emit0(Opcode::SetIndex);
                Ok(())
            }
        }
    }

    /// Loads the target's current value, for compound assignment.
    fn load_target(&mut self, target: &AssignTarget, pos: Pos) -> CompileResult<()> {
        match target {
            AssignTarget::Ident(name) => {
                let sym = self
                    .resolve_ident(name)
                    .ok_or_else(|| CompileError::new(pos, format!("unresolved reference '{name}'")))?;
                self.load_symbol(sym)
            }
            AssignTarget::Index { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.b().emit1(Opcode::GetIndex, 1);
                Ok(())
            }
            AssignTarget::Selector { target, name } => {
                self.compile_expr(target)?;
                self.emit_str_const(name)?;
                self.b().emit1(Opcode::GetIndex, 1);
                Ok(())
            }
        }
    }

    fn compile_assign(
        &mut self,
        targets: &[AssignTarget],
        op: AssignOp,
        value: &ExprLoc,
        pos: Pos,
    ) -> CompileResult<()> {
        if targets.len() > 1 {
            // Multi-target destructuring through a materialised temporary.
            self.emit_make_array(targets.len(), value)?;
            let tmp = self.define_hidden("dst", pos)?;
            self.b().emit1(Opcode::DefineLocal, tmp);
            for (i, target) in targets.iter().enumerate() {
                self.prepare_store(target)?;
                self.b().emit1(Opcode::GetLocal, tmp);
                let idx_const = self.add_const(Constant::Int(i64::try_from(i).unwrap_or(i64::MAX)))?;
                self.b().emit1(Opcode::Constant, idx_const);
                self.b().emit1(Opcode::GetIndex, 1);
                self.finish_store(target, pos)?;
            }
            return Ok(());
        }

        let target = &targets[0];
        match op {
            AssignOp::Assign => {
                self.prepare_store(target)?;
                self.compile_expr(value)?;
                self.finish_store(target, pos)
            }
            AssignOp::Bin(tok) => match target {
                AssignTarget::Ident(_) => {
                    self.load_target(target, pos)?;
                    self.compile_expr(value)?;
                    self.b().emit1(Opcode::BinaryOp, u16::from(tok as u8));
                    self.finish_store(target, pos)
                }
                AssignTarget::Index { .. } | AssignTarget::Selector { .. } => {
                    self.compound_indexed(target, value, pos, |c| {
                        c.b().emit1(Opcode::BinaryOp, u16::from(tok as u8));
                        Ok(())
                    })
                }
            },
            AssignOp::NilCoalesce | AssignOp::Or => {
                let jump_op = if op == AssignOp::NilCoalesce {
                    Opcode::JumpNotNil
                } else {
                    Opcode::OrJump
                };
                match target {
                    AssignTarget::Ident(_) => {
                        self.load_target(target, pos)?;
                        let skip = self.b().emit_jump(jump_op);
                        self.compile_expr(value)?;
                        self.finish_store(target, pos)?;
                        let end = self.b().emit_jump(Opcode::Jump);
                        self.b().patch_here(skip, pos)?;
                        self.b().emit0(Opcode::Pop);
                        self.b().patch_here(end, pos)?;
                        Ok(())
                    }
                    AssignTarget::Index { .. } | AssignTarget::Selector { .. } => {
                        self.short_circuit_indexed(target, value, jump_op, pos)
                    }
                }
            }
        }
    }

    /// Compound assignment on an indexed target: the object and index are
    /// evaluated once into hidden locals.
    fn compound_indexed(
        &mut self,
        target: &AssignTarget,
        value: &ExprLoc,
        pos: Pos,
        combine: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<()> {
        let (obj_slot, idx_slot) = self.stash_target(target, pos)?;
        // current value
        self.b().emit1(Opcode::GetLocal, obj_slot);
        self.b().emit1(Opcode::GetLocal, idx_slot);
        self.b().emit1(Opcode::GetIndex, 1);
        self.compile_expr(value)?;
        combine(self)?;
        // store back
        let val_slot = self.define_hidden("val", pos)?;
        self.b().emit1(Opcode::DefineLocal, val_slot);
        self.b().emit1(Opcode::GetLocal, obj_slot);
        self.b().emit1(Opcode::GetLocal, idx_slot);
        self.b().emit1(Opcode::GetLocal, val_slot);
        self.b().emit0(Opcode::SetIndex);
        Ok(())
    }

    fn short_circuit_indexed(
        &mut self,
        target: &AssignTarget,
        value: &ExprLoc,
        jump_op: Opcode,
        pos: Pos,
    ) -> CompileResult<()> {
        let (obj_slot, idx_slot) = self.stash_target(target, pos)?;
        self.b().emit1(Opcode::GetLocal, obj_slot);
        self.b().emit1(Opcode::GetLocal, idx_slot);
        self.b().emit1(Opcode::GetIndex, 1);
        let skip = self.b().emit_jump(jump_op);
        self.compile_expr(value)?;
        let val_slot = self.define_hidden("val", pos)?;
        self.b().emit1(Opcode::DefineLocal, val_slot);
        self.b().emit1(Opcode::GetLocal, obj_slot);
        self.b().emit1(Opcode::GetLocal, idx_slot);
        self.b().emit1(Opcode::GetLocal, val_slot);
        self.b().emit0(Opcode::SetIndex);
        let end = self.b().emit_jump(Opcode::Jump);
        self.b().patch_here(skip, pos)?;
        self.b().emit0(Opcode::Pop);
        self.b().patch_here(end, pos)?;
        Ok(())
    }

    /// Evaluates an indexed target's object and index into hidden locals.
    fn stash_target(&mut self, target: &AssignTarget, pos: Pos) -> CompileResult<(u16, u16)> {
        let obj_slot = self.define_hidden("obj", pos)?;
        let idx_slot = self.define_hidden("idx", pos)?;
        match target {
            AssignTarget::Index { target, index } => {
                self.compile_expr(target)?;
                self.b().emit1(Opcode::DefineLocal, obj_slot);
                self.compile_expr(index)?;
                self.b().emit1(Opcode::DefineLocal, idx_slot);
            }
            AssignTarget::Selector { target, name } => {
                self.compile_expr(target)?;
                self.b().emit1(Opcode::DefineLocal, obj_slot);
                self.emit_str_const(name)?;
                self.b().emit1(Opcode::DefineLocal, idx_slot);
            }
            AssignTarget::Ident(_) => unreachable!("identifier targets do not stash"),
        }
        Ok((obj_slot, idx_slot))
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    fn compile_if(
        &mut self,
        init: Option<&StmtLoc>,
        cond: &ExprLoc,
        then: &[StmtLoc],
        otherwise: Option<&ElseArm>,
        pos: Pos,
    ) -> CompileResult<()> {
        self.symbols.fork(true);
        let result = self.compile_if_inner(init, cond, then, otherwise, pos);
        self.symbols.leave();
        result
    }

    fn compile_if_inner(
        &mut self,
        init: Option<&StmtLoc>,
        cond: &ExprLoc,
        then: &[StmtLoc],
        otherwise: Option<&ElseArm>,
        pos: Pos,
    ) -> CompileResult<()> {
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }

        match lower_cond(cond) {
            CondLowering::Const(true) => self.compile_branch_block(then),
            CondLowering::Const(false) => match otherwise {
                Some(arm) => self.compile_else_arm(arm),
                None => Ok(()),
            },
            CondLowering::NilJump { operand, jump } => {
                self.compile_expr(operand)?;
                let else_jump = self.b().emit_jump(jump);
                self.compile_branch_block(then)?;
                let end_jump = self.b().emit_jump(Opcode::Jump);
                self.b().patch_here(else_jump, pos)?;
                // The nil jump keeps the decisive operand on the stack.
                self.b().emit0(Opcode::Pop);
                if let Some(arm) = otherwise {
                    self.compile_else_arm(arm)?;
                }
                self.b().patch_here(end_jump, pos)?;
                Ok(())
            }
            CondLowering::General => {
                self.compile_expr(cond)?;
                let else_jump = self.b().emit_jump(Opcode::JumpFalsy);
                self.compile_branch_block(then)?;
                match otherwise {
                    Some(arm) => {
                        let end_jump = self.b().emit_jump(Opcode::Jump);
                        self.b().patch_here(else_jump, pos)?;
                        self.compile_else_arm(arm)?;
                        self.b().patch_here(end_jump, pos)?;
                    }
                    None => self.b().patch_here(else_jump, pos)?,
                }
                Ok(())
            }
        }
    }

    fn compile_branch_block(&mut self, stmts: &[StmtLoc]) -> CompileResult<()> {
        self.symbols.fork(true);
        let result = self.compile_stmts(stmts);
        self.symbols.leave();
        result
    }

    fn compile_else_arm(&mut self, arm: &ElseArm) -> CompileResult<()> {
        match arm {
            ElseArm::Block(stmts) => self.compile_branch_block(stmts),
            ElseArm::If(stmt) => self.compile_stmt(stmt),
        }
    }

    fn compile_for(
        &mut self,
        init: Option<&StmtLoc>,
        cond: Option<&ExprLoc>,
        post: Option<&StmtLoc>,
        body: &[StmtLoc],
        pos: Pos,
    ) -> CompileResult<()> {
        self.symbols.fork(true);
        let result = self.compile_for_inner(init, cond, post, body, pos);
        self.symbols.leave();
        result
    }

    fn compile_for_inner(
        &mut self,
        init: Option<&StmtLoc>,
        cond: Option<&ExprLoc>,
        post: Option<&StmtLoc>,
        body: &[StmtLoc],
        pos: Pos,
    ) -> CompileResult<()> {
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }
        let pre_cond = self.b().target(pos)?;
        let falsy_jump = match cond {
            Some(cond) => {
                self.compile_expr(cond)?;
                Some(self.b().emit_jump(Opcode::JumpFalsy))
            }
            None => None,
        };

        let try_depth = self.state().try_depth;
        self.state().loops.push(LoopCtx {
            try_depth,
            ..LoopCtx::default()
        });

        self.compile_branch_block(body)?;
        let post_body = self.b().target(pos)?;
        if let Some(post) = post {
            self.compile_stmt(post)?;
        }
        self.b().emit1(Opcode::Jump, pre_cond);
        let end = self.b().target(pos)?;

        if let Some(jump) = falsy_jump {
            self.b().patch_to(jump, end);
        }
        let ctx = self.state().loops.pop().expect("loop context pushed above");
        for br in ctx.breaks {
            self.b().patch_to(br, end);
        }
        for co in ctx.continues {
            self.b().patch_to(co, post_body);
        }
        Ok(())
    }

    /// For-in lowers to a hidden iterator local.
    fn compile_for_in(
        &mut self,
        key: &str,
        value: &str,
        iterable: &ExprLoc,
        body: &[StmtLoc],
        else_body: Option<&[StmtLoc]>,
        pos: Pos,
    ) -> CompileResult<()> {
        self.symbols.fork(true);
        let result = self.compile_for_in_inner(key, value, iterable, body, else_body, pos);
        self.symbols.leave();
        result
    }

    fn compile_for_in_inner(
        &mut self,
        key: &str,
        value: &str,
        iterable: &ExprLoc,
        body: &[StmtLoc],
        else_body: Option<&[StmtLoc]>,
        pos: Pos,
    ) -> CompileResult<()> {
        self.compile_expr(iterable)?;
        self.b().emit0(Opcode::IterInit);
        let it_slot = self.define_hidden("it", pos)?;
        self.b().emit1(Opcode::DefineLocal, it_slot);

        // With an else branch, the first advance distinguishes the empty
        // iterable.
        let first_check = if else_body.is_some() {
            self.b().emit1(Opcode::GetLocal, it_slot);
            Some(self.b().emit_jump2(Opcode::IterNextElse))
        } else {
            None
        };

        let loop_cond = self.b().target(pos)?;
        self.b().emit1(Opcode::GetLocal, it_slot);
        self.b().emit0(Opcode::IterNext);
        let done_jump = self.b().emit_jump(Opcode::JumpFalsy);

        let body_pos = self.b().target(pos)?;
        if let Some((entry_label, _)) = first_check {
            self.b().patch_to(entry_label, body_pos);
        }

        let try_depth = self.state().try_depth;
        self.state().loops.push(LoopCtx {
            try_depth,
            ..LoopCtx::default()
        });

        self.symbols.fork(true);
        let body_result = (|| -> CompileResult<()> {
            if key != "_" {
                self.b().emit1(Opcode::GetLocal, it_slot);
                self.b().emit0(Opcode::IterKey);
                let id = self.intern(key);
                let sym = self.define_symbol(id, pos)?;
                let slot = self.symbols.symbol(sym).index;
                self.b().emit1(Opcode::DefineLocal, slot);
            }
            if value != "_" {
                self.b().emit1(Opcode::GetLocal, it_slot);
                self.b().emit0(Opcode::IterValue);
                let id = self.intern(value);
                let sym = self.define_symbol(id, pos)?;
                let slot = self.symbols.symbol(sym).index;
                self.b().emit1(Opcode::DefineLocal, slot);
            }
            self.compile_stmts(body)
        })();
        self.symbols.leave();
        body_result?;
        self.b().emit1(Opcode::Jump, loop_cond);

        if let Some((_, else_label)) = first_check {
            let else_pos = self.b().target(pos)?;
            self.b().patch_to(else_label, else_pos);
            if let Some(else_body) = else_body {
                self.compile_branch_block(else_body)?;
            }
        }
        let end = self.b().target(pos)?;
        self.b().patch_to(done_jump, end);

        let ctx = self.state().loops.pop().expect("loop context pushed above");
        for br in ctx.breaks {
            self.b().patch_to(br, end);
        }
        for co in ctx.continues {
            self.b().patch_to(co, loop_cond);
        }
        Ok(())
    }

    fn compile_break_continue(&mut self, is_break: bool, pos: Pos) -> CompileResult<()> {
        let state = self.states.last().expect("a function is being compiled");
        let Some(ctx) = state.loops.last() else {
            let what = if is_break { "break" } else { "continue" };
            return Err(CompileError::new(pos, format!("'{what}' outside a loop")));
        };
        let loop_depth = ctx.try_depth;
        let current_depth = state.try_depth;
        // Unwind in-flight try handlers before leaving the loop.
        if current_depth > loop_depth {
            self.b().emit1(Opcode::Finalizer, loop_depth);
        }
        let label = self.b().emit_jump(Opcode::Jump);
        let ctx = self
            .state()
            .loops
            .last_mut()
            .expect("loop context checked above");
        if is_break {
            ctx.breaks.push(label);
        } else {
            ctx.continues.push(label);
        }
        Ok(())
    }

    fn compile_try(
        &mut self,
        body: &[StmtLoc],
        catch: Option<&(Option<String>, Vec<StmtLoc>)>,
        finally: Option<&[StmtLoc]>,
        pos: Pos,
    ) -> CompileResult<()> {
        self.symbols.fork(true);
        let result = self.compile_try_inner(body, catch, finally, pos);
        self.symbols.leave();
        result
    }

    fn compile_try_inner(
        &mut self,
        body: &[StmtLoc],
        catch: Option<&(Option<String>, Vec<StmtLoc>)>,
        finally: Option<&[StmtLoc]>,
        pos: Pos,
    ) -> CompileResult<()> {
        // The catch identifier's slot lives in the try construct's scope so
        // the nil-initialisation and the catch body share it.
        let catch_slot = match catch {
            Some((Some(ident), _)) => {
                let id = self.intern(ident);
                let sym = self.define_symbol(id, pos)?;
                Some(self.symbols.symbol(sym).index)
            }
            _ => None,
        };

        let (catch_label, finally_label) = self.b().emit_jump2(Opcode::SetupTry);
        self.state().try_depth += 1;

        self.compile_branch_block(body)?;
        // Reaching finally without throwing must not read a stale error
        // from a prior iteration.
        if let Some(slot) = catch_slot {
            self.b().emit0(Opcode::Nil);
            self.b().emit1(Opcode::DefineLocal, slot);
        }
        let to_finally = self.b().emit_jump(Opcode::Jump);

        if let Some((ident, catch_body)) = catch {
            let catch_pos = self.b().target(pos)?;
            self.b().patch_to(catch_label, catch_pos);
            self.b().emit0(Opcode::SetupCatch);
            match (ident, catch_slot) {
                (Some(_), Some(slot)) => self.b().emit1(Opcode::DefineLocal, slot),
                _ => self.b().emit0(Opcode::Pop),
            }
            self.compile_branch_block(catch_body)?;
        }

        let finally_pos = self.b().target(pos)?;
        self.b().patch_to(finally_label, finally_pos);
        self.b().patch_to(to_finally, finally_pos);
        self.b().emit0(Opcode::SetupFinally);
        if let Some(finally_body) = finally {
            self.compile_branch_block(finally_body)?;
        }
        // Implicit re-throw: a no-op without an in-flight error.
        self.b().emit1(Opcode::Throw, 0);
        self.state().try_depth -= 1;
        Ok(())
    }

    fn compile_func_decl(&mut self, lit: &FuncLit, pos: Pos) -> CompileResult<()> {
        let name = lit.name.as_deref().expect("declaration form carries a name");
        self.forbid_iota(name, pos)?;

        match self.resolve_ident(name) {
            Some(sym) => {
                // Name collision with an existing binding: rewrite the
                // define into a method attachment.
                let (scope, _) = {
                    let s = self.symbols.symbol(sym);
                    (s.scope, s.index)
                };
                self.b().emit1(Opcode::GetBuiltin, u16::from(Builtin::AddCallMethod as u8));
                self.load_symbol(sym)?;
                self.compile_func_lit(lit, true)?;
                self.b().emit2(Opcode::Call, 2, 0);
                match scope {
                    ScopeKind::Builtin => {
                        // Shadow the builtin with the new method caller.
                        let id = self.intern(name);
                        let shadow = self.define_symbol(id, pos)?;
                        let slot = self.symbols.symbol(shadow).index;
                        self.b().emit1(Opcode::DefineLocal, slot);
                    }
                    _ => self.store_symbol(sym, pos)?,
                }
                Ok(())
            }
            None => {
                // Define first so the body can recurse. The store must go
                // through `SetLocal`: a self-recursive body captures the
                // slot as a cell before this store runs, and the closure
                // value has to land inside that cell.
                let id = self.intern(name);
                let sym = self.define_symbol(id, pos)?;
                let slot = self.symbols.symbol(sym).index;
                self.compile_func_lit(lit, true)?;
                self.b().emit1(Opcode::SetLocal, slot);
                Ok(())
            }
        }
    }
}
