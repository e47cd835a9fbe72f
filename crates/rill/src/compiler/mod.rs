//! The compiler: AST to bytecode.
//!
//! The compiler maintains the instruction builder stack (one per function
//! being compiled), the deduplicated constant pool, the symbol table, the
//! active loop contexts with their break/continue jump sites, the try-catch
//! depth, and the per-compilation module map.

mod stmt;

use ahash::AHashMap;

use crate::{
    ast::{BinTok, CallExpr, Expr, ExprLoc, FuncLit},
    builtins::Builtin,
    bytecode::{
        Bytecode, CompiledFunction, Constant, FuncId, NamedParams, Opcode, Params,
        builder::{FuncBuilder, JumpLabel},
        call_flags,
    },
    error::{CompileError, Pos},
    intern::{Interns, StringId},
    modules::{Importer, ModuleSource},
    object::Object,
    parser,
    resource::Limits,
    symbol::{ScopeKind, SymbolError, SymbolId, SymbolTable},
    types::Decimal,
};

type CompileResult<T> = Result<T, CompileError>;

/// Compiles a source string into bytecode.
pub(crate) fn compile(source: &str, importer: &mut dyn Importer, limits: &Limits) -> Result<Bytecode, CompileError> {
    let stmts = parser::parse(source)?;
    let mut compiler = Compiler::new(importer, limits);
    let main = compiler.compile_program(stmts, "main")?;
    Ok(Bytecode {
        constants: compiler.constants,
        functions: compiler.functions,
        main,
        num_module_slots: compiler.module_slots,
        interns: compiler.interns,
    })
}

/// Dedup key for primitive constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConstKey {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(u64),
    Char(char),
    Str(StringId),
    RawStr(StringId),
}

/// One loop's break/continue sites and the try depth surrounding it.
#[derive(Debug, Default)]
struct LoopCtx {
    breaks: Vec<JumpLabel>,
    continues: Vec<JumpLabel>,
    try_depth: u16,
}

/// Per-function compilation state.
#[derive(Debug, Default)]
struct FuncState {
    builder: FuncBuilder,
    loops: Vec<LoopCtx>,
    try_depth: u16,
    params: Params,
    named_params: NamedParams,
    name: StringId,
    allow_methods: bool,
    /// True for main and modules, where `param`/`global` declarations are
    /// valid.
    module: bool,
}

pub(crate) struct Compiler<'imp> {
    interns: Interns,
    constants: Vec<Constant>,
    const_index: AHashMap<ConstKey, u16>,
    functions: Vec<CompiledFunction>,
    symbols: SymbolTable,
    states: Vec<FuncState>,
    importer: &'imp mut dyn Importer,
    module_map: AHashMap<String, ModuleEntry>,
    module_slots: u16,
    /// Modules currently being compiled, for cycle detection.
    compiling_modules: Vec<String>,
    max_locals: u16,
    blank: StringId,
    /// Per-const-declaration counter; `Some` only while compiling a const
    /// declaration's expressions.
    iota: Option<i64>,
    /// Counter for hidden compiler locals (`:it3`, `:dst5`, ...).
    hidden: u32,
}

#[derive(Debug, Clone, Copy)]
enum ModuleEntry {
    /// Source module: call the compiled function and cache the result.
    Source { slot: u16, func_const: u16, param_count: u16 },
    /// Value module: cache the constant directly.
    Value { slot: u16, value_const: u16 },
}

impl<'imp> Compiler<'imp> {
    fn new(importer: &'imp mut dyn Importer, limits: &Limits) -> Self {
        let mut interns = Interns::new();
        let blank = interns.intern("_");
        let symbols = SymbolTable::new(limits.max_locals, blank);
        Self {
            interns,
            constants: Vec::new(),
            const_index: AHashMap::new(),
            functions: Vec::new(),
            symbols,
            states: Vec::new(),
            importer,
            module_map: AHashMap::new(),
            module_slots: 0,
            compiling_modules: Vec::new(),
            max_locals: limits.max_locals,
            blank,
            iota: None,
            hidden: 0,
        }
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    fn intern(&mut self, s: &str) -> StringId {
        self.interns.intern(s)
    }

    fn state(&mut self) -> &mut FuncState {
        self.states.last_mut().expect("a function is being compiled")
    }

    fn b(&mut self) -> &mut FuncBuilder {
        &mut self.state().builder
    }

    /// Adds a constant with primitive deduplication.
    fn add_const(&mut self, c: Constant) -> CompileResult<u16> {
        let key = match &c {
            Constant::Nil => Some(ConstKey::Nil),
            Constant::Bool(b) => Some(ConstKey::Bool(*b)),
            Constant::Int(n) => Some(ConstKey::Int(*n)),
            Constant::Uint(n) => Some(ConstKey::Uint(*n)),
            Constant::Float(f) => Some(ConstKey::Float(f.to_bits())),
            Constant::Char(c) => Some(ConstKey::Char(*c)),
            Constant::Str(id) => Some(ConstKey::Str(*id)),
            Constant::RawStr(id) => Some(ConstKey::RawStr(*id)),
            _ => None,
        };
        if let Some(key) = key
            && let Some(&idx) = self.const_index.get(&key)
        {
            return Ok(idx);
        }
        let idx = u16::try_from(self.constants.len())
            .map_err(|_| CompileError::new(Pos::default(), "constant pool exceeds 65535 entries"))?;
        self.constants.push(c);
        if let Some(key) = key {
            self.const_index.insert(key, idx);
        }
        Ok(idx)
    }

    fn str_const(&mut self, s: &str) -> CompileResult<u16> {
        let id = self.intern(s);
        self.add_const(Constant::Str(id))
    }

    fn emit_str_const(&mut self, s: &str) -> CompileResult<()> {
        let c = self.str_const(s)?;
        self.b().emit1(Opcode::Constant, c);
        Ok(())
    }

    /// A fresh hidden local, named so it cannot collide with user code.
    fn define_hidden(&mut self, prefix: &str, pos: Pos) -> CompileResult<u16> {
        self.hidden += 1;
        let name = format!(":{prefix}{}", self.hidden);
        let id = self.intern(&name);
        let sym = self.define_symbol(id, pos)?;
        Ok(self.symbols.symbol(sym).index)
    }

    fn define_symbol(&mut self, name: StringId, pos: Pos) -> CompileResult<SymbolId> {
        self.symbols.define(name).map_err(|e| self.symbol_error(e, name, pos))
    }

    fn symbol_error(&self, e: SymbolError, name: StringId, pos: Pos) -> CompileError {
        match e {
            SymbolError::Redefined => {
                CompileError::new(pos, format!("'{}' is already defined in this block", self.interns.get(name)))
            }
            SymbolError::Limit => {
                CompileError::new(pos, format!("symbol limit: more than {} locals in one function", self.max_locals))
            }
        }
    }

    fn resolve_ident(&mut self, name: &str) -> Option<SymbolId> {
        let id = self.intern(name);
        let builtin = Builtin::from_name(name);
        self.symbols.resolve(id, builtin)
    }

    /// Emits the load for a resolved symbol.
    fn load_symbol(&mut self, sym: SymbolId) -> CompileResult<()> {
        let (scope, index, name) = {
            let s = self.symbols.symbol(sym);
            (s.scope, s.index, s.name)
        };
        match scope {
            ScopeKind::Local => self.b().emit1(Opcode::GetLocal, index),
            ScopeKind::Free => self.b().emit1(Opcode::GetFree, index),
            ScopeKind::Global => {
                let c = self.add_const(Constant::Str(name))?;
                self.b().emit1(Opcode::GetGlobal, c);
            }
            ScopeKind::Builtin => self.b().emit1(Opcode::GetBuiltin, index),
        }
        Ok(())
    }

    /// Emits the store for a resolved symbol; the value is on the stack.
    fn store_symbol(&mut self, sym: SymbolId, pos: Pos) -> CompileResult<()> {
        let (scope, index, name, constant) = {
            let s = self.symbols.symbol(sym);
            (s.scope, s.index, s.name, s.constant)
        };
        if constant {
            return Err(CompileError::new(
                pos,
                format!("cannot assign to constant '{}'", self.interns.get(name)),
            ));
        }
        if !self.symbols.symbol(sym).assigned {
            self.symbols.mark_assigned(sym);
        }
        match scope {
            ScopeKind::Local => self.b().emit1(Opcode::SetLocal, index),
            ScopeKind::Free => self.b().emit1(Opcode::SetFree, index),
            ScopeKind::Global => {
                let c = self.add_const(Constant::Str(name))?;
                self.b().emit1(Opcode::SetGlobal, c);
            }
            ScopeKind::Builtin => {
                return Err(CompileError::new(
                    pos,
                    format!("cannot assign to builtin '{}'", self.interns.get(name)),
                ));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Program, functions and modules
    // ------------------------------------------------------------------

    /// Compiles a program (main or a module body) in the current symbol
    /// table, which must be at its root.
    fn compile_program(&mut self, stmts: Vec<crate::ast::StmtLoc>, name: &str) -> CompileResult<FuncId> {
        let name_id = self.intern(name);
        self.states.push(FuncState {
            name: name_id,
            module: true,
            ..FuncState::default()
        });
        for stmt in &stmts {
            self.compile_stmt(stmt)?;
        }
        self.b().emit1(Opcode::Return, 0);

        let state = self.states.pop().expect("state pushed above");
        let num_locals = self.symbols.num_locals(self.symbols.current());
        let func = CompiledFunction {
            name: state.name,
            instructions: state.builder.finish(),
            num_locals,
            params: state.params,
            named_params: state.named_params,
            allow_methods: false,
            module_slot: None,
        };
        let id = FuncId::new(self.functions.len());
        self.functions.push(func);
        Ok(id)
    }

    /// Compiles a function literal, leaving the function value on the
    /// stack (a constant when nothing is captured, a closure otherwise).
    fn compile_func_lit(&mut self, lit: &FuncLit, allow_methods: bool) -> CompileResult<()> {
        self.symbols.fork(false);

        let mut params = Params::default();
        for p in &lit.params {
            let id = self.intern(&p.name);
            self.symbols
                .define_param(id, false)
                .map_err(|e| self.symbol_error(e, id, lit.pos))?;
            params.names.push(id);
            let types = p.types.iter().map(|t| self.intern(t)).collect();
            params.types.push(types);
        }
        if let Some(vp) = &lit.var_param {
            let id = self.intern(vp);
            let sym = self
                .symbols
                .define_param(id, true)
                .map_err(|e| self.symbol_error(e, id, lit.pos))?;
            params.names.push(id);
            params.types.push(Vec::new());
            // The symbol table records the variadic flag; the descriptor
            // mirrors it.
            params.var = self.symbols.symbol(sym).variadic;
        }
        let mut named_params = NamedParams::default();
        for np in &lit.named_params {
            let id = self.intern(&np.name);
            self.define_symbol(id, lit.pos)?;
            named_params.names.push(id);
        }
        if let Some(vn) = &lit.var_named_param {
            let id = self.intern(vn);
            self.define_symbol(id, lit.pos)?;
            named_params.var = true;
        }

        let fname = match &lit.name {
            Some(n) => self.intern(n),
            None => self.intern("(anonymous)"),
        };
        self.states.push(FuncState {
            name: fname,
            params,
            named_params,
            allow_methods,
            ..FuncState::default()
        });

        // Default-materialisation and type-check prelude for named
        // parameters.
        let base_slot = lit.params.len() + usize::from(lit.var_param.is_some());
        for (i, np) in lit.named_params.iter().enumerate() {
            let slot = u16::try_from(base_slot + i)
                .map_err(|_| CompileError::new(lit.pos, "too many parameters"))?;
            self.b().emit1(Opcode::GetLocal, slot);
            let defined = self.b().emit_jump(Opcode::JumpNotUndefined);
            self.compile_expr(&np.default)?;
            self.b().emit1(Opcode::DefineLocal, slot);
            self.b().patch_here(defined, np.default.pos)?;
            if !np.types.is_empty() {
                self.b().emit1(Opcode::GetBuiltin, u16::from(Builtin::TypeCheck as u8));
                self.b().emit1(Opcode::GetLocal, slot);
                self.emit_str_const(&np.types.join("|"))?;
                self.emit_str_const(&np.name)?;
                self.b().emit2(Opcode::Call, 3, 0);
                self.b().emit0(Opcode::Pop);
            }
        }

        for stmt in &lit.body {
            self.compile_stmt(stmt)?;
        }
        self.b().emit1(Opcode::Return, 0);

        let state = self.states.pop().expect("state pushed above");
        let scope = self.symbols.leave();
        let num_locals = self.symbols.num_locals(scope);
        let free = self.symbols.free_captures(scope);

        let func = CompiledFunction {
            name: state.name,
            instructions: state.builder.finish(),
            num_locals,
            params: state.params,
            named_params: state.named_params,
            allow_methods: state.allow_methods,
            module_slot: None,
        };
        let id = FuncId::new(self.functions.len());
        self.functions.push(func);
        let func_const = self.add_const(Constant::Func(id))?;

        if free.is_empty() {
            self.b().emit1(Opcode::Constant, func_const);
            return Ok(());
        }
        for &capture in &free {
            let (scope_kind, index) = {
                let s = self.symbols.symbol(capture);
                (s.scope, s.index)
            };
            match scope_kind {
                ScopeKind::Local => self.b().emit1(Opcode::GetLocalPtr, index),
                ScopeKind::Free => self.b().emit1(Opcode::GetFreePtr, index),
                _ => {
                    return Err(CompileError::new(lit.pos, "captured symbol is neither local nor free"));
                }
            }
        }
        let count = u16::try_from(free.len()).map_err(|_| CompileError::new(lit.pos, "too many captures"))?;
        self.b().emit2(Opcode::Closure, func_const, count);
        Ok(())
    }

    /// Compiles `import("name")`: resolves the importer, compiles source
    /// modules in a fresh top-level scope, and emits the two-step
    /// load/store sequence with a not-nil guard around initialisation.
    fn compile_import(&mut self, name: &str, pos: Pos) -> CompileResult<()> {
        let resolved = self.importer.resolve_name(name).unwrap_or_else(|| name.to_owned());

        if !self.module_map.contains_key(&resolved) {
            if self.compiling_modules.contains(&resolved) {
                return Err(CompileError::new(pos, format!("cyclic import of module '{resolved}'")));
            }
            let source = self
                .importer
                .import(&resolved)
                .map_err(|e| CompileError::new(pos, e))?;
            let entry = match source {
                ModuleSource::Source(bytes) => {
                    let text = String::from_utf8(bytes)
                        .map_err(|_| CompileError::new(pos, format!("module '{resolved}' is not valid UTF-8")))?;
                    let stmts = parser::parse(&text)?;
                    self.compiling_modules.push(resolved.clone());
                    let saved = std::mem::replace(&mut self.symbols, SymbolTable::new(self.max_locals, self.blank));
                    let compiled = self.compile_program(stmts, &resolved);
                    self.symbols = saved;
                    self.compiling_modules.pop();
                    let func_id = compiled?;

                    let slot = self.next_module_slot(pos)?;
                    let param_count = u16::try_from(self.functions[func_id.index()].params.names.len())
                        .map_err(|_| CompileError::new(pos, "too many module parameters"))?;
                    self.functions[func_id.index()].module_slot = Some(slot);
                    let func_const = self.add_const(Constant::Func(func_id))?;
                    ModuleEntry::Source {
                        slot,
                        func_const,
                        param_count,
                    }
                }
                ModuleSource::Value(obj) => {
                    let constant = self
                        .constant_from_object(obj)
                        .ok_or_else(|| CompileError::new(pos, format!("module '{resolved}' value is not representable")))?;
                    let slot = self.next_module_slot(pos)?;
                    let value_const = self.add_const(constant)?;
                    ModuleEntry::Value { slot, value_const }
                }
            };
            self.module_map.insert(resolved.clone(), entry);
        }

        let entry = self.module_map[&resolved];
        let name_const = self.str_const(&resolved)?;
        match entry {
            ModuleEntry::Source {
                slot,
                func_const,
                param_count,
            } => {
                self.b().emit2(Opcode::LoadModule, name_const, slot);
                let done = self.b().emit_jump(Opcode::JumpNotNil);
                self.b().emit1(Opcode::Constant, func_const);
                for _ in 0..param_count {
                    self.b().emit0(Opcode::Nil);
                }
                self.b().emit2(Opcode::Call, param_count, 0);
                self.b().emit1(Opcode::StoreModule, slot);
                self.b().patch_here(done, pos)?;
            }
            ModuleEntry::Value { slot, value_const } => {
                self.b().emit2(Opcode::LoadModule, name_const, slot);
                let done = self.b().emit_jump(Opcode::JumpNotNil);
                self.b().emit1(Opcode::Constant, value_const);
                self.b().emit1(Opcode::StoreModule, slot);
                self.b().patch_here(done, pos)?;
            }
        }
        Ok(())
    }

    fn next_module_slot(&mut self, pos: Pos) -> CompileResult<u16> {
        let slot = self.module_slots;
        self.module_slots = self
            .module_slots
            .checked_add(1)
            .ok_or_else(|| CompileError::new(pos, "too many modules"))?;
        Ok(slot)
    }

    fn constant_from_object(&mut self, obj: Object) -> Option<Constant> {
        Some(match obj {
            Object::Nil => Constant::Nil,
            Object::Bool(b) => Constant::Bool(b),
            Object::Flag(_) => return None,
            Object::Int(n) => Constant::Int(n),
            Object::Uint(n) => Constant::Uint(n),
            Object::Float(f) => Constant::Float(f),
            Object::Char(c) => Constant::Char(c),
            Object::Str(s) => Constant::Str(self.intern(&s)),
            Object::Bytes(b) => Constant::Bytes(b),
            Object::Decimal(s) => Constant::Decimal(Decimal::parse(&s)?),
            Object::Array(items) => {
                let converted: Option<Vec<Constant>> =
                    items.into_iter().map(|o| self.constant_from_object(o)).collect();
                Constant::Array(converted?)
            }
            Object::Dict(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    out.push((k, self.constant_from_object(v)?));
                }
                Constant::Dict(out)
            }
            Object::KeyValue(..) | Object::KeyValueArray(_) | Object::Error { .. } | Object::Opaque(_) => return None,
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(super) fn compile_expr(&mut self, e: &ExprLoc) -> CompileResult<()> {
        match &e.expr {
            Expr::Nil => self.b().emit0(Opcode::Nil),
            Expr::True => self.b().emit0(Opcode::True),
            Expr::False => self.b().emit0(Opcode::False),
            Expr::Yes => self.b().emit0(Opcode::Yes),
            Expr::No => self.b().emit0(Opcode::No),
            Expr::Int(n) => {
                let c = self.add_const(Constant::Int(*n))?;
                self.b().emit1(Opcode::Constant, c);
            }
            Expr::Uint(n) => {
                let c = self.add_const(Constant::Uint(*n))?;
                self.b().emit1(Opcode::Constant, c);
            }
            Expr::Float(f) => {
                let c = self.add_const(Constant::Float(*f))?;
                self.b().emit1(Opcode::Constant, c);
            }
            Expr::Decimal(s) => {
                let d = Decimal::parse(s).ok_or_else(|| CompileError::new(e.pos, format!("invalid decimal literal: {s}")))?;
                let c = self.add_const(Constant::Decimal(d))?;
                self.b().emit1(Opcode::Constant, c);
            }
            Expr::Char(c) => {
                let idx = self.add_const(Constant::Char(*c))?;
                self.b().emit1(Opcode::Constant, idx);
            }
            Expr::Str(s) => self.emit_str_const(s)?,
            Expr::RawStr(s) => {
                let id = self.intern(s);
                let c = self.add_const(Constant::RawStr(id))?;
                self.b().emit1(Opcode::Constant, c);
            }
            Expr::Ident(name) => self.compile_ident(name, e.pos)?,
            Expr::Array(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                let n = u16::try_from(items.len()).map_err(|_| CompileError::new(e.pos, "array literal too large"))?;
                self.b().emit1(Opcode::Array, n);
            }
            Expr::Dict(entries) => {
                for (k, v) in entries {
                    self.emit_str_const(k)?;
                    self.compile_expr(v)?;
                }
                let n = u16::try_from(entries.len()).map_err(|_| CompileError::new(e.pos, "dict literal too large"))?;
                self.b().emit1(Opcode::Map, n);
            }
            Expr::Func(lit) => self.compile_func_lit(lit, false)?,
            Expr::Unary { op, operand } => {
                // Trivial constant folding of negated numeric literals.
                if *op == crate::token::UnaryOp::Neg {
                    match &operand.expr {
                        Expr::Int(n) => {
                            let c = self.add_const(Constant::Int(n.wrapping_neg()))?;
                            self.b().emit1(Opcode::Constant, c);
                            return Ok(());
                        }
                        Expr::Float(f) => {
                            let c = self.add_const(Constant::Float(-f))?;
                            self.b().emit1(Opcode::Constant, c);
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                self.compile_expr(operand)?;
                self.b().emit1(Opcode::UnaryOp, u16::from(*op as u8));
            }
            Expr::Binary { op, left, right } => self.compile_binary(*op, left, right, e.pos)?,
            Expr::Ternary { cond, then, otherwise } => {
                self.compile_expr(cond)?;
                let else_jump = self.b().emit_jump(Opcode::JumpFalsy);
                self.compile_expr(then)?;
                let end_jump = self.b().emit_jump(Opcode::Jump);
                self.b().patch_here(else_jump, e.pos)?;
                self.compile_expr(otherwise)?;
                self.b().patch_here(end_jump, e.pos)?;
            }
            Expr::Index { .. } | Expr::Selector { .. } => self.compile_index_chain(e)?,
            Expr::Slice { target, low, high } => {
                self.compile_expr(target)?;
                match low {
                    Some(low) => self.compile_expr(low)?,
                    None => self.b().emit0(Opcode::Nil),
                }
                match high {
                    Some(high) => self.compile_expr(high)?,
                    None => self.b().emit0(Opcode::Nil),
                }
                self.b().emit0(Opcode::SliceIndex);
            }
            Expr::Call(call) => self.compile_call(call, e.pos)?,
            Expr::Pipe { left, right } => self.compile_pipe(left, right, e.pos)?,
            Expr::Import(name) => self.compile_import(name, e.pos)?,
        }
        Ok(())
    }

    fn compile_ident(&mut self, name: &str, pos: Pos) -> CompileResult<()> {
        match self.resolve_ident(name) {
            Some(sym) => self.load_symbol(sym),
            None => {
                // `iota` resolves to the per-declaration counter inside a
                // const declaration.
                if name == "iota"
                    && let Some(n) = self.iota
                {
                    let c = self.add_const(Constant::Int(n))?;
                    self.b().emit1(Opcode::Constant, c);
                    return Ok(());
                }
                Err(CompileError::new(pos, format!("unresolved reference '{name}'")))
            }
        }
    }

    fn compile_binary(&mut self, op: BinTok, left: &ExprLoc, right: &ExprLoc, pos: Pos) -> CompileResult<()> {
        match op {
            BinTok::And => {
                self.compile_expr(left)?;
                let end = self.b().emit_jump(Opcode::AndJump);
                self.compile_expr(right)?;
                self.b().patch_here(end, pos)?;
            }
            BinTok::Or => {
                self.compile_expr(left)?;
                let end = self.b().emit_jump(Opcode::OrJump);
                self.compile_expr(right)?;
                self.b().patch_here(end, pos)?;
            }
            BinTok::NilCoalesce => {
                self.compile_expr(left)?;
                let end = self.b().emit_jump(Opcode::JumpNotNil);
                self.compile_expr(right)?;
                self.b().patch_here(end, pos)?;
            }
            BinTok::Eq | BinTok::NotEq => {
                let eq = op == BinTok::Eq;
                // `x == nil` and friends lower to dedicated nil tests.
                if matches!(right.expr, Expr::Nil) {
                    self.compile_expr(left)?;
                    self.b().emit0(if eq { Opcode::IsNil } else { Opcode::NotIsNil });
                } else if matches!(left.expr, Expr::Nil) {
                    self.compile_expr(right)?;
                    self.b().emit0(if eq { Opcode::IsNil } else { Opcode::NotIsNil });
                } else {
                    self.compile_expr(left)?;
                    self.compile_expr(right)?;
                    self.b().emit0(if eq { Opcode::Equal } else { Opcode::NotEqual });
                }
            }
            BinTok::Op(tok) => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.b().emit1(Opcode::BinaryOp, u16::from(tok as u8));
            }
        }
        Ok(())
    }

    /// Collapses a selector/index chain into a single multi-index get.
    fn compile_index_chain(&mut self, e: &ExprLoc) -> CompileResult<()> {
        enum Seg<'a> {
            Index(&'a ExprLoc),
            Name(&'a str),
        }
        let mut segments = Vec::new();
        let mut cursor = e;
        loop {
            match &cursor.expr {
                Expr::Index { target, index } => {
                    segments.push(Seg::Index(index));
                    cursor = target;
                }
                Expr::Selector { target, name } => {
                    segments.push(Seg::Name(name));
                    cursor = target;
                }
                _ => break,
            }
        }
        self.compile_expr(cursor)?;
        segments.reverse();
        let n = u16::try_from(segments.len()).map_err(|_| CompileError::new(e.pos, "selector chain too long"))?;
        for seg in segments {
            match seg {
                Seg::Index(ix) => self.compile_expr(ix)?,
                Seg::Name(name) => self.emit_str_const(name)?,
            }
        }
        self.b().emit1(Opcode::GetIndex, n);
        Ok(())
    }

    fn compile_call(&mut self, call: &CallExpr, pos: Pos) -> CompileResult<()> {
        // Selector calls keep the receiver on the stack and dispatch by
        // name through CallName.
        let selector_name = match &call.callee.expr {
            Expr::Selector { target, name } => {
                self.compile_expr(target)?;
                Some(name.clone())
            }
            _ => {
                self.compile_expr(&call.callee)?;
                None
            }
        };

        for arg in &call.args {
            self.compile_expr(arg)?;
        }
        let mut flags = 0u16;
        if let Some(splat) = &call.var_arg {
            self.compile_expr(splat)?;
            flags |= call_flags::VAR_ARGS;
        }
        if !call.named.is_empty() {
            for na in &call.named {
                self.emit_str_const(&na.name)?;
                match &na.value {
                    Some(v) => self.compile_expr(v)?,
                    None => self.b().emit0(Opcode::Yes),
                }
                self.b().emit1(Opcode::Array, 2);
            }
            let n = u16::try_from(call.named.len()).map_err(|_| CompileError::new(pos, "too many named arguments"))?;
            self.b().emit1(Opcode::Array, n);
            flags |= call_flags::NAMED_ARGS;
        }
        if let Some(splat) = &call.var_named {
            self.compile_expr(splat)?;
            flags |= call_flags::VAR_NAMED_ARGS;
        }

        let n = u16::try_from(call.args.len()).map_err(|_| CompileError::new(pos, "too many arguments"))?;
        match selector_name {
            Some(name) => {
                self.emit_str_const(&name)?;
                self.b().emit2(Opcode::CallName, n, flags);
            }
            None => self.b().emit2(Opcode::Call, n, flags),
        }
        Ok(())
    }

    /// Pipe rewriting: `x | f(a)` becomes `f(x, a)`, `x | f` becomes
    /// `f(x)`; anything else is the bitwise-or operator.
    fn compile_pipe(&mut self, left: &ExprLoc, right: &ExprLoc, pos: Pos) -> CompileResult<()> {
        match &right.expr {
            Expr::Call(call) => {
                let mut rewritten = (**call).clone();
                rewritten.args.insert(0, left.clone());
                self.compile_call(&rewritten, pos)
            }
            Expr::Ident(_) | Expr::Selector { .. } => {
                let rewritten = CallExpr {
                    callee: right.clone(),
                    args: vec![left.clone()],
                    var_arg: None,
                    named: Vec::new(),
                    var_named: None,
                };
                self.compile_call(&rewritten, pos)
            }
            _ => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.b()
                    .emit1(Opcode::BinaryOp, u16::from(crate::token::BinOp::BitOr as u8));
                Ok(())
            }
        }
    }
}
