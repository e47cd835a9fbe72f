//! The bytecode virtual machine.
//!
//! Stack-based execution: a value stack shared by locals and operands, a
//! frame stack, and a per-frame try-handler stack. The dispatch loop
//! observes the runtime's abort flag on every instruction boundary.

pub(crate) mod binary;
pub(crate) mod call;
pub(crate) mod index;

use std::sync::{Arc, atomic::Ordering};

use crate::{
    args::{Args, NamedArgs},
    builtins::Builtin,
    bytecode::{Bytecode, Constant, FuncId, Opcode},
    error::{ErrorKind, RunError, RunResult},
    heap::{HeapData, HeapId},
    run::Rt,
    token::{BinOp, UnaryOp},
    types::{Dict, KeyValue, KeyValueArray, RillIter},
    types::iter::{IterStep, advance_on_heap},
    value::{Value, key_string},
};

/// A try/catch/finally control record.
#[derive(Debug)]
pub(crate) struct Handler {
    catch_pos: u16,
    finally_pos: u16,
    /// Value-stack snapshot taken at `SetupTry`.
    sp: usize,
    state: HandlerState,
    resume: Option<Resume>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerState {
    Body,
    Catch,
    Finally,
}

/// What the implicit `Throw 0` at the construct tail should do after the
/// finally block ran.
#[derive(Debug)]
enum Resume {
    /// Re-execute the `Finalizer` that routed control here.
    At(u16),
    /// Continue propagating an in-flight error.
    Error(RunError),
}

/// One active function invocation.
#[derive(Debug)]
pub(crate) struct Frame {
    func: FuncId,
    /// Closure providing free-variable cells, when the callee captured any.
    closure: Option<HeapId>,
    /// Base pointer: local slot zero's index into the value stack.
    bp: usize,
    ip: usize,
    handlers: Vec<Handler>,
}

/// Flow control out of one instruction.
enum Flow {
    Normal,
    Returned(Value),
}

/// The virtual machine.
#[derive(Debug)]
pub(crate) struct Vm<'rt> {
    pub(crate) rt: &'rt mut Rt,
    program: Arc<Bytecode>,
    pub(crate) stack: Vec<Value>,
    frames: Vec<Frame>,
    /// Error value in flight between a throw and its `SetupCatch`.
    pending_thrown: Option<Value>,
}

impl<'rt> Vm<'rt> {
    /// A VM drawing its buffers from the runtime's pool.
    pub fn new(rt: &'rt mut Rt, program: Arc<Bytecode>) -> Self {
        let (stack, frames) = rt.pool.acquire();
        Self::from_buffers(rt, program, stack, frames)
    }

    pub fn from_buffers(rt: &'rt mut Rt, program: Arc<Bytecode>, stack: Vec<Value>, frames: Vec<Frame>) -> Self {
        Self {
            rt,
            program,
            stack,
            frames,
            pending_thrown: None,
        }
    }

    /// Releases the buffers for pooling.
    pub fn into_buffers(self) -> (Vec<Value>, Vec<Frame>) {
        (self.stack, self.frames)
    }

    /// Runs the program's main function. Top-level `param` declarations are
    /// bound to nil.
    pub fn run_main(&mut self) -> RunResult<Value> {
        let program = Arc::clone(&self.program);
        let required = program.func(program.main).params.required();
        let args = Args::from_vec(vec![Value::Nil; required]);
        self.push_frame(&program, program.main, None, args, NamedArgs::empty())?;
        self.execute()
    }

    /// Runs one compiled function to completion.
    pub fn run_compiled(
        &mut self,
        func: FuncId,
        closure: Option<HeapId>,
        args: Args,
        named: NamedArgs,
    ) -> RunResult<Value> {
        let program = Arc::clone(&self.program);
        self.push_frame(&program, func, closure, args, named)?;
        self.execute()
    }

    // ------------------------------------------------------------------
    // Stack helpers
    // ------------------------------------------------------------------

    pub(crate) fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    pub(crate) fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RunError::new(ErrorKind::Type, "value stack underflow"))
    }

    pub(crate) fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        if self.stack.len() < n {
            return Err(RunError::new(ErrorKind::Type, "value stack underflow"));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    fn peek(&self) -> RunResult<Value> {
        self.stack
            .last()
            .copied()
            .ok_or_else(|| RunError::new(ErrorKind::Type, "value stack underflow"))
    }

    // ------------------------------------------------------------------
    // Frames and calls
    // ------------------------------------------------------------------

    /// Pushes a frame for a compiled function, binding arguments into its
    /// local slots and validating declared parameter types.
    pub(crate) fn push_frame(
        &mut self,
        program: &Arc<Bytecode>,
        func: FuncId,
        closure: Option<HeapId>,
        mut args: Args,
        mut named: NamedArgs,
    ) -> RunResult<()> {
        if self.frames.len() >= self.rt.limits.max_frames {
            return Err(RunError::stack_overflow());
        }
        let f = program.func(func);
        self.rt.tracer.on_call(program.interns.get(f.name));

        let bp = self.stack.len();
        for _ in 0..f.num_locals {
            self.stack.push(Value::Nil);
        }

        // Positional parameters.
        let required = f.params.required();
        let got = args.len();
        if f.params.var {
            if got < required {
                return Err(RunError::wrong_num_args(format!(">={required}"), got));
            }
        } else if got != required {
            return Err(RunError::wrong_num_args(required, got));
        }
        for i in 0..required {
            let v = args.shift().expect("argument count checked");
            let types = &f.params.types[i];
            if !types.is_empty() {
                let tn = v.type_name(&self.rt.heap);
                if !types.iter().any(|&t| program.interns.get(t) == tn.as_ref()) {
                    let expected: Vec<&str> = types.iter().map(|&t| program.interns.get(t)).collect();
                    return Err(RunError::argument_type(i + 1, &expected.join("|"), &tn));
                }
            }
            self.stack[bp + i] = v;
        }
        let mut slot = required;
        if f.params.var {
            let mut rest = Vec::new();
            while let Some(v) = args.shift() {
                rest.push(v);
            }
            self.stack[bp + slot] = Value::Ref(self.rt.heap.alloc(HeapData::Array(rest)));
            slot += 1;
        }

        // Named parameters: absent slots hold the undefined sentinel so the
        // compiled default prelude can materialise defaults.
        for i in 0..f.named_params.names.len() {
            let name = program.interns.get(f.named_params.names[i]).to_owned();
            let v = named.get_value(&name, &self.rt.heap, &program.interns);
            self.stack[bp + slot + i] = v.unwrap_or(Value::Undefined);
        }
        let named_base = slot + f.named_params.names.len();
        let leftovers = named.unread_pairs(&self.rt.heap, &program.interns);
        if f.named_params.var {
            let rest = NamedArgs::from_pairs(leftovers);
            self.stack[bp + named_base] = Value::Ref(self.rt.heap.alloc(HeapData::NamedArgs(rest)));
        } else if let Some(kv) = leftovers.first() {
            let key = key_string(&kv.key, &self.rt.heap, &program.interns).unwrap_or_default();
            return Err(RunError::unexpected_named_arg(&key));
        }

        self.frames.push(Frame {
            func,
            closure,
            bp,
            ip: 0,
            handlers: Vec::new(),
        });
        Ok(())
    }

    fn free_cell(&self, index: usize) -> RunResult<HeapId> {
        let frame = self.frames.last().ok_or_else(|| RunError::new(ErrorKind::Type, "no active frame"))?;
        let closure = frame
            .closure
            .ok_or_else(|| RunError::new(ErrorKind::Type, "free variable access outside a closure"))?;
        match self.rt.heap.get(closure) {
            HeapData::Closure(c) => c
                .free
                .get(index)
                .copied()
                .ok_or_else(|| RunError::new(ErrorKind::Type, "free variable index out of range")),
            _ => Err(RunError::new(ErrorKind::Type, "frame closure is not a closure")),
        }
    }

    // ------------------------------------------------------------------
    // Error routing
    // ------------------------------------------------------------------

    /// Routes an error through the nearest handler: catch if unpopped, then
    /// finally; otherwise unwinds frames. Returns the error when nothing
    /// catches it.
    fn throw(&mut self, err: RunError) -> RunResult<()> {
        self.rt.tracer.on_throw(&err);
        let mut err = err;
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Err(err);
            };
            loop {
                let Some(h) = frame.handlers.last_mut() else {
                    break;
                };
                if h.state == HandlerState::Body && h.catch_pos != 0 {
                    h.state = HandlerState::Catch;
                    let sp = h.sp;
                    frame.ip = h.catch_pos as usize;
                    self.stack.truncate(sp);
                    let ev = self.rt.error_to_value(&err);
                    self.pending_thrown = Some(ev);
                    return Ok(());
                }
                if h.state != HandlerState::Finally && h.finally_pos != 0 {
                    h.state = HandlerState::Finally;
                    h.resume = Some(Resume::Error(err));
                    let sp = h.sp;
                    frame.ip = h.finally_pos as usize;
                    self.stack.truncate(sp);
                    return Ok(());
                }
                frame.handlers.pop();
            }
            // No handler in this frame: unwind into the caller.
            let frame = self.frames.pop().expect("frame checked above");
            self.stack.truncate(frame.bp);
            if self.frames.is_empty() {
                return Err(err);
            }
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn execute(&mut self) -> RunResult<Value> {
        let program = Arc::clone(&self.program);
        loop {
            if self.rt.abort.load(Ordering::Relaxed) {
                // A cancelled VM leaks no frames.
                self.frames.clear();
                self.stack.clear();
                return Err(RunError::aborted());
            }
            if self.stack.len() > self.rt.limits.max_stack {
                self.throw(RunError::stack_overflow())?;
                continue;
            }

            let (op, a, b, ip) = {
                let frame = self.frames.last_mut().expect("dispatch with no frames");
                let code = &program.func(frame.func).instructions;
                let ip = frame.ip;
                let op = Opcode::from_repr(code[ip]).expect("invalid opcode in bytecode");
                frame.ip += 1;
                let mut operands = [0u16; 2];
                for slot in operands.iter_mut().take(op.operand_count()) {
                    *slot = u16::from_le_bytes([code[frame.ip], code[frame.ip + 1]]);
                    frame.ip += 2;
                }
                (op, operands[0], operands[1], ip)
            };
            self.rt.tracer.on_instruction(ip, op.into());

            match self.exec_op(&program, op, a, b) {
                Ok(Flow::Normal) => {}
                Ok(Flow::Returned(v)) => return Ok(v),
                Err(err) => self.throw(err)?,
            }
        }
    }

    fn exec_op(&mut self, program: &Arc<Bytecode>, op: Opcode, a: u16, b: u16) -> RunResult<Flow> {
        match op {
            Opcode::Nop => {}
            Opcode::Pop => {
                self.pop()?;
            }

            Opcode::Constant => {
                let v = self.materialize(&program.constants[a as usize]);
                self.push(v);
            }
            Opcode::Nil => self.push(Value::Nil),
            Opcode::True => self.push(Value::Bool(true)),
            Opcode::False => self.push(Value::Bool(false)),
            Opcode::Yes => self.push(Value::Flag(true)),
            Opcode::No => self.push(Value::Flag(false)),

            Opcode::GetLocal => {
                let bp = self.frames.last().expect("frame").bp;
                let v = self.stack[bp + a as usize];
                let v = self.deref_cell(v);
                self.push(v);
            }
            Opcode::SetLocal => {
                let v = self.pop()?;
                let bp = self.frames.last().expect("frame").bp;
                let slot = self.stack[bp + a as usize];
                if let Value::Ref(id) = slot
                    && matches!(self.rt.heap.get(id), HeapData::Cell(_))
                {
                    *self.rt.heap.get_mut(id) = HeapData::Cell(v);
                } else {
                    self.stack[bp + a as usize] = v;
                }
            }
            Opcode::DefineLocal => {
                let v = self.pop()?;
                let bp = self.frames.last().expect("frame").bp;
                self.stack[bp + a as usize] = v;
            }
            Opcode::GetLocalPtr => {
                let bp = self.frames.last().expect("frame").bp;
                let slot = self.stack[bp + a as usize];
                let cell = if let Value::Ref(id) = slot
                    && matches!(self.rt.heap.get(id), HeapData::Cell(_))
                {
                    id
                } else {
                    let id = self.rt.heap.alloc(HeapData::Cell(slot));
                    self.stack[bp + a as usize] = Value::Ref(id);
                    id
                };
                self.push(Value::Ref(cell));
            }

            Opcode::GetFree => {
                let cell = self.free_cell(a as usize)?;
                let v = match self.rt.heap.get(cell) {
                    HeapData::Cell(v) => *v,
                    _ => Value::Nil,
                };
                self.push(v);
            }
            Opcode::SetFree => {
                let v = self.pop()?;
                let cell = self.free_cell(a as usize)?;
                *self.rt.heap.get_mut(cell) = HeapData::Cell(v);
            }
            Opcode::GetFreePtr => {
                let cell = self.free_cell(a as usize)?;
                self.push(Value::Ref(cell));
            }

            Opcode::GetGlobal => {
                let name = self.constant_name(program, a)?;
                let v = self.rt.globals.get(&name).unwrap_or(Value::Nil);
                self.push(v);
            }
            Opcode::SetGlobal => {
                let v = self.pop()?;
                let name = self.constant_name(program, a)?;
                self.rt.globals.set(name, v);
            }

            Opcode::GetBuiltin => {
                let builtin = Builtin::from_repr(u8::try_from(a).unwrap_or(u8::MAX))
                    .ok_or_else(|| RunError::new(ErrorKind::Type, "invalid builtin index"))?;
                self.push(Value::Builtin(builtin));
            }

            Opcode::Call => call::exec_call(self, program, a, b, false)?,
            Opcode::CallName => call::exec_call(self, program, a, b, true)?,

            Opcode::Return => {
                let result = if a == 1 { self.pop()? } else { Value::Nil };
                let frame = self.frames.pop().expect("return with no frame");
                self.stack.truncate(frame.bp);
                if self.frames.is_empty() {
                    return Ok(Flow::Returned(result));
                }
                self.push(result);
            }

            Opcode::Jump => self.jump(a),
            Opcode::JumpFalsy => {
                let v = self.pop()?;
                if v.is_falsy(&self.rt.heap, self.rt.interns()) {
                    self.jump(a);
                }
            }
            Opcode::AndJump => {
                let v = self.peek()?;
                if v.is_falsy(&self.rt.heap, self.rt.interns()) {
                    self.jump(a);
                } else {
                    self.pop()?;
                }
            }
            Opcode::OrJump => {
                let v = self.peek()?;
                if v.is_falsy(&self.rt.heap, self.rt.interns()) {
                    self.pop()?;
                } else {
                    self.jump(a);
                }
            }
            Opcode::JumpNil => {
                let v = self.peek()?;
                if v.is_nil() {
                    self.jump(a);
                } else {
                    self.pop()?;
                }
            }
            Opcode::JumpNotNil => {
                let v = self.peek()?;
                if v.is_nil() {
                    self.pop()?;
                } else {
                    self.jump(a);
                }
            }
            Opcode::JumpNotUndefined => {
                let v = self.pop()?;
                if !matches!(v, Value::Undefined) {
                    self.jump(a);
                }
            }

            Opcode::BinaryOp => {
                let tok = BinOp::from_repr(u8::try_from(a).unwrap_or(u8::MAX))
                    .ok_or_else(|| RunError::new(ErrorKind::Type, "invalid operator token"))?;
                let right = self.pop()?;
                let left = self.pop()?;
                let v = binary::binary_op(self.rt, tok, left, right)?;
                self.push(v);
            }
            Opcode::UnaryOp => {
                let tok = UnaryOp::from_repr(u8::try_from(a).unwrap_or(u8::MAX))
                    .ok_or_else(|| RunError::new(ErrorKind::Type, "invalid operator token"))?;
                let operand = self.pop()?;
                let v = binary::unary_op(self.rt, tok, operand)?;
                self.push(v);
            }
            Opcode::Equal => {
                let right = self.pop()?;
                let left = self.pop()?;
                let eq = binary::equal(self.rt, &left, &right);
                self.push(Value::Bool(eq));
            }
            Opcode::NotEqual => {
                let right = self.pop()?;
                let left = self.pop()?;
                let eq = binary::equal(self.rt, &left, &right);
                self.push(Value::Bool(!eq));
            }
            Opcode::IsNil => {
                let v = self.pop()?;
                self.push(Value::Bool(v.is_nil()));
            }
            Opcode::NotIsNil => {
                let v = self.pop()?;
                self.push(Value::Bool(!v.is_nil()));
            }

            Opcode::GetIndex => {
                let indices = self.pop_n(a as usize)?;
                let mut target = self.pop()?;
                for index in indices {
                    target = index::index_get(self.rt, target, index)?;
                }
                self.push(target);
            }
            Opcode::SetIndex => {
                let value = self.pop()?;
                let index = self.pop()?;
                let target = self.pop()?;
                index::index_set(self.rt, target, index, value)?;
            }
            Opcode::SliceIndex => {
                let high = self.pop()?;
                let low = self.pop()?;
                let target = self.pop()?;
                let v = index::slice_index(self.rt, target, low, high)?;
                self.push(v);
            }

            Opcode::Array => {
                let items = self.pop_n(a as usize)?;
                let v = Value::Ref(self.rt.heap.alloc(HeapData::Array(items)));
                self.push(v);
            }
            Opcode::Map => {
                let items = self.pop_n(2 * a as usize)?;
                let mut d = Dict::with_capacity(a as usize);
                for pair in items.chunks_exact(2) {
                    let key = key_string(&pair[0], &self.rt.heap, self.rt.interns())
                        .ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid dict key"))?;
                    d.set(key, pair[1]);
                }
                let v = Value::Ref(self.rt.heap.alloc(HeapData::Dict(d)));
                self.push(v);
            }
            Opcode::KeyValue => {
                let (key, value) = if a == 1 {
                    (self.pop()?, Value::Flag(true))
                } else {
                    let value = self.pop()?;
                    (self.pop()?, value)
                };
                let v = Value::Ref(self.rt.heap.alloc(HeapData::KeyValue(KeyValue::new(key, value))));
                self.push(v);
            }
            Opcode::KeyValueArray => {
                let items = self.pop_n(a as usize)?;
                let mut pairs = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Ref(id) => match self.rt.heap.get(id) {
                            HeapData::KeyValue(kv) => pairs.push(*kv),
                            _ => return Err(RunError::new(ErrorKind::Type, "key-value array element is not a pair")),
                        },
                        _ => return Err(RunError::new(ErrorKind::Type, "key-value array element is not a pair")),
                    }
                }
                let v = Value::Ref(self.rt.heap.alloc(HeapData::KeyValueArray(KeyValueArray::new(pairs))));
                self.push(v);
            }

            Opcode::IterInit => {
                let v = self.pop()?;
                let iter_value = if let Value::Ref(id) = v
                    && matches!(self.rt.heap.get(id), HeapData::Iter(_))
                {
                    v
                } else {
                    let iter = RillIter::over(v, &self.rt.heap, self.rt.interns(), false)?;
                    Value::Ref(self.rt.heap.alloc(HeapData::Iter(iter)))
                };
                self.push(iter_value);
            }
            Opcode::IterNext => {
                let id = self.pop_iter()?;
                let step = advance_on_heap(self.rt, id)?;
                self.push(Value::Bool(matches!(step, IterStep::Entry { .. })));
            }
            Opcode::IterNextElse => {
                let id = self.pop_iter()?;
                let step = advance_on_heap(self.rt, id)?;
                match step {
                    IterStep::Entry { .. } => self.jump(a),
                    IterStep::Done => self.jump(b),
                }
            }
            Opcode::IterKey => {
                let id = self.pop_iter()?;
                let v = match self.rt.heap.get(id) {
                    HeapData::Iter(it) => it.cur_key,
                    _ => Value::Nil,
                };
                self.push(v);
            }
            Opcode::IterValue => {
                let id = self.pop_iter()?;
                let v = match self.rt.heap.get(id) {
                    HeapData::Iter(it) => it.cur_value,
                    _ => Value::Nil,
                };
                self.push(v);
            }

            Opcode::SetupTry => {
                let sp = self.stack.len();
                let frame = self.frames.last_mut().expect("frame");
                frame.handlers.push(Handler {
                    catch_pos: a,
                    finally_pos: b,
                    sp,
                    state: HandlerState::Body,
                    resume: None,
                });
            }
            Opcode::SetupCatch => {
                let v = self.pending_thrown.take().unwrap_or(Value::Nil);
                self.push(v);
            }
            Opcode::SetupFinally => {
                let frame = self.frames.last_mut().expect("frame");
                if let Some(h) = frame.handlers.last_mut()
                    && h.state != HandlerState::Finally
                {
                    h.state = HandlerState::Finally;
                }
            }
            Opcode::Throw => {
                if a == 1 {
                    let v = self.pop()?;
                    return Err(self.rt.error_from_value(v));
                }
                // Implicit re-throw at the construct tail.
                let frame = self.frames.last_mut().expect("frame");
                if let Some(h) = frame.handlers.pop() {
                    match h.resume {
                        Some(Resume::Error(err)) => return Err(err),
                        Some(Resume::At(ip)) => frame.ip = ip as usize,
                        None => {}
                    }
                }
            }
            Opcode::Finalizer => {
                // The operand is the handler depth to keep. The instruction
                // re-executes after each finally block it triggers.
                let depth = a as usize;
                let frame = self.frames.last_mut().expect("frame");
                let finalizer_ip = frame.ip - 3;
                while frame.handlers.len() > depth {
                    let idx = frame.handlers.len() - 1;
                    let needs_finally =
                        frame.handlers[idx].finally_pos != 0 && frame.handlers[idx].state != HandlerState::Finally;
                    if needs_finally {
                        let h = &mut frame.handlers[idx];
                        h.state = HandlerState::Finally;
                        h.resume = Some(Resume::At(u16::try_from(finalizer_ip).unwrap_or(u16::MAX)));
                        let sp = h.sp;
                        frame.ip = h.finally_pos as usize;
                        self.stack.truncate(sp);
                        break;
                    }
                    frame.handlers.pop();
                }
            }

            Opcode::LoadModule => {
                let v = self.rt.module_cache.get(b as usize).copied().flatten().unwrap_or(Value::Nil);
                self.push(v);
            }
            Opcode::StoreModule => {
                let v = self.peek()?;
                if let Some(slot) = self.rt.module_cache.get_mut(a as usize) {
                    *slot = Some(v);
                }
            }

            Opcode::Closure => {
                let cells = self.pop_n(b as usize)?;
                let mut free = Vec::with_capacity(cells.len());
                for cell in cells {
                    match cell {
                        Value::Ref(id) if matches!(self.rt.heap.get(id), HeapData::Cell(_)) => free.push(id),
                        _ => return Err(RunError::new(ErrorKind::Type, "closure capture is not a cell")),
                    }
                }
                let Constant::Func(func) = program.constants[a as usize] else {
                    return Err(RunError::new(ErrorKind::Type, "closure constant is not a function"));
                };
                let v = Value::Ref(self.rt.heap.alloc(HeapData::Closure(crate::heap::Closure { func, free })));
                self.push(v);
            }
        }
        Ok(Flow::Normal)
    }

    fn jump(&mut self, target: u16) {
        self.frames.last_mut().expect("frame").ip = target as usize;
    }

    fn deref_cell(&self, v: Value) -> Value {
        if let Value::Ref(id) = v
            && let HeapData::Cell(inner) = self.rt.heap.get(id)
        {
            return *inner;
        }
        v
    }

    fn pop_iter(&mut self) -> RunResult<HeapId> {
        let v = self.pop()?;
        match v {
            Value::Ref(id) if matches!(self.rt.heap.get(id), HeapData::Iter(_)) => Ok(id),
            _ => Err(RunError::new(ErrorKind::Type, "expected an iterator")),
        }
    }

    fn constant_name(&self, program: &Arc<Bytecode>, index: u16) -> RunResult<String> {
        match &program.constants[index as usize] {
            Constant::Str(id) => Ok(program.interns.get(*id).to_owned()),
            _ => Err(RunError::new(ErrorKind::Type, "name constant is not a string")),
        }
    }

    fn materialize(&mut self, c: &Constant) -> Value {
        match c {
            Constant::Nil => Value::Nil,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(n) => Value::Int(*n),
            Constant::Uint(n) => Value::Uint(*n),
            Constant::Float(f) => Value::Float(*f),
            Constant::Char(c) => Value::Char(*c),
            Constant::Str(id) => Value::Str(*id),
            Constant::RawStr(id) => {
                let s = self.program.interns.get(*id).to_owned();
                Value::Ref(self.rt.heap.alloc(HeapData::RawStr(s)))
            }
            Constant::Decimal(d) => Value::Ref(self.rt.heap.alloc(HeapData::Decimal(d.clone()))),
            Constant::Func(f) => Value::Func(*f),
            Constant::Bytes(b) => Value::Ref(self.rt.heap.alloc(HeapData::Bytes(b.clone()))),
            Constant::Array(items) => {
                let values: Vec<Value> = items.iter().map(|c| self.materialize(c)).collect();
                Value::Ref(self.rt.heap.alloc(HeapData::Array(values)))
            }
            Constant::Dict(entries) => {
                let mut d = Dict::with_capacity(entries.len());
                for (k, c) in entries {
                    let v = self.materialize(c);
                    d.set(k.clone(), v);
                }
                Value::Ref(self.rt.heap.alloc(HeapData::Dict(d)))
            }
        }
    }
}
