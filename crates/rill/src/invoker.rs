//! The single entry point for calling any callable from host or builtin
//! code.
//!
//! Compiled functions run on a child VM drawn from the runtime's pool so
//! repeated invocations avoid re-allocation; non-compiled callers dispatch
//! directly. `Invoker` is the incremental caller form: it resolves the
//! callee once and is invoked repeatedly.

use crate::{
    args::{Args, NamedArgs},
    error::RunResult,
    heap::HeapData,
    run::Rt,
    value::Value,
    vm::{
        Frame, Vm,
        call::{self, Resolved},
    },
};

/// Pool of reusable VM buffers.
#[derive(Debug, Default)]
pub(crate) struct VmPool {
    buffers: Vec<(Vec<Value>, Vec<Frame>)>,
}

impl VmPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a buffer pair, or fresh ones when the pool is empty.
    pub fn acquire(&mut self) -> (Vec<Value>, Vec<Frame>) {
        self.buffers.pop().unwrap_or_default()
    }

    /// Returns cleared buffers to the pool, keeping at most `max`.
    pub fn release(&mut self, mut stack: Vec<Value>, mut frames: Vec<Frame>, max: usize) {
        if self.buffers.len() >= max {
            return;
        }
        stack.clear();
        frames.clear();
        self.buffers.push((stack, frames));
    }
}

/// Blocking invocation of any callable.
pub(crate) fn invoke(rt: &mut Rt, callee: Value, args: Args, named: NamedArgs) -> RunResult<Value> {
    let resolved = call::resolve(rt, callee, &args)?;
    invoke_resolved(rt, resolved, args, named)
}

/// Invocation of an already-resolved callable.
pub(crate) fn invoke_resolved(rt: &mut Rt, resolved: Resolved, args: Args, named: NamedArgs) -> RunResult<Value> {
    match resolved {
        Resolved::Compiled { func, closure } => {
            let program = rt.program();
            let (stack, frames) = rt.pool.acquire();
            let mut vm = Vm::from_buffers(rt, program, stack, frames);
            let result = vm.run_compiled(func, closure, args, named);
            let (stack, frames) = vm.into_buffers();
            let max = rt.limits.max_pooled_vms;
            rt.pool.release(stack, frames, max);
            result
        }
        other => call::call_direct(rt, other, args, named),
    }
}

/// Positional-only convenience used by iterator adapters and builtins.
pub(crate) fn invoke_values(rt: &mut Rt, callee: Value, values: Vec<Value>) -> RunResult<Value> {
    invoke(rt, callee, Args::from_vec(values), NamedArgs::empty())
}

/// Incremental caller form: resolves the callee once and can be invoked
/// repeatedly. Method callers dispatch on the actual argument types, so
/// only they resolve per call.
#[derive(Debug)]
pub(crate) struct Invoker<'rt> {
    rt: &'rt mut Rt,
    callee: Value,
    /// Resolution cached when it cannot depend on call arguments.
    cached: Option<Resolved>,
}

impl<'rt> Invoker<'rt> {
    pub fn new(rt: &'rt mut Rt, callee: Value) -> Self {
        let static_shape = match callee {
            Value::Func(_) | Value::Builtin(_) => true,
            Value::Ref(id) => matches!(
                rt.heap.get(id),
                HeapData::Closure(_) | HeapData::BoundMethod(_) | HeapData::ObjectType(_)
            ),
            _ => false,
        };
        let cached = if static_shape {
            call::resolve(rt, callee, &Args::new()).ok()
        } else {
            None
        };
        Self { rt, callee, cached }
    }

    /// The runtime, for inspecting results between invocations.
    pub fn rt(&self) -> &Rt {
        self.rt
    }

    pub fn invoke(&mut self, args: Args, named: NamedArgs) -> RunResult<Value> {
        match &self.cached {
            Some(resolved) => invoke_resolved(self.rt, resolved.clone(), args, named),
            None => invoke(self.rt, self.callee, args, named),
        }
    }

    pub fn invoke_values(&mut self, values: Vec<Value>) -> RunResult<Value> {
        self.invoke(Args::from_vec(values), NamedArgs::empty())
    }
}
