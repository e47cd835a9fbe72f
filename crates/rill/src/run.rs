//! The runtime: shared execution state and the public `Runtime` API.
//!
//! `Rt` is the state every VM of a runtime executes against: the heap, the
//! globals dictionary, the module cache, the I/O stacks, the abort flag,
//! limits, the child-VM pool and the loaded program. `Runtime` wraps it
//! with the host-facing compile/run surface.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    bytecode::Bytecode,
    compiler,
    error::{CompileError, Error, RunError},
    heap::{ErrorValue, Heap, HeapData},
    intern::Interns,
    invoker::VmPool,
    io::{InSource, IoStacks, OutSink},
    modules::{Importer, NoImporter},
    object::Object,
    printer,
    resource::Limits,
    tracer::{NoopTracer, VmTracer},
    types::Dict,
    value::Value,
    vm::Vm,
};

/// Shared runtime state.
pub(crate) struct Rt {
    pub heap: Heap,
    pub globals: Dict,
    pub module_cache: Vec<Option<Value>>,
    pub io: IoStacks,
    pub abort: Arc<AtomicBool>,
    pub limits: Limits,
    pub pool: VmPool,
    pub program: Option<Arc<Bytecode>>,
    pub tracer: Box<dyn VmTracer>,
    /// Interns used before a program is loaded.
    fallback_interns: Interns,
}

impl std::fmt::Debug for Rt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rt")
            .field("heap_slots", &self.heap.len())
            .field("globals", &self.globals.len())
            .field("modules", &self.module_cache.len())
            .finish()
    }
}

impl Rt {
    pub fn new(limits: Limits, tracer: Box<dyn VmTracer>) -> Self {
        Self {
            heap: Heap::new(),
            globals: Dict::new(),
            module_cache: Vec::new(),
            io: IoStacks::new(),
            abort: Arc::new(AtomicBool::new(false)),
            limits,
            pool: VmPool::new(),
            program: None,
            tracer,
            fallback_interns: Interns::new(),
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::new(Limits::default(), Box::new(NoopTracer))
    }

    /// The loaded program's intern table.
    pub fn interns(&self) -> &Interns {
        match &self.program {
            Some(p) => &p.interns,
            None => &self.fallback_interns,
        }
    }

    /// The loaded program.
    pub fn program(&self) -> Arc<Bytecode> {
        Arc::clone(self.program.as_ref().expect("a program is loaded"))
    }

    pub fn render_str(&self, v: &Value) -> String {
        printer::render_str(v, &self.heap, self.interns())
    }

    /// Materialises an error as a catchable error value, reusing the
    /// originally thrown value when there is one.
    pub fn error_to_value(&mut self, err: &RunError) -> Value {
        if let Some(v) = err.value {
            return v;
        }
        Value::Ref(self.heap.alloc(HeapData::Error(ErrorValue {
            name: err.name().to_owned(),
            message: err.message().to_owned(),
        })))
    }

    /// Converts a thrown value into an in-flight error. Error values throw
    /// as themselves; anything else wraps with the generic `error` name and
    /// its rendering as the message.
    pub fn error_from_value(&mut self, v: Value) -> RunError {
        if let Value::Ref(id) = v
            && let HeapData::Error(e) = self.heap.get(id)
        {
            return RunError::named(e.name.clone(), e.message.clone()).with_value(v);
        }
        let message = self.render_str(&v);
        let value = Value::Ref(self.heap.alloc(HeapData::Error(ErrorValue {
            name: "error".to_owned(),
            message: message.clone(),
        })));
        RunError::named("error", message).with_value(value)
    }
}

/// Cancellation handle for a runtime; any thread may set it.
#[derive(Debug, Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// Makes the runtime's dispatch loop return a VM-aborted error at the
    /// next instruction boundary.
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clears the flag so the runtime can be used again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// An embeddable script runtime.
#[derive(Debug)]
pub struct Runtime {
    rt: Rt,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    #[must_use]
    pub fn with_limits(limits: Limits) -> Self {
        Self {
            rt: Rt::new(limits, Box::new(NoopTracer)),
        }
    }

    /// Replaces the tracer.
    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.rt.tracer = tracer;
    }

    /// Compiles a source string without module support.
    pub fn compile(&self, source: &str) -> Result<Bytecode, CompileError> {
        let mut importer = NoImporter;
        compiler::compile(source, &mut importer, &self.rt.limits)
    }

    /// Compiles a source string with an importer for `import(...)`.
    pub fn compile_with(&self, source: &str, importer: &mut dyn Importer) -> Result<Bytecode, CompileError> {
        compiler::compile(source, importer, &self.rt.limits)
    }

    /// Loads and runs a program, returning its result.
    pub fn run(&mut self, bytecode: Bytecode) -> Result<Object, RunError> {
        self.detach_program();
        let program = Arc::new(bytecode);
        self.rt.program = Some(Arc::clone(&program));
        self.rt.module_cache = vec![None; usize::from(program.num_module_slots)];

        let mut vm = Vm::new(&mut self.rt, program);
        let result = vm.run_main();
        let (stack, frames) = vm.into_buffers();
        let limit = self.rt.limits.max_pooled_vms;
        self.rt.pool.release(stack, frames, limit);

        let value = result?;
        Ok(Object::from_value(&value, &self.rt.heap, self.rt.interns()))
    }

    /// Compile-and-run convenience.
    pub fn eval(&mut self, source: &str) -> Result<Object, Error> {
        let bytecode = self.compile(source)?;
        Ok(self.run(bytecode)?)
    }

    /// Compile-and-run with an importer.
    pub fn eval_with(&mut self, source: &str, importer: &mut dyn Importer) -> Result<Object, Error> {
        let bytecode = self.compile_with(source, importer)?;
        Ok(self.run(bytecode)?)
    }

    /// Pushes a fresh capture buffer on the stdout stack.
    pub fn push_stdout_buffer(&mut self) {
        let id = self.rt.heap.alloc(HeapData::Buffer(Vec::new()));
        self.rt.io.stdout.push(OutSink::Buffer(id));
    }

    /// Pushes an input buffer on the stdin stack; `readLine` consumes it
    /// line by line.
    pub fn push_stdin_buffer(&mut self, text: &str) {
        let id = self.rt.heap.alloc(HeapData::Buffer(text.as_bytes().to_vec()));
        self.rt.io.stdin.push(InSource::Buffer(id));
    }

    /// Pops the stdout stack; returns captured text when the popped sink
    /// was a buffer.
    pub fn pop_stdout(&mut self) -> Option<String> {
        // The bottom sink stays in place.
        if self.rt.io.stdout.len() <= 1 {
            return None;
        }
        match self.rt.io.stdout.pop()? {
            OutSink::Buffer(id) => match self.rt.heap.get(id) {
                HeapData::Buffer(data) => Some(String::from_utf8_lossy(data).into_owned()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Sets a global visible to scripts.
    pub fn set_global(&mut self, name: &str, value: Object) {
        let v = value.into_value(&mut self.rt.heap);
        self.rt.globals.set(name.to_owned(), v);
    }

    /// Reads a global back out.
    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Object> {
        self.rt
            .globals
            .get(name)
            .map(|v| Object::from_value(&v, &self.rt.heap, self.rt.interns()))
    }

    /// A handle that cancels execution from any thread.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(Arc::clone(&self.rt.abort))
    }

    /// Unloads the current program, detaching globals from its intern
    /// table. Interned strings reachable from globals are rehomed onto the
    /// heap; functions of the unloaded program become nil, since their ids
    /// are meaningless in the next program.
    fn detach_program(&mut self) {
        let Some(old) = self.rt.program.take() else {
            return;
        };
        let mut visited = ahash::AHashSet::new();
        let keys: Vec<String> = self.rt.globals.keys().map(str::to_owned).collect();
        for key in keys {
            let Some(v) = self.rt.globals.get(&key) else {
                continue;
            };
            let fixed = detach_value(&mut self.rt.heap, &old.interns, v, &mut visited);
            self.rt.globals.set(key, fixed);
        }
    }
}

/// Rewrites one value for program unload: interned strings move to the
/// heap, callables become nil, containers are walked in place.
fn detach_value(
    heap: &mut Heap,
    interns: &Interns,
    v: Value,
    visited: &mut ahash::AHashSet<crate::heap::HeapId>,
) -> Value {
    match v {
        Value::Str(id) => Value::string(interns.get(id).to_owned(), heap),
        Value::Func(_) | Value::Builtin(_) => Value::Nil,
        Value::Ref(id) => {
            // Callables and iterators do not survive unload.
            if matches!(
                heap.get(id),
                HeapData::Closure(_) | HeapData::BoundMethod(_) | HeapData::MethodCaller(_) | HeapData::Iter(_)
            ) {
                return Value::Nil;
            }
            detach_heap(heap, interns, id, visited);
            Value::Ref(id)
        }
        other => other,
    }
}

fn detach_heap(
    heap: &mut Heap,
    interns: &Interns,
    id: crate::heap::HeapId,
    visited: &mut ahash::AHashSet<crate::heap::HeapId>,
) {
    if !visited.insert(id) {
        return;
    }
    match heap.get(id) {
        HeapData::Array(items) => {
            let items = items.clone();
            let fixed: Vec<Value> = items.into_iter().map(|v| detach_value(heap, interns, v, visited)).collect();
            *heap.get_mut(id) = HeapData::Array(fixed);
        }
        HeapData::Dict(d) => {
            let entries: Vec<(String, Value)> = d.iter().map(|(k, v)| (k.to_owned(), v)).collect();
            let mut out = Dict::with_capacity(entries.len());
            for (k, v) in entries {
                let fixed = detach_value(heap, interns, v, visited);
                out.set(k, fixed);
            }
            *heap.get_mut(id) = HeapData::Dict(out);
        }
        HeapData::SyncDict(lock) => {
            let entries: Vec<(String, Value)> = match lock.read() {
                Ok(guard) => guard.iter().map(|(k, v)| (k.to_owned(), v)).collect(),
                Err(_) => return,
            };
            let mut out = Dict::with_capacity(entries.len());
            for (k, v) in entries {
                let fixed = detach_value(heap, interns, v, visited);
                out.set(k, fixed);
            }
            if let HeapData::SyncDict(lock) = heap.get_mut(id)
                && let Ok(mut guard) = lock.write()
            {
                *guard = out;
            }
        }
        HeapData::KeyValue(kv) => {
            let kv = *kv;
            let key = detach_value(heap, interns, kv.key, visited);
            let value = detach_value(heap, interns, kv.value, visited);
            *heap.get_mut(id) = HeapData::KeyValue(crate::types::KeyValue::new(key, value));
        }
        HeapData::KeyValueArray(a) => {
            let pairs = a.pairs.clone();
            let fixed: Vec<crate::types::KeyValue> = pairs
                .into_iter()
                .map(|kv| {
                    let key = detach_value(heap, interns, kv.key, visited);
                    let value = detach_value(heap, interns, kv.value, visited);
                    crate::types::KeyValue::new(key, value)
                })
                .collect();
            *heap.get_mut(id) = HeapData::KeyValueArray(crate::types::KeyValueArray::new(fixed));
        }
        HeapData::Instance(inst) => {
            let inst = inst.clone();
            let mut fields = Dict::with_capacity(inst.fields.len());
            for (k, v) in inst.fields.iter() {
                let fixed = detach_value(heap, interns, v, visited);
                fields.set(k.to_owned(), fixed);
            }
            *heap.get_mut(id) = HeapData::Instance(crate::types::Instance { ty: inst.ty, fields });
        }
        HeapData::Cell(inner) => {
            let inner = *inner;
            let fixed = detach_value(heap, interns, inner, visited);
            *heap.get_mut(id) = HeapData::Cell(fixed);
        }
        HeapData::NamedArgs(_) => {
            // Named-argument bundles in globals are opaque; leave them.
        }
        _ => {}
    }
}
