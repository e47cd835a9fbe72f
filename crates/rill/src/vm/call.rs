//! Call resolution and dispatch.
//!
//! `exec_call` implements the `Call`/`CallName` opcodes: it decodes the
//! argument stack layout (positionals, `*` splat, named-argument literal,
//! `**` splat, selector name), resolves the callable, and either pushes a
//! frame (compiled callees) or dispatches directly.

use std::sync::Arc;

use crate::{
    args::{Args, NamedArgs},
    builtins::{self, Builtin},
    bytecode::{Bytecode, FuncId, call_flags},
    error::{ErrorKind, RunError, RunResult},
    heap::{HeapData, HeapId},
    run::Rt,
    types::KeyValue,
    value::Value,
    vm::{Vm, index},
};

/// A callable resolved to its dispatch shape.
#[derive(Debug, Clone)]
pub(crate) enum Resolved {
    Compiled { func: FuncId, closure: Option<HeapId> },
    Builtin(Builtin),
    Bound { recv: Value, name: String },
    Type(HeapId),
}

/// Resolves a callee value, following method-caller dispatch on the actual
/// argument types.
pub(crate) fn resolve(rt: &mut Rt, callee: Value, args: &Args) -> RunResult<Resolved> {
    match callee {
        Value::Func(func) => Ok(Resolved::Compiled { func, closure: None }),
        Value::Builtin(b) => Ok(Resolved::Builtin(b)),
        Value::Ref(id) => match rt.heap.get(id) {
            HeapData::Closure(c) => Ok(Resolved::Compiled {
                func: c.func,
                closure: Some(id),
            }),
            HeapData::BoundMethod(m) => Ok(Resolved::Bound {
                recv: m.recv,
                name: m.name.clone(),
            }),
            HeapData::MethodCaller(mc) => {
                let arg_types = flat_arg_types(rt, args);
                let refs: Vec<&str> = arg_types.iter().map(String::as_str).collect();
                let target = mc.resolve(&refs);
                resolve(rt, target, args)
            }
            HeapData::ObjectType(_) => Ok(Resolved::Type(id)),
            HeapData::Cell(inner) => {
                let inner = *inner;
                resolve(rt, inner, args)
            }
            _ => Err(RunError::not_callable(&callee.type_name(&rt.heap))),
        },
        _ => Err(RunError::not_callable(&callee.type_name(&rt.heap))),
    }
}

/// The concrete type names of every positional argument, in flattened
/// order.
fn flat_arg_types(rt: &Rt, args: &Args) -> Vec<String> {
    let mut arg_types = Vec::with_capacity(args.len());
    for i in 0..args.len() {
        if let Some(v) = args.get(i) {
            arg_types.push(v.type_name(&rt.heap).into_owned());
        }
    }
    arg_types
}

/// Dispatches a non-compiled callable, or a compiled one on a pooled child
/// VM (the invoker path).
pub(crate) fn call_direct(rt: &mut Rt, resolved: Resolved, args: Args, named: NamedArgs) -> RunResult<Value> {
    match resolved {
        Resolved::Builtin(b) => builtins::call_builtin(rt, b, args, named),
        Resolved::Bound { recv, name } => builtins::call_method(rt, recv, &name, args, named),
        Resolved::Type(id) => construct_instance(rt, id, args, named),
        compiled @ Resolved::Compiled { .. } => crate::invoker::invoke_resolved(rt, compiled, args, named),
    }
}

/// Calling an object type constructs an instance from a field dictionary:
/// an optional positional dict plus named arguments, applied over the
/// type's field defaults. A type with accepted-parameter-type vectors
/// admits only calls whose argument types match one of them.
fn construct_instance(rt: &mut Rt, ty: HeapId, mut args: Args, mut named: NamedArgs) -> RunResult<Value> {
    let (mut fields, accepted) = match rt.heap.get(ty) {
        HeapData::ObjectType(t) => (t.fields.clone(), t.accepted_params.clone()),
        _ => return Err(RunError::new(ErrorKind::NotInitializable, "not an object type")),
    };
    if !accepted.is_empty() {
        let arg_types = flat_arg_types(rt, &args);
        let matched = accepted
            .iter()
            .any(|vector| vector.len() == arg_types.len() && vector.iter().zip(&arg_types).all(|(a, b)| a == b));
        if !matched {
            let expected: Vec<String> = accepted.iter().map(|v| format!("({})", v.join(", "))).collect();
            return Err(RunError::new(
                ErrorKind::ArgumentType,
                format!("constructor accepts {}, found ({})", expected.join(" | "), arg_types.join(", ")),
            ));
        }
    }
    if args.len() > 1 {
        return Err(RunError::wrong_num_args("<=1", args.len()));
    }
    if let Some(v) = args.shift() {
        match v {
            Value::Ref(id) => match rt.heap.get(id) {
                HeapData::Dict(d) => {
                    for (k, v) in d.clone().iter() {
                        fields.set(k.to_owned(), v);
                    }
                }
                _ => {
                    return Err(RunError::argument_type(1, "dict", &v.type_name(&rt.heap)));
                }
            },
            Value::Nil => {}
            _ => {
                return Err(RunError::argument_type(1, "dict", &v.type_name(&rt.heap)));
            }
        }
    }
    let rest = named.get_var(&mut [], &rt.heap, rt.interns())?;
    for (k, v) in rest.iter() {
        fields.set(k.to_owned(), v);
    }
    Ok(Value::Ref(rt.heap.alloc(HeapData::Instance(crate::types::Instance {
        ty,
        fields,
    }))))
}

/// Decodes a splatted named-argument value into key-value pairs.
fn named_splat_pairs(rt: &mut Rt, v: Value) -> RunResult<Vec<KeyValue>> {
    match v {
        Value::Nil => Ok(Vec::new()),
        Value::Ref(id) => match rt.heap.get(id) {
            HeapData::Dict(d) => {
                let entries: Vec<(String, Value)> = d.iter().map(|(k, v)| (k.to_owned(), v)).collect();
                Ok(entries
                    .into_iter()
                    .map(|(k, v)| KeyValue::new(Value::string(k, &mut rt.heap), v))
                    .collect())
            }
            HeapData::KeyValueArray(a) => Ok(a.pairs.clone()),
            HeapData::NamedArgs(na) => {
                let mut pairs = Vec::new();
                na.walk(|kv| pairs.push(*kv));
                Ok(pairs)
            }
            _ => Err(RunError::new(
                ErrorKind::UnexpectedArgValue,
                format!("'**' argument must be a dict, got '{}'", v.type_name(&rt.heap)),
            )),
        },
        _ => Err(RunError::new(
            ErrorKind::UnexpectedArgValue,
            format!("'**' argument must be a dict, got '{}'", v.type_name(&rt.heap)),
        )),
    }
}

/// Decodes the named-argument literal array built by the compiler: an array
/// of `[name, value]` 2-arrays.
fn named_literal_pairs(rt: &Rt, v: Value) -> RunResult<Vec<KeyValue>> {
    let Value::Ref(id) = v else {
        return Err(RunError::new(ErrorKind::Type, "named-argument literal is not an array"));
    };
    let HeapData::Array(items) = rt.heap.get(id) else {
        return Err(RunError::new(ErrorKind::Type, "named-argument literal is not an array"));
    };
    let mut pairs = Vec::with_capacity(items.len());
    for item in items {
        let Value::Ref(pair_id) = item else {
            return Err(RunError::new(ErrorKind::Type, "named-argument entry is not a pair"));
        };
        let HeapData::Array(pair) = rt.heap.get(*pair_id) else {
            return Err(RunError::new(ErrorKind::Type, "named-argument entry is not a pair"));
        };
        if pair.len() != 2 {
            return Err(RunError::new(ErrorKind::Type, "named-argument entry is not a pair"));
        }
        pairs.push(KeyValue::new(pair[0], pair[1]));
    }
    Ok(pairs)
}

/// The `Call`/`CallName` opcodes.
pub(crate) fn exec_call(vm: &mut Vm<'_>, program: &Arc<Bytecode>, nargs: u16, flags: u16, by_name: bool) -> RunResult<()> {
    let selector = if by_name { Some(vm.pop()?) } else { None };
    let var_named = if flags & call_flags::VAR_NAMED_ARGS != 0 {
        Some(vm.pop()?)
    } else {
        None
    };
    let named_lit = if flags & call_flags::NAMED_ARGS != 0 { Some(vm.pop()?) } else { None };
    let splat = if flags & call_flags::VAR_ARGS != 0 { Some(vm.pop()?) } else { None };
    let positional = vm.pop_n(nargs as usize)?;
    let target = vm.pop()?;

    let mut args = Args::from_vec(positional);
    if let Some(v) = splat {
        match v {
            Value::Ref(id) => match vm.rt.heap.get(id) {
                HeapData::Array(items) => args.push_group(items.clone()),
                _ => {
                    return Err(RunError::new(
                        ErrorKind::UnexpectedArgValue,
                        format!("'*' argument must be an array, got '{}'", v.type_name(&vm.rt.heap)),
                    ));
                }
            },
            Value::Nil => {}
            _ => {
                return Err(RunError::new(
                    ErrorKind::UnexpectedArgValue,
                    format!("'*' argument must be an array, got '{}'", v.type_name(&vm.rt.heap)),
                ));
            }
        }
    }

    let mut named = NamedArgs::new();
    if let Some(v) = named_lit {
        let pairs = named_literal_pairs(vm.rt, v)?;
        named.add_source(pairs)?;
    }
    if let Some(v) = var_named {
        let pairs = named_splat_pairs(vm.rt, v)?;
        named.add_source(pairs)?;
    }

    let callee = match selector {
        Some(name) => index::index_get(vm.rt, target, name)?,
        None => target,
    };

    let resolved = resolve(vm.rt, callee, &args)?;
    match resolved {
        Resolved::Compiled { func, closure } => vm.push_frame(program, func, closure, args, named),
        other => {
            let v = call_direct(vm.rt, other, args, named)?;
            vm.push(v);
            Ok(())
        }
    }
}
