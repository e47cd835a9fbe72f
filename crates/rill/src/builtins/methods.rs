//! Bound-method dispatch, method attachment and object types.

use crate::{
    args::{ArgSpec, Args, NamedArgs, NamedArgSpec},
    builtins::Call,
    error::{ErrorKind, RunError, RunResult},
    heap::HeapData,
    printer,
    run::Rt,
    typeassert::{TypeAssertion, callable_handler},
    types::{Dict, KeyValueArray, MethodCaller, ObjectTypeValue, RillIter, Type, iter},
    value::{Value, as_str},
};

/// Dispatches a method bound to a built-in receiver (iterators, regexes,
/// key-value arrays, named arguments).
pub(crate) fn call_method(rt: &mut Rt, recv: Value, name: &str, args: Args, named: NamedArgs) -> RunResult<Value> {
    let mut call = Call { rt, args, named };
    let Value::Ref(id) = recv else {
        return Err(RunError::new(ErrorKind::NotCallable, format!("no method '{name}'")));
    };
    match call.rt.heap.get(id) {
        HeapData::Iter(_) => match name {
            "next" => {
                call.exactly(0)?;
                let step = iter::advance_on_heap(call.rt, id)?;
                Ok(Value::Bool(matches!(step, iter::IterStep::Entry { .. })))
            }
            "key" | "value" => {
                call.exactly(0)?;
                let HeapData::Iter(it) = call.rt.heap.get(id) else {
                    unreachable!("receiver type checked above");
                };
                Ok(if name == "key" { it.cur_key } else { it.cur_value })
            }
            "collect" => {
                call.exactly(0)?;
                let HeapData::Iter(mut it) = call.rt.heap.replace(id, HeapData::Iter(RillIter::empty())) else {
                    unreachable!("receiver type checked above");
                };
                let out = iter::collect(call.rt, &mut it)?;
                call.rt.heap.replace(id, HeapData::Iter(it));
                Ok(Value::Ref(call.rt.heap.alloc(HeapData::Array(out))))
            }
            _ => Err(RunError::new(ErrorKind::NotCallable, format!("iterator has no method '{name}'"))),
        },
        HeapData::Regex(re) => {
            let re = re.clone();
            match name {
                "match" => {
                    let v = call.one()?;
                    let Some(text) = as_str(&v, &call.rt.heap, call.rt.interns()) else {
                        return Err(RunError::argument_type(1, "str", &v.type_name(&call.rt.heap)));
                    };
                    Ok(Value::Bool(re.is_match(text)))
                }
                "find" => {
                    let v = call.one()?;
                    let Some(text) = as_str(&v, &call.rt.heap, call.rt.interns()) else {
                        return Err(RunError::argument_type(1, "str", &v.type_name(&call.rt.heap)));
                    };
                    match re.find(text) {
                        Some(m) => Ok(crate::vm::binary::match_value(call.rt, &re, &m)),
                        None => Ok(Value::Nil),
                    }
                }
                "findAll" => {
                    let (v, limit) = call.one_or_two()?;
                    let Some(text) = as_str(&v, &call.rt.heap, call.rt.interns()) else {
                        return Err(RunError::argument_type(1, "str", &v.type_name(&call.rt.heap)));
                    };
                    let limit = match limit {
                        None | Some(Value::Nil) => 0,
                        Some(Value::Int(n)) => n,
                        Some(other) => {
                            return Err(RunError::argument_type(2, "int", &other.type_name(&call.rt.heap)));
                        }
                    };
                    let text = text.to_owned();
                    let matches: Vec<Value> = re
                        .find_all(&text, limit)
                        .iter()
                        .map(|m| crate::vm::binary::match_value(call.rt, &re, m))
                        .collect();
                    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Array(matches))))
                }
                _ => Err(RunError::new(ErrorKind::NotCallable, format!("regex has no method '{name}'"))),
            }
        }
        HeapData::KeyValueArray(a) => {
            let pairs = a.pairs.clone();
            match name {
                "toDict" => {
                    call.exactly(0)?;
                    let mut d = Dict::with_capacity(pairs.len());
                    for kv in &pairs {
                        if let Some(key) = crate::value::key_string(&kv.key, &call.rt.heap, call.rt.interns()) {
                            d.set(key, kv.value);
                        }
                    }
                    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Dict(d))))
                }
                "sort" | "sortReverse" => {
                    call.exactly(0)?;
                    let reverse = name == "sortReverse";
                    let mut rendered: Vec<(String, crate::types::KeyValue)> = pairs
                        .into_iter()
                        .map(|kv| {
                            let key = printer::render_str(&kv.key, &call.rt.heap, call.rt.interns());
                            (key, kv)
                        })
                        .collect();
                    rendered.sort_by(|x, y| if reverse { y.0.cmp(&x.0) } else { x.0.cmp(&y.0) });
                    let sorted: Vec<crate::types::KeyValue> = rendered.into_iter().map(|(_, kv)| kv).collect();
                    Ok(Value::Ref(call.rt.heap.alloc(HeapData::KeyValueArray(KeyValueArray::new(sorted)))))
                }
                _ => Err(RunError::new(
                    ErrorKind::NotCallable,
                    format!("key-value array has no method '{name}'"),
                )),
            }
        }
        HeapData::NamedArgs(na) => {
            let mut na = na.clone();
            match name {
                "allDict" => {
                    call.exactly(0)?;
                    let d = na.all_dict(&call.rt.heap, call.rt.interns());
                    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Dict(d))))
                }
                "unreadPairs" => {
                    call.exactly(0)?;
                    let pairs = na.unread_pairs(&call.rt.heap, call.rt.interns());
                    Ok(Value::Ref(call.rt.heap.alloc(HeapData::KeyValueArray(KeyValueArray::new(pairs)))))
                }
                "get" => {
                    let v = call.one()?;
                    let Some(key) = crate::value::key_string(&v, &call.rt.heap, call.rt.interns()) else {
                        return Err(RunError::argument_type(1, "str", &v.type_name(&call.rt.heap)));
                    };
                    let result = na.get_value(&key, &call.rt.heap, call.rt.interns()).unwrap_or(Value::Nil);
                    // Persist the read-marking on the receiver.
                    *call.rt.heap.get_mut(id) = HeapData::NamedArgs(na);
                    Ok(result)
                }
                _ => Err(RunError::new(
                    ErrorKind::NotCallable,
                    format!("named arguments have no method '{name}'"),
                )),
            }
        }
        _ => Err(RunError::new(
            ErrorKind::NotCallable,
            format!("'{}' has no method '{name}'", recv.type_name(&call.rt.heap)),
        )),
    }
}

/// Expands a compiled handler's parameter annotations into accepted type
/// vectors (the cross product of per-parameter unions). Returns `None` when
/// any parameter is untyped.
fn handler_type_vectors(rt: &Rt, handler: &Value) -> Option<Vec<Vec<String>>> {
    let func = match handler {
        Value::Func(f) => *f,
        Value::Ref(id) => match rt.heap.get(*id) {
            HeapData::Closure(c) => c.func,
            _ => return None,
        },
        _ => return None,
    };
    let program = rt.program();
    let f = program.func(func);
    if f.params.types.iter().any(Vec::is_empty) && !f.params.types.is_empty() {
        return None;
    }
    let mut vectors: Vec<Vec<String>> = vec![Vec::new()];
    for types in &f.params.types {
        let names: Vec<String> = types.iter().map(|&t| program.interns.get(t).to_owned()).collect();
        let mut next = Vec::with_capacity(vectors.len() * names.len());
        for prefix in &vectors {
            for name in &names {
                let mut v = prefix.clone();
                v.push(name.clone());
                next.push(v);
            }
        }
        vectors = next;
    }
    Some(vectors)
}

/// `addCallMethod(target, handler, override?)`: attaches a handler to a
/// caller by its declared parameter types. An untyped handler replaces the
/// base callable instead.
pub(super) fn add_call_method(call: &mut Call<'_>) -> RunResult<Value> {
    let (target, handler, explicit_override) = match call.args.len() {
        2 => {
            let (t, h) = call.two()?;
            (t, h, None)
        }
        3 => {
            let mut all = call.exactly(3)?;
            let o = all.pop().expect("three args");
            let h = all.pop().expect("three args");
            let t = all.pop().expect("three args");
            (t, h, Some(o))
        }
        n => return Err(RunError::wrong_num_args("2..3", n)),
    };
    let mut specs = [NamedArgSpec::new("override", TypeAssertion::any())];
    call.named.get(&mut specs, &call.rt.heap, call.rt.interns())?;
    let override_flag = match explicit_override {
        Some(v) => !v.is_falsy(&call.rt.heap, call.rt.interns()),
        None => {
            !matches!(specs[0].value, Value::Undefined) && !specs[0].value.is_falsy(&call.rt.heap, call.rt.interns())
        }
    };

    let callable = TypeAssertion::of(&[]).with_handler("callable", callable_handler);
    if !callable.accepts(&handler, &call.rt.heap) {
        return Err(RunError::new(
            ErrorKind::MethodNotAppendable,
            format!(
                "handler must be {}, got '{}'",
                callable.expected(),
                handler.type_name(&call.rt.heap)
            ),
        ));
    }

    // Reuse an existing method caller in place; otherwise wrap the target.
    let caller_id = match target {
        Value::Ref(id) if matches!(call.rt.heap.get(id), HeapData::MethodCaller(_)) => id,
        Value::Func(_) | Value::Builtin(_) => call
            .rt
            .heap
            .alloc(HeapData::MethodCaller(MethodCaller::new(target))),
        Value::Ref(id) if matches!(call.rt.heap.get(id), HeapData::Closure(_)) => call
            .rt
            .heap
            .alloc(HeapData::MethodCaller(MethodCaller::new(target))),
        _ => {
            return Err(RunError::new(
                ErrorKind::MethodNotAppendable,
                format!("cannot attach methods to '{}'", target.type_name(&call.rt.heap)),
            ));
        }
    };

    match handler_type_vectors(call.rt, &handler) {
        Some(vectors) => {
            for vector in vectors {
                let HeapData::MethodCaller(mc) = call.rt.heap.get_mut(caller_id) else {
                    unreachable!("caller id allocated above");
                };
                mc.add_method(vector, handler, override_flag)
                    .map_err(|msg| RunError::new(ErrorKind::MethodDuplication, msg))?;
            }
        }
        None => {
            // Untyped handler becomes the new base callable.
            let HeapData::MethodCaller(mc) = call.rt.heap.get_mut(caller_id) else {
                unreachable!("caller id allocated above");
            };
            mc.base = handler;
        }
    }
    Ok(Value::Ref(caller_id))
}

/// `newType(name; fields=, methods=, getters=, setters=, ancestors=,
/// params=)`. The `params` vectors become the type's accepted-parameter
/// types for callable use.
pub(super) fn new_type(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let Some(name) = as_str(&v, &call.rt.heap, call.rt.interns()) else {
        return Err(RunError::argument_type(1, "str", &v.type_name(&call.rt.heap)));
    };
    let mut ty = ObjectTypeValue::new(name.to_owned());

    let mut specs = [
        NamedArgSpec::new("fields", TypeAssertion::any()),
        NamedArgSpec::new("methods", TypeAssertion::any()),
        NamedArgSpec::new("getters", TypeAssertion::any()),
        NamedArgSpec::new("setters", TypeAssertion::any()),
        NamedArgSpec::new("ancestors", TypeAssertion::any()),
        NamedArgSpec::new("params", TypeAssertion::any()),
    ];
    call.named.get(&mut specs, &call.rt.heap, call.rt.interns())?;

    fn as_dict(v: &Value, rt: &Rt, what: &str) -> RunResult<Dict> {
        match v {
            Value::Undefined => Ok(Dict::new()),
            Value::Ref(id) => match rt.heap.get(*id) {
                HeapData::Dict(d) => Ok(d.clone()),
                _ => Err(RunError::named_argument_type(what, "dict", &v.type_name(&rt.heap))),
            },
            _ => Err(RunError::named_argument_type(what, "dict", &v.type_name(&rt.heap))),
        }
    }
    ty.fields = as_dict(&specs[0].value, call.rt, "fields")?;
    ty.methods = as_dict(&specs[1].value, call.rt, "methods")?;
    ty.getters = as_dict(&specs[2].value, call.rt, "getters")?;
    ty.setters = as_dict(&specs[3].value, call.rt, "setters")?;

    if let Value::Ref(id) = specs[4].value {
        match call.rt.heap.get(id) {
            HeapData::Array(items) => {
                for item in items.clone() {
                    match item {
                        Value::Ref(tid) if matches!(call.rt.heap.get(tid), HeapData::ObjectType(_)) => {
                            ty.ancestors.push(tid);
                        }
                        _ => {
                            return Err(RunError::named_argument_type(
                                "ancestors",
                                "type",
                                &item.type_name(&call.rt.heap),
                            ));
                        }
                    }
                }
            }
            _ => {
                return Err(RunError::named_argument_type(
                    "ancestors",
                    "array",
                    &specs[4].value.type_name(&call.rt.heap),
                ));
            }
        }
    }

    match specs[5].value {
        Value::Undefined => {}
        Value::Ref(id) if matches!(call.rt.heap.get(id), HeapData::Array(_)) => {
            let HeapData::Array(vectors) = call.rt.heap.get(id) else {
                unreachable!("shape checked by the guard");
            };
            let vectors = vectors.clone();
            for vector in vectors {
                let names = match vector {
                    Value::Ref(vid) => match call.rt.heap.get(vid) {
                        HeapData::Array(names) => names.clone(),
                        _ => {
                            return Err(RunError::named_argument_type(
                                "params",
                                "array of arrays",
                                &vector.type_name(&call.rt.heap),
                            ));
                        }
                    },
                    _ => {
                        return Err(RunError::named_argument_type(
                            "params",
                            "array of arrays",
                            &vector.type_name(&call.rt.heap),
                        ));
                    }
                };
                let mut type_names = Vec::with_capacity(names.len());
                for n in names {
                    let Some(s) = as_str(&n, &call.rt.heap, call.rt.interns()) else {
                        return Err(RunError::named_argument_type("params", "str", &n.type_name(&call.rt.heap)));
                    };
                    type_names.push(s.to_owned());
                }
                ty.accepted_params.push(type_names);
            }
        }
        ref other => {
            return Err(RunError::named_argument_type(
                "params",
                "array",
                &other.type_name(&call.rt.heap),
            ));
        }
    }

    Ok(Value::Ref(call.rt.heap.alloc(HeapData::ObjectType(ty))))
}

/// The compiled prelude's type validator for named parameters:
/// `typeCheck(value, "int|str", "paramName")`.
pub(super) fn type_check(call: &mut Call<'_>) -> RunResult<Value> {
    let mut specs = [
        ArgSpec::new("value", TypeAssertion::any()),
        ArgSpec::new("types", TypeAssertion::of(&[Type::Str, Type::RawStr])),
        ArgSpec::new("name", TypeAssertion::of(&[Type::Str, Type::RawStr])),
    ];
    call.args.destructure(&mut specs, &call.rt.heap)?;

    let types = as_str(&specs[1].value, &call.rt.heap, call.rt.interns())
        .expect("destructure validated a string")
        .to_owned();
    let name = as_str(&specs[2].value, &call.rt.heap, call.rt.interns())
        .expect("destructure validated a string")
        .to_owned();

    let actual = specs[0].value.type_name(&call.rt.heap);
    if types.split('|').any(|t| t == actual) {
        return Ok(Value::Nil);
    }
    Err(RunError::named_argument_type(&name, &types, &actual))
}
