//! Collection and iteration builtins.

use crate::{
    builtins::Call,
    error::{ErrorKind, RunError, RunResult},
    heap::{HeapData, HeapId},
    invoker::{self, Invoker},
    run::Rt,
    types::{
        Dict, KeyValue, KeyValueArray, RillIter,
        iter::{self, CollectMode, IterStep},
    },
    value::{Value, as_str, key_string, values_equal},
    vm::binary::compare_values,
};

pub(super) fn len(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let n = match &v {
        Value::Str(id) => call.rt.interns().get(*id).chars().count(),
        Value::Ref(id) => match call.rt.heap.get(*id) {
            HeapData::Str(s) | HeapData::RawStr(s) => s.chars().count(),
            HeapData::Bytes(b) | HeapData::Buffer(b) => b.len(),
            HeapData::Array(items) => items.len(),
            HeapData::Dict(d) => d.len(),
            HeapData::SyncDict(lock) => lock
                .read()
                .map_err(|_| RunError::new(ErrorKind::Type, "sync dict lock poisoned"))?
                .len(),
            HeapData::KeyValueArray(a) => a.len(),
            HeapData::NamedArgs(na) => na.len(),
            _ => {
                return Err(RunError::new(
                    ErrorKind::Type,
                    format!("'{}' has no length", v.type_name(&call.rt.heap)),
                ));
            }
        },
        _ => {
            return Err(RunError::new(
                ErrorKind::Type,
                format!("'{}' has no length", v.type_name(&call.rt.heap)),
            ));
        }
    };
    Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
}

/// Shallow copy: one level of structure is fresh, nested values alias.
pub(super) fn copy(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    Ok(copy_value(call.rt, v))
}

pub(crate) fn copy_value(rt: &mut Rt, v: Value) -> Value {
    let Value::Ref(id) = v else {
        return v;
    };
    let data = match rt.heap.get(id) {
        HeapData::Str(s) => HeapData::Str(s.clone()),
        HeapData::RawStr(s) => HeapData::RawStr(s.clone()),
        HeapData::Bytes(b) => HeapData::Bytes(b.clone()),
        HeapData::Buffer(b) => HeapData::Buffer(b.clone()),
        HeapData::Array(items) => HeapData::Array(items.clone()),
        HeapData::Dict(d) => HeapData::Dict(d.clone()),
        HeapData::KeyValue(kv) => HeapData::KeyValue(*kv),
        HeapData::KeyValueArray(a) => HeapData::KeyValueArray(a.clone()),
        HeapData::Instance(inst) => HeapData::Instance(inst.clone()),
        // Errors, regexes, functions, iterators and sync dicts copy as
        // themselves.
        _ => return v,
    };
    Value::Ref(rt.heap.alloc(data))
}

pub(super) fn deep_copy(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let mut seen = ahash::AHashMap::new();
    Ok(deep_copy_value(call.rt, v, &mut seen))
}

fn deep_copy_value(rt: &mut Rt, v: Value, seen: &mut ahash::AHashMap<HeapId, HeapId>) -> Value {
    let Value::Ref(id) = v else {
        return v;
    };
    if let Some(copied) = seen.get(&id) {
        return Value::Ref(*copied);
    }
    match rt.heap.get(id) {
        HeapData::Array(items) => {
            let items = items.clone();
            // Reserve the slot first so cycles resolve to the copy.
            let new_id = rt.heap.alloc(HeapData::Array(Vec::new()));
            seen.insert(id, new_id);
            let copied: Vec<Value> = items.into_iter().map(|v| deep_copy_value(rt, v, seen)).collect();
            *rt.heap.get_mut(new_id) = HeapData::Array(copied);
            Value::Ref(new_id)
        }
        HeapData::Dict(d) => {
            let entries: Vec<(String, Value)> = d.iter().map(|(k, v)| (k.to_owned(), v)).collect();
            let new_id = rt.heap.alloc(HeapData::Dict(Dict::new()));
            seen.insert(id, new_id);
            let mut out = Dict::with_capacity(entries.len());
            for (k, v) in entries {
                let copied = deep_copy_value(rt, v, seen);
                out.set(k, copied);
            }
            *rt.heap.get_mut(new_id) = HeapData::Dict(out);
            Value::Ref(new_id)
        }
        HeapData::KeyValue(kv) => {
            let kv = *kv;
            let new_id = rt.heap.alloc(HeapData::KeyValue(kv));
            seen.insert(id, new_id);
            let key = deep_copy_value(rt, kv.key, seen);
            let value = deep_copy_value(rt, kv.value, seen);
            *rt.heap.get_mut(new_id) = HeapData::KeyValue(KeyValue::new(key, value));
            Value::Ref(new_id)
        }
        HeapData::KeyValueArray(a) => {
            let pairs = a.pairs.clone();
            let new_id = rt.heap.alloc(HeapData::KeyValueArray(KeyValueArray::default()));
            seen.insert(id, new_id);
            let copied: Vec<KeyValue> = pairs
                .into_iter()
                .map(|kv| {
                    let key = deep_copy_value(rt, kv.key, seen);
                    let value = deep_copy_value(rt, kv.value, seen);
                    KeyValue::new(key, value)
                })
                .collect();
            *rt.heap.get_mut(new_id) = HeapData::KeyValueArray(KeyValueArray::new(copied));
            Value::Ref(new_id)
        }
        HeapData::Instance(inst) => {
            let inst = inst.clone();
            let new_id = rt.heap.alloc(HeapData::Instance(inst.clone()));
            seen.insert(id, new_id);
            let mut fields = Dict::with_capacity(inst.fields.len());
            for (k, v) in inst.fields.iter() {
                let copied = deep_copy_value(rt, v, seen);
                fields.set(k.to_owned(), copied);
            }
            *rt.heap.get_mut(new_id) = HeapData::Instance(crate::types::Instance { ty: inst.ty, fields });
            Value::Ref(new_id)
        }
        _ => copy_value(rt, v),
    }
}

pub(super) fn keys(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let items = keyed_view(call.rt, &v, View::Keys)?;
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Array(items))))
}

pub(super) fn values(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let items = keyed_view(call.rt, &v, View::Values)?;
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Array(items))))
}

pub(super) fn items(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let pairs = keyed_view(call.rt, &v, View::Pairs)?;
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Array(pairs))))
}

enum View {
    Keys,
    Values,
    Pairs,
}

fn keyed_view(rt: &mut Rt, v: &Value, view: View) -> RunResult<Vec<Value>> {
    let entries: Vec<(Value, Value)> = match v {
        Value::Ref(id) => match rt.heap.get(*id) {
            HeapData::Dict(d) => {
                let pairs: Vec<(String, Value)> = d.iter().map(|(k, v)| (k.to_owned(), v)).collect();
                pairs
                    .into_iter()
                    .map(|(k, v)| (Value::string(k, &mut rt.heap), v))
                    .collect()
            }
            HeapData::SyncDict(lock) => {
                let pairs: Vec<(String, Value)> = lock
                    .read()
                    .map_err(|_| RunError::new(ErrorKind::Type, "sync dict lock poisoned"))?
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v))
                    .collect();
                pairs
                    .into_iter()
                    .map(|(k, v)| (Value::string(k, &mut rt.heap), v))
                    .collect()
            }
            HeapData::Array(its) => its
                .clone()
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i64::try_from(i).unwrap_or(i64::MAX)), v))
                .collect(),
            HeapData::KeyValueArray(a) => a.pairs.iter().map(|kv| (kv.key, kv.value)).collect(),
            HeapData::NamedArgs(na) => {
                let mut pairs = Vec::new();
                na.walk(|kv| pairs.push((kv.key, kv.value)));
                pairs
            }
            _ => return Err(RunError::not_iterable(&v.type_name(&rt.heap))),
        },
        _ => return Err(RunError::not_iterable(&v.type_name(&rt.heap))),
    };
    Ok(match view {
        View::Keys => entries.into_iter().map(|(k, _)| k).collect(),
        View::Values => entries.into_iter().map(|(_, v)| v).collect(),
        View::Pairs => entries
            .into_iter()
            .map(|(k, v)| Value::Ref(rt.heap.alloc(HeapData::Array(vec![k, v]))))
            .collect(),
    })
}

/// Sorts arrays and key-value arrays in place (returning the same value)
/// and strings into a new string. Key-value arrays without a comparator
/// order by the keys' string rendering, stably.
pub(super) fn sort(call: &mut Call<'_>, reverse: bool) -> RunResult<Value> {
    let v = call.one()?;
    if let Some(s) = as_str(&v, &call.rt.heap, call.rt.interns()) {
        let mut chars: Vec<char> = s.chars().collect();
        chars.sort_unstable();
        if reverse {
            chars.reverse();
        }
        let out: String = chars.into_iter().collect();
        return Ok(Value::string(out, &mut call.rt.heap));
    }
    let Value::Ref(id) = v else {
        return Err(RunError::new(
            ErrorKind::Type,
            format!("'{}' is not sortable", v.type_name(&call.rt.heap)),
        ));
    };
    match call.rt.heap.get(id) {
        HeapData::Array(items) => {
            let mut items = items.clone();
            let mut failed = None;
            items.sort_by(|a, b| match compare_values(call.rt, a, b) {
                Some(ord) => ord,
                None => {
                    failed = Some((a.type_name(&call.rt.heap).into_owned(), b.type_name(&call.rt.heap).into_owned()));
                    std::cmp::Ordering::Equal
                }
            });
            if let Some((l, r)) = failed {
                return Err(RunError::invalid_operator("<", &l, &r));
            }
            if reverse {
                items.reverse();
            }
            *call.rt.heap.get_mut(id) = HeapData::Array(items);
            Ok(v)
        }
        HeapData::KeyValueArray(a) => {
            let mut pairs = a.pairs.clone();
            let mut rendered: Vec<(String, KeyValue)> = pairs
                .drain(..)
                .map(|kv| {
                    let key = crate::printer::render_str(&kv.key, &call.rt.heap, call.rt.interns());
                    (key, kv)
                })
                .collect();
            rendered.sort_by(|a, b| if reverse { b.0.cmp(&a.0) } else { a.0.cmp(&b.0) });
            let pairs: Vec<KeyValue> = rendered.into_iter().map(|(_, kv)| kv).collect();
            *call.rt.heap.get_mut(id) = HeapData::KeyValueArray(KeyValueArray::new(pairs));
            Ok(v)
        }
        _ => Err(RunError::new(
            ErrorKind::Type,
            format!("'{}' is not sortable", v.type_name(&call.rt.heap)),
        )),
    }
}

/// Takes an iterator out of its heap slot (leaving an exhausted one), or
/// builds a fresh iterator over an iterable value.
fn take_iter(rt: &mut Rt, v: Value, sorted: bool) -> RunResult<RillIter> {
    if let Value::Ref(id) = v
        && matches!(rt.heap.get(id), HeapData::Iter(_))
    {
        let HeapData::Iter(iter) = rt.heap.replace(id, HeapData::Iter(RillIter::empty())) else {
            unreachable!("slot type checked above");
        };
        return Ok(iter);
    }
    RillIter::over(v, &rt.heap, rt.interns(), sorted)
}

pub(super) fn collect(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let mut iter = take_iter(call.rt, v, false)?;
    let out = iter::collect(call.rt, &mut iter)?;
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Array(out))))
}

pub(super) fn enumerate(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let base = take_iter(call.rt, v, false)?;
    let iter = RillIter::enumerate(base);
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Iter(iter))))
}

pub(super) fn zip(call: &mut Call<'_>) -> RunResult<Value> {
    let mut children = Vec::with_capacity(call.args.len());
    while let Some(v) = call.args.shift() {
        children.push(take_iter(call.rt, v, false)?);
    }
    let iter = RillIter::zip(children);
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Iter(iter))))
}

/// Filter: arrays take the eager fast path, everything else becomes a lazy
/// adapter. The fast path resolves the predicate once and calls it
/// incrementally.
pub(super) fn filter(call: &mut Call<'_>) -> RunResult<Value> {
    let (v, pred) = call.two()?;
    if let Value::Ref(id) = v
        && let HeapData::Array(items) = call.rt.heap.get(id)
    {
        let items = items.clone();
        let out = {
            let mut caller = Invoker::new(call.rt, pred);
            let mut out = Vec::new();
            for item in items {
                let keep = caller.invoke_values(vec![item])?;
                if !keep.is_falsy(&caller.rt().heap, caller.rt().interns()) {
                    out.push(item);
                }
            }
            out
        };
        return Ok(Value::Ref(call.rt.heap.alloc(HeapData::Array(out))));
    }
    let base = take_iter(call.rt, v, false)?;
    let iter = RillIter::filter(base, pred);
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Iter(iter))))
}

/// Map: arrays take the eager fast path; the `update` flag writes mapped
/// values back to an index-settable source.
pub(super) fn map(call: &mut Call<'_>) -> RunResult<Value> {
    let (v, func) = call.two()?;
    let mut specs = [crate::args::NamedArgSpec::new("update", crate::typeassert::TypeAssertion::any())];
    call.named.get(&mut specs, &call.rt.heap, call.rt.interns())?;
    let update = !matches!(specs[0].value, Value::Undefined)
        && !specs[0].value.is_falsy(&call.rt.heap, call.rt.interns());

    if let Value::Ref(id) = v
        && let HeapData::Array(items) = call.rt.heap.get(id)
    {
        let items = items.clone();
        let out = {
            let mut caller = Invoker::new(call.rt, func);
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(caller.invoke_values(vec![item])?);
            }
            out
        };
        if update {
            *call.rt.heap.get_mut(id) = HeapData::Array(out.clone());
        }
        return Ok(Value::Ref(call.rt.heap.alloc(HeapData::Array(out))));
    }
    let base = take_iter(call.rt, v, false)?;
    let iter = RillIter::map(base, func, update, v);
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Iter(iter))))
}

pub(super) fn reduce(call: &mut Call<'_>) -> RunResult<Value> {
    let (v, func, init) = match call.args.len() {
        2 => {
            let (a, b) = call.two()?;
            (a, b, None)
        }
        3 => {
            let mut all = call.exactly(3)?;
            let init = all.pop().expect("three args");
            let func = all.pop().expect("three args");
            let v = all.pop().expect("three args");
            (v, func, Some(init))
        }
        n => return Err(RunError::wrong_num_args("2..3", n)),
    };
    let mut iter = take_iter(call.rt, v, false)?;
    let mut acc = init;
    loop {
        match iter::advance(call.rt, &mut iter)? {
            IterStep::Done => break,
            IterStep::Entry { value, .. } => {
                acc = Some(match acc {
                    None => value,
                    Some(current) => invoker::invoke_values(call.rt, func, vec![current, value])?,
                });
            }
        }
    }
    Ok(acc.unwrap_or(Value::Nil))
}

pub(super) fn range(call: &mut Call<'_>) -> RunResult<Value> {
    fn as_int(v: &Value, pos: usize, rt: &Rt) -> RunResult<i64> {
        match v {
            Value::Int(n) => Ok(*n),
            Value::Uint(n) => i64::try_from(*n)
                .map_err(|_| RunError::new(ErrorKind::UnexpectedArgValue, "range bound out of range")),
            _ => Err(RunError::argument_type(pos, "int", &v.type_name(&rt.heap))),
        }
    }
    let (start, stop, step) = match call.args.len() {
        1 => (0, as_int(&call.one()?, 1, call.rt)?, 1),
        2 => {
            let (a, b) = call.two()?;
            (as_int(&a, 1, call.rt)?, as_int(&b, 2, call.rt)?, 1)
        }
        3 => {
            let mut all = call.exactly(3)?;
            let c = all.pop().expect("three args");
            let b = all.pop().expect("three args");
            let a = all.pop().expect("three args");
            (as_int(&a, 1, call.rt)?, as_int(&b, 2, call.rt)?, as_int(&c, 3, call.rt)?)
        }
        n => return Err(RunError::wrong_num_args("1..3", n)),
    };
    if step == 0 {
        return Err(RunError::new(ErrorKind::UnexpectedArgValue, "range step cannot be zero"));
    }
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Iter(RillIter::range(start, stop, step)))))
}

pub(super) fn iterate(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let mut specs = [
        crate::args::NamedArgSpec::new("sorted", crate::typeassert::TypeAssertion::any())
            .with_default(|| Value::Flag(false)),
        crate::args::NamedArgSpec::new("collect", crate::typeassert::TypeAssertion::any()),
    ];
    call.named.get(&mut specs, &call.rt.heap, call.rt.interns())?;
    let sorted = !specs[0].value.is_falsy(&call.rt.heap, call.rt.interns());
    let mode = match specs[1].value {
        Value::Undefined => None,
        ref m => match as_str(m, &call.rt.heap, call.rt.interns()) {
            Some("keys") => Some(CollectMode::Keys),
            Some("values") => Some(CollectMode::Values),
            Some("pairs") => Some(CollectMode::Pairs),
            _ => {
                return Err(RunError::new(
                    ErrorKind::UnexpectedArgValue,
                    "collect must be \"keys\", \"values\" or \"pairs\"",
                ));
            }
        },
    };
    if let Value::Ref(id) = v
        && matches!(call.rt.heap.get(id), HeapData::Iter(_))
    {
        if let Some(mode) = mode
            && let HeapData::Iter(it) = call.rt.heap.get_mut(id)
        {
            it.collect = mode;
        }
        return Ok(v);
    }
    let mut iter = RillIter::over(v, &call.rt.heap, call.rt.interns(), sorted)?;
    if let Some(mode) = mode {
        iter.collect = mode;
    }
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Iter(iter))))
}

/// Append returns a fresh array with the items added.
pub(super) fn append(call: &mut Call<'_>) -> RunResult<Value> {
    if call.args.is_empty() {
        return Err(RunError::wrong_num_args(">=1", 0));
    }
    let v = call.args.shift().expect("checked non-empty");
    let mut out = match v {
        Value::Ref(id) => match call.rt.heap.get(id) {
            HeapData::Array(items) => items.clone(),
            _ => return Err(RunError::argument_type(1, "array", &v.type_name(&call.rt.heap))),
        },
        Value::Nil => Vec::new(),
        _ => return Err(RunError::argument_type(1, "array", &v.type_name(&call.rt.heap))),
    };
    while let Some(item) = call.args.shift() {
        out.push(item);
    }
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Array(out))))
}

/// Membership test: substring for strings, key for dicts and key-value
/// arrays, element for arrays, byte for bytes.
pub(super) fn contains(call: &mut Call<'_>) -> RunResult<Value> {
    let (target, item) = call.two()?;
    if let (Some(hay), Some(needle)) = (
        as_str(&target, &call.rt.heap, call.rt.interns()),
        as_str(&item, &call.rt.heap, call.rt.interns()),
    ) {
        return Ok(Value::Bool(hay.contains(needle)));
    }
    let Value::Ref(id) = target else {
        return Err(RunError::new(
            ErrorKind::Type,
            format!("'{}' is not searchable", target.type_name(&call.rt.heap)),
        ));
    };
    match call.rt.heap.get(id) {
        HeapData::Dict(d) => {
            let key = key_string(&item, &call.rt.heap, call.rt.interns())
                .ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid dict key"))?;
            Ok(Value::Bool(d.contains(&key)))
        }
        HeapData::SyncDict(lock) => {
            let key = key_string(&item, &call.rt.heap, call.rt.interns())
                .ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid dict key"))?;
            let guard = lock
                .read()
                .map_err(|_| RunError::new(ErrorKind::Type, "sync dict lock poisoned"))?;
            Ok(Value::Bool(guard.contains(&key)))
        }
        HeapData::Array(items) => {
            let items = items.clone();
            let found = items
                .iter()
                .any(|v| values_equal(v, &item, &call.rt.heap, call.rt.interns()));
            Ok(Value::Bool(found))
        }
        HeapData::KeyValueArray(a) => {
            let pairs = a.pairs.clone();
            let found = pairs
                .iter()
                .any(|kv| values_equal(&kv.key, &item, &call.rt.heap, call.rt.interns()));
            Ok(Value::Bool(found))
        }
        HeapData::Bytes(b) | HeapData::Buffer(b) => match item {
            Value::Int(n) => Ok(Value::Bool(u8::try_from(n).is_ok_and(|byte| b.contains(&byte)))),
            _ => Err(RunError::argument_type(2, "int", &item.type_name(&call.rt.heap))),
        },
        _ => Err(RunError::new(
            ErrorKind::Type,
            format!("'{}' is not searchable", target.type_name(&call.rt.heap)),
        )),
    }
}

/// Index deletion for dicts and sync dicts; everything else is a
/// not-index-deletable error.
pub(super) fn delete(call: &mut Call<'_>) -> RunResult<Value> {
    let (target, key) = call.two()?;
    let key_str = key_string(&key, &call.rt.heap, call.rt.interns());
    let type_name = target.type_name(&call.rt.heap).into_owned();
    let Value::Ref(id) = target else {
        return Err(RunError::new(
            ErrorKind::NotIndexDeletable,
            format!("'{type_name}' is not index-deletable"),
        ));
    };
    match call.rt.heap.get_mut(id) {
        HeapData::Dict(d) => {
            let key = key_str.ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid dict key"))?;
            d.remove(&key);
            Ok(Value::Nil)
        }
        HeapData::SyncDict(lock) => {
            let key = key_str.ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid dict key"))?;
            let mut guard = lock
                .write()
                .map_err(|_| RunError::new(ErrorKind::Type, "sync dict lock poisoned"))?;
            guard.remove(&key);
            Ok(Value::Nil)
        }
        _ => Err(RunError::new(
            ErrorKind::NotIndexDeletable,
            format!("'{type_name}' is not index-deletable"),
        )),
    }
}

/// Destructuring support: materialises the right-hand side as an array of
/// exactly `n` slots, missing slots nil.
pub(super) fn make_array(call: &mut Call<'_>) -> RunResult<Value> {
    let (n, v) = call.two()?;
    let Value::Int(n) = n else {
        return Err(RunError::argument_type(1, "int", &n.type_name(&call.rt.heap)));
    };
    let n = usize::try_from(n).unwrap_or(0);
    let mut out = match v {
        Value::Ref(id) => match call.rt.heap.get(id) {
            HeapData::Array(items) => items.clone(),
            _ => vec![v],
        },
        _ => vec![v],
    };
    out.resize(n, Value::Nil);
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Array(out))))
}
