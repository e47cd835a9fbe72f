//! The index protocol: get, set and slice.
//!
//! Selector chains compile to the same path as bracket indexing; values
//! with built-in methods (regex, errors, iterators) answer selector lookups
//! with bound methods.

use crate::{
    error::{ErrorKind, RunError, RunResult},
    heap::{BoundMethod, HeapData},
    run::Rt,
    types::KeyValue,
    value::{Value, as_str, key_string, values_equal},
};

fn int_index(index: &Value) -> Option<i64> {
    match index {
        Value::Int(n) => Some(*n),
        Value::Uint(n) => i64::try_from(*n).ok(),
        _ => None,
    }
}

fn checked_pos(n: i64, len: usize) -> RunResult<usize> {
    let idx = usize::try_from(n).map_err(|_| RunError::index_out_of_bounds(n, len))?;
    if idx >= len {
        return Err(RunError::index_out_of_bounds(n, len));
    }
    Ok(idx)
}

/// Method names answered by each built-in receiver, for selector dispatch.
fn has_method(data: &HeapData, name: &str) -> bool {
    match data {
        HeapData::Regex(_) => matches!(name, "find" | "findAll" | "match"),
        HeapData::Iter(_) => matches!(name, "next" | "key" | "value" | "collect"),
        HeapData::KeyValueArray(_) => matches!(name, "toDict" | "sort" | "sortReverse"),
        HeapData::NamedArgs(_) => matches!(name, "get" | "allDict" | "unreadPairs"),
        _ => false,
    }
}

/// Index get. Selector names on method-bearing values produce bound
/// methods; dict misses produce nil.
pub(crate) fn index_get(rt: &mut Rt, target: Value, index: Value) -> RunResult<Value> {
    match target {
        Value::Str(id) => {
            let s = rt.interns().get(id).to_owned();
            str_index(&s, &index)
        }
        Value::Ref(id) => {
            // Bound-method lookup first, so collection methods are not
            // shadowed by key lookups.
            if let Some(name) = as_str(&index, &rt.heap, rt.interns())
                && has_method(rt.heap.get(id), name)
            {
                let method = BoundMethod {
                    recv: target,
                    name: name.to_owned(),
                };
                return Ok(Value::Ref(rt.heap.alloc(HeapData::BoundMethod(method))));
            }
            match rt.heap.get(id) {
                HeapData::Str(s) | HeapData::RawStr(s) => {
                    let s = s.clone();
                    str_index(&s, &index)
                }
                HeapData::Bytes(b) | HeapData::Buffer(b) => {
                    let n = int_index(&index)
                        .ok_or_else(|| RunError::new(ErrorKind::IndexType, "byte index must be an integer"))?;
                    let idx = checked_pos(n, b.len())?;
                    Ok(Value::Int(i64::from(b[idx])))
                }
                HeapData::Array(items) => {
                    let n = int_index(&index)
                        .ok_or_else(|| RunError::new(ErrorKind::IndexType, "array index must be an integer"))?;
                    let idx = checked_pos(n, items.len())?;
                    Ok(items[idx])
                }
                HeapData::Dict(d) => {
                    let key = key_string(&index, &rt.heap, rt.interns())
                        .ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid dict key"))?;
                    Ok(d.get(&key).unwrap_or(Value::Nil))
                }
                HeapData::SyncDict(lock) => {
                    let key = key_string(&index, &rt.heap, rt.interns())
                        .ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid dict key"))?;
                    let guard = lock
                        .read()
                        .map_err(|_| RunError::new(ErrorKind::Type, "sync dict lock poisoned"))?;
                    Ok(guard.get(&key).unwrap_or(Value::Nil))
                }
                HeapData::KeyValue(kv) => match as_str(&index, &rt.heap, rt.interns()) {
                    Some("k" | "key") => Ok(kv.key),
                    Some("v" | "value") => Ok(kv.value),
                    _ => Err(RunError::new(ErrorKind::InvalidIndex, "key-value pairs index by 'k' or 'v'")),
                },
                HeapData::KeyValueArray(a) => {
                    if let Some(n) = int_index(&index) {
                        let idx = checked_pos(n, a.pairs.len())?;
                        let kv = a.pairs[idx];
                        return Ok(Value::Ref(rt.heap.alloc(HeapData::KeyValue(kv))));
                    }
                    // Key lookup: last pair with an equal key wins.
                    let pairs = a.pairs.clone();
                    for kv in pairs.iter().rev() {
                        if values_equal(&kv.key, &index, &rt.heap, rt.interns()) {
                            return Ok(kv.value);
                        }
                    }
                    Ok(Value::Nil)
                }
                HeapData::Error(e) => {
                    let member = match as_str(&index, &rt.heap, rt.interns()) {
                        Some("Name") => Some(e.name.clone()),
                        Some("Message") => Some(e.message.clone()),
                        _ => None,
                    };
                    match member {
                        Some(text) => Ok(Value::string(text, &mut rt.heap)),
                        None => Ok(Value::Nil),
                    }
                }
                HeapData::Regex(r) => {
                    let member = match as_str(&index, &rt.heap, rt.interns()) {
                        Some("pattern") => Some(r.pattern.clone()),
                        _ => None,
                    };
                    match member {
                        Some(text) => Ok(Value::string(text, &mut rt.heap)),
                        None => Ok(Value::Nil),
                    }
                }
                HeapData::Instance(inst) => {
                    let key = key_string(&index, &rt.heap, rt.interns())
                        .ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid field name"))?;
                    if let Some(v) = inst.fields.get(&key) {
                        return Ok(v);
                    }
                    // Fall back to the type's getters, then its method
                    // table and ancestors.
                    let ty = inst.ty;
                    let (getter, method) = match rt.heap.get(ty) {
                        HeapData::ObjectType(t) => (
                            t.getters.get(&key),
                            t.find_method(&key, |anc| match rt.heap.get(anc) {
                                HeapData::ObjectType(at) => at.methods.get(&key),
                                _ => None,
                            }),
                        ),
                        _ => (None, None),
                    };
                    if let Some(getter) = getter {
                        return crate::invoker::invoke_values(rt, getter, vec![target]);
                    }
                    Ok(method.unwrap_or(Value::Nil))
                }
                HeapData::ObjectType(t) => {
                    let key = key_string(&index, &rt.heap, rt.interns())
                        .ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid member name"))?;
                    if key == "name" {
                        let name = t.name.clone();
                        return Ok(Value::string(name, &mut rt.heap));
                    }
                    Ok(t.methods.get(&key).unwrap_or(Value::Nil))
                }
                HeapData::NamedArgs(na) => {
                    let key = key_string(&index, &rt.heap, rt.interns())
                        .ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid named-argument key"))?;
                    Ok(na.peek(&key, &rt.heap, rt.interns()).unwrap_or(Value::Nil))
                }
                HeapData::Cell(inner) => {
                    let inner = *inner;
                    index_get(rt, inner, index)
                }
                _ => Err(RunError::not_indexable(&target.type_name(&rt.heap))),
            }
        }
        _ => Err(RunError::not_indexable(&target.type_name(&rt.heap))),
    }
}

fn str_index(s: &str, index: &Value) -> RunResult<Value> {
    let n = int_index(index).ok_or_else(|| RunError::new(ErrorKind::IndexType, "string index must be an integer"))?;
    let count = s.chars().count();
    let idx = checked_pos(n, count)?;
    let c = s.chars().nth(idx).expect("index checked against char count");
    Ok(Value::Char(c))
}

/// Index set.
pub(crate) fn index_set(rt: &mut Rt, target: Value, index: Value, value: Value) -> RunResult<()> {
    let Value::Ref(id) = target else {
        return Err(RunError::not_index_assignable(&target.type_name(&rt.heap)));
    };
    let key_str = key_string(&index, &rt.heap, rt.interns());

    // Instance setters run before raw field writes.
    if let HeapData::Instance(inst) = rt.heap.get(id)
        && let Some(key) = key_str.as_deref()
    {
        let ty = inst.ty;
        let setter = match rt.heap.get(ty) {
            HeapData::ObjectType(t) => t.setters.get(key),
            _ => None,
        };
        if let Some(setter) = setter {
            crate::invoker::invoke_values(rt, setter, vec![target, value])?;
            return Ok(());
        }
    }

    match rt.heap.get_mut(id) {
        HeapData::Array(items) => {
            let len = items.len();
            let n =
                int_index(&index).ok_or_else(|| RunError::new(ErrorKind::IndexType, "array index must be an integer"))?;
            let idx = checked_pos(n, len)?;
            items[idx] = value;
            Ok(())
        }
        HeapData::Bytes(b) | HeapData::Buffer(b) => {
            let len = b.len();
            let n =
                int_index(&index).ok_or_else(|| RunError::new(ErrorKind::IndexType, "byte index must be an integer"))?;
            let idx = checked_pos(n, len)?;
            let Value::Int(byte) = value else {
                return Err(RunError::new(ErrorKind::IndexValueType, "byte value must be an integer"));
            };
            b[idx] = u8::try_from(byte)
                .map_err(|_| RunError::new(ErrorKind::UnexpectedArgValue, format!("byte value out of range: {byte}")))?;
            Ok(())
        }
        HeapData::Dict(d) => {
            let key = key_str.ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid dict key"))?;
            d.set(key, value);
            Ok(())
        }
        HeapData::SyncDict(lock) => {
            let key = key_str.ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid dict key"))?;
            let mut guard = lock
                .write()
                .map_err(|_| RunError::new(ErrorKind::Type, "sync dict lock poisoned"))?;
            guard.set(key, value);
            Ok(())
        }
        HeapData::KeyValueArray(a) => {
            // Update the last pair with an equal key, or append.
            let pairs = a.pairs.clone();
            let mut found = None;
            for (i, kv) in pairs.iter().enumerate().rev() {
                if values_equal(&kv.key, &index, &rt.heap, rt.interns()) {
                    found = Some(i);
                    break;
                }
            }
            let HeapData::KeyValueArray(a) = rt.heap.get_mut(id) else {
                unreachable!("slot type cannot change");
            };
            match found {
                Some(i) => a.pairs[i].value = value,
                None => a.pairs.push(KeyValue::new(index, value)),
            }
            Ok(())
        }
        HeapData::Instance(inst) => {
            let key = key_str.ok_or_else(|| RunError::new(ErrorKind::IndexValueType, "invalid field name"))?;
            inst.fields.set(key, value);
            Ok(())
        }
        HeapData::Cell(inner) => {
            let inner = *inner;
            index_set(rt, inner, index, value)
        }
        _ => Err(RunError::not_index_assignable(&target.type_name(&rt.heap))),
    }
}

/// Slice. Open ends arrive as nil; bounds are clamped to the length, and an
/// inverted range is an invalid-index error.
pub(crate) fn slice_index(rt: &mut Rt, target: Value, low: Value, high: Value) -> RunResult<Value> {
    let bound = |v: &Value, default: usize, len: usize| -> RunResult<usize> {
        match v {
            Value::Nil => Ok(default),
            _ => {
                let n = int_index(v).ok_or_else(|| RunError::new(ErrorKind::IndexType, "slice bound must be an integer"))?;
                if n < 0 {
                    return Err(RunError::new(ErrorKind::InvalidIndex, format!("negative slice bound: {n}")));
                }
                Ok(usize::try_from(n).unwrap_or(usize::MAX).min(len))
            }
        }
    };

    if let Some(s) = as_str(&target, &rt.heap, rt.interns()) {
        let chars: Vec<char> = s.chars().collect();
        let (lo, hi) = (bound(&low, 0, chars.len())?, bound(&high, chars.len(), chars.len())?);
        if lo > hi {
            return Err(RunError::new(ErrorKind::InvalidIndex, format!("invalid slice range {lo}:{hi}")));
        }
        let out: String = chars[lo..hi].iter().collect();
        return Ok(Value::string(out, &mut rt.heap));
    }

    let Value::Ref(id) = target else {
        return Err(RunError::not_indexable(&target.type_name(&rt.heap)));
    };
    match rt.heap.get(id) {
        HeapData::Array(items) => {
            let items = items.clone();
            let (lo, hi) = (bound(&low, 0, items.len())?, bound(&high, items.len(), items.len())?);
            if lo > hi {
                return Err(RunError::new(ErrorKind::InvalidIndex, format!("invalid slice range {lo}:{hi}")));
            }
            Ok(Value::Ref(rt.heap.alloc(HeapData::Array(items[lo..hi].to_vec()))))
        }
        HeapData::Bytes(b) | HeapData::Buffer(b) => {
            let b = b.clone();
            let (lo, hi) = (bound(&low, 0, b.len())?, bound(&high, b.len(), b.len())?);
            if lo > hi {
                return Err(RunError::new(ErrorKind::InvalidIndex, format!("invalid slice range {lo}:{hi}")));
            }
            Ok(Value::Ref(rt.heap.alloc(HeapData::Bytes(b[lo..hi].to_vec()))))
        }
        HeapData::KeyValueArray(a) => {
            let pairs = a.pairs.clone();
            let (lo, hi) = (bound(&low, 0, pairs.len())?, bound(&high, pairs.len(), pairs.len())?);
            if lo > hi {
                return Err(RunError::new(ErrorKind::InvalidIndex, format!("invalid slice range {lo}:{hi}")));
            }
            Ok(Value::Ref(
                rt.heap
                    .alloc(HeapData::KeyValueArray(crate::types::KeyValueArray::new(pairs[lo..hi].to_vec()))),
            ))
        }
        _ => Err(RunError::not_indexable(&target.type_name(&rt.heap))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dict;

    #[test]
    fn test_array_get_set() {
        let mut rt = Rt::for_tests();
        let arr = Value::Ref(rt.heap.alloc(HeapData::Array(vec![Value::Int(1), Value::Int(2)])));
        assert!(matches!(index_get(&mut rt, arr, Value::Int(1)), Ok(Value::Int(2))));
        index_set(&mut rt, arr, Value::Int(0), Value::Int(9)).unwrap();
        assert!(matches!(index_get(&mut rt, arr, Value::Int(0)), Ok(Value::Int(9))));
        assert!(index_get(&mut rt, arr, Value::Int(5))
            .unwrap_err()
            .is(ErrorKind::IndexOutOfBounds));
        assert!(index_get(&mut rt, arr, Value::Int(-1))
            .unwrap_err()
            .is(ErrorKind::IndexOutOfBounds));
    }

    #[test]
    fn test_dict_miss_is_nil() {
        let mut rt = Rt::for_tests();
        let d = Value::Ref(rt.heap.alloc(HeapData::Dict(Dict::new())));
        assert!(matches!(index_get(&mut rt, d, Value::Int(1)), Ok(Value::Nil)));
    }

    #[test]
    fn test_string_char_index() {
        let mut rt = Rt::for_tests();
        let s = Value::string("héllo", &mut rt.heap);
        assert!(matches!(index_get(&mut rt, s, Value::Int(1)), Ok(Value::Char('é'))));
    }

    #[test]
    fn test_slice() {
        let mut rt = Rt::for_tests();
        let s = Value::string("hello", &mut rt.heap);
        let sub = slice_index(&mut rt, s, Value::Int(1), Value::Int(3)).unwrap();
        assert_eq!(crate::printer::render_str(&sub, &rt.heap, rt.interns()), "el");
        let open = slice_index(&mut rt, s, Value::Nil, Value::Nil).unwrap();
        assert_eq!(crate::printer::render_str(&open, &rt.heap, rt.interns()), "hello");
        assert!(slice_index(&mut rt, s, Value::Int(3), Value::Int(1))
            .unwrap_err()
            .is(ErrorKind::InvalidIndex));
    }

    #[test]
    fn test_error_members() {
        let mut rt = Rt::for_tests();
        let e = Value::Ref(rt.heap.alloc(HeapData::Error(crate::heap::ErrorValue {
            name: "error".into(),
            message: "boom".into(),
        })));
        let key = Value::string("Message", &mut rt.heap);
        let msg = index_get(&mut rt, e, key).unwrap();
        assert_eq!(crate::printer::render_str(&msg, &rt.heap, rt.interns()), "boom");
    }

    #[test]
    fn test_not_indexable() {
        let mut rt = Rt::for_tests();
        assert!(index_get(&mut rt, Value::Int(1), Value::Int(0))
            .unwrap_err()
            .is(ErrorKind::NotIndexable));
    }
}
