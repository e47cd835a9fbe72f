//! The iterator protocol and its adapters.
//!
//! An iterator is a state machine advanced by [`advance`]: each step yields
//! an entry, continues past a filtered slot, or reports done. Iteration
//! state is index-based so the heap stays accessible mid-iteration; to
//! advance an iterator stored on the heap, the VM temporarily takes it out
//! of its slot, advances it, and puts it back.
//!
//! The collect mode records what a generic collection adapter should emit
//! per entry: keys, values, or `[key, value]` pairs.

use crate::{
    error::{RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    invoker,
    run::Rt,
    types::KeyValue,
    value::Value,
};

/// What a collecting adapter emits for each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CollectMode {
    Keys,
    Values,
    Pairs,
}

/// One step of iteration.
#[derive(Debug, Clone, Copy)]
pub(crate) enum IterStep {
    Entry { key: Value, value: Value },
    Done,
}

/// An iterator value.
#[derive(Debug)]
pub(crate) struct RillIter {
    pub kind: IterKind,
    pub collect: CollectMode,
    /// The current entry, readable through the next/key/value facade and
    /// the `IterKey`/`IterValue` opcodes.
    pub cur_key: Value,
    pub cur_value: Value,
    pub done: bool,
}

#[derive(Debug)]
pub(crate) enum IterKind {
    Empty,
    Array { id: HeapId, pos: usize },
    /// Strings are copied at init for byte-offset char iteration.
    Str { s: String, byte: usize, index: usize },
    Bytes { id: HeapId, pos: usize },
    Dict { id: HeapId, pos: usize },
    /// Key-snapshot iteration for the `sorted` option on plain dicts.
    DictKeys { id: HeapId, keys: Vec<String>, pos: usize },
    /// Point-in-time entry snapshot, cloned under a sync dict's read lock
    /// so the whole iteration observes one consistent view.
    DictSnapshot { entries: Vec<(String, Value)>, pos: usize },
    KeyValueArray { id: HeapId, pos: usize },
    Range { cur: i64, stop: i64, step: i64, index: i64 },
    Filter { base: Box<RillIter>, pred: Value },
    Map { base: Box<RillIter>, func: Value, update: bool, src: Value },
    Enumerate { base: Box<RillIter>, count: i64 },
    Zip { children: Vec<RillIter>, at: usize, count: i64 },
}

impl RillIter {
    fn with_kind(kind: IterKind) -> Self {
        Self {
            kind,
            collect: CollectMode::Values,
            cur_key: Value::Nil,
            cur_value: Value::Nil,
            done: false,
        }
    }

    /// An exhausted placeholder, used when taking an iterator out of its
    /// heap slot.
    pub fn empty() -> Self {
        let mut it = Self::with_kind(IterKind::Empty);
        it.done = true;
        it
    }

    /// Creates an iterator over a value, honoring the `sorted` option for
    /// dicts. Fails with not-iterable for values without the capability.
    pub fn over(v: Value, heap: &Heap, interns: &Interns, sorted: bool) -> RunResult<Self> {
        let kind = match v {
            Value::Str(id) => IterKind::Str {
                s: interns.get(id).to_owned(),
                byte: 0,
                index: 0,
            },
            Value::Ref(id) => match heap.get(id) {
                HeapData::Str(s) | HeapData::RawStr(s) => IterKind::Str {
                    s: s.clone(),
                    byte: 0,
                    index: 0,
                },
                HeapData::Bytes(_) | HeapData::Buffer(_) => IterKind::Bytes { id, pos: 0 },
                HeapData::Array(_) => IterKind::Array { id, pos: 0 },
                HeapData::Dict(d) => {
                    if sorted {
                        IterKind::DictKeys {
                            id,
                            keys: d.sorted_keys(),
                            pos: 0,
                        }
                    } else {
                        IterKind::Dict { id, pos: 0 }
                    }
                }
                HeapData::SyncDict(lock) => {
                    // The read lock covers the whole clone, so the
                    // iteration runs over one consistent point-in-time
                    // view of the dict.
                    let guard = lock.read().map_err(|_| RunError::new(crate::error::ErrorKind::Type, "sync dict lock poisoned"))?;
                    let mut entries: Vec<(String, Value)> = guard.iter().map(|(k, v)| (k.to_owned(), v)).collect();
                    if sorted {
                        entries.sort_by(|a, b| a.0.cmp(&b.0));
                    }
                    IterKind::DictSnapshot { entries, pos: 0 }
                }
                HeapData::KeyValueArray(_) => IterKind::KeyValueArray { id, pos: 0 },
                _ => return Err(RunError::not_iterable(&v.type_name(heap))),
            },
            _ => return Err(RunError::not_iterable(&v.type_name(heap))),
        };
        Ok(Self::with_kind(kind))
    }

    pub fn range(start: i64, stop: i64, step: i64) -> Self {
        Self::with_kind(IterKind::Range {
            cur: start,
            stop,
            step,
            index: 0,
        })
    }

    pub fn filter(base: Self, pred: Value) -> Self {
        Self::with_kind(IterKind::Filter {
            base: Box::new(base),
            pred,
        })
    }

    pub fn map(base: Self, func: Value, update: bool, src: Value) -> Self {
        Self::with_kind(IterKind::Map {
            base: Box::new(base),
            func,
            update,
            src,
        })
    }

    /// Enumerate pairs each entry's key and value into a nested key-value
    /// entry keyed by a running counter, and collects as pairs.
    pub fn enumerate(base: Self) -> Self {
        let mut it = Self::with_kind(IterKind::Enumerate {
            base: Box::new(base),
            count: 0,
        });
        it.collect = CollectMode::Pairs;
        it
    }

    pub fn zip(children: Vec<Self>) -> Self {
        Self::with_kind(IterKind::Zip {
            children,
            at: 0,
            count: 0,
        })
    }
}

/// Internal step result; `Continue` marks a filtered-out slot.
enum RawStep {
    Entry { key: Value, value: Value },
    Continue,
    Done,
}

/// Advances an iterator, skipping filtered slots, and records the current
/// entry on the iterator.
pub(crate) fn advance(rt: &mut Rt, iter: &mut RillIter) -> RunResult<IterStep> {
    loop {
        match raw_next(rt, iter)? {
            RawStep::Continue => {}
            RawStep::Done => {
                iter.done = true;
                return Ok(IterStep::Done);
            }
            RawStep::Entry { key, value } => {
                iter.cur_key = key;
                iter.cur_value = value;
                return Ok(IterStep::Entry { key, value });
            }
        }
    }
}

fn raw_next(rt: &mut Rt, iter: &mut RillIter) -> RunResult<RawStep> {
    match &mut iter.kind {
        IterKind::Empty => Ok(RawStep::Done),
        IterKind::Array { id, pos } => {
            let HeapData::Array(items) = rt.heap.get(*id) else {
                return Ok(RawStep::Done);
            };
            match items.get(*pos).copied() {
                Some(v) => {
                    let key = Value::Int(i64::try_from(*pos).unwrap_or(i64::MAX));
                    *pos += 1;
                    Ok(RawStep::Entry { key, value: v })
                }
                None => Ok(RawStep::Done),
            }
        }
        IterKind::Str { s, byte, index } => match s[*byte..].chars().next() {
            Some(c) => {
                let key = Value::Int(i64::try_from(*index).unwrap_or(i64::MAX));
                *byte += c.len_utf8();
                *index += 1;
                Ok(RawStep::Entry {
                    key,
                    value: Value::Char(c),
                })
            }
            None => Ok(RawStep::Done),
        },
        IterKind::Bytes { id, pos } => {
            let (HeapData::Bytes(b) | HeapData::Buffer(b)) = rt.heap.get(*id) else {
                return Ok(RawStep::Done);
            };
            match b.get(*pos).copied() {
                Some(byte) => {
                    let key = Value::Int(i64::try_from(*pos).unwrap_or(i64::MAX));
                    *pos += 1;
                    Ok(RawStep::Entry {
                        key,
                        value: Value::Int(i64::from(byte)),
                    })
                }
                None => Ok(RawStep::Done),
            }
        }
        IterKind::Dict { id, pos } => {
            let HeapData::Dict(d) = rt.heap.get(*id) else {
                return Ok(RawStep::Done);
            };
            match d.get_index(*pos) {
                Some((k, v)) => {
                    let k = k.to_owned();
                    let key = Value::string(k, &mut rt.heap);
                    *pos += 1;
                    Ok(RawStep::Entry { key, value: v })
                }
                None => Ok(RawStep::Done),
            }
        }
        IterKind::DictKeys { id, keys, pos } => loop {
            let Some(k) = keys.get(*pos) else {
                return Ok(RawStep::Done);
            };
            let looked_up = match rt.heap.get(*id) {
                HeapData::Dict(d) => d.get(k),
                _ => None,
            };
            match looked_up {
                Some(v) => {
                    let key = Value::string(k.clone(), &mut rt.heap);
                    *pos += 1;
                    return Ok(RawStep::Entry { key, value: v });
                }
                // Key removed since the snapshot: continue past the slot.
                None => *pos += 1,
            }
        },
        IterKind::DictSnapshot { entries, pos } => match entries.get(*pos) {
            Some((k, v)) => {
                let v = *v;
                let key = Value::string(k.clone(), &mut rt.heap);
                *pos += 1;
                Ok(RawStep::Entry { key, value: v })
            }
            None => Ok(RawStep::Done),
        },
        IterKind::KeyValueArray { id, pos } => {
            let HeapData::KeyValueArray(a) = rt.heap.get(*id) else {
                return Ok(RawStep::Done);
            };
            match a.pairs.get(*pos).copied() {
                Some(kv) => {
                    *pos += 1;
                    Ok(RawStep::Entry {
                        key: kv.key,
                        value: kv.value,
                    })
                }
                None => Ok(RawStep::Done),
            }
        }
        IterKind::Range { cur, stop, step, index } => {
            let more = if *step >= 0 { *cur < *stop } else { *cur > *stop };
            if !more {
                return Ok(RawStep::Done);
            }
            let entry = RawStep::Entry {
                key: Value::Int(*index),
                value: Value::Int(*cur),
            };
            *cur += *step;
            *index += 1;
            Ok(entry)
        }
        IterKind::Filter { base, pred } => {
            let pred = *pred;
            match advance_boxed(rt, base)? {
                IterStep::Done => Ok(RawStep::Done),
                IterStep::Entry { key, value } => {
                    let result = invoker::invoke_values(rt, pred, vec![value])?;
                    if result.is_falsy(&rt.heap, rt.interns()) {
                        Ok(RawStep::Continue)
                    } else {
                        Ok(RawStep::Entry { key, value })
                    }
                }
            }
        }
        IterKind::Map { base, func, update, src } => {
            let (func, update, src) = (*func, *update, *src);
            match advance_boxed(rt, base)? {
                IterStep::Done => Ok(RawStep::Done),
                IterStep::Entry { key, value } => {
                    let mapped = invoker::invoke_values(rt, func, vec![value])?;
                    if update {
                        crate::vm::index::index_set(rt, src, key, mapped)?;
                    }
                    Ok(RawStep::Entry { key, value: mapped })
                }
            }
        }
        IterKind::Enumerate { base, count } => match advance_boxed(rt, base)? {
            IterStep::Done => Ok(RawStep::Done),
            IterStep::Entry { key, value } => {
                let n = *count;
                *count += 1;
                let pair = Value::Ref(rt.heap.alloc(HeapData::KeyValue(KeyValue::new(key, value))));
                Ok(RawStep::Entry {
                    key: Value::Int(n),
                    value: pair,
                })
            }
        },
        IterKind::Zip { children, at, count } => {
            while *at < children.len() {
                let child_index = *at;
                let child = &mut children[child_index];
                match advance(rt, child)? {
                    IterStep::Done => *at += 1,
                    IterStep::Entry { value, .. } => {
                        let n = *count;
                        *count += 1;
                        let index_value = Value::Int(i64::try_from(child_index).unwrap_or(i64::MAX));
                        let pair = Value::Ref(rt.heap.alloc(HeapData::Array(vec![index_value, value])));
                        return Ok(RawStep::Entry {
                            key: Value::Int(n),
                            value: pair,
                        });
                    }
                }
            }
            Ok(RawStep::Done)
        }
    }
}

fn advance_boxed(rt: &mut Rt, base: &mut RillIter) -> RunResult<IterStep> {
    advance(rt, base)
}

/// Advances an iterator stored on the heap, taking it out of its slot for
/// the duration so callbacks can reach the heap.
pub(crate) fn advance_on_heap(rt: &mut Rt, id: HeapId) -> RunResult<IterStep> {
    let taken = rt.heap.replace(id, HeapData::Iter(RillIter::empty()));
    let mut iter = match taken {
        HeapData::Iter(iter) => iter,
        other => {
            rt.heap.replace(id, other);
            return Err(RunError::new(crate::error::ErrorKind::Type, "value is not an iterator"));
        }
    };
    let result = advance(rt, &mut iter);
    rt.heap.replace(id, HeapData::Iter(iter));
    result
}

/// Collects every remaining entry per the iterator's collect mode.
pub(crate) fn collect(rt: &mut Rt, iter: &mut RillIter) -> RunResult<Vec<Value>> {
    let mut out = Vec::new();
    loop {
        match advance(rt, iter)? {
            IterStep::Done => return Ok(out),
            IterStep::Entry { key, value } => match iter.collect {
                CollectMode::Keys => out.push(key),
                CollectMode::Values => out.push(value),
                CollectMode::Pairs => {
                    out.push(Value::Ref(rt.heap.alloc(HeapData::Array(vec![key, value]))));
                }
            },
        }
    }
}
