//! The host-facing value representation.
//!
//! `Object` is self-contained (no heap handles), so run results and globals
//! can cross the runtime boundary. Opaque values (functions, iterators,
//! types) surface as their rendering.

use std::fmt::{self, Display};

use crate::{
    heap::{Heap, HeapData},
    intern::Interns,
    printer,
    types::{Decimal, Dict, KeyValue, KeyValueArray},
    value::Value,
};

/// Conversion depth bound; cyclic structures cut off with `Opaque`.
const MAX_DEPTH: usize = 64;

/// A self-contained value for host code.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Nil,
    Bool(bool),
    /// The `yes`/`no` flag singletons.
    Flag(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
    /// Canonical decimal rendering.
    Decimal(String),
    Array(Vec<Object>),
    Dict(Vec<(String, Object)>),
    KeyValue(Box<Object>, Box<Object>),
    KeyValueArray(Vec<(Object, Object)>),
    Error { name: String, message: String },
    /// Functions, iterators, types and other handles, by rendering.
    Opaque(String),
}

impl Object {
    pub(crate) fn from_value(v: &Value, heap: &Heap, interns: &Interns) -> Self {
        Self::convert(v, heap, interns, 0)
    }

    fn convert(v: &Value, heap: &Heap, interns: &Interns, depth: usize) -> Self {
        if depth > MAX_DEPTH {
            return Self::Opaque("...".to_owned());
        }
        match v {
            Value::Undefined | Value::Nil => Self::Nil,
            Value::Bool(b) => Self::Bool(*b),
            Value::Flag(b) => Self::Flag(*b),
            Value::Int(n) => Self::Int(*n),
            Value::Uint(n) => Self::Uint(*n),
            Value::Float(f) => Self::Float(*f),
            Value::Char(c) => Self::Char(*c),
            Value::Str(id) => Self::Str(interns.get(*id).to_owned()),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) | HeapData::RawStr(s) => Self::Str(s.clone()),
                HeapData::Bytes(b) | HeapData::Buffer(b) => Self::Bytes(b.clone()),
                HeapData::Decimal(d) => Self::Decimal(d.to_string()),
                HeapData::Array(items) => {
                    Self::Array(items.iter().map(|v| Self::convert(v, heap, interns, depth + 1)).collect())
                }
                HeapData::Dict(d) => Self::Dict(
                    d.iter()
                        .map(|(k, v)| (k.to_owned(), Self::convert(&v, heap, interns, depth + 1)))
                        .collect(),
                ),
                HeapData::SyncDict(lock) => match lock.read() {
                    Ok(guard) => Self::Dict(
                        guard
                            .iter()
                            .map(|(k, v)| (k.to_owned(), Self::convert(&v, heap, interns, depth + 1)))
                            .collect(),
                    ),
                    Err(_) => Self::Opaque("syncDict".to_owned()),
                },
                HeapData::KeyValue(kv) => Self::KeyValue(
                    Box::new(Self::convert(&kv.key, heap, interns, depth + 1)),
                    Box::new(Self::convert(&kv.value, heap, interns, depth + 1)),
                ),
                HeapData::KeyValueArray(a) => Self::KeyValueArray(
                    a.pairs
                        .iter()
                        .map(|kv| {
                            (
                                Self::convert(&kv.key, heap, interns, depth + 1),
                                Self::convert(&kv.value, heap, interns, depth + 1),
                            )
                        })
                        .collect(),
                ),
                HeapData::Error(e) => Self::Error {
                    name: e.name.clone(),
                    message: e.message.clone(),
                },
                HeapData::Cell(inner) => Self::convert(inner, heap, interns, depth + 1),
                _ => Self::Opaque(printer::render_repr(v, heap, interns)),
            },
            Value::Builtin(_) | Value::Func(_) => Self::Opaque(printer::render_repr(v, heap, interns)),
        }
    }

    /// Converts into a runtime value, allocating on the given heap.
    pub(crate) fn into_value(self, heap: &mut Heap) -> Value {
        match self {
            Self::Nil => Value::Nil,
            Self::Bool(b) => Value::Bool(b),
            Self::Flag(b) => Value::Flag(b),
            Self::Int(n) => Value::Int(n),
            Self::Uint(n) => Value::Uint(n),
            Self::Float(f) => Value::Float(f),
            Self::Char(c) => Value::Char(c),
            Self::Str(s) => Value::string(s, heap),
            Self::Bytes(b) => Value::Ref(heap.alloc(HeapData::Bytes(b))),
            Self::Decimal(s) => match Decimal::parse(&s) {
                Some(d) => Value::Ref(heap.alloc(HeapData::Decimal(d))),
                None => Value::Nil,
            },
            Self::Array(items) => {
                let values: Vec<Value> = items.into_iter().map(|o| o.into_value(heap)).collect();
                Value::Ref(heap.alloc(HeapData::Array(values)))
            }
            Self::Dict(entries) => {
                let mut d = Dict::with_capacity(entries.len());
                for (k, v) in entries {
                    let value = v.into_value(heap);
                    d.set(k, value);
                }
                Value::Ref(heap.alloc(HeapData::Dict(d)))
            }
            Self::KeyValue(k, v) => {
                let key = k.into_value(heap);
                let value = v.into_value(heap);
                Value::Ref(heap.alloc(HeapData::KeyValue(KeyValue::new(key, value))))
            }
            Self::KeyValueArray(pairs) => {
                let pairs = pairs
                    .into_iter()
                    .map(|(k, v)| {
                        let key = k.into_value(heap);
                        let value = v.into_value(heap);
                        KeyValue::new(key, value)
                    })
                    .collect();
                Value::Ref(heap.alloc(HeapData::KeyValueArray(KeyValueArray::new(pairs))))
            }
            Self::Error { name, message } => {
                Value::Ref(heap.alloc(HeapData::Error(crate::heap::ErrorValue { name, message })))
            }
            Self::Opaque(_) => Value::Nil,
        }
    }
}

impl Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Flag(b) => write!(f, "{}", if *b { "yes" } else { "no" }),
            Self::Int(n) => write!(f, "{n}"),
            Self::Uint(n) => write!(f, "{n}"),
            Self::Float(v) => write!(f, "{}", printer::format_float(*v)),
            Self::Char(c) => write!(f, "{c}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Bytes(b) => {
                write!(f, "bytes[")?;
                for (i, byte) in b.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{byte}")?;
                }
                write!(f, "]")
            }
            Self::Decimal(s) => write!(f, "{s}"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::KeyValue(k, v) => write!(f, "{k}={v}"),
            Self::KeyValueArray(pairs) => {
                write!(f, "(;")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                write!(f, ")")
            }
            Self::Error { name, message } => write!(f, "{name}: {message}"),
            Self::Opaque(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_array() {
        let mut heap = Heap::new();
        let interns = Interns::new();
        let obj = Object::Array(vec![Object::Int(1), Object::Str("x".into())]);
        let v = obj.clone().into_value(&mut heap);
        assert_eq!(Object::from_value(&v, &heap, &interns), obj);
    }

    #[test]
    fn test_display() {
        let obj = Object::Array(vec![Object::Int(2), Object::Int(1)]);
        assert_eq!(obj.to_string(), "[2, 1]");
    }
}
