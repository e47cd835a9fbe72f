//! The runtime value representation.
//!
//! Small immediate values are stored inline; everything else lives in the
//! heap arena and is referenced via `Ref(HeapId)`. The enum is `Copy`:
//! copying a value copies the handle, never the heap data, so assignment
//! aliases in the manner of the language's object semantics.

use std::borrow::Cow;

use crate::{
    builtins::Builtin,
    bytecode::FuncId,
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StringId},
    types::{Decimal, Type},
};

/// Depth bound for recursive structural equality, so cyclic values cannot
/// blow the native stack. Structures deeper than this compare unequal.
const MAX_EQ_DEPTH: usize = 64;

/// A first-class value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    /// Internal sentinel for absent named-parameter slots; never observable
    /// from scripts except through the default-materialisation prelude.
    Undefined,
    Nil,
    Bool(bool),
    /// The `yes`/`no` flag singletons.
    Flag(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Char(char),
    /// An interned string literal.
    Str(StringId),
    Builtin(Builtin),
    /// A compiled function without captured variables.
    Func(FuncId),
    Ref(HeapId),
}

impl Value {
    /// The value's type tag.
    pub fn type_tag(&self, heap: &Heap) -> Type {
        match self {
            Self::Undefined => Type::Undefined,
            Self::Nil => Type::Nil,
            Self::Bool(_) => Type::Bool,
            Self::Flag(_) => Type::Flag,
            Self::Int(_) => Type::Int,
            Self::Uint(_) => Type::Uint,
            Self::Float(_) => Type::Float,
            Self::Char(_) => Type::Char,
            Self::Str(_) => Type::Str,
            Self::Builtin(_) => Type::Builtin,
            Self::Func(_) => Type::Func,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(_) => Type::Str,
                HeapData::RawStr(_) => Type::RawStr,
                HeapData::Bytes(_) => Type::Bytes,
                HeapData::Buffer(_) => Type::Buffer,
                HeapData::Array(_) => Type::Array,
                HeapData::Dict(_) => Type::Dict,
                HeapData::SyncDict(_) => Type::SyncDict,
                HeapData::KeyValue(_) => Type::KeyValue,
                HeapData::KeyValueArray(_) => Type::KeyValueArray,
                HeapData::Error(_) => Type::Error,
                HeapData::Regex(_) => Type::Regex,
                HeapData::Decimal(_) => Type::Decimal,
                HeapData::Closure(_) | HeapData::BoundMethod(_) => Type::Func,
                HeapData::Cell(v) => v.type_tag(heap),
                HeapData::MethodCaller(_) => Type::MethodCaller,
                HeapData::ObjectType(_) => Type::ObjectType,
                HeapData::Instance(_) => Type::Instance,
                HeapData::Iter(_) => Type::Iterator,
                HeapData::NamedArgs(_) => Type::NamedArgs,
            },
        }
    }

    /// The type name used in error messages and by `typeName`. Instances
    /// report their object type's own name.
    pub fn type_name(&self, heap: &Heap) -> Cow<'static, str> {
        if let Self::Ref(id) = self
            && let HeapData::Instance(inst) = heap.get(*id)
            && let HeapData::ObjectType(ty) = heap.get(inst.ty)
        {
            return Cow::Owned(ty.name.clone());
        }
        Cow::Borrowed(self.type_tag(heap).into())
    }

    /// Truthiness. Errors are falsy; empty collections and zero numbers are
    /// falsy; everything else is truthy.
    pub fn is_falsy(&self, heap: &Heap, interns: &Interns) -> bool {
        match self {
            Self::Undefined | Self::Nil => true,
            Self::Bool(b) | Self::Flag(b) => !b,
            Self::Int(v) => *v == 0,
            Self::Uint(v) => *v == 0,
            Self::Float(v) => *v == 0.0,
            Self::Char(c) => *c == '\0',
            Self::Str(id) => interns.get(*id).is_empty(),
            Self::Builtin(_) | Self::Func(_) => false,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) | HeapData::RawStr(s) => s.is_empty(),
                HeapData::Bytes(b) | HeapData::Buffer(b) => b.is_empty(),
                HeapData::Array(items) => items.is_empty(),
                HeapData::Dict(d) => d.is_empty(),
                HeapData::SyncDict(d) => d.read().map(|d| d.is_empty()).unwrap_or(true),
                HeapData::KeyValueArray(a) => a.is_empty(),
                HeapData::Error(_) => true,
                HeapData::Decimal(d) => d.is_zero(),
                HeapData::Cell(v) => v.is_falsy(heap, interns),
                HeapData::NamedArgs(na) => na.is_empty(),
                _ => false,
            },
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Allocates a runtime string value.
    pub fn string(s: impl Into<String>, heap: &mut Heap) -> Self {
        Self::Ref(heap.alloc(HeapData::Str(s.into())))
    }
}

/// Resolves a value to string content, whether interned or heap-allocated.
pub(crate) fn as_str<'a>(v: &Value, heap: &'a Heap, interns: &'a Interns) -> Option<&'a str> {
    match v {
        Value::Str(id) => Some(interns.get(*id)),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) | HeapData::RawStr(s) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

/// Converts a value to a dictionary key. Strings, chars, ints, uints and
/// bools are accepted; everything else is an index-value-type error at the
/// call site.
pub(crate) fn key_string(v: &Value, heap: &Heap, interns: &Interns) -> Option<String> {
    match v {
        Value::Str(id) => Some(interns.get(*id).to_owned()),
        Value::Char(c) => Some(c.to_string()),
        Value::Int(n) => Some(n.to_string()),
        Value::Uint(n) => Some(format!("{n}")),
        Value::Bool(b) => Some(b.to_string()),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) | HeapData::RawStr(s) => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Structural equality.
///
/// Numeric values compare across tags; strings compare by content whether
/// interned or heap-allocated; collections compare element-wise; callables,
/// iterators and types compare by identity.
pub(crate) fn values_equal(a: &Value, b: &Value, heap: &Heap, interns: &Interns) -> bool {
    values_equal_at(a, b, heap, interns, 0)
}

fn values_equal_at(a: &Value, b: &Value, heap: &Heap, interns: &Interns, depth: usize) -> bool {
    if depth > MAX_EQ_DEPTH {
        return false;
    }
    // Identity fast path for heap values.
    if let (Value::Ref(ia), Value::Ref(ib)) = (a, b)
        && ia == ib
    {
        return true;
    }

    // Strings by content across representations.
    if let (Some(sa), Some(sb)) = (as_str(a, heap, interns), as_str(b, heap, interns)) {
        return sa == sb;
    }

    // Numeric cross-tag comparison.
    if let (Some(na), Some(nb)) = (numeric_operand(a, heap), numeric_operand(b, heap)) {
        return numeric_eq(&na, &nb);
    }

    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Nil, Value::Nil) => true,
        (Value::Bool(x) | Value::Flag(x), Value::Bool(y) | Value::Flag(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Func(x), Value::Func(y)) => x == y,
        (Value::Ref(ia), Value::Ref(ib)) => match (heap.get(*ia), heap.get(*ib)) {
            (HeapData::Bytes(x) | HeapData::Buffer(x), HeapData::Bytes(y) | HeapData::Buffer(y)) => x == y,
            (HeapData::Array(x), HeapData::Array(y)) => {
                x.len() == y.len()
                    && x.iter()
                        .zip(y.iter())
                        .all(|(va, vb)| values_equal_at(va, vb, heap, interns, depth + 1))
            }
            (HeapData::Dict(x), HeapData::Dict(y)) => dicts_equal(x, y, heap, interns, depth),
            (HeapData::KeyValue(x), HeapData::KeyValue(y)) => {
                values_equal_at(&x.key, &y.key, heap, interns, depth + 1)
                    && values_equal_at(&x.value, &y.value, heap, interns, depth + 1)
            }
            (HeapData::KeyValueArray(x), HeapData::KeyValueArray(y)) => {
                x.pairs.len() == y.pairs.len()
                    && x.pairs.iter().zip(y.pairs.iter()).all(|(pa, pb)| {
                        values_equal_at(&pa.key, &pb.key, heap, interns, depth + 1)
                            && values_equal_at(&pa.value, &pb.value, heap, interns, depth + 1)
                    })
            }
            (HeapData::Error(x), HeapData::Error(y)) => x.name == y.name && x.message == y.message,
            (HeapData::Regex(x), HeapData::Regex(y)) => x.pattern == y.pattern,
            (HeapData::Instance(x), HeapData::Instance(y)) => {
                x.ty == y.ty && dicts_equal(&x.fields, &y.fields, heap, interns, depth)
            }
            // Everything else (closures, iterators, types, sync dicts)
            // compares by identity, which the fast path above already
            // handled.
            _ => false,
        },
        _ => false,
    }
}

fn dicts_equal(x: &crate::types::Dict, y: &crate::types::Dict, heap: &Heap, interns: &Interns, depth: usize) -> bool {
    x.len() == y.len()
        && x.iter().all(|(k, va)| match y.get(k) {
            Some(vb) => values_equal_at(&va, &vb, heap, interns, depth + 1),
            None => false,
        })
}

/// A numeric operand extracted for cross-tag arithmetic and comparison.
#[derive(Debug, Clone)]
pub(crate) enum Num {
    Int(i64),
    Uint(u64),
    Float(f64),
    Decimal(Decimal),
}

/// Extracts the numeric view of a value, if it has one. Chars participate
/// in arithmetic as their code points.
pub(crate) fn numeric_operand(v: &Value, heap: &Heap) -> Option<Num> {
    match v {
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Uint(n) => Some(Num::Uint(*n)),
        Value::Float(n) => Some(Num::Float(*n)),
        Value::Char(c) => Some(Num::Int(i64::from(u32::from(*c)))),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Decimal(d) => Some(Num::Decimal(d.clone())),
            _ => None,
        },
        _ => None,
    }
}

fn numeric_eq(a: &Num, b: &Num) -> bool {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x == y,
        (Num::Uint(x), Num::Uint(y)) => x == y,
        (Num::Float(x), Num::Float(y)) => x == y,
        (Num::Int(x), Num::Uint(y)) | (Num::Uint(y), Num::Int(x)) => *x >= 0 && u64::try_from(*x) == Ok(*y),
        (Num::Int(x), Num::Float(y)) | (Num::Float(y), Num::Int(x)) => (*x as f64) == *y,
        (Num::Uint(x), Num::Float(y)) | (Num::Float(y), Num::Uint(x)) => (*x as f64) == *y,
        (Num::Decimal(x), Num::Decimal(y)) => x == y,
        (Num::Decimal(d), other) | (other, Num::Decimal(d)) => match promote_to_decimal(other) {
            Some(o) => *d == o,
            None => false,
        },
    }
}

/// Promotes a non-decimal numeric operand to decimal.
pub(crate) fn promote_to_decimal(n: &Num) -> Option<Decimal> {
    match n {
        Num::Int(v) => Some(Decimal::from_i64(*v)),
        Num::Uint(v) => Some(Decimal::from_u64(*v)),
        Num::Float(v) => Decimal::from_f64(*v),
        Num::Decimal(d) => Some(d.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_tag_numeric_equality() {
        let heap = Heap::new();
        let interns = Interns::new();
        assert!(values_equal(&Value::Int(3), &Value::Uint(3), &heap, &interns));
        assert!(values_equal(&Value::Int(3), &Value::Float(3.0), &heap, &interns));
        assert!(!values_equal(&Value::Int(-1), &Value::Uint(u64::MAX), &heap, &interns));
        assert!(values_equal(&Value::Char('a'), &Value::Int(97), &heap, &interns));
    }

    #[test]
    fn test_string_equality_across_representations() {
        let mut heap = Heap::new();
        let mut interns = Interns::new();
        let interned = Value::Str(interns.intern("abc"));
        let heaped = Value::string("abc", &mut heap);
        assert!(values_equal(&interned, &heaped, &heap, &interns));
    }

    #[test]
    fn test_array_equality_is_structural() {
        let mut heap = Heap::new();
        let interns = Interns::new();
        let a = Value::Ref(heap.alloc(HeapData::Array(vec![Value::Int(1), Value::Int(2)])));
        let b = Value::Ref(heap.alloc(HeapData::Array(vec![Value::Int(1), Value::Int(2)])));
        assert!(values_equal(&a, &b, &heap, &interns));
    }

    #[test]
    fn test_falsiness() {
        let mut heap = Heap::new();
        let interns = Interns::new();
        assert!(Value::Nil.is_falsy(&heap, &interns));
        assert!(Value::Int(0).is_falsy(&heap, &interns));
        assert!(!Value::Int(1).is_falsy(&heap, &interns));
        let empty = Value::Ref(heap.alloc(HeapData::Array(vec![])));
        assert!(empty.is_falsy(&heap, &interns));
        let err = Value::Ref(heap.alloc(HeapData::Error(crate::heap::ErrorValue {
            name: "error".into(),
            message: "m".into(),
        })));
        assert!(err.is_falsy(&heap, &interns));
    }
}
