//! The heap arena.
//!
//! Non-immediate values live in an arena of `HeapData` slots addressed by
//! `HeapId`. Slots stay alive for the lifetime of the runtime that owns the
//! arena and are reclaimed wholesale when it is dropped; captured-local cells
//! are ordinary slots.

use std::sync::RwLock;

use crate::{
    args::NamedArgs,
    bytecode::FuncId,
    types::{
        Decimal, Dict, Instance, KeyValue, KeyValueArray, MethodCaller, ObjectTypeValue, RegexValue, RillIter,
    },
    value::Value,
};

/// Index into the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HeapId(u32);

impl HeapId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A heap-allocated value.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(String),
    RawStr(String),
    Bytes(Vec<u8>),
    Buffer(Vec<u8>),
    Array(Vec<Value>),
    Dict(Dict),
    /// A dictionary behind a read-write lock, safe to share between VMs.
    SyncDict(RwLock<Dict>),
    KeyValue(KeyValue),
    KeyValueArray(KeyValueArray),
    Error(ErrorValue),
    Regex(RegexValue),
    Decimal(Decimal),
    Closure(Closure),
    /// A boxed captured local; closures capture cells, not values.
    Cell(Value),
    BoundMethod(BoundMethod),
    MethodCaller(MethodCaller),
    ObjectType(ObjectTypeValue),
    Instance(Instance),
    Iter(RillIter),
    NamedArgs(NamedArgs),
}

/// A first-class error value, as bound by `catch`.
#[derive(Debug, Clone)]
pub(crate) struct ErrorValue {
    pub name: String,
    pub message: String,
}

/// A compiled function together with the cells it captured.
#[derive(Debug, Clone)]
pub(crate) struct Closure {
    pub func: FuncId,
    pub free: Vec<HeapId>,
}

/// A method bound to its receiver, produced by selector dispatch on values
/// with built-in methods (regex, iterators, errors).
#[derive(Debug, Clone)]
pub(crate) struct BoundMethod {
    pub recv: Value,
    pub name: String,
}

/// The heap arena.
#[derive(Debug, Default)]
pub(crate) struct Heap {
    slots: Vec<HeapData>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a slot, returning its id.
    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        let id = u32::try_from(self.slots.len()).expect("heap exceeds u32 slots");
        self.slots.push(data);
        HeapId(id)
    }

    #[inline]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.slots[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.slots[id.index()]
    }

    /// Replaces a slot's contents, returning the old data. Used by iterator
    /// advancement, which needs to mutate an iterator while also calling
    /// back into the runtime.
    pub fn replace(&mut self, id: HeapId, data: HeapData) -> HeapData {
        std::mem::replace(&mut self.slots[id.index()], data)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_get() {
        let mut heap = Heap::new();
        let a = heap.alloc(HeapData::Str("hi".into()));
        let b = heap.alloc(HeapData::Array(vec![Value::Int(1)]));
        assert_ne!(a, b);
        assert!(matches!(heap.get(a), HeapData::Str(s) if s == "hi"));
        assert!(matches!(heap.get(b), HeapData::Array(items) if items.len() == 1));
    }
}
