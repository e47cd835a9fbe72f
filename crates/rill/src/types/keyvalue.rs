//! Key-value pairs and key-value arrays.
//!
//! A key-value pair whose value is the `yes` flag singleton is a "flag pair"
//! and serializes without an explicit value. A key-value array preserves
//! insertion order.

use crate::value::Value;

/// A single key-value pair.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyValue {
    pub key: Value,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: Value, value: Value) -> Self {
        Self { key, value }
    }

    /// True when the value is the `yes` singleton (flag shorthand).
    #[must_use]
    pub fn is_flag(&self) -> bool {
        matches!(self.value, Value::Flag(true))
    }
}

/// An ordered array of key-value pairs.
#[derive(Debug, Clone, Default)]
pub(crate) struct KeyValueArray {
    pub pairs: Vec<KeyValue>,
}

impl KeyValueArray {
    pub fn new(pairs: Vec<KeyValue>) -> Self {
        Self { pairs }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
