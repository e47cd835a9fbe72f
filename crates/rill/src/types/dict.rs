//! The dictionary type.
//!
//! Dictionaries are string-keyed and preserve insertion order in storage;
//! iteration order is only guaranteed when the `sorted` option is requested,
//! in which case keys are emitted lexicographically.

use indexmap::IndexMap;

use crate::value::Value;

type DictMap = IndexMap<String, Value, ahash::RandomState>;

/// An ordered string-keyed dictionary.
#[derive(Debug, Clone, Default)]
pub(crate) struct Dict {
    map: DictMap,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            map: DictMap::with_capacity_and_hasher(n, ahash::RandomState::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.map.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn set(&mut self, key: String, value: Value) {
        self.map.insert(key, value);
    }

    /// Removes a key, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.map.shift_remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Value)> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Entry by storage position, for index-based iteration that tolerates
    /// concurrent mutation.
    pub fn get_index(&self, index: usize) -> Option<(&str, Value)> {
        self.map.get_index(index).map(|(k, v)| (k.as_str(), *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// Keys in lexicographic order, for the `sorted` iteration option.
    pub fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.map.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_kept() {
        let mut d = Dict::new();
        d.set("b".into(), Value::Int(2));
        d.set("a".into(), Value::Int(1));
        let keys: Vec<&str> = d.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(d.sorted_keys(), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut d = Dict::new();
        d.set("a".into(), Value::Int(1));
        d.set("b".into(), Value::Int(2));
        d.set("c".into(), Value::Int(3));
        d.remove("b");
        let keys: Vec<&str> = d.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }
}
