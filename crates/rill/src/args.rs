//! Positional and named call arguments.
//!
//! `Args` is a sequence of value groups: the double nesting lets a caller
//! splat whole groups without copying the underlying storage. `NamedArgs`
//! is an ordered collection of key-value pairs organised into source groups
//! with last-source-wins resolution and read tracking.

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;

use crate::{
    error::{ErrorKind, RunError, RunResult},
    heap::Heap,
    intern::Interns,
    typeassert::TypeAssertion,
    types::{Dict, KeyValue},
    value::{Value, key_string},
};

/// A positional argument spec for `Args::destructure`.
#[derive(Debug)]
pub(crate) struct ArgSpec<'n> {
    pub name: &'n str,
    pub assert: TypeAssertion,
    /// Filled by destructuring.
    pub value: Value,
}

impl<'n> ArgSpec<'n> {
    pub fn new(name: &'n str, assert: TypeAssertion) -> Self {
        Self {
            name,
            assert,
            value: Value::Undefined,
        }
    }
}

/// Positional arguments: a sequence of sequences of values.
#[derive(Debug, Clone, Default)]
pub(crate) struct Args {
    groups: SmallVec<[Vec<Value>; 2]>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(values: Vec<Value>) -> Self {
        let mut groups = SmallVec::new();
        groups.push(values);
        Self { groups }
    }

    /// Appends a group, used for splatted argument arrays.
    pub fn push_group(&mut self, values: Vec<Value>) {
        self.groups.push(values);
    }

    /// Flattened length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes one value from the head, crossing group boundaries.
    pub fn shift(&mut self) -> Option<Value> {
        for group in &mut self.groups {
            if !group.is_empty() {
                return Some(group.remove(0));
            }
        }
        None
    }

    /// The i-th value in the flattened view.
    #[must_use]
    pub fn get(&self, mut index: usize) -> Option<Value> {
        for group in &self.groups {
            if index < group.len() {
                return Some(group[index]);
            }
            index -= group.len();
        }
        None
    }

    /// Visits every value in order.
    pub fn walk(&self, mut cb: impl FnMut(Value)) {
        for group in &self.groups {
            for v in group {
                cb(*v);
            }
        }
    }

    pub fn to_vec(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(self.len());
        self.walk(|v| out.push(v));
        out
    }

    /// Pops values into the specs in order, validating each through its
    /// type assertion. The argument count must match the spec count.
    pub fn destructure(&mut self, specs: &mut [ArgSpec<'_>], heap: &Heap) -> RunResult<()> {
        if self.len() != specs.len() {
            return Err(RunError::wrong_num_args(specs.len(), self.len()));
        }
        for (i, spec) in specs.iter_mut().enumerate() {
            let v = self.shift().expect("length checked above");
            if !spec.assert.accepts(&v, heap) {
                return Err(RunError::new(
                    ErrorKind::ArgumentType,
                    format!(
                        "argument '{}' (#{}): expected {}, found {}",
                        spec.name,
                        i + 1,
                        spec.assert.expected(),
                        v.type_name(heap)
                    ),
                ));
            }
            spec.value = v;
        }
        Ok(())
    }
}

/// A named argument spec for `NamedArgs::get`/`get_var`.
#[derive(Debug)]
pub(crate) struct NamedArgSpec<'n> {
    pub name: &'n str,
    pub assert: TypeAssertion,
    /// Default producer for absent slots.
    pub default: Option<fn() -> Value>,
    /// Filled by extraction.
    pub value: Value,
}

impl<'n> NamedArgSpec<'n> {
    pub fn new(name: &'n str, assert: TypeAssertion) -> Self {
        Self {
            name,
            assert,
            default: None,
            value: Value::Undefined,
        }
    }

    pub fn with_default(mut self, default: fn() -> Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Named arguments: key-value pairs grouped by source.
///
/// Each source is a separate contribution (the call site's inline named
/// arguments, a splatted `**` argument, ...). Resolution is
/// last-source-wins; walks and `unread_pairs` preserve per-source insertion
/// order.
#[derive(Debug, Clone, Default)]
pub(crate) struct NamedArgs {
    sources: SmallVec<[Vec<KeyValue>; 1]>,
    /// Lazily materialised effective bindings, by stringified key.
    merged: Option<AHashMap<String, Value>>,
    /// Keys already consumed by read-and-mark APIs.
    ready: AHashSet<String>,
    /// True for the shared empty instance; writes fail.
    read_only: bool,
}

impl NamedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared read-only empty instance.
    pub fn empty() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn from_pairs(pairs: Vec<KeyValue>) -> Self {
        let mut na = Self::new();
        na.sources.push(pairs);
        na
    }

    /// Adds a contribution source. Fails on the read-only instance.
    pub fn add_source(&mut self, pairs: Vec<KeyValue>) -> RunResult<()> {
        if self.read_only {
            return Err(RunError::new(ErrorKind::NotWriteable, "named arguments are read-only"));
        }
        self.merged = None;
        self.sources.push(pairs);
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.iter().all(Vec::is_empty)
    }

    /// Total number of pairs across sources, including shadowed ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.iter().map(Vec::len).sum()
    }

    /// Visits every pair in source order.
    pub fn walk(&self, mut cb: impl FnMut(&KeyValue)) {
        for source in &self.sources {
            for kv in source {
                cb(kv);
            }
        }
    }

    fn ensure_merged(&mut self, heap: &Heap, interns: &Interns) {
        if self.merged.is_some() {
            return;
        }
        let mut map = AHashMap::new();
        for source in &self.sources {
            for kv in source {
                if let Some(key) = key_string(&kv.key, heap, interns) {
                    map.insert(key, kv.value);
                }
            }
        }
        self.merged = Some(map);
    }

    /// Reads a value by name without marking it consumed, scanning sources
    /// last-wins.
    pub fn peek(&self, name: &str, heap: &Heap, interns: &Interns) -> Option<Value> {
        for source in self.sources.iter().rev() {
            for kv in source.iter().rev() {
                if key_string(&kv.key, heap, interns).as_deref() == Some(name) {
                    return Some(kv.value);
                }
            }
        }
        None
    }

    /// Reads a value by name, marking it consumed.
    pub fn get_value(&mut self, name: &str, heap: &Heap, interns: &Interns) -> Option<Value> {
        self.ensure_merged(heap, interns);
        let v = self.merged.as_ref().and_then(|m| m.get(name).copied());
        if v.is_some() {
            self.ready.insert(name.to_owned());
        }
        v
    }

    /// Pairs not yet consumed, in original order. Later sources shadow
    /// earlier ones, so shadowed duplicates are skipped.
    pub fn unread_pairs(&self, heap: &Heap, interns: &Interns) -> Vec<KeyValue> {
        let mut seen = AHashSet::new();
        let mut out = Vec::new();
        // Walk in reverse source order to find winners, then restore order.
        for source in self.sources.iter().rev() {
            for kv in source.iter().rev() {
                let Some(key) = key_string(&kv.key, heap, interns) else {
                    continue;
                };
                if self.ready.contains(&key) || !seen.insert(key) {
                    continue;
                }
                out.push(*kv);
            }
        }
        out.reverse();
        out
    }

    /// Consumes and type-checks the specs, then fails if any pair is left
    /// unread.
    pub fn get(&mut self, specs: &mut [NamedArgSpec<'_>], heap: &Heap, interns: &Interns) -> RunResult<()> {
        self.extract(specs, heap, interns)?;
        if let Some(kv) = self.unread_pairs(heap, interns).first() {
            let key = key_string(&kv.key, heap, interns).unwrap_or_default();
            return Err(RunError::unexpected_named_arg(&key));
        }
        Ok(())
    }

    /// Consumes what the specs cover and returns the leftovers as a dict.
    pub fn get_var(&mut self, specs: &mut [NamedArgSpec<'_>], heap: &Heap, interns: &Interns) -> RunResult<Dict> {
        self.extract(specs, heap, interns)?;
        let mut rest = Dict::new();
        for kv in self.unread_pairs(heap, interns) {
            if let Some(key) = key_string(&kv.key, heap, interns) {
                rest.set(key, kv.value);
            }
        }
        Ok(rest)
    }

    fn extract(&mut self, specs: &mut [NamedArgSpec<'_>], heap: &Heap, interns: &Interns) -> RunResult<()> {
        for spec in specs.iter_mut() {
            match self.get_value(spec.name, heap, interns) {
                Some(v) => {
                    if !spec.assert.accepts(&v, heap) {
                        return Err(RunError::named_argument_type(
                            spec.name,
                            &spec.assert.expected(),
                            &v.type_name(heap),
                        ));
                    }
                    spec.value = v;
                }
                None => {
                    spec.value = spec.default.map_or(Value::Undefined, |f| f());
                }
            }
        }
        Ok(())
    }

    /// A read-only snapshot of the merged bindings as a dict.
    pub fn all_dict(&mut self, heap: &Heap, interns: &Interns) -> Dict {
        self.ensure_merged(heap, interns);
        let mut d = Dict::new();
        // Rebuild in walk order so the dict reads naturally.
        self.walk(|kv| {
            if let Some(key) = key_string(&kv.key, heap, interns) {
                d.set(key, kv.value);
            }
        });
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    fn kv(interns: &mut Interns, key: &str, value: Value) -> KeyValue {
        KeyValue::new(Value::Str(interns.intern(key)), value)
    }

    #[test]
    fn test_args_shift_crosses_groups() {
        let mut args = Args::from_vec(vec![Value::Int(1)]);
        args.push_group(vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(args.len(), 3);
        assert!(matches!(args.shift(), Some(Value::Int(1))));
        assert!(matches!(args.shift(), Some(Value::Int(2))));
        assert!(matches!(args.get(0), Some(Value::Int(3))));
    }

    #[test]
    fn test_destructure_type_checks() {
        let heap = Heap::new();
        let mut args = Args::from_vec(vec![Value::Int(1), Value::Float(2.0)]);
        let mut specs = [
            ArgSpec::new("a", TypeAssertion::of(&[Type::Int])),
            ArgSpec::new("b", TypeAssertion::of(&[Type::Int])),
        ];
        let err = args.destructure(&mut specs, &heap).unwrap_err();
        assert!(err.is(ErrorKind::ArgumentType));
        assert!(err.message().contains("int"));
    }

    #[test]
    fn test_destructure_wrong_count() {
        let heap = Heap::new();
        let mut args = Args::from_vec(vec![Value::Int(1)]);
        let mut specs = [
            ArgSpec::new("a", TypeAssertion::any()),
            ArgSpec::new("b", TypeAssertion::any()),
        ];
        assert!(args.destructure(&mut specs, &heap).unwrap_err().is(ErrorKind::WrongNumArguments));
    }

    #[test]
    fn test_named_args_last_source_wins() {
        let heap = Heap::new();
        let mut interns = Interns::new();
        let first = vec![kv(&mut interns, "a", Value::Int(1))];
        let second = vec![kv(&mut interns, "a", Value::Int(2)), kv(&mut interns, "b", Value::Int(3))];
        let mut na = NamedArgs::from_pairs(first);
        na.add_source(second).unwrap();
        assert!(matches!(na.get_value("a", &heap, &interns), Some(Value::Int(2))));
        let unread = na.unread_pairs(&heap, &interns);
        assert_eq!(unread.len(), 1);
    }

    #[test]
    fn test_get_rejects_leftovers() {
        let heap = Heap::new();
        let mut interns = Interns::new();
        let mut na = NamedArgs::from_pairs(vec![
            kv(&mut interns, "a", Value::Int(1)),
            kv(&mut interns, "zz", Value::Int(2)),
        ]);
        let mut specs = [NamedArgSpec::new("a", TypeAssertion::any())];
        let err = na.get(&mut specs, &heap, &interns).unwrap_err();
        assert!(err.is(ErrorKind::UnexpectedNamedArg));
        assert!(err.message().contains("zz"));
    }

    #[test]
    fn test_get_var_returns_leftovers() {
        let heap = Heap::new();
        let mut interns = Interns::new();
        let mut na = NamedArgs::from_pairs(vec![
            kv(&mut interns, "a", Value::Int(1)),
            kv(&mut interns, "extra", Value::Int(9)),
        ]);
        let mut specs = [NamedArgSpec::new("a", TypeAssertion::any())];
        let rest = na.get_var(&mut specs, &heap, &interns).unwrap();
        assert!(matches!(specs[0].value, Value::Int(1)));
        assert_eq!(rest.len(), 1);
        assert!(matches!(rest.get("extra"), Some(Value::Int(9))));
    }

    #[test]
    fn test_default_applies_when_absent() {
        let heap = Heap::new();
        let interns = Interns::new();
        let mut na = NamedArgs::new();
        let mut specs = [NamedArgSpec::new("n", TypeAssertion::any()).with_default(|| Value::Int(7))];
        na.get(&mut specs, &heap, &interns).unwrap();
        assert!(matches!(specs[0].value, Value::Int(7)));
    }

    #[test]
    fn test_empty_is_read_only() {
        let mut na = NamedArgs::empty();
        assert!(na.add_source(vec![]).unwrap_err().is(ErrorKind::NotWriteable));
    }
}
