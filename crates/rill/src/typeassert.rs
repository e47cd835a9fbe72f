//! Composable type assertions used by argument destructuring.
//!
//! An assertion lists accepted concrete types plus named predicate handlers;
//! on failure the error message carries the union of every accepted name.

use crate::{heap::Heap, types::Type, value::Value};

/// Predicate handler: a name for error messages and the check itself.
type Handler = (&'static str, fn(&Value, &Heap) -> bool);

/// A composable type assertion.
#[derive(Debug, Default)]
pub(crate) struct TypeAssertion {
    accepted: Vec<Type>,
    handlers: Vec<Handler>,
    any: bool,
}

impl TypeAssertion {
    /// Accepts every value.
    pub fn any() -> Self {
        Self {
            any: true,
            ..Self::default()
        }
    }

    /// Accepts exactly the listed concrete types.
    pub fn of(types: &[Type]) -> Self {
        Self {
            accepted: types.to_vec(),
            ..Self::default()
        }
    }

    /// Adds a named predicate handler.
    pub fn with_handler(mut self, name: &'static str, f: fn(&Value, &Heap) -> bool) -> Self {
        self.handlers.push((name, f));
        self
    }

    /// True when the value passes the assertion.
    pub fn accepts(&self, v: &Value, heap: &Heap) -> bool {
        if self.any {
            return true;
        }
        let tag = v.type_tag(heap);
        if self.accepted.contains(&tag) {
            return true;
        }
        self.handlers.iter().any(|(_, f)| f(v, heap))
    }

    /// The union of accepted type and handler names, for error messages.
    pub fn expected(&self) -> String {
        if self.any {
            return "any".to_owned();
        }
        let mut names: Vec<&str> = self.accepted.iter().map(|t| (*t).into()).collect();
        names.extend(self.handlers.iter().map(|(name, _)| *name));
        names.join("|")
    }
}

/// Handler accepting any callable value.
pub(crate) fn callable_handler(v: &Value, heap: &Heap) -> bool {
    use crate::heap::HeapData;
    match v {
        Value::Func(_) | Value::Builtin(_) => true,
        Value::Ref(id) => matches!(
            heap.get(*id),
            HeapData::Closure(_) | HeapData::BoundMethod(_) | HeapData::MethodCaller(_) | HeapData::ObjectType(_)
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_listed_types() {
        let heap = Heap::new();
        let assertion = TypeAssertion::of(&[Type::Int, Type::Str]);
        assert!(assertion.accepts(&Value::Int(1), &heap));
        assert!(!assertion.accepts(&Value::Float(1.0), &heap));
        assert_eq!(assertion.expected(), "int|str");
    }

    #[test]
    fn test_handler_names_join_expected() {
        let heap = Heap::new();
        let assertion = TypeAssertion::of(&[Type::Nil]).with_handler("callable", callable_handler);
        assert_eq!(assertion.expected(), "nil|callable");
        assert!(assertion.accepts(&Value::Builtin(crate::builtins::Builtin::Len), &heap));
        assert!(!assertion.accepts(&Value::Int(1), &heap));
    }

    #[test]
    fn test_any() {
        let heap = Heap::new();
        let assertion = TypeAssertion::any();
        assert!(assertion.accepts(&Value::Nil, &heap));
        assert_eq!(assertion.expected(), "any");
    }
}
