//! User-defined object types and their instances.

use crate::{heap::HeapId, types::Dict, value::Value};

/// A first-class object type.
///
/// Carries a name, optional accepted-parameter-type vectors (for callable
/// types), field defaults, getter/setter/method tables, and ancestor types.
/// Calling the type constructs an instance from a field dictionary.
#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectTypeValue {
    pub name: String,
    /// Accepted parameter type name vectors for callable use.
    pub accepted_params: Vec<Vec<String>>,
    /// Default field values for new instances.
    pub fields: Dict,
    pub getters: Dict,
    pub setters: Dict,
    pub methods: Dict,
    pub ancestors: Vec<HeapId>,
}

impl ObjectTypeValue {
    pub fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// Looks a method up on this type, then on ancestors in order.
    pub fn find_method(&self, name: &str, lookup_ancestor: impl Fn(HeapId) -> Option<Value>) -> Option<Value> {
        if let Some(m) = self.methods.get(name) {
            return Some(m);
        }
        self.ancestors.iter().find_map(|&a| lookup_ancestor(a))
    }
}

/// An instance of an object type: the type handle plus a field dictionary.
#[derive(Debug, Clone)]
pub(crate) struct Instance {
    pub ty: HeapId,
    pub fields: Dict,
}
