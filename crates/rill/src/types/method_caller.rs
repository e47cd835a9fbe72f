//! Callers with attached methods.
//!
//! A method caller wraps a base callable with a table of methods keyed by
//! their declared parameter type vectors. Dispatch matches the concrete
//! types of the actual positional arguments against each vector; the first
//! exact match wins, otherwise the untyped base callable runs.

use crate::value::Value;

/// One attached method: its declared parameter type names and the handler.
#[derive(Debug, Clone)]
pub(crate) struct CallerMethod {
    pub param_types: Vec<String>,
    pub func: Value,
}

/// A callable with a method table.
#[derive(Debug, Clone)]
pub(crate) struct MethodCaller {
    pub base: Value,
    pub methods: Vec<CallerMethod>,
}

impl MethodCaller {
    pub fn new(base: Value) -> Self {
        Self {
            base,
            methods: Vec::new(),
        }
    }

    /// Adds a method. Fails when a method with an equal type vector already
    /// exists, unless `override_existing` is set.
    pub fn add_method(&mut self, param_types: Vec<String>, func: Value, override_existing: bool) -> Result<(), String> {
        if let Some(existing) = self.methods.iter_mut().find(|m| m.param_types == param_types) {
            if !override_existing {
                return Err(format!("method with parameter types ({}) already exists", param_types.join(", ")));
            }
            existing.func = func;
            return Ok(());
        }
        self.methods.push(CallerMethod { param_types, func });
        Ok(())
    }

    /// Resolves the handler for the given concrete argument type names.
    /// Returns the base callable when no vector matches exactly.
    pub fn resolve(&self, arg_types: &[&str]) -> Value {
        for m in &self.methods {
            if m.param_types.len() == arg_types.len() && m.param_types.iter().zip(arg_types).all(|(p, a)| p == a) {
                return m.func;
            }
        }
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_prefers_exact_match() {
        let mut mc = MethodCaller::new(Value::Int(0));
        mc.add_method(vec!["int".into()], Value::Int(1), false).unwrap();
        mc.add_method(vec!["str".into()], Value::Int(2), false).unwrap();
        assert!(matches!(mc.resolve(&["int"]), Value::Int(1)));
        assert!(matches!(mc.resolve(&["str"]), Value::Int(2)));
        assert!(matches!(mc.resolve(&["float"]), Value::Int(0)));
        assert!(matches!(mc.resolve(&["int", "int"]), Value::Int(0)));
    }

    #[test]
    fn test_duplicate_method_rejected_unless_override() {
        let mut mc = MethodCaller::new(Value::Nil);
        mc.add_method(vec!["int".into()], Value::Int(1), false).unwrap();
        assert!(mc.add_method(vec!["int".into()], Value::Int(2), false).is_err());
        mc.add_method(vec!["int".into()], Value::Int(3), true).unwrap();
        assert!(matches!(mc.resolve(&["int"]), Value::Int(3)));
    }
}
