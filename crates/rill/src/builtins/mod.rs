//! Builtin functions and their dispatch contract.
//!
//! Every builtin receives a [`Call`] record bundling the runtime, the
//! positional `Args` and the `NamedArgs`. Builtins are indexed by the
//! `#[repr(u8)]` discriminant, which is what the `GetBuiltin` opcode
//! carries.

mod collections;
mod convert;
mod io_fns;
mod methods;

use strum::{EnumString, FromRepr, IntoStaticStr};

use crate::{
    args::{Args, NamedArgs},
    error::{ErrorKind, RunError, RunResult},
    heap::{ErrorValue, HeapData},
    printer,
    run::Rt,
    value::Value,
};

pub(crate) use methods::call_method;

/// The builtin table.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub(crate) enum Builtin {
    Str,
    Repr,
    Len,
    Copy,
    DeepCopy,
    Keys,
    Values,
    Items,
    Sort,
    SortReverse,
    Collect,
    Enumerate,
    Zip,
    Filter,
    Map,
    Reduce,
    Range,
    Iterate,
    TypeName,
    Bool,
    Int,
    Uint,
    Float,
    Char,
    Bytes,
    Chars,
    Decimal,
    Error,
    IsError,
    Print,
    Println,
    Printf,
    Stdio,
    Write,
    Buffer,
    Regexp,
    NewType,
    SyncDict,
    Kv,
    KeyValueArray,
    Append,
    AddCallMethod,
    MakeArray,
    TypeCheck,
    ReadLine,
    Contains,
    Delete,
}

impl Builtin {
    /// The builtin's script-visible name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Looks a builtin up by its script-visible name.
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }
}

/// The record every callable receives: the runtime (in place of a VM
/// handle), positional arguments and named arguments. Cross-call-scoped
/// state (such as printer guards) lives on the runtime.
#[derive(Debug)]
pub(crate) struct Call<'rt> {
    pub rt: &'rt mut Rt,
    pub args: Args,
    pub named: NamedArgs,
}

impl Call<'_> {
    /// Takes exactly `n` positional arguments.
    pub fn exactly(&mut self, n: usize) -> RunResult<Vec<Value>> {
        if self.args.len() != n {
            return Err(RunError::wrong_num_args(n, self.args.len()));
        }
        let mut out = Vec::with_capacity(n);
        while let Some(v) = self.args.shift() {
            out.push(v);
        }
        Ok(out)
    }

    /// Takes one positional argument.
    pub fn one(&mut self) -> RunResult<Value> {
        if self.args.len() != 1 {
            return Err(RunError::wrong_num_args(1, self.args.len()));
        }
        Ok(self.args.shift().expect("length checked"))
    }

    /// Takes two positional arguments.
    pub fn two(&mut self) -> RunResult<(Value, Value)> {
        let mut v = self.exactly(2)?;
        let second = v.pop().expect("two args");
        let first = v.pop().expect("two args");
        Ok((first, second))
    }

    /// Takes one required and one optional positional argument.
    pub fn one_or_two(&mut self) -> RunResult<(Value, Option<Value>)> {
        match self.args.len() {
            1 => Ok((self.args.shift().expect("length checked"), None)),
            2 => {
                let first = self.args.shift().expect("length checked");
                Ok((first, self.args.shift()))
            }
            n => Err(RunError::wrong_num_args("1..2", n)),
        }
    }

    /// Fails when unread named arguments remain.
    pub fn no_more_named(&mut self) -> RunResult<()> {
        let leftovers = self.named.unread_pairs(&self.rt.heap, self.rt.interns());
        if let Some(kv) = leftovers.first() {
            let key =
                crate::value::key_string(&kv.key, &self.rt.heap, self.rt.interns()).unwrap_or_default();
            return Err(RunError::unexpected_named_arg(&key));
        }
        Ok(())
    }
}

/// Dispatches a builtin call.
pub(crate) fn call_builtin(rt: &mut Rt, b: Builtin, args: Args, named: NamedArgs) -> RunResult<Value> {
    let mut call = Call { rt, args, named };
    // A builtin returning nothing still surfaces as nil to the VM.
    match b {
        Builtin::Str => {
            let v = call.one()?;
            let s = printer::render_str(&v, &call.rt.heap, call.rt.interns());
            Ok(Value::string(s, &mut call.rt.heap))
        }
        Builtin::Repr => {
            let v = call.one()?;
            let opts = printer::PrintOptions::from_named(&mut call.named, &call.rt.heap, call.rt.interns())?;
            let s = printer::Printer::new(&call.rt.heap, call.rt.interns(), opts).representation(&v);
            Ok(Value::string(s, &mut call.rt.heap))
        }
        Builtin::Len => collections::len(&mut call),
        Builtin::Copy => collections::copy(&mut call),
        Builtin::DeepCopy => collections::deep_copy(&mut call),
        Builtin::Keys => collections::keys(&mut call),
        Builtin::Values => collections::values(&mut call),
        Builtin::Items => collections::items(&mut call),
        Builtin::Sort => collections::sort(&mut call, false),
        Builtin::SortReverse => collections::sort(&mut call, true),
        Builtin::Collect => collections::collect(&mut call),
        Builtin::Enumerate => collections::enumerate(&mut call),
        Builtin::Zip => collections::zip(&mut call),
        Builtin::Filter => collections::filter(&mut call),
        Builtin::Map => collections::map(&mut call),
        Builtin::Reduce => collections::reduce(&mut call),
        Builtin::Range => collections::range(&mut call),
        Builtin::Iterate => collections::iterate(&mut call),
        Builtin::Append => collections::append(&mut call),
        Builtin::TypeName => {
            let v = call.one()?;
            let name = v.type_name(&call.rt.heap).into_owned();
            Ok(Value::string(name, &mut call.rt.heap))
        }
        Builtin::Bool => convert::to_bool(&mut call),
        Builtin::Int => convert::to_int(&mut call),
        Builtin::Uint => convert::to_uint(&mut call),
        Builtin::Float => convert::to_float(&mut call),
        Builtin::Char => convert::to_char(&mut call),
        Builtin::Bytes => convert::to_bytes(&mut call),
        Builtin::Chars => convert::to_chars(&mut call),
        Builtin::Decimal => convert::to_decimal(&mut call),
        Builtin::Error => {
            let v = call.one()?;
            let message = printer::render_str(&v, &call.rt.heap, call.rt.interns());
            let mut specs = [crate::args::NamedArgSpec::new("name", crate::typeassert::TypeAssertion::any())];
            call.named.get(&mut specs, &call.rt.heap, call.rt.interns())?;
            let name = match specs[0].value {
                Value::Undefined => "error".to_owned(),
                ref v => printer::render_str(v, &call.rt.heap, call.rt.interns()),
            };
            Ok(Value::Ref(call.rt.heap.alloc(HeapData::Error(ErrorValue { name, message }))))
        }
        Builtin::IsError => {
            fn error_name(v: &Value, rt: &Rt) -> Option<String> {
                match v {
                    Value::Ref(id) => match rt.heap.get(*id) {
                        HeapData::Error(err) => Some(err.name.clone()),
                        _ => None,
                    },
                    _ => None,
                }
            }
            let (e, target) = call.one_or_two()?;
            let Some(name) = error_name(&e, call.rt) else {
                return Ok(Value::Bool(false));
            };
            match target {
                None => Ok(Value::Bool(true)),
                Some(t) => Ok(Value::Bool(error_name(&t, call.rt) == Some(name))),
            }
        }
        Builtin::Print => io_fns::print(&mut call, false),
        Builtin::Println => io_fns::print(&mut call, true),
        Builtin::Printf => io_fns::printf(&mut call),
        Builtin::Stdio => io_fns::stdio(&mut call),
        Builtin::Write => io_fns::write(&mut call),
        Builtin::Buffer => {
            call.exactly(0)?;
            Ok(Value::Ref(call.rt.heap.alloc(HeapData::Buffer(Vec::new()))))
        }
        Builtin::Regexp => {
            let v = call.one()?;
            let Some(pattern) = crate::value::as_str(&v, &call.rt.heap, call.rt.interns()) else {
                return Err(RunError::argument_type(1, "str", &v.type_name(&call.rt.heap)));
            };
            let re = crate::types::RegexValue::compile(pattern)
                .map_err(|e| RunError::new(ErrorKind::Type, format!("invalid regex: {e}")))?;
            Ok(Value::Ref(call.rt.heap.alloc(HeapData::Regex(re))))
        }
        Builtin::NewType => methods::new_type(&mut call),
        Builtin::SyncDict => {
            let d = match call.args.len() {
                0 => crate::types::Dict::new(),
                _ => {
                    let v = call.one()?;
                    match v {
                        Value::Ref(id) => match call.rt.heap.get(id) {
                            HeapData::Dict(d) => d.clone(),
                            _ => return Err(RunError::argument_type(1, "dict", &v.type_name(&call.rt.heap))),
                        },
                        _ => return Err(RunError::argument_type(1, "dict", &v.type_name(&call.rt.heap))),
                    }
                }
            };
            Ok(Value::Ref(call.rt.heap.alloc(HeapData::SyncDict(std::sync::RwLock::new(d)))))
        }
        Builtin::Kv => {
            let (k, v) = call.one_or_two()?;
            let value = v.unwrap_or(Value::Flag(true));
            Ok(Value::Ref(
                call.rt.heap.alloc(HeapData::KeyValue(crate::types::KeyValue::new(k, value))),
            ))
        }
        Builtin::KeyValueArray => {
            let mut pairs = Vec::with_capacity(call.args.len());
            while let Some(v) = call.args.shift() {
                match v {
                    Value::Ref(id) => match call.rt.heap.get(id) {
                        HeapData::KeyValue(kv) => pairs.push(*kv),
                        _ => return Err(RunError::argument_type(pairs.len() + 1, "keyValue", &v.type_name(&call.rt.heap))),
                    },
                    _ => return Err(RunError::argument_type(pairs.len() + 1, "keyValue", &v.type_name(&call.rt.heap))),
                }
            }
            Ok(Value::Ref(
                call.rt
                    .heap
                    .alloc(HeapData::KeyValueArray(crate::types::KeyValueArray::new(pairs))),
            ))
        }
        Builtin::AddCallMethod => methods::add_call_method(&mut call),
        Builtin::MakeArray => collections::make_array(&mut call),
        Builtin::TypeCheck => methods::type_check(&mut call),
        Builtin::ReadLine => io_fns::read_line(&mut call),
        Builtin::Contains => collections::contains(&mut call),
        Builtin::Delete => collections::delete(&mut call),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        assert_eq!(Builtin::DeepCopy.name(), "deepCopy");
        assert_eq!(Builtin::from_name("addCallMethod"), Some(Builtin::AddCallMethod));
        assert_eq!(Builtin::from_name("sortReverse"), Some(Builtin::SortReverse));
        assert_eq!(Builtin::from_name("nope"), None);
    }

    #[test]
    fn test_repr_roundtrip() {
        assert_eq!(Builtin::from_repr(Builtin::Str as u8), Some(Builtin::Str));
        assert_eq!(Builtin::from_repr(Builtin::TypeCheck as u8), Some(Builtin::TypeCheck));
    }
}
