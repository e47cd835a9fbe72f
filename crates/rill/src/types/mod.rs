//! The built-in value types.

pub(crate) mod decimal;
pub(crate) mod dict;
pub(crate) mod iter;
pub(crate) mod keyvalue;
pub(crate) mod method_caller;
pub(crate) mod objtype;
pub(crate) mod regex;

pub(crate) use decimal::Decimal;
pub(crate) use dict::Dict;
pub(crate) use iter::RillIter;
pub(crate) use keyvalue::{KeyValue, KeyValueArray};
pub(crate) use method_caller::MethodCaller;
pub(crate) use objtype::{Instance, ObjectTypeValue};
pub(crate) use regex::RegexValue;

use strum::{Display, EnumString, IntoStaticStr};

/// Lightweight type tags.
///
/// These are the names that appear in error messages, `typeName` results and
/// parameter type annotations. Instances of user object types report the
/// type's own name instead, via `Value::type_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub(crate) enum Type {
    #[strum(serialize = "nil")]
    Nil,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "flag")]
    Flag,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "uint")]
    Uint,
    #[strum(serialize = "float")]
    Float,
    #[strum(serialize = "decimal")]
    Decimal,
    #[strum(serialize = "char")]
    Char,
    #[strum(serialize = "str")]
    Str,
    #[strum(serialize = "rawstr")]
    RawStr,
    #[strum(serialize = "bytes")]
    Bytes,
    #[strum(serialize = "buffer")]
    Buffer,
    #[strum(serialize = "array")]
    Array,
    #[strum(serialize = "dict")]
    Dict,
    #[strum(serialize = "syncDict")]
    SyncDict,
    #[strum(serialize = "keyValue")]
    KeyValue,
    #[strum(serialize = "keyValueArray")]
    KeyValueArray,
    #[strum(serialize = "error")]
    Error,
    #[strum(serialize = "regex")]
    Regex,
    #[strum(serialize = "func")]
    Func,
    #[strum(serialize = "builtin")]
    Builtin,
    #[strum(serialize = "methodCaller")]
    MethodCaller,
    #[strum(serialize = "type")]
    ObjectType,
    #[strum(serialize = "instance")]
    Instance,
    #[strum(serialize = "iterator")]
    Iterator,
    #[strum(serialize = "namedArgs")]
    NamedArgs,
    #[strum(serialize = "undefined")]
    Undefined,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Type::Int.to_string(), "int");
        assert_eq!(Type::KeyValueArray.to_string(), "keyValueArray");
        assert_eq!(Type::from_str("syncDict"), Ok(Type::SyncDict));
        assert!(Type::from_str("no-such-type").is_err());
    }
}
