//! Conversion builtins.

use crate::{
    builtins::Call,
    error::{ErrorKind, RunError, RunResult},
    heap::HeapData,
    types::Decimal,
    value::{Value, as_str},
};

fn cast_error(call: &Call<'_>, v: &Value, target: &str) -> RunError {
    RunError::new(
        ErrorKind::IncompatibleCast,
        format!("cannot cast '{}' to {target}", v.type_name(&call.rt.heap)),
    )
}

pub(super) fn to_bool(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    Ok(Value::Bool(!v.is_falsy(&call.rt.heap, call.rt.interns())))
}

pub(super) fn to_int(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    match v {
        Value::Int(_) => Ok(v),
        Value::Uint(n) => i64::try_from(n).map(Value::Int).map_err(|_| cast_error(call, &v, "int")),
        Value::Float(f) => Ok(Value::Int(f as i64)),
        Value::Char(c) => Ok(Value::Int(i64::from(u32::from(c)))),
        Value::Bool(b) | Value::Flag(b) => Ok(Value::Int(i64::from(b))),
        _ => {
            if let Some(s) = as_str(&v, &call.rt.heap, call.rt.interns()) {
                return s.trim().parse::<i64>().map(Value::Int).map_err(|_| cast_error(call, &v, "int"));
            }
            if let Value::Ref(id) = v
                && let HeapData::Decimal(d) = call.rt.heap.get(id)
            {
                if let Some(f) = d.to_f64() {
                    return Ok(Value::Int(f as i64));
                }
            }
            Err(cast_error(call, &v, "int"))
        }
    }
}

pub(super) fn to_uint(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    match v {
        Value::Uint(_) => Ok(v),
        Value::Int(n) => u64::try_from(n).map(Value::Uint).map_err(|_| cast_error(call, &v, "uint")),
        Value::Float(f) => Ok(Value::Uint(f as u64)),
        Value::Char(c) => Ok(Value::Uint(u64::from(u32::from(c)))),
        Value::Bool(b) | Value::Flag(b) => Ok(Value::Uint(u64::from(b))),
        _ => {
            if let Some(s) = as_str(&v, &call.rt.heap, call.rt.interns()) {
                return s.trim().parse::<u64>().map(Value::Uint).map_err(|_| cast_error(call, &v, "uint"));
            }
            Err(cast_error(call, &v, "uint"))
        }
    }
}

pub(super) fn to_float(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    match v {
        Value::Float(_) => Ok(v),
        Value::Int(n) => Ok(Value::Float(n as f64)),
        Value::Uint(n) => Ok(Value::Float(n as f64)),
        _ => {
            if let Some(s) = as_str(&v, &call.rt.heap, call.rt.interns()) {
                return s.trim().parse::<f64>().map(Value::Float).map_err(|_| cast_error(call, &v, "float"));
            }
            if let Value::Ref(id) = v
                && let HeapData::Decimal(d) = call.rt.heap.get(id)
                && let Some(f) = d.to_f64()
            {
                return Ok(Value::Float(f));
            }
            Err(cast_error(call, &v, "float"))
        }
    }
}

pub(super) fn to_char(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    match v {
        Value::Char(_) => Ok(v),
        Value::Int(n) => u32::try_from(n)
            .ok()
            .and_then(char::from_u32)
            .map(Value::Char)
            .ok_or_else(|| cast_error(call, &v, "char")),
        Value::Uint(n) => u32::try_from(n)
            .ok()
            .and_then(char::from_u32)
            .map(Value::Char)
            .ok_or_else(|| cast_error(call, &v, "char")),
        _ => {
            if let Some(s) = as_str(&v, &call.rt.heap, call.rt.interns()) {
                let mut chars = s.chars();
                if let (Some(c), None) = (chars.next(), chars.next()) {
                    return Ok(Value::Char(c));
                }
            }
            Err(cast_error(call, &v, "char"))
        }
    }
}

pub(super) fn to_bytes(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    if let Some(s) = as_str(&v, &call.rt.heap, call.rt.interns()) {
        let bytes = s.as_bytes().to_vec();
        return Ok(Value::Ref(call.rt.heap.alloc(HeapData::Bytes(bytes))));
    }
    match v {
        Value::Ref(id) => match call.rt.heap.get(id) {
            HeapData::Bytes(_) => Ok(v),
            HeapData::Buffer(b) => {
                let bytes = b.clone();
                Ok(Value::Ref(call.rt.heap.alloc(HeapData::Bytes(bytes))))
            }
            HeapData::Array(items) => {
                let items = items.clone();
                let mut bytes = Vec::with_capacity(items.len());
                for item in items {
                    let Value::Int(n) = item else {
                        return Err(cast_error(call, &v, "bytes"));
                    };
                    let byte = u8::try_from(n).map_err(|_| cast_error(call, &v, "bytes"))?;
                    bytes.push(byte);
                }
                Ok(Value::Ref(call.rt.heap.alloc(HeapData::Bytes(bytes))))
            }
            _ => Err(cast_error(call, &v, "bytes")),
        },
        _ => Err(cast_error(call, &v, "bytes")),
    }
}

pub(super) fn to_chars(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let Some(s) = as_str(&v, &call.rt.heap, call.rt.interns()) else {
        return Err(cast_error(call, &v, "chars"));
    };
    let chars: Vec<Value> = s.chars().map(Value::Char).collect();
    Ok(Value::Ref(call.rt.heap.alloc(HeapData::Array(chars))))
}

pub(super) fn to_decimal(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let d = match v {
        Value::Int(n) => Some(Decimal::from_i64(n)),
        Value::Uint(n) => Some(Decimal::from_u64(n)),
        Value::Float(f) => Decimal::from_f64(f),
        Value::Ref(id) => match call.rt.heap.get(id) {
            HeapData::Decimal(_) => return Ok(v),
            _ => as_str(&v, &call.rt.heap, call.rt.interns()).and_then(Decimal::parse),
        },
        _ => as_str(&v, &call.rt.heap, call.rt.interns()).and_then(Decimal::parse),
    };
    match d {
        Some(d) => Ok(Value::Ref(call.rt.heap.alloc(HeapData::Decimal(d)))),
        None => Err(cast_error(call, &v, "decimal")),
    }
}
