//! Polymorphic binary and unary operator dispatch.
//!
//! Each binary opcode delegates here with the operator token and both
//! operands; dispatch is by operand tags. The operator-not-supported error
//! carries the token and both type names.

use std::cmp::Ordering;

use crate::{
    error::{RunError, RunResult},
    heap::{Heap, HeapData},
    printer,
    run::Rt,
    token::{BinOp, UnaryOp},
    types::{Dict, RegexValue},
    value::{Num, Value, as_str, numeric_operand, promote_to_decimal, values_equal},
};

/// Applies a binary operator.
pub(crate) fn binary_op(rt: &mut Rt, tok: BinOp, left: Value, right: Value) -> RunResult<Value> {
    // Regex operators resolve their own operand order.
    if matches!(tok, BinOp::Match | BinOp::Find | BinOp::FindAll) {
        return regex_op(rt, tok, left, right);
    }

    // String concatenation and comparison.
    if let Some(ls) = as_str(&left, &rt.heap, rt.interns()) {
        match tok {
            BinOp::Add => {
                let ls = ls.to_owned();
                let rs = printer::render_str(&right, &rt.heap, rt.interns());
                return Ok(Value::string(ls + &rs, &mut rt.heap));
            }
            BinOp::Less | BinOp::LessEq | BinOp::Greater | BinOp::GreaterEq => {
                if let Some(rs) = as_str(&right, &rt.heap, rt.interns()) {
                    return Ok(Value::Bool(ordering_matches(tok, ls.cmp(rs))));
                }
            }
            _ => {}
        }
    }

    // Array and bytes concatenation.
    if tok == BinOp::Add
        && let (Value::Ref(il), Value::Ref(ir)) = (left, right)
    {
        match (rt.heap.get(il), rt.heap.get(ir)) {
            (HeapData::Array(a), HeapData::Array(b)) => {
                let mut out = a.clone();
                out.extend_from_slice(b);
                return Ok(Value::Ref(rt.heap.alloc(HeapData::Array(out))));
            }
            (HeapData::Bytes(a) | HeapData::Buffer(a), HeapData::Bytes(b) | HeapData::Buffer(b)) => {
                let mut out = a.clone();
                out.extend_from_slice(b);
                return Ok(Value::Ref(rt.heap.alloc(HeapData::Bytes(out))));
            }
            _ => {}
        }
    }

    // Char arithmetic keeps the char tag on the left.
    if let (Value::Char(c), Value::Int(n)) = (left, right) {
        match tok {
            BinOp::Add | BinOp::Sub => {
                let base = i64::from(u32::from(c));
                let code = if tok == BinOp::Add { base + n } else { base - n };
                if let Some(c) = u32::try_from(code).ok().and_then(char::from_u32) {
                    return Ok(Value::Char(c));
                }
                return Err(RunError::new(
                    crate::error::ErrorKind::UnexpectedArgValue,
                    format!("char arithmetic out of range: {code}"),
                ));
            }
            _ => {}
        }
    }

    let (Some(nl), Some(nr)) = (numeric_operand(&left, &rt.heap), numeric_operand(&right, &rt.heap)) else {
        return Err(invalid(rt, tok, &left, &right));
    };
    numeric_binary(rt, tok, nl, nr).ok_or_else(|| invalid(rt, tok, &left, &right))?
}

fn invalid(rt: &Rt, tok: BinOp, left: &Value, right: &Value) -> RunError {
    RunError::invalid_operator(tok, &left.type_name(&rt.heap), &right.type_name(&rt.heap))
}

/// Numeric dispatch with promotion: decimal > float > uint > int.
fn numeric_binary(rt: &mut Rt, tok: BinOp, l: Num, r: Num) -> Option<RunResult<Value>> {
    if matches!(l, Num::Decimal(_)) || matches!(r, Num::Decimal(_)) {
        let (Some(a), Some(b)) = (promote_to_decimal(&l), promote_to_decimal(&r)) else {
            return None;
        };
        let result = match tok {
            BinOp::Add => a.add(&b),
            BinOp::Sub => a.sub(&b),
            BinOp::Mul => a.mul(&b),
            BinOp::Div => {
                if b.is_zero() {
                    return Some(Err(RunError::zero_division()));
                }
                a.div(&b)
            }
            BinOp::Rem => {
                if b.is_zero() {
                    return Some(Err(RunError::zero_division()));
                }
                a.rem(&b)
            }
            BinOp::Less | BinOp::LessEq | BinOp::Greater | BinOp::GreaterEq => {
                return Some(Ok(Value::Bool(ordering_matches(tok, a.compare(&b)))));
            }
            _ => return None,
        };
        return Some(Ok(Value::Ref(rt.heap.alloc(HeapData::Decimal(result)))));
    }

    if matches!(l, Num::Float(_)) || matches!(r, Num::Float(_)) {
        let (a, b) = (num_to_f64(&l), num_to_f64(&r));
        let result = match tok {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Rem => a % b,
            BinOp::Less | BinOp::LessEq | BinOp::Greater | BinOp::GreaterEq => {
                let ord = a.partial_cmp(&b)?;
                return Some(Ok(Value::Bool(ordering_matches(tok, ord))));
            }
            _ => return None,
        };
        return Some(Ok(Value::Float(result)));
    }

    if matches!(l, Num::Uint(_)) || matches!(r, Num::Uint(_)) {
        let (a, b) = (num_to_u64(&l), num_to_u64(&r));
        let result = match tok {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Some(Err(RunError::zero_division()));
                }
                a / b
            }
            BinOp::Rem => {
                if b == 0 {
                    return Some(Err(RunError::zero_division()));
                }
                a % b
            }
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::BitXor => a ^ b,
            BinOp::Shl => a.wrapping_shl(u32::try_from(b).unwrap_or(u32::MAX)),
            BinOp::Shr => a.wrapping_shr(u32::try_from(b).unwrap_or(u32::MAX)),
            BinOp::Less | BinOp::LessEq | BinOp::Greater | BinOp::GreaterEq => {
                return Some(Ok(Value::Bool(ordering_matches(tok, a.cmp(&b)))));
            }
            BinOp::Match | BinOp::Find | BinOp::FindAll => return None,
        };
        return Some(Ok(Value::Uint(result)));
    }

    let (a, b) = (num_to_i64(&l), num_to_i64(&r));
    let result = match tok {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Some(Err(RunError::zero_division()));
            }
            a.wrapping_div(b)
        }
        BinOp::Rem => {
            if b == 0 {
                return Some(Err(RunError::zero_division()));
            }
            a.wrapping_rem(b)
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Shl => a.wrapping_shl(u32::try_from(b).unwrap_or(u32::MAX)),
        BinOp::Shr => a.wrapping_shr(u32::try_from(b).unwrap_or(u32::MAX)),
        BinOp::Less | BinOp::LessEq | BinOp::Greater | BinOp::GreaterEq => {
            return Some(Ok(Value::Bool(ordering_matches(tok, a.cmp(&b)))));
        }
        BinOp::Match | BinOp::Find | BinOp::FindAll => return None,
    };
    Some(Ok(Value::Int(result)))
}

fn num_to_f64(n: &Num) -> f64 {
    match n {
        Num::Int(v) => *v as f64,
        Num::Uint(v) => *v as f64,
        Num::Float(v) => *v,
        Num::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
    }
}

fn num_to_u64(n: &Num) -> u64 {
    match n {
        Num::Int(v) => *v as u64,
        Num::Uint(v) => *v,
        Num::Float(v) => *v as u64,
        Num::Decimal(d) => d.to_f64().unwrap_or(0.0) as u64,
    }
}

fn num_to_i64(n: &Num) -> i64 {
    match n {
        Num::Int(v) => *v,
        Num::Uint(v) => *v as i64,
        Num::Float(v) => *v as i64,
        Num::Decimal(d) => d.to_f64().unwrap_or(0.0) as i64,
    }
}

fn ordering_matches(tok: BinOp, ord: Ordering) -> bool {
    match tok {
        BinOp::Less => ord == Ordering::Less,
        BinOp::LessEq => ord != Ordering::Greater,
        BinOp::Greater => ord == Ordering::Greater,
        BinOp::GreaterEq => ord != Ordering::Less,
        _ => false,
    }
}

/// Regex operators accept the pattern on either side.
fn regex_op(rt: &mut Rt, tok: BinOp, left: Value, right: Value) -> RunResult<Value> {
    fn regex_of(v: Value, heap: &Heap) -> Option<RegexValue> {
        match v {
            Value::Ref(id) => match heap.get(id) {
                HeapData::Regex(r) => Some(r.clone()),
                _ => None,
            },
            _ => None,
        }
    }
    let resolved = match (regex_of(left, &rt.heap), regex_of(right, &rt.heap)) {
        (Some(re), None) => as_str(&right, &rt.heap, rt.interns()).map(|s| (re, s.to_owned())),
        (None, Some(re)) => as_str(&left, &rt.heap, rt.interns()).map(|s| (re, s.to_owned())),
        _ => None,
    };
    let Some((re, text)) = resolved else {
        return Err(invalid(rt, tok, &left, &right));
    };
    match tok {
        BinOp::Match => Ok(Value::Bool(re.is_match(&text))),
        BinOp::Find => Ok(match re.find(&text) {
            Some(m) => match_value(rt, &re, &m),
            None => Value::Nil,
        }),
        BinOp::FindAll => {
            let matches: Vec<Value> = re.find_all(&text, 0).iter().map(|m| match_value(rt, &re, m)).collect();
            Ok(Value::Ref(rt.heap.alloc(HeapData::Array(matches))))
        }
        _ => Err(invalid(rt, tok, &left, &right)),
    }
}

/// A match renders as `{text, begin, end}`.
pub(crate) fn match_value(rt: &mut Rt, _re: &RegexValue, m: &crate::types::regex::RegexMatch) -> Value {
    let mut d = Dict::with_capacity(3);
    let text = Value::string(m.text.clone(), &mut rt.heap);
    d.set("text".into(), text);
    d.set("begin".into(), Value::Int(i64::try_from(m.start).unwrap_or(i64::MAX)));
    d.set("end".into(), Value::Int(i64::try_from(m.end).unwrap_or(i64::MAX)));
    Value::Ref(rt.heap.alloc(HeapData::Dict(d)))
}

/// Applies a unary operator.
pub(crate) fn unary_op(rt: &mut Rt, tok: UnaryOp, operand: Value) -> RunResult<Value> {
    match tok {
        UnaryOp::Not => Ok(Value::Bool(operand.is_falsy(&rt.heap, rt.interns()))),
        UnaryOp::Pos => match operand {
            Value::Int(_) | Value::Uint(_) | Value::Float(_) | Value::Char(_) => Ok(operand),
            Value::Ref(id) if matches!(rt.heap.get(id), HeapData::Decimal(_)) => Ok(operand),
            _ => Err(RunError::invalid_unary_operator(tok, &operand.type_name(&rt.heap))),
        },
        UnaryOp::Neg => match operand {
            Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
            Value::Uint(v) => Ok(Value::Int((v as i64).wrapping_neg())),
            Value::Float(v) => Ok(Value::Float(-v)),
            Value::Ref(id) => match rt.heap.get(id) {
                HeapData::Decimal(d) => {
                    let negated = d.neg();
                    Ok(Value::Ref(rt.heap.alloc(HeapData::Decimal(negated))))
                }
                _ => Err(RunError::invalid_unary_operator(tok, &operand.type_name(&rt.heap))),
            },
            _ => Err(RunError::invalid_unary_operator(tok, &operand.type_name(&rt.heap))),
        },
        UnaryOp::BitNot => match operand {
            Value::Int(v) => Ok(Value::Int(!v)),
            Value::Uint(v) => Ok(Value::Uint(!v)),
            _ => Err(RunError::invalid_unary_operator(tok, &operand.type_name(&rt.heap))),
        },
    }
}

/// Ordering used by `sort` and friends, built on the same promotion rules
/// as the comparison operators.
pub(crate) fn compare_values(rt: &Rt, left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (
        as_str(left, &rt.heap, rt.interns()),
        as_str(right, &rt.heap, rt.interns()),
    ) {
        return Some(a.cmp(b));
    }
    let (l, r) = (numeric_operand(left, &rt.heap)?, numeric_operand(right, &rt.heap)?);
    if matches!(l, Num::Decimal(_)) || matches!(r, Num::Decimal(_)) {
        let (a, b) = (promote_to_decimal(&l)?, promote_to_decimal(&r)?);
        return Some(a.compare(&b));
    }
    if matches!(l, Num::Float(_)) || matches!(r, Num::Float(_)) {
        return num_to_f64(&l).partial_cmp(&num_to_f64(&r));
    }
    if matches!(l, Num::Uint(_)) || matches!(r, Num::Uint(_)) {
        return Some(num_to_u64(&l).cmp(&num_to_u64(&r)));
    }
    Some(num_to_i64(&l).cmp(&num_to_i64(&r)))
}

/// Equality opcode helper.
pub(crate) fn equal(rt: &Rt, left: &Value, right: &Value) -> bool {
    values_equal(left, right, &rt.heap, rt.interns())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::Rt;

    fn test_rt() -> Rt {
        Rt::for_tests()
    }

    #[test]
    fn test_int_arithmetic() {
        let mut rt = test_rt();
        assert!(matches!(binary_op(&mut rt, BinOp::Add, Value::Int(2), Value::Int(3)), Ok(Value::Int(5))));
        assert!(matches!(binary_op(&mut rt, BinOp::Div, Value::Int(7), Value::Int(2)), Ok(Value::Int(3))));
        assert!(binary_op(&mut rt, BinOp::Div, Value::Int(1), Value::Int(0))
            .unwrap_err()
            .is(crate::error::ErrorKind::ZeroDivision));
    }

    #[test]
    fn test_promotion() {
        let mut rt = test_rt();
        assert!(matches!(
            binary_op(&mut rt, BinOp::Add, Value::Int(1), Value::Float(0.5)),
            Ok(Value::Float(v)) if v == 1.5
        ));
        assert!(matches!(
            binary_op(&mut rt, BinOp::Add, Value::Int(1), Value::Uint(2)),
            Ok(Value::Uint(3))
        ));
    }

    #[test]
    fn test_string_concat_renders_rhs() {
        let mut rt = test_rt();
        let s = Value::string("n=", &mut rt.heap);
        let out = binary_op(&mut rt, BinOp::Add, s, Value::Int(7)).unwrap();
        assert_eq!(crate::printer::render_str(&out, &rt.heap, rt.interns()), "n=7");
    }

    #[test]
    fn test_invalid_operator_error() {
        let mut rt = test_rt();
        let d = Value::Ref(rt.heap.alloc(HeapData::Dict(Dict::new())));
        let err = binary_op(&mut rt, BinOp::Sub, d, Value::Int(1)).unwrap_err();
        assert!(err.is(crate::error::ErrorKind::InvalidOperator));
        assert!(err.message().contains("dict"));
        assert!(err.message().contains("int"));
    }

    #[test]
    fn test_regex_operators() {
        let mut rt = test_rt();
        let re = Value::Ref(
            rt.heap
                .alloc(HeapData::Regex(crate::types::RegexValue::compile("[0-9]+").unwrap())),
        );
        let text = Value::string("ab12cd34", &mut rt.heap);
        assert!(matches!(binary_op(&mut rt, BinOp::Match, re, text), Ok(Value::Bool(true))));
        let found = binary_op(&mut rt, BinOp::Find, re, text).unwrap();
        assert!(matches!(found, Value::Ref(_)));
        let all = binary_op(&mut rt, BinOp::FindAll, text, re).unwrap();
        let Value::Ref(id) = all else { panic!("expected array") };
        assert!(matches!(rt.heap.get(id), HeapData::Array(items) if items.len() == 2));
    }
}
