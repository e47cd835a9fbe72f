//! Universal laws of the value model and control flow.

use pretty_assertions::assert_eq;
use rill::{ErrorKind, Object, Runtime};

fn eval(source: &str) -> Object {
    let mut rt = Runtime::new();
    rt.eval(source).unwrap()
}

#[test]
fn test_equality_is_reflexive_and_symmetric() {
    let result = eval(
        "x := [1, \"a\", {k: 1}]\n\
         y := [1, \"a\", {k: 1}]\n\
         return [x == x, x == y, y == x, 1 == 1.0, 2 == 2u]",
    );
    assert_eq!(result, Object::Array(vec![Object::Bool(true); 5]));
}

#[test]
fn test_copy_is_one_level_deep() {
    // Mutating the copy's first level never touches the original.
    let result = eval("a := [1, 2]\nb := copy(a)\nb[0] = 9\nreturn [a[0], b[0], a == b]");
    assert_eq!(
        result,
        Object::Array(vec![Object::Int(1), Object::Int(9), Object::Bool(false)])
    );
    // Nested structure is shared by a shallow copy.
    let shared = eval("a := [[1]]\nb := copy(a)\nb[0][0] = 9\nreturn a[0][0]");
    assert_eq!(shared, Object::Int(9));
}

#[test]
fn test_deep_copy_shares_nothing() {
    let result = eval("a := [[1], {k: [2]}]\nb := deepCopy(a)\nreturn a == b");
    assert_eq!(result, Object::Bool(true));
    let isolated = eval("a := [[1]]\nb := deepCopy(a)\nb[0][0] = 9\nreturn [a[0][0], b[0][0]]");
    assert_eq!(isolated, Object::Array(vec![Object::Int(1), Object::Int(9)]));
}

#[test]
fn test_decimal_canonical_rendering() {
    assert_eq!(eval("return str(decimal(\"1.50\"))"), Object::Str("1.50".into()));
    assert_eq!(eval("return str(1.5d + 2.25d)"), Object::Str("3.75".into()));
    assert_eq!(eval("return str(decimal(1.5))"), Object::Str("1.5".into()));
    assert_eq!(eval("return 1.5d == 1.50d"), Object::Bool(true));
}

#[test]
fn test_key_value_array_to_dict_last_wins() {
    let result = eval(
        "a := keyValueArray(kv(\"a\", 1), kv(\"b\", 2), kv(\"a\", 3))\n\
         d := a.toDict()\n\
         return [d[\"a\"], d[\"b\"], len(a)]",
    );
    assert_eq!(
        result,
        Object::Array(vec![Object::Int(3), Object::Int(2), Object::Int(3)])
    );
}

#[test]
fn test_empty_program_returns_nil() {
    assert_eq!(eval(""), Object::Nil);
}

#[test]
fn test_destructuring_missing_slots_are_nil() {
    let result = eval("a, b := [1]\nreturn [a, b]");
    assert_eq!(result, Object::Array(vec![Object::Int(1), Object::Nil]));
    let full = eval("a, b := [1, 2, 3]\nreturn [a, b]");
    assert_eq!(full, Object::Array(vec![Object::Int(1), Object::Int(2)]));
}

#[test]
fn test_finally_runs_exactly_once_per_entry() {
    let result = eval(
        "count := 0\n\
         for i := 0; i < 3; i++ {\n\
             try {\n\
                 if i == 1 { continue }\n\
                 if i == 2 { break }\n\
             } finally { count++ }\n\
         }\n\
         try { throw \"b\" } catch { } finally { count++ }\n\
         return count",
    );
    assert_eq!(result, Object::Int(4));
}

#[test]
fn test_return_in_finally_suppresses_error() {
    let result = eval("f := func() { try { throw \"x\" } finally { return 7 } }\nreturn f()");
    assert_eq!(result, Object::Int(7));
}

#[test]
fn test_uncaught_error_escapes_run() {
    let mut rt = Runtime::new();
    let err = rt.eval("return 1 / 0").unwrap_err();
    match err {
        rill::Error::Run(err) => {
            assert!(err.is(ErrorKind::ZeroDivision));
            assert_eq!(err.to_string(), "ZeroDivision: division by zero");
        }
        other => panic!("expected a runtime error, got {other}"),
    }
}

#[test]
fn test_collect_iterate_equals_value_sequence() {
    let result = eval("c := [1, 2, 3]\nreturn collect(iterate(c)) == c");
    assert_eq!(result, Object::Bool(true));
    let counts = eval("m := {a: 1, b: 2}\nreturn [len(keys(m)), len(items(m)), len(values(m))]");
    assert_eq!(counts, Object::Array(vec![Object::Int(2); 3]));
}

#[test]
fn test_named_args_collect_into_variadic_slot() {
    let result = eval(
        "f := func(a=1, **rest) { return [a, len(rest)] }\n\
         return f(a=2, b=3, c=4)",
    );
    assert_eq!(result, Object::Array(vec![Object::Int(2), Object::Int(2)]));
}

#[test]
fn test_unexpected_named_argument_is_an_error() {
    let mut rt = Runtime::new();
    let err = rt.eval("f := func(a=1) { return a }\nreturn f(zz=2)").unwrap_err();
    match err {
        rill::Error::Run(err) => assert!(err.is(ErrorKind::UnexpectedNamedArg)),
        other => panic!("expected a runtime error, got {other}"),
    }
}
