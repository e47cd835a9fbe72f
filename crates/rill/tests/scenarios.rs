//! End-to-end scenarios, each from a fresh runtime with default globals.

use pretty_assertions::assert_eq;
use rill::{MapImporter, Object, Runtime};

fn eval(source: &str) -> Object {
    let mut rt = Runtime::new();
    rt.eval(source).unwrap()
}

#[test]
fn test_swap_assignment() {
    let result = eval("a := 1\nb := 2\na, b = b, a\nreturn [a, b]");
    assert_eq!(result, Object::Array(vec![Object::Int(2), Object::Int(1)]));
}

#[test]
fn test_try_catch_finally_returns_message() {
    let result = eval("try { throw \"x\" } catch e { return e.Message } finally { }");
    assert_eq!(result, Object::Str("x".into()));
}

#[test]
fn test_three_part_for_loop() {
    let result = eval("s := \"\"\nfor i := 0; i < 3; i++ { s += str(i) }\nreturn s");
    assert_eq!(result, Object::Str("012".into()));
}

#[test]
fn test_sorted_keys() {
    let result = eval("m := {a: 1, b: 2}\nks := keys(m)\nsort(ks)\nreturn ks");
    assert_eq!(
        result,
        Object::Array(vec![Object::Str("a".into()), Object::Str("b".into())])
    );
}

#[test]
fn test_named_parameter_defaults() {
    let result = eval("f := func(x, y=10) { return x + y }\nreturn [f(1), f(1, y=5)]");
    assert_eq!(result, Object::Array(vec![Object::Int(11), Object::Int(6)]));
}

#[test]
fn test_enumerate_entry_shape() {
    let result = eval("it := enumerate([\"a\", \"b\"])\nreturn collect(it)");
    assert_eq!(
        result,
        Object::Array(vec![
            Object::Array(vec![
                Object::Int(0),
                Object::KeyValue(Box::new(Object::Int(0)), Box::new(Object::Str("a".into()))),
            ]),
            Object::Array(vec![
                Object::Int(1),
                Object::KeyValue(Box::new(Object::Int(1)), Box::new(Object::Str("b".into()))),
            ]),
        ])
    );
}

#[test]
fn test_import_compiles_and_caches() {
    let mut importer = MapImporter::new().with_source("m", "x := 41\nreturn x + 1");
    let mut rt = Runtime::new();
    let result = rt
        .eval_with("a := import(\"m\")\nb := import(\"m\")\nreturn [a, b]", &mut importer)
        .unwrap();
    assert_eq!(result, Object::Array(vec![Object::Int(42), Object::Int(42)]));
}

#[test]
fn test_stdout_capture_via_buffer_stack() {
    let mut rt = Runtime::new();
    rt.push_stdout_buffer();
    rt.eval("println(\"hello\", 42)").unwrap();
    assert_eq!(rt.pop_stdout().as_deref(), Some("hello 42\n"));
}
