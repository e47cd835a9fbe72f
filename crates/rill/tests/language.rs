//! Broader language coverage: closures, pipelines, operators, modules,
//! method attachment, object types and cancellation.

use pretty_assertions::assert_eq;
use rill::{ErrorKind, Limits, MapImporter, Object, Runtime};

fn eval(source: &str) -> Object {
    let mut rt = Runtime::new();
    rt.eval(source).unwrap()
}

fn eval_err(source: &str) -> rill::Error {
    let mut rt = Runtime::new();
    rt.eval(source).unwrap_err()
}

#[test]
fn test_closure_captures_by_reference() {
    let result = eval(
        "counter := func() {\n\
             n := 0\n\
             return func() { n += 1; return n }\n\
         }\n\
         c := counter()\n\
         c(); c()\n\
         return c()",
    );
    assert_eq!(result, Object::Int(3));
}

#[test]
fn test_recursive_function_declaration() {
    let result = eval(
        "func fact(n) {\n\
             if n <= 1 { return 1 }\n\
             return n * fact(n - 1)\n\
         }\n\
         return fact(5)",
    );
    assert_eq!(result, Object::Int(120));
}

#[test]
fn test_two_closures_share_one_cell() {
    let result = eval(
        "make := func() {\n\
             n := 0\n\
             inc := func() { n += 1 }\n\
             get := func() { return n }\n\
             return [inc, get]\n\
         }\n\
         pair := make()\n\
         pair[0]()\n\
         pair[0]()\n\
         return pair[1]()",
    );
    assert_eq!(result, Object::Int(2));
}

#[test]
fn test_capture_through_two_levels() {
    let result = eval(
        "outer := func() {\n\
             x := 10\n\
             middle := func() {\n\
                 inner := func() { return x + 1 }\n\
                 return inner()\n\
             }\n\
             return middle()\n\
         }\n\
         return outer()",
    );
    assert_eq!(result, Object::Int(11));
}

#[test]
fn test_pipeline_rewrites() {
    let result = eval(
        "double := func(x) { return x * 2 }\n\
         add := func(x, y) { return x + y }\n\
         return [5 | double | double, 5 | add(3)]",
    );
    assert_eq!(result, Object::Array(vec![Object::Int(20), Object::Int(8)]));
}

#[test]
fn test_short_circuit_and_nil_coalesce() {
    let result = eval("a := nil\nreturn [a ?? 3, nil || 4, 0 || 5, 1 && 2, 0 && 9]");
    assert_eq!(
        result,
        Object::Array(vec![
            Object::Int(3),
            Object::Int(4),
            Object::Int(5),
            Object::Int(2),
            Object::Int(0),
        ])
    );
}

#[test]
fn test_conditional_assignment_forms() {
    let result = eval("a := nil\na ??= 5\na ??= 9\nb := 0\nb ||= 7\nreturn [a, b]");
    assert_eq!(result, Object::Array(vec![Object::Int(5), Object::Int(7)]));
}

#[test]
fn test_compound_assignment_on_indexed_target() {
    let result = eval("m := {n: 1}\nm.n += 4\na := [1, 2]\na[1] *= 3\nreturn [m.n, a[1]]");
    assert_eq!(result, Object::Array(vec![Object::Int(5), Object::Int(6)]));
}

#[test]
fn test_const_iota_and_write_protection() {
    assert_eq!(
        eval("const a = iota, b = iota, c = iota\nreturn [a, b, c]"),
        Object::Array(vec![Object::Int(0), Object::Int(1), Object::Int(2)])
    );
    match eval_err("const a = 1\na = 2") {
        rill::Error::Compile(err) => assert!(err.message.contains("constant")),
        other => panic!("expected a compile error, got {other}"),
    }
}

#[test]
fn test_method_attachment_by_name_collision() {
    let result = eval(
        "func show(x) { return \"any\" }\n\
         func show(x int) { return \"int\" }\n\
         func show(x str) { return \"str\" }\n\
         return [show(1), show(\"s\"), show(1.5)]",
    );
    assert_eq!(
        result,
        Object::Array(vec![
            Object::Str("int".into()),
            Object::Str("str".into()),
            Object::Str("any".into()),
        ])
    );
}

#[test]
fn test_variadic_positional() {
    let result = eval(
        "f := func(a, *rest) { return [a, len(rest)] }\n\
         xs := [1, 2, 3]\n\
         return [f(*xs), f(9)]",
    );
    assert_eq!(
        result,
        Object::Array(vec![
            Object::Array(vec![Object::Int(1), Object::Int(2)]),
            Object::Array(vec![Object::Int(9), Object::Int(0)]),
        ])
    );
}

#[test]
fn test_typed_parameter_validation() {
    let mut rt = Runtime::new();
    let err = rt
        .eval("f := func(a int|str) { return a }\nreturn f(1.5)")
        .unwrap_err();
    match err {
        rill::Error::Run(err) => {
            assert!(err.is(ErrorKind::ArgumentType));
            assert!(err.message().contains("int|str"));
        }
        other => panic!("expected a runtime error, got {other}"),
    }
    assert_eq!(eval("f := func(a int|str) { return a }\nreturn f(1)"), Object::Int(1));
}

#[test]
fn test_regex_operators_and_methods() {
    let result = eval(
        "re := regexp(\"[0-9]+\")\n\
         m := re ~~ \"ab12cd\"\n\
         all := re ~~~ \"a1b22\"\n\
         return [re ~ \"x9\", re.match(\"xyz\"), m.text, m.begin, len(all)]",
    );
    assert_eq!(
        result,
        Object::Array(vec![
            Object::Bool(true),
            Object::Bool(false),
            Object::Str("12".into()),
            Object::Int(2),
            Object::Int(2),
        ])
    );
}

#[test]
fn test_char_and_uint_arithmetic() {
    let result = eval("return [1 + 2u, 'a' + 1, 'b' - 'a', 7 / 2, 7.0 / 2]");
    assert_eq!(
        result,
        Object::Array(vec![
            Object::Uint(3),
            Object::Char('b'),
            Object::Int(1),
            Object::Int(3),
            Object::Float(3.5),
        ])
    );
}

#[test]
fn test_slices() {
    let result = eval("a := [1, 2, 3, 4]\ns := \"hello\"\nreturn [a[1:3], s[1:3], a[:2], s[3:]]");
    assert_eq!(
        result,
        Object::Array(vec![
            Object::Array(vec![Object::Int(2), Object::Int(3)]),
            Object::Str("el".into()),
            Object::Array(vec![Object::Int(1), Object::Int(2)]),
            Object::Str("lo".into()),
        ])
    );
}

#[test]
fn test_for_in_over_dict_and_else() {
    assert_eq!(
        eval("m := {a: 1, b: 2}\ntotal := 0\nfor k, v in m { total += v }\nreturn total"),
        Object::Int(3)
    );
    assert_eq!(eval("s := 0\nfor x in [] { s = 1 } else { s = 2 }\nreturn s"), Object::Int(2));
    assert_eq!(
        eval("s := 0\nfor x in [7] { s = x } else { s = 2 }\nreturn s"),
        Object::Int(7)
    );
}

#[test]
fn test_filter_map_reduce() {
    let result = eval(
        "xs := [1, 2, 3, 4]\n\
         evens := filter(xs, func(x) { return x % 2 == 0 })\n\
         doubled := map(xs, func(x) { return x * 2 })\n\
         total := reduce(xs, func(a, b) { return a + b })\n\
         return [evens, doubled[3], total]",
    );
    assert_eq!(
        result,
        Object::Array(vec![
            Object::Array(vec![Object::Int(2), Object::Int(4)]),
            Object::Int(8),
            Object::Int(10),
        ])
    );
}

#[test]
fn test_range_and_zip() {
    assert_eq!(
        eval("return collect(range(0, 6, 2))"),
        Object::Array(vec![Object::Int(0), Object::Int(2), Object::Int(4)])
    );
    let zipped = eval("return len(collect(zip(iterate([1, 2]), iterate([\"a\"]))))");
    assert_eq!(zipped, Object::Int(3));
}

#[test]
fn test_sync_dict() {
    let result = eval("d := syncDict({a: 1})\nd[\"b\"] = 2\nreturn [d[\"a\"], d[\"b\"], len(d)]");
    assert_eq!(
        result,
        Object::Array(vec![Object::Int(1), Object::Int(2), Object::Int(2)])
    );
}

#[test]
fn test_sync_dict_iteration_is_a_consistent_snapshot() {
    // Mutating the dict mid-iteration does not change what the iteration
    // observes: the entries were cloned under one read acquisition.
    let result = eval(
        "d := syncDict({a: 1, b: 2})\n\
         total := 0\n\
         for k, v in d {\n\
             d[k] = v + 10\n\
             total += v\n\
         }\n\
         return [total, d[\"a\"], d[\"b\"]]",
    );
    assert_eq!(
        result,
        Object::Array(vec![Object::Int(3), Object::Int(11), Object::Int(12)])
    );
}

#[test]
fn test_contains_and_delete() {
    let result = eval(
        "m := {a: 1}\n\
         had := contains(m, \"a\")\n\
         delete(m, \"a\")\n\
         return [had, contains(m, \"a\"), contains([1, 2], 2), contains(\"hello\", \"ell\"), len(m)]",
    );
    assert_eq!(
        result,
        Object::Array(vec![
            Object::Bool(true),
            Object::Bool(false),
            Object::Bool(true),
            Object::Bool(true),
            Object::Int(0),
        ])
    );
    match eval_err("delete([1], 0)") {
        rill::Error::Run(err) => assert!(err.is(ErrorKind::NotIndexDeletable)),
        other => panic!("expected a runtime error, got {other}"),
    }
}

#[test]
fn test_iterate_collect_modes() {
    assert_eq!(
        eval("return collect(iterate({a: 1, b: 2}, collect=\"keys\"))"),
        Object::Array(vec![Object::Str("a".into()), Object::Str("b".into())])
    );
    assert_eq!(
        eval("return collect(iterate([7], collect=\"pairs\"))"),
        Object::Array(vec![Object::Array(vec![Object::Int(0), Object::Int(7)])])
    );
}

#[test]
fn test_stdin_buffer_read_line() {
    let mut rt = Runtime::new();
    rt.push_stdin_buffer("one\ntwo\n");
    let result = rt
        .eval("a := readLine()\nb := readLine()\nc := readLine()\nreturn [a, b, c]")
        .unwrap();
    assert_eq!(
        result,
        Object::Array(vec![Object::Str("one".into()), Object::Str("two".into()), Object::Nil])
    );
}

#[test]
fn test_object_types() {
    let result = eval(
        "Point := newType(\"Point\", fields={x: 0, y: 0})\n\
         p := Point({x: 1})\n\
         p.y = 5\n\
         return [typeName(p), p.x, p.y]",
    );
    assert_eq!(
        result,
        Object::Array(vec![Object::Str("Point".into()), Object::Int(1), Object::Int(5)])
    );
}

#[test]
fn test_object_type_getters_and_setters() {
    let result = eval(
        "Box := newType(\"Box\",\n\
             fields={v: 1},\n\
             getters={double: func(self) { return self.v * 2 }},\n\
             setters={v2: func(self, x) { self.v = x }})\n\
         b := Box()\n\
         b.v2 = 10\n\
         return [b.double, b.v]",
    );
    assert_eq!(result, Object::Array(vec![Object::Int(20), Object::Int(10)]));
}

#[test]
fn test_object_type_accepted_params() {
    let ok = eval(
        "P := newType(\"P\", params=[[\"dict\"]])\n\
         p := P({x: 1})\n\
         return p.x",
    );
    assert_eq!(ok, Object::Int(1));
    match eval_err("P := newType(\"P\", params=[[\"dict\"]])\nreturn P(1)") {
        rill::Error::Run(err) => {
            assert!(err.is(ErrorKind::ArgumentType));
            assert!(err.message().contains("dict"));
        }
        other => panic!("expected a runtime error, got {other}"),
    }
}

#[test]
fn test_value_module_import() {
    let mut importer = MapImporter::new().with_value(
        "config",
        Object::Dict(vec![("port".into(), Object::Int(8080))]),
    );
    let mut rt = Runtime::new();
    let result = rt
        .eval_with("cfg := import(\"config\")\nreturn cfg.port", &mut importer)
        .unwrap();
    assert_eq!(result, Object::Int(8080));
}

#[test]
fn test_globals_cross_boundary() {
    let mut rt = Runtime::new();
    rt.set_global("limit", Object::Int(41));
    let result = rt.eval("global limit\nreturn limit + 1").unwrap();
    assert_eq!(result, Object::Int(42));
    rt.eval("global out\nout = 7").unwrap();
    assert_eq!(rt.get_global("out"), Some(Object::Int(7)));
}

#[test]
fn test_string_global_survives_program_swap() {
    let mut rt = Runtime::new();
    rt.eval("global g\ng = [\"hello\", {k: \"v\"}]").unwrap();
    let v = rt.eval("global g\nreturn g[0] + \"!\"").unwrap();
    assert_eq!(v, Object::Str("hello!".into()));
    assert_eq!(rt.eval("global g\nreturn g[1].k").unwrap(), Object::Str("v".into()));
}

#[test]
fn test_abort_flag_cancels_execution() {
    let mut rt = Runtime::new();
    let handle = rt.abort_handle();
    handle.abort();
    let err = rt.eval("for { }").unwrap_err();
    match err {
        rill::Error::Run(err) => assert!(err.is(ErrorKind::VmAborted)),
        other => panic!("expected a runtime error, got {other}"),
    }
    handle.reset();
    assert_eq!(rt.eval("return 1").unwrap(), Object::Int(1));
}

#[test]
fn test_runaway_recursion_overflows() {
    match eval_err("func f() { return f() }\nreturn f()") {
        rill::Error::Run(err) => assert!(err.is(ErrorKind::StackOverflow)),
        other => panic!("expected a runtime error, got {other}"),
    }
}

#[test]
fn test_symbol_limit_is_a_compile_error() {
    let mut rt = Runtime::with_limits(Limits {
        max_locals: 2,
        ..Limits::default()
    });
    let err = rt.eval("a := 1\nb := 2\nc := 3").unwrap_err();
    match err {
        rill::Error::Compile(err) => assert!(err.message.contains("symbol limit")),
        other => panic!("expected a compile error, got {other}"),
    }
}

#[test]
fn test_redefinition_in_block_is_an_error() {
    match eval_err("a := 1\na := 2") {
        rill::Error::Compile(err) => assert!(err.message.contains("already defined")),
        other => panic!("expected a compile error, got {other}"),
    }
    // Shadowing in a nested block is fine; the sentinel may repeat.
    assert_eq!(eval("a := 1\n{ a := 2 }\n_ := 1\n_ := 2\nreturn a"), Object::Int(1));
}

#[test]
fn test_printf_verbs() {
    let mut rt = Runtime::new();
    rt.push_stdout_buffer();
    rt.eval("printf(\"%d-%v-%q-%%\", 1, [2], \"s\")").unwrap();
    assert_eq!(rt.pop_stdout().as_deref(), Some("1-[2]-\"s\"-%"));
}

#[test]
fn test_stdio_identifiers() {
    let result = eval("return [stdio(\"IN\"), stdio(\"OUT\"), stdio(\"ERR\"), stdio(1)]");
    assert_eq!(
        result,
        Object::Array(vec![Object::Int(0), Object::Int(1), Object::Int(2), Object::Int(1)])
    );
}

#[test]
fn test_write_to_buffer_value() {
    let result = eval("b := buffer()\nwrite(b, \"ab\", 12)\nreturn str(bytes(b))");
    assert_eq!(result, Object::Str("ab12".into()));
}

#[test]
fn test_repr_options() {
    assert_eq!(
        eval("m := {b: 2, a: 1}\nreturn repr(m, sortKeys=\"asc\")"),
        Object::Str("{a: 1, b: 2}".into())
    );
    assert_eq!(
        eval("return repr([1, 2], indexes=true)"),
        Object::Str("[0: 1, 1: 2]".into())
    );
    assert_eq!(eval("return repr([[1]], maxDepth=1)"), Object::Str("[[...]]".into()));
    assert_eq!(eval("return repr(\"a\\n\", raw=true)"), Object::Str("a\n".into()));
}

#[test]
fn test_nested_function_scopes_are_isolated() {
    let result = eval(
        "x := 1\n\
         f := func() { x := 2; return x }\n\
         return [f(), x]",
    );
    assert_eq!(result, Object::Array(vec![Object::Int(2), Object::Int(1)]));
}

#[test]
fn test_ternary_and_nil_checks() {
    let result = eval("a := nil\nb := 1\nreturn [a == nil ? \"yes\" : \"no\", b != nil, a == nil]");
    assert_eq!(
        result,
        Object::Array(vec![Object::Str("yes".into()), Object::Bool(true), Object::Bool(true)])
    );
}

#[test]
fn test_if_with_nil_check_condition() {
    let result = eval(
        "a := nil\nout := 0\n\
         if a == nil { out = 1 } else { out = 2 }\n\
         b := 5\n\
         if b != nil { out += 10 }\n\
         return out",
    );
    assert_eq!(result, Object::Int(11));
}

#[test]
fn test_errors_are_falsy_and_matchable() {
    let result = eval(
        "caught := nil\n\
         try { throw error(\"boom\", name=\"MyError\") } catch e { caught = e }\n\
         other := error(\"x\", name=\"MyError\")\n\
         return [isError(caught), isError(caught, other), caught.Name, bool(caught)]",
    );
    assert_eq!(
        result,
        Object::Array(vec![
            Object::Bool(true),
            Object::Bool(true),
            Object::Str("MyError".into()),
            Object::Bool(false),
        ])
    );
}

#[test]
fn test_bytes_and_buffer_values() {
    let result = eval("bs := bytes(\"hi\")\nreturn [len(bs), bs[0], str(bs[0:1])]");
    assert_eq!(
        result,
        Object::Array(vec![Object::Int(2), Object::Int(104), Object::Str("h".into())])
    );
}
