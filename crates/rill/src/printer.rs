//! Value rendering.
//!
//! A `Printer` tracks shared formatting state through recursive traversal:
//! a visited set keyed by heap identity for cycle detection, depth,
//! indentation and the option dictionary. `render` is the `str` path (bare
//! strings); `repr` quotes and escapes.

use std::fmt::Write as _;

use ahash::AHashSet;

use crate::{
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    types::{Dict, KeyValue},
    value::Value,
};

/// Marker emitted when traversal re-enters a visited value.
const CYCLE_MARKER: &str = "<cycle>";

/// Sort direction for the `sortKeys` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SortKeys {
    Ascending,
    Descending,
}

/// Recognised printer options.
#[derive(Debug, Clone, Default)]
pub(crate) struct PrintOptions {
    /// Indentation unit; multi-line output when set.
    pub indent: Option<String>,
    /// 0 means unbounded.
    pub max_depth: usize,
    /// Raw mode: strings render bare even under repr.
    pub raw: bool,
    /// Include zero-valued instance fields.
    pub zeros: bool,
    /// Hide type names on instances.
    pub anonymous: bool,
    pub sort_keys: Option<SortKeys>,
    /// Print array indices.
    pub indexes: bool,
}

impl PrintOptions {
    pub fn plain() -> Self {
        Self {
            zeros: true,
            ..Self::default()
        }
    }

    /// Builds options from the recognised named-argument keys: `indent`
    /// (boolean or string), `maxDepth` (0 = unbounded), `raw`, `zeros`,
    /// `anonymous`, `sortKeys` ("asc"/"desc") and `indexes`.
    pub fn from_named(
        named: &mut crate::args::NamedArgs,
        heap: &Heap,
        interns: &Interns,
    ) -> crate::error::RunResult<Self> {
        use crate::{args::NamedArgSpec, error::{ErrorKind, RunError}, typeassert::TypeAssertion, value::as_str};

        let mut specs = [
            NamedArgSpec::new("indent", TypeAssertion::any()),
            NamedArgSpec::new("maxDepth", TypeAssertion::any()),
            NamedArgSpec::new("raw", TypeAssertion::any()),
            NamedArgSpec::new("zeros", TypeAssertion::any()),
            NamedArgSpec::new("anonymous", TypeAssertion::any()),
            NamedArgSpec::new("sortKeys", TypeAssertion::any()),
            NamedArgSpec::new("indexes", TypeAssertion::any()),
        ];
        named.get(&mut specs, heap, interns)?;
        let truthy = |v: &Value| !matches!(v, Value::Undefined) && !v.is_falsy(heap, interns);

        let mut opts = Self::plain();
        match &specs[0].value {
            Value::Undefined => {}
            v => {
                if let Some(s) = as_str(v, heap, interns) {
                    opts.indent = Some(s.to_owned());
                } else if truthy(v) {
                    opts.indent = Some("  ".to_owned());
                }
            }
        }
        match specs[1].value {
            Value::Undefined => {}
            Value::Int(n) => opts.max_depth = usize::try_from(n).unwrap_or(0),
            Value::Uint(n) => opts.max_depth = usize::try_from(n).unwrap_or(0),
            ref v => {
                return Err(RunError::named_argument_type("maxDepth", "int", &v.type_name(heap)));
            }
        }
        opts.raw = truthy(&specs[2].value);
        if !matches!(specs[3].value, Value::Undefined) {
            opts.zeros = truthy(&specs[3].value);
        }
        opts.anonymous = truthy(&specs[4].value);
        match &specs[5].value {
            Value::Undefined => {}
            v => match as_str(v, heap, interns) {
                Some("asc") => opts.sort_keys = Some(SortKeys::Ascending),
                Some("desc") => opts.sort_keys = Some(SortKeys::Descending),
                _ => {
                    return Err(RunError::new(
                        ErrorKind::UnexpectedArgValue,
                        "sortKeys must be \"asc\" or \"desc\"",
                    ));
                }
            },
        }
        opts.indexes = truthy(&specs[6].value);
        Ok(opts)
    }
}

pub(crate) struct Printer<'a> {
    heap: &'a Heap,
    interns: &'a Interns,
    visited: AHashSet<HeapId>,
    opts: PrintOptions,
}

/// Renders a value the way `str` does: bare top-level strings.
pub(crate) fn render_str(v: &Value, heap: &Heap, interns: &Interns) -> String {
    Printer::new(heap, interns, PrintOptions::plain()).string(v)
}

/// Renders a value the way `repr` does: strings quoted and escaped.
pub(crate) fn render_repr(v: &Value, heap: &Heap, interns: &Interns) -> String {
    Printer::new(heap, interns, PrintOptions::plain()).representation(v)
}

impl<'a> Printer<'a> {
    pub fn new(heap: &'a Heap, interns: &'a Interns, opts: PrintOptions) -> Self {
        Self {
            heap,
            interns,
            visited: AHashSet::new(),
            opts,
        }
    }

    /// String rendering: bare strings and chars at the top level.
    pub fn string(&mut self, v: &Value) -> String {
        match v {
            Value::Char(c) => c.to_string(),
            Value::Str(id) => self.interns.get(*id).to_owned(),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Str(s) | HeapData::RawStr(s) => s.clone(),
                HeapData::Bytes(b) | HeapData::Buffer(b) => String::from_utf8_lossy(b).into_owned(),
                _ => self.representation(v),
            },
            _ => self.representation(v),
        }
    }

    /// Repr rendering.
    pub fn representation(&mut self, v: &Value) -> String {
        let mut out = String::new();
        self.write(&mut out, v, 0);
        out
    }

    fn write(&mut self, out: &mut String, v: &Value, depth: usize) {
        if self.opts.max_depth != 0 && depth > self.opts.max_depth {
            out.push_str("...");
            return;
        }
        match v {
            Value::Undefined => out.push_str("undefined"),
            Value::Nil => out.push_str("nil"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Flag(b) => out.push_str(if *b { "yes" } else { "no" }),
            Value::Int(n) => {
                let _ = write!(out, "{n}");
            }
            Value::Uint(n) => {
                let _ = write!(out, "{n}");
            }
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Char(c) => {
                if self.opts.raw {
                    out.push(*c);
                } else {
                    let _ = write!(out, "'{c}'");
                }
            }
            Value::Str(id) => self.write_str(out, self.interns.get(*id)),
            Value::Builtin(b) => {
                let _ = write!(out, "<builtin {}>", b.name());
            }
            Value::Func(_) => out.push_str("<compiledFunction>"),
            Value::Ref(id) => self.write_heap(out, *id, depth),
        }
    }

    fn write_str(&self, out: &mut String, s: &str) {
        if self.opts.raw {
            out.push_str(s);
        } else {
            let _ = write!(out, "{s:?}");
        }
    }

    fn write_heap(&mut self, out: &mut String, id: HeapId, depth: usize) {
        let cyclic = match self.heap.get(id) {
            HeapData::Array(_)
            | HeapData::Dict(_)
            | HeapData::SyncDict(_)
            | HeapData::KeyValue(_)
            | HeapData::KeyValueArray(_)
            | HeapData::Instance(_)
            | HeapData::NamedArgs(_) => true,
            _ => false,
        };
        if cyclic && !self.visited.insert(id) {
            out.push_str(CYCLE_MARKER);
            return;
        }

        match self.heap.get(id) {
            HeapData::Str(s) => self.write_str(out, s),
            HeapData::RawStr(s) => {
                if self.opts.raw {
                    out.push_str(s);
                } else {
                    let _ = write!(out, "`{s}`");
                }
            }
            HeapData::Bytes(b) => {
                out.push_str("bytes[");
                for (i, byte) in b.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{byte}");
                }
                out.push(']');
            }
            HeapData::Buffer(b) => {
                let _ = write!(out, "buffer(len={})", b.len());
            }
            HeapData::Array(items) => {
                let items = items.clone();
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    if self.opts.indexes {
                        let _ = write!(out, "{i}: ");
                    }
                    self.write_nested(out, item, depth);
                }
                out.push(']');
            }
            HeapData::Dict(d) => {
                let d = d.clone();
                self.write_dict(out, &d, depth, "{", "}");
            }
            HeapData::SyncDict(lock) => {
                let snapshot = lock.read().map(|g| g.clone()).unwrap_or_default();
                out.push_str("syncDict");
                self.write_dict(out, &snapshot, depth, "{", "}");
            }
            HeapData::KeyValue(kv) => {
                let kv = *kv;
                self.write_pair(out, &kv, depth);
            }
            HeapData::KeyValueArray(a) => {
                let pairs = a.pairs.clone();
                out.push_str("(;");
                for (i, kv) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_pair(out, kv, depth);
                }
                out.push(')');
            }
            HeapData::Error(e) => {
                let _ = write!(out, "{}: {}", e.name, e.message);
            }
            HeapData::Regex(r) => {
                let _ = write!(out, "regex({:?})", r.pattern);
            }
            HeapData::Decimal(d) => {
                let _ = write!(out, "{d}");
            }
            HeapData::Closure(_) => out.push_str("<compiledFunction>"),
            HeapData::Cell(inner) => {
                let inner = *inner;
                self.write(out, &inner, depth);
            }
            HeapData::BoundMethod(m) => {
                let _ = write!(out, "<method {}>", m.name);
            }
            HeapData::MethodCaller(_) => out.push_str("<methodCaller>"),
            HeapData::ObjectType(t) => {
                let _ = write!(out, "<type {}>", t.name);
            }
            HeapData::Instance(inst) => {
                let fields = inst.fields.clone();
                let name = match self.heap.get(inst.ty) {
                    HeapData::ObjectType(t) => t.name.clone(),
                    _ => String::new(),
                };
                if !self.opts.anonymous {
                    out.push_str(&name);
                }
                self.write_instance_fields(out, &fields, depth);
            }
            HeapData::Iter(_) => out.push_str("<iterator>"),
            HeapData::NamedArgs(na) => {
                let mut pairs = Vec::new();
                na.walk(|kv| pairs.push(*kv));
                out.push_str("(;");
                for (i, kv) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_pair(out, kv, depth);
                }
                out.push(')');
            }
        }

        if cyclic {
            self.visited.remove(&id);
        }
    }

    fn write_nested(&mut self, out: &mut String, v: &Value, depth: usize) {
        self.write(out, v, depth + 1);
    }

    /// A key-value pair renders as `key=value`; the flag shorthand drops
    /// the `yes` value.
    fn write_pair(&mut self, out: &mut String, kv: &KeyValue, depth: usize) {
        self.write_nested(out, &kv.key, depth);
        if !kv.is_flag() {
            out.push('=');
            self.write_nested(out, &kv.value, depth);
        }
    }

    fn write_dict(&mut self, out: &mut String, d: &Dict, depth: usize, open: &str, close: &str) {
        let mut keys: Vec<String> = d.keys().map(str::to_owned).collect();
        match self.opts.sort_keys {
            Some(SortKeys::Ascending) => keys.sort_unstable(),
            Some(SortKeys::Descending) => {
                keys.sort_unstable();
                keys.reverse();
            }
            None => {}
        }
        out.push_str(open);
        let indent = self.opts.indent.clone();
        for (i, k) in keys.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            if let Some(unit) = &indent {
                out.push('\n');
                for _ in 0..=depth {
                    out.push_str(unit);
                }
            }
            let _ = write!(out, "{k}: ");
            if let Some(v) = d.get(k) {
                self.write_nested(out, &v, depth);
            }
        }
        if indent.is_some() && !keys.is_empty() {
            out.push('\n');
            let unit = indent.as_deref().unwrap_or_default();
            for _ in 0..depth {
                out.push_str(unit);
            }
        }
        out.push_str(close);
    }

    fn write_instance_fields(&mut self, out: &mut String, fields: &Dict, depth: usize) {
        out.push('{');
        let mut first = true;
        for (k, v) in fields.iter() {
            if !self.opts.zeros && is_zero_value(&v, self.heap) {
                continue;
            }
            if !first {
                out.push_str(", ");
            }
            first = false;
            let _ = write!(out, "{k}: ");
            self.write_nested(out, &v, depth);
        }
        out.push('}');
    }
}

fn is_zero_value(v: &Value, heap: &Heap) -> bool {
    match v {
        Value::Nil => true,
        Value::Int(0) | Value::Uint(0) => true,
        Value::Float(f) => *f == 0.0,
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) | HeapData::RawStr(s) => s.is_empty(),
            HeapData::Array(items) => items.is_empty(),
            HeapData::Dict(d) => d.is_empty(),
            _ => false,
        },
        _ => false,
    }
}

/// Shortest-roundtrip float rendering; integral floats keep a `.0`.
pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "+Inf".to_owned() } else { "-Inf".to_owned() };
    }
    let mut buf = ryu::Buffer::new();
    buf.format(f).to_owned()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_scalars() {
        let heap = Heap::new();
        let interns = Interns::new();
        assert_eq!(render_str(&Value::Nil, &heap, &interns), "nil");
        assert_eq!(render_str(&Value::Int(42), &heap, &interns), "42");
        assert_eq!(render_str(&Value::Float(1.5), &heap, &interns), "1.5");
        assert_eq!(render_str(&Value::Float(2.0), &heap, &interns), "2.0");
        assert_eq!(render_str(&Value::Flag(true), &heap, &interns), "yes");
        assert_eq!(render_str(&Value::Char('a'), &heap, &interns), "a");
    }

    #[test]
    fn test_str_vs_repr() {
        let mut heap = Heap::new();
        let interns = Interns::new();
        let s = Value::string("hi\n", &mut heap);
        assert_eq!(render_str(&s, &heap, &interns), "hi\n");
        assert_eq!(render_repr(&s, &heap, &interns), "\"hi\\n\"");
    }

    #[test]
    fn test_array_and_dict() {
        let mut heap = Heap::new();
        let interns = Interns::new();
        let inner = Value::string("x", &mut heap);
        let arr = Value::Ref(heap.alloc(HeapData::Array(vec![Value::Int(1), inner])));
        assert_eq!(render_repr(&arr, &heap, &interns), "[1, \"x\"]");

        let mut d = Dict::new();
        d.set("a".into(), Value::Int(1));
        let dv = Value::Ref(heap.alloc(HeapData::Dict(d)));
        assert_eq!(render_repr(&dv, &heap, &interns), "{a: 1}");
    }

    #[test]
    fn test_keyvalue_flag_shorthand() {
        let mut heap = Heap::new();
        let mut interns = Interns::new();
        let key = Value::Str(interns.intern("verbose"));
        let kv = Value::Ref(heap.alloc(HeapData::KeyValue(KeyValue::new(key, Value::Flag(true)))));
        assert_eq!(render_repr(&kv, &heap, &interns), "\"verbose\"");
        let kv2 = Value::Ref(heap.alloc(HeapData::KeyValue(KeyValue::new(key, Value::Int(3)))));
        assert_eq!(render_repr(&kv2, &heap, &interns), "\"verbose\"=3");
    }

    #[test]
    fn test_cycle_marker() {
        let mut heap = Heap::new();
        let interns = Interns::new();
        let id = heap.alloc(HeapData::Array(vec![]));
        if let HeapData::Array(items) = heap.get_mut(id) {
            items.push(Value::Ref(id));
        }
        assert_eq!(render_repr(&Value::Ref(id), &heap, &interns), "[<cycle>]");
    }

    #[test]
    fn test_max_depth() {
        let mut heap = Heap::new();
        let interns = Interns::new();
        let inner = Value::Ref(heap.alloc(HeapData::Array(vec![Value::Int(1)])));
        let outer = Value::Ref(heap.alloc(HeapData::Array(vec![inner])));
        let mut printer = Printer::new(
            &heap,
            &interns,
            PrintOptions {
                max_depth: 1,
                zeros: true,
                ..PrintOptions::default()
            },
        );
        assert_eq!(printer.representation(&outer), "[[...]]");
    }
}
