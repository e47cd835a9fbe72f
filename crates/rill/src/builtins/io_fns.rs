//! Print and standard-I/O builtins.

use crate::{
    builtins::Call,
    error::{ErrorKind, RunError, RunResult},
    heap::HeapData,
    printer,
    value::{Value, as_str},
};

/// `print` joins its arguments with single spaces; `println` appends a
/// newline. Output goes to the top of the stdout stack.
pub(super) fn print(call: &mut Call<'_>, newline: bool) -> RunResult<Value> {
    call.no_more_named()?;
    let mut out = String::new();
    let values = call.args.to_vec();
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&printer::render_str(v, &call.rt.heap, call.rt.interns()));
    }
    if newline {
        out.push('\n');
    }
    call.rt.io.write_stdout(&mut call.rt.heap, &out)?;
    Ok(Value::Nil)
}

/// Minimal formatter: `%v` (render), `%s` (string render), `%d` (integer),
/// `%f` (float), `%q` (repr) and `%%`.
pub(super) fn printf(call: &mut Call<'_>) -> RunResult<Value> {
    call.no_more_named()?;
    let fmt_value = call
        .args
        .shift()
        .ok_or_else(|| RunError::wrong_num_args(">=1", 0))?;
    let Some(fmt) = as_str(&fmt_value, &call.rt.heap, call.rt.interns()) else {
        return Err(RunError::argument_type(1, "str", &fmt_value.type_name(&call.rt.heap)));
    };
    let fmt = fmt.to_owned();

    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('v' | 's' | 'd' | 'f' | 'q')) => {
                let v = call
                    .args
                    .shift()
                    .ok_or_else(|| RunError::new(ErrorKind::WrongNumArguments, "printf: missing argument for verb"))?;
                match verb {
                    'q' => out.push_str(&printer::render_repr(&v, &call.rt.heap, call.rt.interns())),
                    'd' => match v {
                        Value::Int(n) => out.push_str(&n.to_string()),
                        Value::Uint(n) => out.push_str(&n.to_string()),
                        _ => out.push_str(&printer::render_str(&v, &call.rt.heap, call.rt.interns())),
                    },
                    'f' => match v {
                        Value::Float(f) => out.push_str(&printer::format_float(f)),
                        _ => out.push_str(&printer::render_str(&v, &call.rt.heap, call.rt.interns())),
                    },
                    _ => out.push_str(&printer::render_str(&v, &call.rt.heap, call.rt.interns())),
                }
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    call.rt.io.write_stdout(&mut call.rt.heap, &out)?;
    Ok(Value::Nil)
}

/// Resolves a standard stream identifier: `"IN"`/0, `"OUT"`/1, `"ERR"`/2.
pub(super) fn stdio(call: &mut Call<'_>) -> RunResult<Value> {
    let v = call.one()?;
    let fd = match v {
        Value::Int(0) | Value::Uint(0) => 0,
        Value::Int(1) | Value::Uint(1) => 1,
        Value::Int(2) | Value::Uint(2) => 2,
        _ => match as_str(&v, &call.rt.heap, call.rt.interns()) {
            Some("IN") => 0,
            Some("OUT") => 1,
            Some("ERR") => 2,
            _ => {
                return Err(RunError::new(
                    ErrorKind::UnexpectedArgValue,
                    format!(
                        "invalid stdio identifier: {}",
                        printer::render_repr(&v, &call.rt.heap, call.rt.interns())
                    ),
                ));
            }
        },
    };
    Ok(Value::Int(fd))
}

/// Reads one line from the top of the stdin stack, without its trailing
/// newline; nil at end of input.
pub(super) fn read_line(call: &mut Call<'_>) -> RunResult<Value> {
    call.exactly(0)?;
    call.no_more_named()?;
    match call.rt.io.read_line_stdin(&mut call.rt.heap)? {
        Some(mut line) => {
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            Ok(Value::string(line, &mut call.rt.heap))
        }
        None => Ok(Value::Nil),
    }
}

/// Writes renderings to a stream handle (1 = stdout top, 2 = stderr top)
/// or directly into a buffer value.
pub(super) fn write(call: &mut Call<'_>) -> RunResult<Value> {
    call.no_more_named()?;
    let target = call
        .args
        .shift()
        .ok_or_else(|| RunError::wrong_num_args(">=1", 0))?;
    let mut out = String::new();
    let values = call.args.to_vec();
    for v in &values {
        out.push_str(&printer::render_str(v, &call.rt.heap, call.rt.interns()));
    }
    match target {
        Value::Int(1) | Value::Uint(1) => call.rt.io.write_stdout(&mut call.rt.heap, &out)?,
        Value::Int(2) | Value::Uint(2) => call.rt.io.write_stderr(&mut call.rt.heap, &out)?,
        Value::Ref(id) => match call.rt.heap.get_mut(id) {
            HeapData::Buffer(data) => data.extend_from_slice(out.as_bytes()),
            _ => {
                return Err(RunError::new(
                    ErrorKind::NotWriteable,
                    format!("'{}' is not writeable", target.type_name(&call.rt.heap)),
                ));
            }
        },
        _ => {
            return Err(RunError::new(
                ErrorKind::NotWriteable,
                format!("'{}' is not writeable", target.type_name(&call.rt.heap)),
            ));
        }
    }
    Ok(Value::Int(i64::try_from(out.len()).unwrap_or(i64::MAX)))
}
