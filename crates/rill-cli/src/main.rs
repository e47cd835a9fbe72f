//! The rill command-line front-end.
//!
//! Usage:
//!   rill run FILE [--trace]
//!   rill eval 'SOURCE'

use std::{path::Path, process::ExitCode};

use rill::{FileImporter, Object, Runtime, tracer::StderrTracer};

fn usage() -> ExitCode {
    eprintln!("usage: rill run FILE [--trace]");
    eprintln!("       rill eval 'SOURCE'");
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, rest) = match args.split_first() {
        Some((cmd, rest)) => (cmd.as_str(), rest),
        None => return usage(),
    };

    let trace = rest.iter().any(|a| a == "--trace");
    let positional: Vec<&String> = rest.iter().filter(|a| !a.starts_with("--")).collect();

    let mut runtime = Runtime::new();
    if trace {
        runtime.set_tracer(Box::new(StderrTracer));
    }

    let result = match command {
        "run" => {
            let Some(path) = positional.first() else {
                return usage();
            };
            let source = match std::fs::read_to_string(path) {
                Ok(src) => src,
                Err(err) => {
                    eprintln!("rill: cannot read {path}: {err}");
                    return ExitCode::FAILURE;
                }
            };
            let base = Path::new(path).parent().unwrap_or_else(|| Path::new("."));
            let mut importer = FileImporter::new(base);
            runtime.eval_with(&source, &mut importer)
        }
        "eval" => {
            let Some(source) = positional.first() else {
                return usage();
            };
            runtime.eval(source)
        }
        _ => return usage(),
    };

    match result {
        Ok(Object::Nil) => ExitCode::SUCCESS,
        Ok(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("rill: {err}");
            ExitCode::FAILURE
        }
    }
}
