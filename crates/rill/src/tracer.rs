//! Execution tracing hooks.
//!
//! The VM reports instruction dispatch, calls and thrown errors to a
//! `VmTracer`. The default `NoopTracer` compiles away to nothing useful for
//! production; `StderrTracer` prints a line per event for debugging.

use crate::error::RunError;

/// Hooks observed by the VM during execution.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each instruction dispatch.
    fn on_instruction(&mut self, _ip: usize, _opcode: &'static str) {}

    /// Called when a callable is entered.
    fn on_call(&mut self, _name: &str) {}

    /// Called when an error starts unwinding.
    fn on_throw(&mut self, _err: &RunError) {}
}

/// Tracer that ignores every event.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that prints every event to stderr.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, ip: usize, opcode: &'static str) {
        eprintln!("[trace] {ip:04} {opcode}");
    }

    fn on_call(&mut self, name: &str) {
        eprintln!("[trace] call {name}");
    }

    fn on_throw(&mut self, err: &RunError) {
        eprintln!("[trace] throw {err}");
    }
}

/// Tracer that records events in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub calls: Vec<String>,
    pub throws: Vec<String>,
}

impl VmTracer for RecordingTracer {
    fn on_call(&mut self, name: &str) {
        self.calls.push(name.to_owned());
    }

    fn on_throw(&mut self, err: &RunError) {
        self.throws.push(err.to_string());
    }
}
