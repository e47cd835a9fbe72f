//! Composable standard I/O stacks.
//!
//! The runtime carries three stacks (stdin, stdout, stderr). Writes go to
//! the top entry; pushing a buffer value captures output or supplies input,
//! and popping restores the previous stream. Only the owning runtime
//! mutates its stacks.

use std::io::{BufRead as _, Write as _};

use crate::{
    error::{ErrorKind, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
};

/// An output sink on the stdout/stderr stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutSink {
    StdOut,
    StdErr,
    /// A heap buffer value capturing output.
    Buffer(HeapId),
}

/// An input source on the stdin stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InSource {
    StdIn,
    Buffer(HeapId),
}

/// The three I/O stacks.
#[derive(Debug)]
pub(crate) struct IoStacks {
    pub stdin: Vec<InSource>,
    pub stdout: Vec<OutSink>,
    pub stderr: Vec<OutSink>,
}

impl Default for IoStacks {
    fn default() -> Self {
        Self {
            stdin: vec![InSource::StdIn],
            stdout: vec![OutSink::StdOut],
            stderr: vec![OutSink::StdErr],
        }
    }
}

impl IoStacks {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_to(sink: OutSink, heap: &mut Heap, text: &str) -> RunResult<()> {
        match sink {
            OutSink::StdOut => {
                let mut out = std::io::stdout().lock();
                out.write_all(text.as_bytes())
                    .and_then(|()| out.flush())
                    .map_err(|e| RunError::new(ErrorKind::Type, format!("stdout write failed: {e}")))
            }
            OutSink::StdErr => {
                let mut err = std::io::stderr().lock();
                err.write_all(text.as_bytes())
                    .and_then(|()| err.flush())
                    .map_err(|e| RunError::new(ErrorKind::Type, format!("stderr write failed: {e}")))
            }
            OutSink::Buffer(id) => match heap.get_mut(id) {
                HeapData::Buffer(data) => {
                    data.extend_from_slice(text.as_bytes());
                    Ok(())
                }
                _ => Err(RunError::new(ErrorKind::NotWriteable, "stdout target is not a buffer")),
            },
        }
    }

    /// Writes to the top of the stdout stack.
    pub fn write_stdout(&self, heap: &mut Heap, text: &str) -> RunResult<()> {
        let sink = self.stdout.last().copied().unwrap_or(OutSink::StdOut);
        Self::write_to(sink, heap, text)
    }

    /// Writes to the top of the stderr stack.
    pub fn write_stderr(&self, heap: &mut Heap, text: &str) -> RunResult<()> {
        let sink = self.stderr.last().copied().unwrap_or(OutSink::StdErr);
        Self::write_to(sink, heap, text)
    }

    /// Reads one line (including its newline) from the top of the stdin
    /// stack. Buffer sources consume their bytes; `None` means end of
    /// input.
    pub fn read_line_stdin(&self, heap: &mut Heap) -> RunResult<Option<String>> {
        match self.stdin.last().copied().unwrap_or(InSource::StdIn) {
            InSource::StdIn => {
                let mut line = String::new();
                match std::io::stdin().lock().read_line(&mut line) {
                    Ok(0) => Ok(None),
                    Ok(_) => Ok(Some(line)),
                    Err(e) => Err(RunError::new(ErrorKind::Type, format!("stdin read failed: {e}"))),
                }
            }
            InSource::Buffer(id) => match heap.get_mut(id) {
                HeapData::Buffer(data) => {
                    if data.is_empty() {
                        return Ok(None);
                    }
                    let split = data.iter().position(|&b| b == b'\n').map_or(data.len(), |i| i + 1);
                    let line: Vec<u8> = data.drain(..split).collect();
                    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
                }
                _ => Err(RunError::new(ErrorKind::Type, "stdin target is not a buffer")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_stdin_lines() {
        let mut heap = Heap::new();
        let buf = heap.alloc(HeapData::Buffer(b"one\ntwo".to_vec()));
        let mut io = IoStacks::new();
        io.stdin.push(InSource::Buffer(buf));
        assert_eq!(io.read_line_stdin(&mut heap).unwrap().as_deref(), Some("one\n"));
        assert_eq!(io.read_line_stdin(&mut heap).unwrap().as_deref(), Some("two"));
        assert_eq!(io.read_line_stdin(&mut heap).unwrap(), None);
    }

    #[test]
    fn test_buffer_capture() {
        let mut heap = Heap::new();
        let buf = heap.alloc(HeapData::Buffer(Vec::new()));
        let mut io = IoStacks::new();
        io.stdout.push(OutSink::Buffer(buf));
        io.write_stdout(&mut heap, "hello ").unwrap();
        io.write_stdout(&mut heap, "world").unwrap();
        let HeapData::Buffer(data) = heap.get(buf) else {
            panic!("expected buffer");
        };
        assert_eq!(data, b"hello world");
    }
}
