//! Output sinks for the `output_print`-style opcode family: output is any
//! sink with write/flush.
//!
//! Grounded directly on `original_source/lexflow-core/src/lexflow/output.py`:
//! `OutputCapture`, `TeeOutput`, and `StreamingOutput`, translated to a
//! trait-object sink instead of Python's duck-typed `TextIO` protocol.

use std::sync::{Arc, Mutex};

/// Anything a workflow can print to. `write` takes one already-formatted
/// line (the caller is responsible for newline placement, matching the
/// source's `write(str)` contract).
pub trait OutputSink: Send + Sync {
    fn write(&self, text: &str);
    fn flush(&self) {}
}

impl<T: OutputSink + ?Sized> OutputSink for Arc<T> {
    fn write(&self, text: &str) {
        (**self).write(text)
    }

    fn flush(&self) {
        (**self).flush()
    }
}

/// Discards everything written to it — the Engine's default sink when the
/// host supplies none.
pub struct NullOutput;

impl OutputSink for NullOutput {
    fn write(&self, _text: &str) {}
}

/// Captures everything written to it in memory, for tests and CLI `--capture`
/// modes.
#[derive(Default)]
pub struct CaptureOutput {
    buffer: Mutex<String>,
}

impl CaptureOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_output(&self) -> String {
        self.buffer.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.buffer.lock().unwrap().clear();
    }
}

impl OutputSink for CaptureOutput {
    fn write(&self, text: &str) {
        self.buffer.lock().unwrap().push_str(text);
    }
}

/// Writes to every wrapped sink in order, fanning out like Unix `tee`.
pub struct TeeOutput {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl TeeOutput {
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        TeeOutput { sinks }
    }
}

impl OutputSink for TeeOutput {
    fn write(&self, text: &str) {
        for sink in &self.sinks {
            sink.write(text);
        }
    }

    fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}

/// Buffers partial writes and invokes `callback` once per completed line,
/// for WebSocket/SSE style streaming consumers.
pub struct StreamingOutput<F: Fn(&str) + Send + Sync> {
    callback: F,
    buffer: Mutex<String>,
}

impl<F: Fn(&str) + Send + Sync> StreamingOutput<F> {
    pub fn new(callback: F) -> Self {
        StreamingOutput {
            callback,
            buffer: Mutex::new(String::new()),
        }
    }
}

impl<F: Fn(&str) + Send + Sync> OutputSink for StreamingOutput<F> {
    fn write(&self, text: &str) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.push_str(text);
        if buffer.contains('\n') {
            let parts: Vec<String> = buffer.split('\n').map(str::to_string).collect();
            let (complete, remainder) = parts.split_at(parts.len() - 1);
            for line in complete {
                if !line.is_empty() {
                    (self.callback)(line);
                }
            }
            *buffer = remainder.join("\n");
        }
    }

    fn flush(&self) {
        let mut buffer = self.buffer.lock().unwrap();
        if !buffer.is_empty() {
            (self.callback)(&buffer);
            buffer.clear();
        }
    }
}
