//! Per-code output sinks and line processing.
//!
//! A sink is created the first time a code is spawned by this host and is
//! reused by later spawns of the same code, so the user can still read the
//! output of a command after it crashed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};

/// Rewrites one line of command output before it reaches the sink.
///
/// Lines arrive without their trailing newline; the sink adds it back.
pub trait LineProcessor: Send + Sync {
    /// Transform a single line of output belonging to `code`.
    fn process(&self, code: &str, line: &[u8]) -> Vec<u8>;
}

/// Line processor that leaves output untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl LineProcessor for Passthrough {
    fn process(&self, _code: &str, line: &[u8]) -> Vec<u8> {
        line.to_vec()
    }
}

/// Append-only byte buffer holding a code's output.
#[derive(Debug)]
pub struct OutputSink {
    code: String,
    buffer: Mutex<BytesMut>,
}

impl OutputSink {
    /// Create an empty sink for `code`.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            buffer: Mutex::new(BytesMut::new()),
        }
    }

    /// Code the sink belongs to.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Append raw bytes.
    pub fn append(&self, bytes: &[u8]) {
        self.lock().extend_from_slice(bytes);
    }

    /// Snapshot of everything written so far.
    #[must_use]
    pub fn contents(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock())
    }

    /// Last `max_bytes` of output, lossily decoded.
    #[must_use]
    pub fn tail(&self, max_bytes: usize) -> String {
        let buffer = self.lock();
        let start = buffer.len().saturating_sub(max_bytes);
        String::from_utf8_lossy(&buffer[start..]).into_owned()
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been written since creation or the last clear.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop all buffered output.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BytesMut> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of sinks keyed by code, owned by the host context.
#[derive(Debug, Default)]
pub struct OutputSinks {
    sinks: Mutex<HashMap<String, Arc<OutputSink>>>,
}

impl OutputSinks {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink for `code`, if one exists.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<Arc<OutputSink>> {
        self.lock().get(code).cloned()
    }

    /// Sink for `code`, creating it on first use.
    #[must_use]
    pub fn get_or_create(&self, code: &str) -> Arc<OutputSink> {
        Arc::clone(
            self.lock()
                .entry(code.to_owned())
                .or_insert_with(|| Arc::new(OutputSink::new(code))),
        )
    }

    /// Whether a sink exists for `code`.
    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.lock().contains_key(code)
    }

    /// Remove and return the sink for `code`.
    #[must_use]
    pub fn remove(&self, code: &str) -> Option<Arc<OutputSink>> {
        self.lock().remove(code)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<OutputSink>>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Splits a chunked byte stream into newline-terminated lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: BytesMut,
}

impl LineSplitter {
    /// Create a splitter with no buffered input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, without terminators.
    ///
    /// A trailing `\r` is stripped along with the `\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line = self.pending.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            lines.push(line.freeze());
        }
        lines
    }

    /// Flush a final unterminated line, if any.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.split().freeze())
        }
    }
}

/// Feeds raw output through a [`LineSplitter`] and [`LineProcessor`] into a sink.
pub struct OutputPump {
    code: String,
    splitter: LineSplitter,
    processor: Arc<dyn LineProcessor>,
    sink: Arc<OutputSink>,
}

impl OutputPump {
    /// Create a pump writing `code`'s output into `sink`.
    #[must_use]
    pub fn new(code: &str, processor: Arc<dyn LineProcessor>, sink: Arc<OutputSink>) -> Self {
        Self {
            code: code.to_owned(),
            splitter: LineSplitter::new(),
            processor,
            sink,
        }
    }

    /// Sink receiving processed output.
    #[must_use]
    pub fn sink(&self) -> &Arc<OutputSink> {
        &self.sink
    }

    /// Process a raw chunk, appending every completed line.
    pub fn feed(&mut self, chunk: &[u8]) {
        for line in self.splitter.push(chunk) {
            self.write_line(&line, true);
        }
    }

    /// Append any buffered partial line.
    pub fn finish(&mut self) {
        if let Some(line) = self.splitter.finish() {
            self.write_line(&line, false);
        }
    }

    fn write_line(&self, line: &[u8], terminated: bool) {
        let mut processed = self.processor.process(&self.code, line);
        if terminated {
            processed.push(b'\n');
        }
        self.sink.append(&processed);
    }
}
