//! Separating shell startup noise from command output.
//!
//! Profile scripts and the shell itself may write to stdout or stderr
//! before the tracked command runs, and none of that may count as the
//! command's first output. Each spawn prefixes the command line with a
//! per-spawn marker echoed on both streams; [`PreludeCodec`] drops every
//! byte up to and including the marker and passes the rest through.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use uuid::Uuid;

/// Per-spawn marker written just before the tracked command starts.
#[derive(Debug, Clone)]
pub struct Prelude {
    marker: String,
}

impl Prelude {
    /// Fresh marker that cannot collide with earlier spawns.
    #[must_use]
    pub fn new() -> Self {
        Self {
            marker: format!("procdeck-start-{}", Uuid::new_v4().simple()),
        }
    }

    /// Marker text, without its trailing newline.
    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// `line` preceded by the marker on stdout and stderr.
    #[must_use]
    pub fn wrap(&self, line: &str) -> String {
        let marker = &self.marker;
        format!("printf '%s\\n' {marker}; printf '%s\\n' {marker} >&2; {line}")
    }

    /// Decoder for one of the child's output streams.
    #[must_use]
    pub fn codec(&self) -> PreludeCodec {
        let mut marker = self.marker.clone().into_bytes();
        marker.push(b'\n');
        PreludeCodec {
            marker,
            passed: false,
        }
    }
}

impl Default for Prelude {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw byte decoder that discards everything before the prelude marker.
#[derive(Debug)]
pub struct PreludeCodec {
    marker: Vec<u8>,
    passed: bool,
}

impl PreludeCodec {
    /// Whether the marker has been seen on this stream.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.passed
    }
}

impl Decoder for PreludeCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<BytesMut>> {
        if !self.passed {
            let found = src
                .windows(self.marker.len())
                .position(|window| window == self.marker.as_slice());
            if let Some(at) = found {
                src.advance(at + self.marker.len());
                self.passed = true;
            } else {
                // Keep a possible partial marker at the end.
                let keep = self.marker.len() - 1;
                if src.len() > keep {
                    src.advance(src.len() - keep);
                }
                return Ok(None);
            }
        }

        if src.is_empty() {
            Ok(None)
        } else {
            Ok(Some(src.split_to(src.len())))
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<BytesMut>> {
        let item = self.decode(src)?;
        if !self.passed {
            src.clear();
        }
        Ok(item)
    }
}
