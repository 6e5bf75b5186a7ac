//! User-facing crash notifications.

use tracing::error;

use crate::process::output::OutputSink;

/// Default number of trailing output bytes included in a crash report.
pub const DEFAULT_TAIL_BYTES: usize = 2048;

/// Surfaces a crashed command and its output to the user.
///
/// The editor-side collaborator implements this to show an error
/// notification whose action opens the sink.
pub trait CrashNotifier: Send + Sync {
    /// Called once when a process under `code` dies without a preceding stop.
    fn crashed(&self, code: &str, output: &OutputSink);
}

/// Notifier that reports crashes as `error` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl CrashNotifier for LogNotifier {
    fn crashed(&self, code: &str, output: &OutputSink) {
        error!(
            code,
            output_bytes = output.len(),
            tail = %output.tail(DEFAULT_TAIL_BYTES),
            "command crashed; open its output to see why"
        );
    }
}
