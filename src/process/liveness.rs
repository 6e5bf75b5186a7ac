//! PID liveness probing and signal delivery.
//!
//! Tracked commands are launched as process-group leaders, so stop signals
//! go to the whole group and reach grandchildren spawned by the shell.

use crate::Result;

/// Signal strength used when stopping a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// `SIGTERM`: ask the process to shut down.
    Graceful,
    /// `SIGKILL`: terminate unconditionally.
    Force,
}

/// PID of the current host process.
#[must_use]
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Whether `pid` names a running process.
///
/// Uses the null signal, so no signal is actually delivered. A process
/// owned by another user (`EPERM`) still counts as alive.
#[cfg(unix)]
#[must_use]
pub fn probe(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Some(raw) = raw_pid(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether `pid` names a running process.
#[cfg(not(unix))]
#[must_use]
pub fn probe(_pid: u32) -> bool {
    false
}

/// Deliver `signal` to the process group led by `pid`, falling back to the
/// single process when it is not a group leader.
///
/// Returns `Ok(false)` when the process is already gone.
///
/// # Errors
///
/// Returns `AppError::Process` if the signal cannot be delivered.
#[cfg(unix)]
pub fn send(pid: u32, signal: StopSignal) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    use crate::AppError;

    let Some(raw) = raw_pid(pid) else {
        return Ok(false);
    };
    let sig = match signal {
        StopSignal::Graceful => Signal::SIGTERM,
        StopSignal::Force => Signal::SIGKILL,
    };

    match killpg(Pid::from_raw(raw), sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => match kill(Pid::from_raw(raw), sig) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(err) => Err(AppError::Process(format!(
                "failed to send {sig:?} to pid {pid}: {err}"
            ))),
        },
        Err(err) => Err(AppError::Process(format!(
            "failed to send {sig:?} to process group {pid}: {err}"
        ))),
    }
}

/// Deliver `signal` to `pid`.
///
/// # Errors
///
/// Always fails: signal delivery is only supported on Unix.
#[cfg(not(unix))]
pub fn send(pid: u32, signal: StopSignal) -> Result<bool> {
    Err(crate::AppError::Process(format!(
        "cannot send {signal:?} to pid {pid}: signals are unsupported on this platform"
    )))
}

#[cfg(unix)]
fn raw_pid(pid: u32) -> Option<i32> {
    // 0 and negative values address process groups, never a single process.
    i32::try_from(pid).ok().filter(|raw| *raw > 0)
}
