//! Spawning, supervision and termination of tracked commands.
//!
//! A spawn only resolves once the command is "ready": it produced its
//! first byte of output or stayed up for the readiness timeout. A command
//! that exits before that is reported as a spawn failure and leaves no
//! records behind. Anything the shell prints before the command starts is
//! dropped (see [`prelude`](super::prelude)).
//!
//! Every death of a supervised process runs the exit handler, which
//! classifies it. `stop` writes `user_requested` before signalling, so an
//! exit that finds the reason still at `none` is a crash.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::stream::{self, StreamExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, info_span, warn, Instrument};

use super::env::{command_line, ForbiddenVars};
use super::liveness::{self, StopSignal};
use super::output::{OutputPump, OutputSink};
use super::prelude::{Prelude, PreludeCodec};
use super::state_store::{PidRemoval, ProcessStateStore};
use crate::alerts::CrashNotifier;
use crate::config::validate_code;
use crate::context::HostContext;
use crate::models::process_state::TerminationReason;
use crate::{AppError, Result};

/// How long output is still collected after the process itself exited.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// How long to wait for death after `SIGKILL`.
const KILL_CONFIRM: Duration = Duration::from_secs(5);

type OutputStream =
    stream::Select<FramedRead<ChildStdout, PreludeCodec>, FramedRead<ChildStderr, PreludeCodec>>;

/// Final classification of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Command code.
    pub code: String,
    /// PID of the process that exited.
    pub pid: u32,
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Terminating signal number, when killed by a signal.
    pub signal: Option<i32>,
    /// Termination reason recorded for the code.
    pub reason: TerminationReason,
    /// A newer process had already replaced this one under the same code.
    pub superseded: bool,
}

impl ExitOutcome {
    /// Human-readable exit status.
    #[must_use]
    pub fn describe(&self) -> String {
        describe_parts(self.exit_code, self.signal)
    }
}

/// How a `stop` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No live process was recorded for the code.
    NotRunning,
    /// The process exited after the graceful signal.
    Graceful,
    /// The process had to be killed after the stop bound elapsed.
    Forced,
}

/// Handle to a spawned process that passed the readiness race.
///
/// Dropping the handle detaches it; supervision continues in the background.
#[derive(Debug)]
pub struct ProcessHandle {
    code: String,
    pid: u32,
    supervisor: JoinHandle<ExitOutcome>,
}

impl ProcessHandle {
    /// Command code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// OS process id of the shell leading the command's process group.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the process to exit and its exit handler to finish.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the supervisor task panicked or was
    /// cancelled.
    pub async fn wait(self) -> Result<ExitOutcome> {
        let Self {
            code, supervisor, ..
        } = self;
        supervisor
            .await
            .map_err(|err| AppError::Process(format!("supervisor for {code} failed: {err}")))
    }
}

enum Readiness {
    Output(BytesMut),
    TimedOut,
    Exited(io::Result<ExitStatus>),
}

/// Tracks externally visible processes by code.
#[derive(Clone)]
pub struct ProcessTracker {
    ctx: HostContext,
    state: ProcessStateStore,
}

impl ProcessTracker {
    /// Tracker bound to a host context.
    #[must_use]
    pub fn new(ctx: HostContext) -> Self {
        let state = ProcessStateStore::new(Arc::clone(&ctx.store));
        Self { ctx, state }
    }

    /// PID and state record access for `code`s.
    #[must_use]
    pub fn state(&self) -> &ProcessStateStore {
        &self.state
    }

    /// Recorded termination reason.
    #[must_use]
    pub fn termination_reason(&self, code: &str) -> TerminationReason {
        self.state.termination_reason(code)
    }

    /// Workspace hash of the process running under `code`.
    #[must_use]
    pub fn workspace_hash(&self, code: &str) -> Option<String> {
        self.state.workspace_hash(code)
    }

    /// Launch `command args...` through the configured shell and wait for
    /// readiness.
    ///
    /// The child environment is the current one minus the fixed denylist,
    /// the configured extra variables, `forbidden_env_vars` and the code's
    /// recorded additional variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the shell cannot be launched or the
    /// command exits before it becomes ready, and `AppError::Store` if the
    /// started process cannot be recorded (the process is killed then).
    pub async fn spawn(
        &self,
        code: &str,
        command: &str,
        args: &[String],
        forbidden_env_vars: &[String],
    ) -> Result<ProcessHandle> {
        validate_code(code)?;
        let span = info_span!("spawn", code, command);
        self.spawn_inner(code, command, args, forbidden_env_vars)
            .instrument(span)
            .await
    }

    async fn spawn_inner(
        &self,
        code: &str,
        command: &str,
        args: &[String],
        forbidden_env_vars: &[String],
    ) -> Result<ProcessHandle> {
        let line = command_line(command, args);
        let prelude = Prelude::new();
        let mut child = self
            .build_command(code, &prelude.wrap(&line), forbidden_env_vars)
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to launch {code}: {err}")))?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::Spawn(format!("{code} exited before its pid was known")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn(format!("failed to capture stdout of {code}")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn(format!("failed to capture stderr of {code}")))?;
        let mut output = stream::select(
            FramedRead::new(stdout, prelude.codec()),
            FramedRead::new(stderr, prelude.codec()),
        );

        info!(pid, line, "command launched, waiting for readiness");

        let first_chunk =
            match await_readiness(&mut child, &mut output, self.ctx.config.timeouts.ready()).await {
                Readiness::Output(chunk) => Some(chunk),
                Readiness::TimedOut => {
                    debug!(pid, "readiness timeout elapsed without output");
                    None
                }
                Readiness::Exited(status) => {
                    let detail = match status {
                        Ok(status) => {
                            let (exit_code, signal) = exit_parts(status);
                            describe_parts(exit_code, signal)
                        }
                        Err(err) => format!("wait failed: {err}"),
                    };
                    warn!(pid, %detail, "command exited before becoming ready");
                    return Err(AppError::Spawn(format!(
                        "{code} exited before becoming ready ({detail})"
                    )));
                }
            };

        if let Err(err) = self.record_started(code, pid) {
            warn!(pid, %err, "failed to record started process, killing it");
            liveness::send(pid, StopSignal::Force).ok();
            child.wait().await.ok();
            return Err(err);
        }

        let sink = self.prepare_sink(code);
        let mut pump = OutputPump::new(code, Arc::clone(&self.ctx.lines), sink);
        if let Some(chunk) = first_chunk {
            pump.feed(&chunk);
        }
        info!(pid, "command ready");

        let supervised = Supervised {
            code: code.to_owned(),
            pid,
            state: self.state.clone(),
            notifier: Arc::clone(&self.ctx.notifier),
        };
        let supervisor = tokio::spawn(
            supervised
                .run(child, output, pump)
                .instrument(info_span!("supervise", code, pid)),
        );

        Ok(ProcessHandle {
            code: code.to_owned(),
            pid,
            supervisor,
        })
    }

    fn build_command(&self, code: &str, line: &str, forbidden_env_vars: &[String]) -> Command {
        let config = &self.ctx.config;

        let mut forbidden = ForbiddenVars::with_extra(&config.forbidden_env_vars);
        forbidden.extend(forbidden_env_vars);
        forbidden.extend(self.state.additional_forbidden_vars(code));

        let mut cmd = Command::new(&config.shell.program);
        cmd.args(&config.shell.args)
            .arg(line)
            .env_clear()
            .envs(forbidden.apply(std::env::vars_os()))
            .current_dir(self.ctx.workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    fn record_started(&self, code: &str, pid: u32) -> Result<()> {
        self.state.set_pid(code, pid)?;
        let hash = self.ctx.workspace.hash().to_owned();
        self.state.update(code, |record| {
            record.workspace_hash = Some(hash);
            record.termination_reason = TerminationReason::None;
        })?;
        Ok(())
    }

    fn prepare_sink(&self, code: &str) -> Arc<OutputSink> {
        if let Some(existing) = self.ctx.sinks.get(code) {
            if self.ctx.config.clear_output_on_start {
                existing.clear();
            }
            return existing;
        }
        self.ctx.sinks.get_or_create(code)
    }

    /// Whether a live process is recorded for `code`.
    ///
    /// A PID record whose process is gone is deleted as a side effect.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the PID record cannot be read or the
    /// stale record cannot be removed.
    pub fn is_alive(&self, code: &str) -> Result<bool> {
        let Some(pid) = self.state.pid(code)? else {
            return Ok(false);
        };
        if liveness::probe(pid) {
            return Ok(true);
        }
        debug!(code, pid, "reclaiming stale pid record");
        self.state.remove_pid_if(code, pid)?;
        Ok(false)
    }

    /// Stop the process running under `code`.
    ///
    /// Records `user_requested` first, then sends `SIGTERM` to the process
    /// group and polls until it dies or the stop bound elapses, after which
    /// `SIGKILL` is sent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if records cannot be updated and
    /// `AppError::Process` if signalling fails or the process survives
    /// `SIGKILL`.
    pub async fn stop(&self, code: &str) -> Result<StopOutcome> {
        validate_code(code)?;
        self.stop_inner(code)
            .instrument(info_span!("stop", code))
            .await
    }

    async fn stop_inner(&self, code: &str) -> Result<StopOutcome> {
        let Some(pid) = self.state.pid(code)? else {
            debug!("no pid record, nothing to stop");
            return Ok(StopOutcome::NotRunning);
        };
        if !liveness::probe(pid) {
            self.forget(code, pid)?;
            info!(pid, "process already gone, cleared stale records");
            return Ok(StopOutcome::NotRunning);
        }

        // Must land before the signal: the exit handler reads it.
        self.state
            .set_termination_reason(code, TerminationReason::UserRequested)?;
        if !liveness::send(pid, StopSignal::Graceful)? {
            self.forget(code, pid)?;
            return Ok(StopOutcome::Graceful);
        }
        info!(pid, "sent graceful stop");

        let timeouts = &self.ctx.config.timeouts;
        if self
            .wait_for_exit(code, pid, timeouts.stop(), timeouts.stop_poll())
            .await
        {
            self.forget(code, pid)?;
            info!(pid, "process stopped");
            return Ok(StopOutcome::Graceful);
        }

        warn!(pid, bound = ?timeouts.stop(), "process ignored graceful stop, killing");
        liveness::send(pid, StopSignal::Force)?;
        if !self
            .wait_for_exit(code, pid, KILL_CONFIRM, timeouts.stop_poll())
            .await
        {
            return Err(AppError::Process(format!(
                "{code} (pid {pid}) survived SIGKILL"
            )));
        }
        self.forget(code, pid)?;
        info!(pid, "process killed");
        Ok(StopOutcome::Forced)
    }

    async fn wait_for_exit(&self, code: &str, pid: u32, bound: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + bound;
        loop {
            if !self.still_running(code, pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn still_running(&self, code: &str, pid: u32) -> bool {
        match self.state.pid(code) {
            Ok(Some(current)) if current == pid => liveness::probe(pid),
            Ok(_) => false,
            Err(err) => {
                warn!(code, %err, "failed to read pid record while stopping");
                liveness::probe(pid)
            }
        }
    }

    /// Drop the PID record and workspace association of a dead `pid`.
    fn forget(&self, code: &str, pid: u32) -> Result<()> {
        if let PidRemoval::Superseded(newer) = self.state.remove_pid_if(code, pid)? {
            debug!(code, newer, "pid record already replaced by a newer process");
            return Ok(());
        }
        self.state.clear_workspace_hash(code)
    }
}

async fn await_readiness(
    child: &mut Child,
    output: &mut OutputStream,
    timeout: Duration,
) -> Readiness {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut streams_open = true;

    loop {
        tokio::select! {
            biased;
            chunk = output.next(), if streams_open => match chunk {
                Some(Ok(bytes)) => return Readiness::Output(bytes),
                Some(Err(err)) => debug!(%err, "output read failed before readiness"),
                None => streams_open = false,
            },
            status = child.wait() => return Readiness::Exited(status),
            () = &mut deadline => return Readiness::TimedOut,
        }
    }
}

/// Owned state of one supervision task.
struct Supervised {
    code: String,
    pid: u32,
    state: ProcessStateStore,
    notifier: Arc<dyn CrashNotifier>,
}

impl Supervised {
    async fn run(self, mut child: Child, mut output: OutputStream, mut pump: OutputPump) -> ExitOutcome {
        let mut streams_open = true;
        let status = loop {
            tokio::select! {
                biased;
                chunk = output.next(), if streams_open => match chunk {
                    Some(Ok(bytes)) => pump.feed(&bytes),
                    Some(Err(err)) => warn!(%err, "failed to read command output"),
                    None => streams_open = false,
                },
                status = child.wait() => break status,
            }
        };

        if streams_open {
            // Grandchildren may keep the pipes open after the leader exits.
            let drain = async {
                while let Some(Ok(bytes)) = output.next().await {
                    pump.feed(&bytes);
                }
            };
            if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
                debug!("output still open after exit, detaching");
            }
        }
        pump.finish();

        self.on_exit(status, pump.sink())
    }

    /// Classify the death, then clear the workspace association.
    fn on_exit(&self, status: io::Result<ExitStatus>, sink: &OutputSink) -> ExitOutcome {
        let (exit_code, signal) = match status {
            Ok(status) => exit_parts(status),
            Err(err) => {
                warn!(%err, "failed to wait for command");
                (None, None)
            }
        };
        let mut outcome = ExitOutcome {
            code: self.code.clone(),
            pid: self.pid,
            exit_code,
            signal,
            reason: TerminationReason::None,
            superseded: false,
        };

        match self.state.remove_pid_if(&self.code, self.pid) {
            Ok(PidRemoval::Superseded(newer)) => {
                info!(newer, status = %outcome.describe(), "process exited after being replaced");
                outcome.superseded = true;
                outcome.reason = self.state.termination_reason(&self.code);
                return outcome;
            }
            Ok(PidRemoval::Removed | PidRemoval::Absent) => {}
            Err(err) => warn!(%err, "failed to remove pid record"),
        }

        let mut reason = self.state.termination_reason(&self.code);
        if reason == TerminationReason::None {
            reason = TerminationReason::Crashed;
            if let Err(err) = self.state.set_termination_reason(&self.code, reason) {
                warn!(%err, "failed to record crash");
            }
            warn!(status = %outcome.describe(), "command exited without a stop request");
            self.notifier.crashed(&self.code, sink);
        } else {
            info!(
                reason = reason.as_str(),
                status = %outcome.describe(),
                "command exited"
            );
        }

        if let Err(err) = self.state.clear_workspace_hash(&self.code) {
            warn!(%err, "failed to clear workspace association");
        }

        outcome.reason = reason;
        outcome
    }
}

#[cfg(unix)]
fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

#[cfg(not(unix))]
fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}

fn describe_parts(exit_code: Option<i32>, signal: Option<i32>) -> String {
    match (exit_code, signal) {
        (Some(0), _) => "exited normally (code 0)".to_owned(),
        (Some(code), _) => format!("exited with code {code}"),
        (None, Some(signal)) => format!("terminated by signal {signal}"),
        (None, None) => "status unknown".to_owned(),
    }
}
