//! Global configuration parsing and validation.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Environment variable that overrides the per-user storage root.
pub const STORAGE_ROOT_ENV: &str = "PROCDECK_HOME";

/// Directory created under `$HOME` when no storage root is configured.
const DEFAULT_STORAGE_DIR: &str = ".procdeck";

/// Shell used to launch tracked commands.
///
/// The command line is passed as the final argument. The default
/// `-l -c` pair sources the user's profile, so the command sees the same
/// environment as at a terminal prompt. `-i` also works, but interactive
/// bash prints job-control warnings and an `exit` line of its own.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ShellConfig {
    /// Shell binary.
    #[serde(default = "default_shell_program")]
    pub program: String,
    /// Arguments placed before the command line.
    #[serde(default = "default_shell_args")]
    pub args: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: default_shell_program(),
            args: default_shell_args(),
        }
    }
}

fn default_shell_program() -> String {
    env::var("SHELL")
        .ok()
        .filter(|shell| !shell.is_empty())
        .unwrap_or_else(|| "/bin/sh".into())
}

fn default_shell_args() -> Vec<String> {
    vec!["-l".into(), "-c".into()]
}

/// Timing bounds for spawn, stop, locking and reconciliation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Readiness timeout when a spawned command stays silent.
    #[serde(default = "default_ready_ms")]
    pub ready_ms: u64,
    /// Graceful stop bound before a forceful kill.
    #[serde(default = "default_stop_seconds")]
    pub stop_seconds: u64,
    /// Liveness poll interval while stopping.
    #[serde(default = "default_stop_poll_ms")]
    pub stop_poll_ms: u64,
    /// Lock acquisition timeout used by `with_lock`.
    #[serde(default = "default_lock_ms")]
    pub lock_ms: u64,
    /// Sleep between attempts while a live holder owns the lock.
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,
    /// Reconciliation tick interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ready_ms: default_ready_ms(),
            stop_seconds: default_stop_seconds(),
            stop_poll_ms: default_stop_poll_ms(),
            lock_ms: default_lock_ms(),
            lock_retry_ms: default_lock_retry_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Readiness timeout as a [`Duration`].
    #[must_use]
    pub fn ready(&self) -> Duration {
        Duration::from_millis(self.ready_ms)
    }

    /// Graceful stop bound as a [`Duration`].
    #[must_use]
    pub fn stop(&self) -> Duration {
        Duration::from_secs(self.stop_seconds)
    }

    /// Stop poll interval as a [`Duration`].
    #[must_use]
    pub fn stop_poll(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms)
    }

    /// Lock acquisition timeout as a [`Duration`].
    #[must_use]
    pub fn lock(&self) -> Duration {
        Duration::from_millis(self.lock_ms)
    }

    /// Lock retry interval as a [`Duration`].
    #[must_use]
    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }

    /// Reconciliation interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_ready_ms() -> u64 {
    5000
}

fn default_stop_seconds() -> u64 {
    30
}

fn default_stop_poll_ms() -> u64 {
    50
}

fn default_lock_ms() -> u64 {
    10_000
}

fn default_lock_retry_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_debug_adapter_type() -> String {
    "rdbg".into()
}

/// A trackable command keyed by its code.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommandConfig {
    /// Stable logical identifier.
    pub code: String,
    /// Program or shell snippet to launch.
    pub command: String,
    /// Arguments appended to the command line.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables stripped for this command only.
    #[serde(default)]
    pub forbidden_env_vars: Vec<String>,
}

/// Global configuration parsed from `procdeck.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Workspace root; commands run here and its hash tags owned processes.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Root of the pid/state/lock tree. Resolved during validation.
    #[serde(default)]
    pub storage_root: Option<PathBuf>,
    /// Clear a code's output sink each time it is spawned again.
    #[serde(default = "default_true")]
    pub clear_output_on_start: bool,
    /// Environment variables stripped from every child, on top of the fixed denylist.
    #[serde(default)]
    pub forbidden_env_vars: Vec<String>,
    /// Adapter type a debug session must have to mark its code debug-active.
    #[serde(default = "default_debug_adapter_type")]
    pub debug_adapter_type: String,
    /// Trigger early reconciliation ticks on storage changes.
    #[serde(default)]
    pub watch_state_dir: bool,
    /// Shell used to launch commands.
    #[serde(default)]
    pub shell: ShellConfig,
    /// Timing configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Commands the reconciler polls.
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolved storage root.
    ///
    /// Always `Some` after validation; the fallback only covers configs
    /// built by hand.
    #[must_use]
    pub fn storage_root(&self) -> PathBuf {
        self.storage_root
            .clone()
            .or_else(resolve_default_storage_root)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR))
    }

    /// Look up a configured command by code.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no command has that code.
    pub fn command(&self, code: &str) -> Result<&CommandConfig> {
        self.commands
            .iter()
            .find(|cmd| cmd.code == code)
            .ok_or_else(|| AppError::NotFound(format!("no command configured for code {code}")))
    }

    /// Codes of all configured commands, in declaration order.
    #[must_use]
    pub fn codes(&self) -> Vec<String> {
        self.commands.iter().map(|cmd| cmd.code.clone()).collect()
    }

    fn validate(&mut self) -> Result<()> {
        let mut seen = HashSet::new();
        for cmd in &self.commands {
            validate_code(&cmd.code)?;
            if !seen.insert(cmd.code.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate command code {}",
                    cmd.code
                )));
            }
            if cmd.command.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "command for code {} must not be empty",
                    cmd.code
                )));
            }
        }

        if self.timeouts.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.timeouts.stop_poll_ms == 0 {
            return Err(AppError::Config(
                "stop_poll_ms must be greater than zero".into(),
            ));
        }
        if self.timeouts.lock_retry_ms == 0 {
            return Err(AppError::Config(
                "lock_retry_ms must be greater than zero".into(),
            ));
        }

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        if self.storage_root.is_none() {
            let root = resolve_default_storage_root().ok_or_else(|| {
                AppError::Config(format!(
                    "storage_root not set and neither {STORAGE_ROOT_ENV} nor HOME is available"
                ))
            })?;
            self.storage_root = Some(root);
        }

        Ok(())
    }
}

/// Reject codes that cannot be used verbatim as a record file name.
///
/// # Errors
///
/// Returns `AppError::Config` for empty codes, `.`/`..`, or codes containing
/// path separators or NUL.
pub fn validate_code(code: &str) -> Result<()> {
    if code.is_empty() || code == "." || code == ".." {
        return Err(AppError::Config(format!("invalid command code {code:?}")));
    }
    if code.contains(['/', '\\', '\0']) {
        return Err(AppError::Config(format!(
            "command code {code:?} must not contain path separators"
        )));
    }
    Ok(())
}

fn resolve_default_storage_root() -> Option<PathBuf> {
    if let Some(root) = env::var_os(STORAGE_ROOT_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(root));
    }
    env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(|home| PathBuf::from(home).join(DEFAULT_STORAGE_DIR))
}
