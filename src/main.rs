#![forbid(unsafe_code)]

//! `procdeck`: run, stop and watch configured commands.
//!
//! Every invocation is a host instance of its own, so two shells running
//! `procdeck` against the same storage root coordinate exactly like two
//! editor windows would.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use procdeck::process::output::LineProcessor;
use procdeck::process::StopOutcome;
use procdeck::reconcile::Reconciler;
use procdeck::{AppError, GlobalConfig, HostContext, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "procdeck", about = "Cross-instance command supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "procdeck.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured workspace root.
    #[arg(long)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Spawn a configured command and supervise it until it exits.
    Run {
        /// Command code.
        code: String,
    },
    /// Stop a command, whichever instance started it.
    Stop {
        /// Command code.
        code: String,
    },
    /// Print the reconciled state of every configured command as JSON.
    Status,
    /// Print each consolidated state change until interrupted.
    Watch,
    /// Clear the state record of a command that is not running.
    Reset {
        /// Command code.
        code: String,
    },
}

/// Echoes each output line to stdout and stores it unchanged.
struct EchoLines;

impl LineProcessor for EchoLines {
    fn process(&self, _code: &str, line: &[u8]) -> Vec<u8> {
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = stdout.write_all(line).and_then(|()| stdout.write_all(b"\n")) {
            debug!(%err, "stdout closed, output kept in the sink only");
        }
        line.to_vec()
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(ws) = args.workspace {
        config.workspace_root = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
    }
    info!(
        storage = %config.storage_root().display(),
        workspace = %config.workspace_root.display(),
        "configuration loaded"
    );

    let ctx = HostContext::new(config).with_line_processor(Arc::new(EchoLines));

    match args.command {
        Commands::Run { code } => run_command(&ctx, &code).await,
        Commands::Stop { code } => stop_command(&ctx, &code).await,
        Commands::Status => print_status(&ctx),
        Commands::Watch => watch(&ctx).await,
        Commands::Reset { code } => reset(&ctx, &code).await,
    }
}

async fn run_command(ctx: &HostContext, code: &str) -> Result<()> {
    let command = ctx.config.command(code)?.clone();
    let tracker = ctx.tracker();
    let (tracker, command) = (&tracker, &command);

    let handle = ctx
        .locks()
        .with_lock(code, || async move {
            if tracker.is_alive(code)? {
                return Err(AppError::Process(format!("{code} is already running")));
            }
            tracker
                .spawn(code, &command.command, &command.args, &command.forbidden_env_vars)
                .await
        })
        .await?;
    info!(code, pid = handle.pid(), "supervising; interrupt to stop");

    let wait = handle.wait();
    tokio::pin!(wait);
    let outcome = tokio::select! {
        outcome = &mut wait => outcome?,
        () = shutdown_signal() => {
            info!("shutdown signal received, stopping command");
            stop_command(ctx, code).await?;
            wait.await?
        }
    };

    info!(
        code,
        reason = outcome.reason.as_str(),
        status = %outcome.describe(),
        "command finished"
    );
    Ok(())
}

async fn stop_command(ctx: &HostContext, code: &str) -> Result<()> {
    let tracker = ctx.tracker();
    let tracker = &tracker;
    let outcome = ctx
        .locks()
        .with_lock(code, || async move { tracker.stop(code).await })
        .await?;
    match outcome {
        StopOutcome::NotRunning => info!(code, "not running"),
        StopOutcome::Graceful => info!(code, "stopped"),
        StopOutcome::Forced => warn!(code, "killed after ignoring the stop request"),
    }
    Ok(())
}

fn print_status(ctx: &HostContext) -> Result<()> {
    let engine = Reconciler::new(ctx, ctx.config.codes());
    engine.refresh();
    let rendered = serde_json::to_string_pretty(&engine.snapshot())?;
    println!("{rendered}");
    Ok(())
}

async fn watch(ctx: &HostContext) -> Result<()> {
    let engine = Reconciler::start(ctx, ctx.config.codes());
    let mut changes = engine.subscribe();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            change = changes.recv() => match change {
                Ok(change) => {
                    for code in &change.codes {
                        if let Some(state) = engine.state(code) {
                            println!("{}", serde_json::to_string(&state)?);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed state changes"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.dispose();
    Ok(())
}

async fn reset(ctx: &HostContext, code: &str) -> Result<()> {
    let tracker = ctx.tracker();
    let tracker = &tracker;
    ctx.locks()
        .with_lock(code, || async move {
            if tracker.is_alive(code)? {
                return Err(AppError::Process(format!(
                    "{code} is running; stop it before resetting"
                )));
            }
            tracker.state().clear(code)?;
            info!(code, "state record cleared");
            Ok(())
        })
        .await
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
