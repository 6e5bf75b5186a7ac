#![forbid(unsafe_code)]

//! Cross-instance process supervision for editor-hosted commands.
//!
//! Several editor windows may share one machine and one storage root. Each
//! window runs a host instance that spawns and stops commands identified by
//! a *code*, coordinates through lock, PID and state records in the shared
//! store, and reconciles what the other instances did on a timer.

pub mod alerts;
pub mod config;
pub mod context;
pub mod errors;
pub mod lock;
pub mod models;
pub mod process;
pub mod reconcile;
pub mod storage;
pub mod workspace;

pub use config::GlobalConfig;
pub use context::HostContext;
pub use errors::{AppError, Result};
