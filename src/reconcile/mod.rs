//! Cross-instance state reconciliation.

pub mod engine;
pub mod registry;
pub mod watcher;

pub use engine::{Reconciler, StateChanged};
pub use registry::DebugRegistry;
