//! Cross-instance lock manager.

pub mod manager;

pub use manager::{LockHolder, LockManager};
