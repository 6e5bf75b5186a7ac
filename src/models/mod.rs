//! Domain model module declarations.

pub mod command_state;
pub mod debug;
pub mod process_state;
