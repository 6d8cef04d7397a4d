//! I/O helpers for the engine: filesystem, git, processes and persisted state.

pub mod artifacts;
pub mod config;
pub mod context;
pub mod git;
pub mod patch;
pub mod planner;
pub mod process;
pub mod records;
pub mod verify;
