//! Side effects: the probe file and checks backed by child processes.

pub mod command_check;
pub mod config;
pub mod process;
