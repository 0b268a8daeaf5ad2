//! Command tree and logging for programs built on the daemon controller.

pub mod cli;
pub mod logging;
