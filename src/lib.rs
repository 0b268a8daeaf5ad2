//! Pankha daemon toolkit
//!
//! Turns a long-running workload into a self-managing background process:
//! the launcher re-executes itself as a detached worker, the worker records
//! its pid and then serves signals, and `stop`/`restart` reach it through
//! SIGUSR1/SIGUSR2 sent to the recorded pid.

pub mod app;
pub mod config;
pub mod daemon;
pub mod error;

pub use app::cli::{Daemon, Outcome};
pub use daemon::control::Delivery;
pub use daemon::pid::PidRecord;
pub use daemon::process::{Process, State, Stream};
pub use daemon::signals::{Flow, SignalRouter, Subscription};
pub use daemon::workload::Workload;
pub use error::{DaemonError, Result};
