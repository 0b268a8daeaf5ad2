//! Daemon lifecycle: PID record, signal routing, the controller and the
//! workload contract it drives.

pub mod control;
pub mod pid;
pub mod process;
pub mod signals;
pub mod workload;

/// Default name of the environment variable that marks the re-exec'd child.
pub const ENV_NAME: &str = "DAEMON";

/// Value of the daemon tag that classifies the current process as the child.
pub const CHILD_TAG_VALUE: &str = "true";

/// Signal sent by `stop` to the recorded process.
pub const SIGNAL_STOP: i32 = libc::SIGUSR1;

/// Signal sent by `restart` to the recorded process.
pub const SIGNAL_RESTART: i32 = libc::SIGUSR2;

/// Terminal interrupt (Ctrl+C in a foreground run).
pub const SIGNAL_INTERRUPT: i32 = libc::SIGINT;
