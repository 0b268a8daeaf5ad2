//! Error type shared by the PID record, controller and command dispatcher.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = DaemonError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("cannot resolve pid save path {path:?}")]
    PidPath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write pid file {path:?}")]
    PidWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read pid file {path:?}")]
    PidRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("pid file {path:?} does not contain a process id: {content:?}")]
    PidParse { path: PathBuf, content: String },

    #[error("cannot determine program to spawn")]
    Executable(#[source] io::Error),

    #[error("cannot spawn worker process")]
    Spawn(#[source] io::Error),

    #[error("cannot deliver signal {signal} to pid {pid}")]
    Signal {
        pid: u32,
        signal: i32,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("invalid config {path:?}")]
    Config {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl DaemonError {
    /// True when the child could not be spawned because the system is out of
    /// process slots (EAGAIN).
    pub fn is_would_block(&self) -> bool {
        match self {
            DaemonError::Spawn(e) => {
                e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::EAGAIN)
            }
            _ => false,
        }
    }
}
