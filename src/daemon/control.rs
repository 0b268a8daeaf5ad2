use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

use crate::daemon::{SIGNAL_RESTART, SIGNAL_STOP};
use crate::error::{DaemonError, Result};

/// Outcome of signalling a recorded worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent(u32),
    NotRunning,
}

/// Read the pid recorded at `path`. `None` when no file exists.
pub fn read_pid(path: &Path) -> Result<Option<u32>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(DaemonError::PidRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    content
        .trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|_| DaemonError::PidParse {
            path: path.to_path_buf(),
            content,
        })
}

/// Deliver `signal` to `pid` with kill(2).
pub fn send_signal(pid: u32, signal: i32) -> Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc != 0 {
        return Err(DaemonError::Signal {
            pid,
            signal,
            source: io::Error::last_os_error(),
        });
    }
    debug!("Sent signal {} to PID {}", signal, pid);
    Ok(())
}

/// Send `signal` to the pid recorded at `path`, if there is one.
pub fn signal_recorded(path: &Path, signal: i32) -> Result<Delivery> {
    match read_pid(path)? {
        Some(pid) => {
            send_signal(pid, signal)?;
            Ok(Delivery::Sent(pid))
        }
        None => {
            debug!("No pid file at {}", path.display());
            Ok(Delivery::NotRunning)
        }
    }
}

/// Ask the worker recorded at `path` to stop.
pub fn stop(path: &Path) -> Result<Delivery> {
    let delivery = signal_recorded(path, SIGNAL_STOP)?;
    if let Delivery::Sent(pid) = delivery {
        info!("Stop signal sent (PID: {})", pid);
    }
    Ok(delivery)
}

/// Ask the worker recorded at `path` to hand off to a fresh child.
pub fn restart(path: &Path) -> Result<Delivery> {
    let delivery = signal_recorded(path, SIGNAL_RESTART)?;
    if let Delivery::Sent(pid) = delivery {
        info!("Restart signal sent (PID: {})", pid);
    }
    Ok(delivery)
}
