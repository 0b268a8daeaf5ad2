use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::error::{DaemonError, Result};

/// Process id of a running service, persisted as `<save_path>/<service>.pid`.
///
/// A record starts out empty. Only the worker that calls [`PidRecord::save`]
/// gives it an id, so the launcher's own pid never reaches the file.
#[derive(Debug)]
pub struct PidRecord {
    service_name: String,
    save_path: PathBuf,
    pid: Option<u32>,
    file: Option<File>,
}

impl PidRecord {
    pub fn new(service_name: impl Into<String>, save_path: impl Into<PathBuf>) -> Self {
        Self {
            service_name: service_name.into(),
            save_path: save_path.into(),
            pid: None,
            file: None,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    /// The id written by the last successful `save`, if the file is still held.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn set_save_path(&mut self, save_path: impl Into<PathBuf>) {
        self.save_path = save_path.into();
    }

    /// Absolute path of the pid file. External readers must use this same
    /// derivation to find the recorded id.
    pub fn save_filename(&self) -> Result<PathBuf> {
        save_filename(&self.service_name, &self.save_path)
    }

    /// Write `pid` as a bare decimal string and keep the file open.
    pub fn save(&mut self, pid: u32) -> Result<()> {
        let path = self.save_filename()?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| DaemonError::PidWrite { path: path.clone(), source })?;

        file.write_all(pid.to_string().as_bytes())
            .and_then(|_| file.flush())
            .map_err(|source| DaemonError::PidWrite { path: path.clone(), source })?;

        self.pid = Some(pid);
        self.file = Some(file);
        info!("Saved PID {} to {}", pid, path.display());
        Ok(())
    }

    /// Close the held file and delete it. Safe to call repeatedly.
    pub fn remove(&mut self) {
        drop(self.file.take());
        self.pid = None;

        let path = match self.save_filename() {
            Ok(path) => path,
            Err(e) => {
                debug!("Skipping pid file removal: {:#}", anyhow::Error::new(e));
                return;
            }
        };

        match fs::remove_file(&path) {
            Ok(()) => info!("Removed PID file {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!("Ignoring pid file removal error for {}: {}", path.display(), e),
        }
    }
}

/// `<absolute(save_path)>/<service_name>.pid`, cleaned lexically: `.` is
/// dropped and `..` removes the preceding component. Symlinks are not resolved.
pub fn save_filename(service_name: &str, save_path: &Path) -> Result<PathBuf> {
    let base = if save_path.is_absolute() {
        save_path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|source| DaemonError::PidPath {
                path: save_path.to_path_buf(),
                source,
            })?
            .join(save_path)
    };

    Ok(clean(&base).join(format!("{}.pid", service_name)))
}

fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            // `pop` stops at the root, so `/..` stays `/`
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
