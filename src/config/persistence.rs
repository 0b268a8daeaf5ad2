//! Config file load, save, and apply.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::types::DaemonConfig;
use crate::daemon::process::{Process, Stream};
use crate::error::{DaemonError, Result};

/// `config.json` in the executable's directory.
pub fn default_config_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().map_err(DaemonError::Executable)?;
    let dir = exe.parent().ok_or_else(|| {
        DaemonError::Executable(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "cannot determine executable directory",
        ))
    })?;
    Ok(dir.join("config.json"))
}

/// Load the config at `path`, or next to the executable. A missing file
/// yields defaults; an unreadable or malformed one is an error.
pub fn load_config(path: Option<&Path>) -> Result<DaemonConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        debug!("No config at {:?}, using defaults", config_path);
        return Ok(DaemonConfig::default());
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| DaemonError::Config {
        path: config_path.clone(),
        source: e.into(),
    })?;
    let config: DaemonConfig = serde_json::from_str(&content).map_err(|e| DaemonError::Config {
        path: config_path.clone(),
        source: e.into(),
    })?;

    info!("Loaded configuration from: {:?}", config_path);
    Ok(config)
}

pub fn save_config(config: &DaemonConfig, path: &Path) -> Result<()> {
    let write = || -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(path, content)?;
        Ok(())
    };
    write().map_err(|source| DaemonError::Config {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Configuration saved to: {:?}", path);
    Ok(())
}

impl DaemonConfig {
    /// Push the configured tag, pid directory and stream files into `process`.
    pub fn apply(&self, process: &mut Process) -> Result<()> {
        if let Some(tag) = &self.daemon_tag {
            process.set_daemon_tag(tag.clone());
        }
        if let Some(dir) = &self.pid_dir {
            process.set_pid_save_path(dir.clone());
        }
        if let Some(path) = &self.stdout {
            process.set_stdout(open_stream(path)?);
        }
        if let Some(path) = &self.stderr {
            process.set_stderr(open_stream(path)?);
        }
        Ok(())
    }
}

fn open_stream(path: &Path) -> Result<Stream> {
    Stream::append(path).map_err(|e| DaemonError::Config {
        path: path.to_path_buf(),
        source: e.into(),
    })
}
