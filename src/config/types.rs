//! Daemon configuration structs and defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings read from `config.json` next to the executable. Every field is
/// optional; an absent field keeps the controller's default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Environment variable that marks the worker process.
    pub daemon_tag: Option<String>,
    /// Overrides the workload's pid save path.
    pub pid_dir: Option<PathBuf>,
    /// Append-mode file for the worker's stdout.
    pub stdout: Option<PathBuf>,
    /// Append-mode file for the worker's stderr.
    pub stderr: Option<PathBuf>,
    pub log_level: Option<String>,
}
