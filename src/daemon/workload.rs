use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// A program managed by [`Process`](crate::daemon::process::Process).
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// Service name. Names the pid file, so it must be unique per save path.
    fn name(&self) -> String;

    /// Directory that holds the pid file.
    fn pid_save_path(&self) -> PathBuf;

    /// Runs for the lifetime of the service on its own task.
    async fn start(&self);

    /// Stop whatever `start` is running and return.
    async fn stop(&self) -> Result<()>;

    /// Drain before this process hands off to its replacement and exits.
    async fn restart(&self) -> Result<()>;

    /// Add flags to this workload's command. Mark them `global` so they are
    /// accepted after `start`/`restart` as well.
    fn command(&self, cmd: clap::Command) -> clap::Command {
        cmd
    }

    /// Receive the matches of the `start`/`restart` invocation before it runs.
    fn configure(&self, _matches: &clap::ArgMatches) {}
}
