//! Lifecycle controller: decides launcher vs worker, re-execs the current
//! program as a detached child and runs the signal-driven control plane.

use futures_util::future::BoxFuture;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

use crate::daemon::pid::PidRecord;
use crate::daemon::signals::{Flow, Handler, SignalRouter};
use crate::daemon::workload::Workload;
use crate::daemon::{CHILD_TAG_VALUE, ENV_NAME, SIGNAL_INTERRUPT, SIGNAL_RESTART, SIGNAL_STOP};
use crate::error::{DaemonError, Result};

/// Destination for one of the child's standard streams.
#[derive(Debug, Default)]
pub enum Stream {
    #[default]
    Inherit,
    Null,
    File(File),
}

impl Stream {
    /// Open `path` for appending, creating it and its parent directories.
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Stream::File(file))
    }

    fn to_stdio(&self) -> io::Result<Stdio> {
        Ok(match self {
            Stream::Inherit => Stdio::inherit(),
            Stream::Null => Stdio::null(),
            Stream::File(file) => Stdio::from(file.try_clone()?),
        })
    }
}

#[derive(Debug, Default)]
struct Pipeline {
    stdin: Stream,
    stdout: Stream,
    stderr: Stream,
}

/// Where the worker is in its lifecycle. Stopping and restarting both end
/// the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    Stopping,
    Restarting,
    Exited,
}

struct Core {
    workload: Arc<dyn Workload>,
    pid: Mutex<PidRecord>,
    pipeline: Mutex<Pipeline>,
    daemon_tag: Mutex<String>,
    command: Mutex<Option<(PathBuf, Vec<OsString>)>>,
    state: Mutex<State>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Core {
    fn is_child(&self) -> bool {
        let tag = lock(&self.daemon_tag).clone();
        std::env::var(tag).map(|v| v == CHILD_TAG_VALUE).unwrap_or(false)
    }

    fn set_state(&self, state: State) {
        *lock(&self.state) = state;
    }

    /// Re-exec the program with the daemon tag set and let it go.
    fn spawn_child(&self) -> Result<u32> {
        let (program, args) = lock(&self.command).clone().ok_or_else(|| {
            DaemonError::Executable(io::Error::new(
                io::ErrorKind::NotFound,
                "argument vector is empty and the executable path is unknown",
            ))
        })?;
        let tag = lock(&self.daemon_tag).clone();

        let mut cmd = Command::new(&program);
        cmd.args(&args).env(&tag, CHILD_TAG_VALUE);
        {
            let pipeline = lock(&self.pipeline);
            cmd.stdin(pipeline.stdin.to_stdio().map_err(DaemonError::Spawn)?)
                .stdout(pipeline.stdout.to_stdio().map_err(DaemonError::Spawn)?)
                .stderr(pipeline.stderr.to_stdio().map_err(DaemonError::Spawn)?);
        }

        let child = cmd.spawn().map_err(DaemonError::Spawn)?;
        let pid = child.id();
        // Dropping the handle neither waits for nor kills the child.
        drop(child);

        info!("Started {} in background (PID: {})", program.display(), pid);
        Ok(pid)
    }

    /// Log a workload failure and copy it to the configured error stream.
    fn report(&self, operation: &str, err: &anyhow::Error) {
        error!("Workload {} failed: {:#}", operation, err);

        let line = format!("{:#}\n", err);
        let pipeline = lock(&self.pipeline);
        let written = match &pipeline.stderr {
            Stream::File(file) => (&*file).write_all(line.as_bytes()),
            Stream::Inherit => io::stderr().write_all(line.as_bytes()),
            Stream::Null => Ok(()),
        };
        if let Err(e) = written {
            debug!("Could not write workload error to stream: {}", e);
        }
    }

    async fn shut_down(self: Arc<Self>, trigger: &'static str) -> Flow {
        info!("{} received, stopping {}", trigger, self.workload.name());
        self.set_state(State::Stopping);

        if let Err(e) = self.workload.stop().await {
            self.report("stop", &e);
        }
        lock(&self.pid).remove();
        Flow::Exit
    }

    async fn hand_off(self: Arc<Self>) -> Flow {
        info!("Restart requested for {}", self.workload.name());
        self.set_state(State::Restarting);

        // The replacement claims a fresh record.
        lock(&self.pid).remove();

        let workload = Arc::clone(&self.workload);
        let draining = tokio::spawn(async move { workload.restart().await });

        // From here on this process counts as a launcher. `init_tracing` has
        // already loaded TZ, so the log timer does not read the environment.
        let tag = lock(&self.daemon_tag).clone();
        std::env::remove_var(&tag);

        if let Err(e) = self.spawn_child() {
            self.report("respawn", &anyhow::Error::new(e));
        }

        match draining.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report("restart", &e),
            Err(e) => self.report("restart", &anyhow::Error::new(e)),
        }
        Flow::Exit
    }
}

/// Program path and arguments this process was started with. The path is
/// taken from argv[0] so a binary replaced on disk is re-read on restart;
/// `current_exe` (which would name the deleted inode) is only a fallback.
fn invoked_command() -> Option<(PathBuf, Vec<OsString>)> {
    let mut args = std::env::args_os();
    let program = match args.next().filter(|arg0| !arg0.is_empty()) {
        Some(arg0) => PathBuf::from(arg0),
        None => std::env::current_exe().ok()?,
    };
    Some((program, args.collect()))
}

/// Owns one workload and its pid record and signal handlers.
pub struct Process {
    core: Arc<Core>,
    signals: SignalRouter,
}

impl Process {
    pub fn new(workload: impl Workload) -> Self {
        Self::from_arc(Arc::new(workload))
    }

    pub fn from_arc(workload: Arc<dyn Workload>) -> Self {
        let pid = PidRecord::new(workload.name(), workload.pid_save_path());
        let core = Arc::new(Core {
            workload,
            pid: Mutex::new(pid),
            pipeline: Mutex::new(Pipeline::default()),
            daemon_tag: Mutex::new(ENV_NAME.to_string()),
            command: Mutex::new(invoked_command()),
            state: Mutex::new(State::Idle),
        });

        let mut process = Self {
            core,
            signals: SignalRouter::new(),
        };
        process.register_default_interrupt_handler();
        process.register_default_stop_handler();
        process.register_default_restart_handler();
        process
    }

    fn register_default_interrupt_handler(&mut self) {
        let core = Arc::clone(&self.core);
        self.signals.register(
            SIGNAL_INTERRUPT,
            Box::new(move || -> BoxFuture<'static, Flow> {
                Box::pin(Arc::clone(&core).shut_down("Interrupt"))
            }),
        );
    }

    fn register_default_stop_handler(&mut self) {
        let core = Arc::clone(&self.core);
        self.signals.register(
            SIGNAL_STOP,
            Box::new(move || -> BoxFuture<'static, Flow> {
                Box::pin(Arc::clone(&core).shut_down("Stop signal"))
            }),
        );
    }

    fn register_default_restart_handler(&mut self) {
        let core = Arc::clone(&self.core);
        self.signals.register(
            SIGNAL_RESTART,
            Box::new(move || -> BoxFuture<'static, Flow> { Box::pin(Arc::clone(&core).hand_off()) }),
        );
    }

    /// Streams handed to the child: stdin, stdout, stderr. Workload errors
    /// raised by the stop and restart handlers are written to `stderr`.
    pub fn set_pipeline(&mut self, stdin: Stream, stdout: Stream, stderr: Stream) -> &mut Self {
        *lock(&self.core.pipeline) = Pipeline { stdin, stdout, stderr };
        self
    }

    pub fn set_stdout(&mut self, stdout: Stream) -> &mut Self {
        lock(&self.core.pipeline).stdout = stdout;
        self
    }

    pub fn set_stderr(&mut self, stderr: Stream) -> &mut Self {
        lock(&self.core.pipeline).stderr = stderr;
        self
    }

    /// Name of the environment variable that marks the child.
    pub fn set_daemon_tag(&mut self, name: impl Into<String>) -> &mut Self {
        *lock(&self.core.daemon_tag) = name.into();
        self
    }

    pub fn daemon_tag(&self) -> String {
        lock(&self.core.daemon_tag).clone()
    }

    /// Override the directory the workload declared for its pid file.
    pub fn set_pid_save_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        lock(&self.core.pid).set_save_path(path);
        self
    }

    /// Program and arguments used for the re-exec, instead of the ones this
    /// process was invoked with.
    pub fn set_command<I, S>(&mut self, program: impl Into<PathBuf>, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args = args.into_iter().map(Into::into).collect();
        *lock(&self.core.command) = Some((program.into(), args));
        self
    }

    /// Program the worker is spawned from.
    pub fn program(&self) -> Option<PathBuf> {
        lock(&self.core.command).as_ref().map(|(program, _)| program.clone())
    }

    /// Run `f` in the worker whenever `signal` arrives. Replaces any earlier
    /// handler for that signal, including the built-in ones.
    pub fn on<F>(&mut self, signal: i32, mut f: F) -> &mut Self
    where
        F: FnMut() + Send + 'static,
    {
        self.signals.register(
            signal,
            Box::new(move || -> BoxFuture<'static, Flow> {
                f();
                Box::pin(async { Flow::Continue })
            }),
        );
        self
    }

    /// Like [`Process::on`], for handlers that await or want to end the worker.
    pub fn on_async<F, Fut>(&mut self, signal: i32, mut f: F) -> &mut Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Flow> + Send + 'static,
    {
        let handler: Handler = Box::new(move || -> BoxFuture<'static, Flow> { Box::pin(f()) });
        self.signals.register(signal, handler);
        self
    }

    pub fn name(&self) -> String {
        self.core.workload.name()
    }

    pub fn workload(&self) -> &Arc<dyn Workload> {
        &self.core.workload
    }

    /// Path external controllers read the worker's pid from.
    pub fn pid_filename(&self) -> Result<PathBuf> {
        lock(&self.core.pid).save_filename()
    }

    /// Pid written by this process's worker, once it is serving.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.core.pid).pid()
    }

    pub fn state(&self) -> State {
        *lock(&self.core.state)
    }

    /// Whether the daemon tag is `"true"` right now. Read fresh on every
    /// call since the restart handler clears it.
    pub fn is_child(&self) -> bool {
        self.core.is_child()
    }

    /// Launcher: spawn the worker and return. Worker: serve until a stop,
    /// interrupt or restart signal, then exit the process.
    pub async fn run(&mut self) -> Result<()> {
        if !self.is_child() {
            self.spawn()?;
            return Ok(());
        }

        let state = self.serve().await?;
        info!("{} exiting ({:?})", self.name(), state);
        std::process::exit(0)
    }

    /// Start a detached copy of this program marked as the worker.
    pub fn spawn(&self) -> Result<u32> {
        self.core.spawn_child()
    }

    /// Run the worker side in this process: record the pid, start the
    /// workload and handle signals until a handler asks to exit.
    pub async fn serve(&mut self) -> Result<State> {
        // Subscribe first: a controller may signal as soon as the pid is on disk.
        let subscription = self.signals.subscribe();
        lock(&self.core.pid).save(std::process::id())?;
        self.core.set_state(State::Running);

        let workload = Arc::clone(&self.core.workload);
        tokio::spawn(async move {
            workload.start().await;
            debug!("Workload {} start returned", workload.name());
        });

        self.signals.listen_on(subscription).await?;

        let state = self.state();
        if state == State::Running {
            lock(&self.core.pid).remove();
            self.core.set_state(State::Exited);
            return Ok(State::Exited);
        }
        Ok(state)
    }

    /// Run the handler registered for `signal` as if it had been delivered.
    pub async fn dispatch(&mut self, signal: i32) -> Option<Flow> {
        self.signals.dispatch(signal).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serial_test::serial;
    use std::io::Read;

    struct Idle;

    #[async_trait]
    impl Workload for Idle {
        fn name(&self) -> String {
            "idle".to_string()
        }

        fn pid_save_path(&self) -> PathBuf {
            PathBuf::from("./")
        }

        async fn start(&self) {}

        async fn stop(&self) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("stop went wrong"))
        }

        async fn restart(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    #[serial]
    fn child_only_when_tag_is_true() {
        let mut process = Process::new(Idle);
        process.set_daemon_tag("PANKHA_DAEMON_UNIT_TAG");

        std::env::remove_var("PANKHA_DAEMON_UNIT_TAG");
        assert!(!process.is_child());

        std::env::set_var("PANKHA_DAEMON_UNIT_TAG", "1");
        assert!(!process.is_child());

        std::env::set_var("PANKHA_DAEMON_UNIT_TAG", "true");
        assert!(process.is_child());

        std::env::remove_var("PANKHA_DAEMON_UNIT_TAG");
        assert!(!process.is_child());
    }

    #[test]
    fn defaults() {
        let process = Process::new(Idle);
        assert_eq!(process.daemon_tag(), ENV_NAME);
        assert_eq!(process.state(), State::Idle);
        assert_eq!(process.pid(), None);
        for signal in [SIGNAL_INTERRUPT, SIGNAL_STOP, SIGNAL_RESTART] {
            assert!(process.signals.is_registered(signal));
        }
    }

    #[test]
    fn pid_save_path_override() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = Process::new(Idle);
        process.set_pid_save_path(dir.path());
        assert_eq!(process.pid_filename().unwrap(), dir.path().join("idle.pid"));
    }

    #[tokio::test]
    async fn stop_error_goes_to_error_stream() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("err.log");

        let mut process = Process::new(Idle);
        process
            .set_pid_save_path(dir.path())
            .set_stderr(Stream::append(&log).unwrap());

        assert_eq!(process.dispatch(SIGNAL_STOP).await, Some(Flow::Exit));
        assert_eq!(process.state(), State::Stopping);

        let mut content = String::new();
        File::open(&log).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "stop went wrong\n");
    }

    struct Stubborn;

    #[async_trait]
    impl Workload for Stubborn {
        fn name(&self) -> String {
            "stubborn".to_string()
        }

        fn pid_save_path(&self) -> PathBuf {
            PathBuf::from("./")
        }

        async fn start(&self) {}

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn restart(&self) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("restart went wrong"))
        }
    }

    #[tokio::test]
    #[serial]
    async fn restart_error_goes_to_error_stream() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("err.log");

        let mut process = Process::new(Stubborn);
        process
            .set_pid_save_path(dir.path())
            .set_stderr(Stream::append(&log).unwrap())
            .set_daemon_tag("PANKHA_DAEMON_UNIT_RESTART")
            .set_command("true", Vec::<String>::new());
        std::env::set_var("PANKHA_DAEMON_UNIT_RESTART", "true");

        assert_eq!(process.dispatch(SIGNAL_RESTART).await, Some(Flow::Exit));
        assert_eq!(process.state(), State::Restarting);
        assert!(!process.is_child());

        let mut content = String::new();
        File::open(&log).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "restart went wrong\n");
    }

    #[test]
    fn program_defaults_to_argv0() {
        let process = Process::new(Idle);
        let argv0 = std::env::args_os().next().map(PathBuf::from);
        assert!(argv0.is_some());
        assert_eq!(process.program(), argv0);
    }

    #[test]
    fn append_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("out.log");
        let stream = Stream::append(&path).unwrap();
        assert!(matches!(stream, Stream::File(_)));
        assert!(path.exists());
    }
}
