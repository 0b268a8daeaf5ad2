//! Command tree for managed workloads: `start`, `stop` and `restart` per
//! registered process, nested by workload name.

use clap::builder::BoolishValueParser;
use clap::{Arg, ArgMatches, Command};
use std::ffi::OsString;
use std::path::Path;
use tracing::info;

use crate::daemon::control::{self, Delivery};
use crate::daemon::process::Process;
use crate::daemon::CHILD_TAG_VALUE;
use crate::error::Result;

const ACTIONS: [&str; 3] = ["start", "stop", "restart"];

/// What a dispatched command did in the invoking process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The worker was launched in the background.
    Started,
    /// The system refused to create another process (EAGAIN).
    Unavailable,
    Stopped(Delivery),
    /// `NotRunning` means no worker was recorded and a fresh one was started.
    Restarted(Delivery),
    /// No action was named; help was printed.
    Help,
}

/// File name of the running executable, as invoked.
pub fn binary_name() -> String {
    std::env::args_os()
        .next()
        .and_then(|arg0| Path::new(&arg0).file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

/// Registry of managed processes. The root may carry a main service; every
/// worker added below it becomes a subcommand named after the workload.
pub struct Daemon {
    name: String,
    process: Option<Process>,
    children: Vec<Daemon>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new(binary_name())
    }
}

impl Daemon {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            process: None,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach `start`/`stop`/`restart` for the main service at this level.
    pub fn register(&mut self, process: Process) -> &mut Self {
        self.process = Some(process);
        self
    }

    /// Add `process` as a subcommand and return it so further workers can be
    /// nested under it. A sibling with the same name is replaced.
    pub fn add_worker(&mut self, process: Process) -> &mut Daemon {
        let name = process.name();
        self.children.retain(|child| child.name != name);
        self.children.push(Daemon {
            name,
            process: Some(process),
            children: Vec::new(),
        });
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn children(&self) -> impl Iterator<Item = &Daemon> {
        self.children.iter()
    }

    pub fn process(&self) -> Option<&Process> {
        self.process.as_ref()
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(self.name.clone());

        if let Some(process) = &self.process {
            let name = process.name();
            cmd = process
                .workload()
                .command(cmd)
                .subcommand(
                    Command::new("start")
                        .about(format!("start {}", name))
                        .arg(daemon_flag()),
                )
                .subcommand(Command::new("stop").about(format!("stop {}", name)))
                .subcommand(
                    Command::new("restart")
                        .about(format!("restart {}", name))
                        .arg(daemon_flag()),
                );
        }

        for child in &self.children {
            cmd = cmd.subcommand(child.command());
        }
        cmd
    }

    /// Parse the process arguments and run the selected command. Usage
    /// errors print and exit the way clap does.
    ///
    /// This writes the environment from inside the async runtime. Binaries
    /// should parse, [`Daemon::prepare`] and only then start the runtime and
    /// [`Daemon::execute`].
    pub async fn run(&mut self) -> Result<Outcome> {
        let matches = self.command().get_matches();
        self.prepare(&matches);
        self.execute(&matches).await
    }

    pub async fn run_from<I, T>(&mut self, args: I) -> Result<Outcome>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self.command().try_get_matches_from(args)?;
        self.prepare(&matches);
        self.execute(&matches).await
    }

    /// Apply the environment changes the parsed command needs: `start` or
    /// `restart` with `--daemon=false` marks this process as the worker.
    /// Call while the process is still single-threaded.
    pub fn prepare(&self, matches: &ArgMatches) {
        let mut node: &Daemon = self;
        let mut matches = matches;

        while let Some((name, sub)) = matches.subcommand() {
            if ACTIONS.contains(&name) {
                if let Some(process) = node.process.as_ref() {
                    if name != "stop" && !in_background(sub) && !process.is_child() {
                        std::env::set_var(process.daemon_tag(), CHILD_TAG_VALUE);
                    }
                    return;
                }
            }

            match node.children.iter().find(|child| child.name == name) {
                Some(child) => {
                    node = child;
                    matches = sub;
                }
                None => return,
            }
        }
    }

    /// Run the command selected by `matches`, after [`Daemon::prepare`].
    pub async fn execute(&mut self, matches: &ArgMatches) -> Result<Outcome> {
        let help = self.command();
        let mut node: &mut Daemon = self;
        let mut matches = matches;

        loop {
            let Some((name, sub)) = matches.subcommand() else {
                let _ = help.clone().print_help();
                return Ok(Outcome::Help);
            };

            if ACTIONS.contains(&name) {
                if let Some(process) = node.process.as_mut() {
                    return act(process, name, sub).await;
                }
            }

            match node.children.iter_mut().find(|child| child.name == name) {
                Some(child) => {
                    node = child;
                    matches = sub;
                }
                None => {
                    let _ = help.clone().print_help();
                    return Ok(Outcome::Help);
                }
            }
        }
    }
}

fn in_background(matches: &ArgMatches) -> bool {
    matches.get_one::<bool>("daemon").copied().unwrap_or(true)
}

fn daemon_flag() -> Arg {
    Arg::new("daemon")
        .short('d')
        .long("daemon")
        .help("run in the background (--daemon=false keeps it in the foreground)")
        .value_parser(BoolishValueParser::new())
        .num_args(0..=1)
        .default_value("true")
        .default_missing_value("true")
}

async fn act(process: &mut Process, action: &str, matches: &ArgMatches) -> Result<Outcome> {
    let pid_file = process.pid_filename()?;

    match action {
        "stop" => {
            let delivery = control::stop(&pid_file)?;
            if delivery == Delivery::NotRunning {
                println!("{} is not running", process.name());
            }
            Ok(Outcome::Stopped(delivery))
        }
        "restart" => match control::restart(&pid_file)? {
            Delivery::NotRunning => {
                info!("{} not running, starting it", process.name());
                start(process, matches).await?;
                Ok(Outcome::Restarted(Delivery::NotRunning))
            }
            sent => Ok(Outcome::Restarted(sent)),
        },
        _ => start(process, matches).await,
    }
}

async fn start(process: &mut Process, matches: &ArgMatches) -> Result<Outcome> {
    process.workload().configure(matches);

    if !in_background(matches) && !process.is_child() {
        // Foreground without `prepare`. Runs inside the runtime, so other
        // threads must not be reading the environment at this point.
        std::env::set_var(process.daemon_tag(), CHILD_TAG_VALUE);
    }

    match process.run().await {
        Ok(()) => Ok(Outcome::Started),
        Err(e) if e.is_would_block() => {
            println!("resource temporarily unavailable");
            Ok(Outcome::Unavailable)
        }
        Err(e) => Err(e),
    }
}
