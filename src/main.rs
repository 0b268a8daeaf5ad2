//! http-daemon: a hello-world HTTP service run under the daemon controller.
//!
//!   http-daemon start [--addr 127.0.0.1:9047] [--daemon=false]
//!   http-daemon stop
//!   http-daemon restart
//!   http-daemon http start|stop|restart     (same service, nested form)

use anyhow::Result;
use async_trait::async_trait;
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use pankha_daemon::app::logging::{init_tracing, reload_level, resolve_level};
use pankha_daemon::config::persistence::load_config;
use pankha_daemon::config::types::DaemonConfig;
use pankha_daemon::{Daemon, Flow, Process, Workload};

const DEFAULT_ADDR: &str = "127.0.0.1:9047";
const BIND_ATTEMPTS: u32 = 10;

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/plain\r\n\
Content-Length: 11\r\n\
Connection: close\r\n\
\r\n\
hello world";

struct HttpServer {
    addr: OnceLock<String>,
    shutdown: Notify,
}

impl HttpServer {
    fn new() -> Self {
        Self {
            addr: OnceLock::new(),
            shutdown: Notify::new(),
        }
    }

    fn addr(&self) -> &str {
        self.addr.get().map(String::as_str).unwrap_or(DEFAULT_ADDR)
    }

    // A restarting predecessor may still hold the port for a moment
    async fn bind(&self) -> Option<TcpListener> {
        for attempt in 1..=BIND_ATTEMPTS {
            match TcpListener::bind(self.addr()).await {
                Ok(listener) => return Some(listener),
                Err(e) => {
                    warn!("Bind {} failed (attempt {}/{}): {}", self.addr(), attempt, BIND_ATTEMPTS, e);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
        None
    }
}

async fn respond(mut stream: TcpStream) {
    let mut buf = [0u8; 1024];
    if let Err(e) = stream.read(&mut buf).await {
        debug!("Read failed: {}", e);
        return;
    }
    info!("hello world");
    if let Err(e) = stream.write_all(RESPONSE).await {
        debug!("Write failed: {}", e);
    }
}

#[async_trait]
impl Workload for HttpServer {
    fn name(&self) -> String {
        "http".to_string()
    }

    fn pid_save_path(&self) -> PathBuf {
        PathBuf::from("./")
    }

    fn command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("addr")
                .long("addr")
                .global(true)
                .default_value(DEFAULT_ADDR)
                .help("address the web server listens on"),
        )
    }

    fn configure(&self, matches: &ArgMatches) {
        if let Some(addr) = matches.get_one::<String>("addr") {
            let _ = self.addr.set(addr.clone());
        }
    }

    async fn start(&self) {
        let Some(listener) = self.bind().await else {
            error!("Giving up on {}", self.addr());
            return;
        };
        info!("Web server listening on {}", self.addr());

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Connection from {}", peer);
                        tokio::spawn(respond(stream));
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                _ = self.shutdown.notified() => break,
            }
        }
        info!("Web server closed");
    }

    async fn stop(&self) -> Result<()> {
        info!("Closing web server");
        self.shutdown.notify_one();
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.stop().await
    }
}

fn build_process(config: &DaemonConfig) -> Result<Process> {
    let mut process = Process::new(HttpServer::new());
    config.apply(&mut process)?;

    process.on(libc::SIGTERM, || info!("a custom signal"));
    process.on_async(libc::SIGHUP, || async {
        info!("SIGHUP received, reloading log level configuration");
        match load_config(None) {
            Ok(config) => {
                let level = config.log_level.unwrap_or_else(|| "info".to_string());
                if let Err(e) = reload_level(&level) {
                    error!("Failed to reload log level: {}", e);
                }
            }
            Err(e) => error!("Failed to reload config: {:#}", anyhow::Error::new(e)),
        }
        Flow::Continue
    });
    Ok(process)
}

fn main() -> Result<()> {
    let config = load_config(None)?;
    init_tracing(resolve_level(None, config.log_level.as_deref()));

    let mut daemon = Daemon::default();
    daemon.register(build_process(&config)?);
    daemon.add_worker(build_process(&config)?);

    // Environment writes happen here, before any runtime thread exists.
    let matches = daemon.command().get_matches();
    daemon.prepare(&matches);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(daemon.execute(&matches))?;
    debug!("Command finished: {:?}", outcome);
    Ok(())
}
