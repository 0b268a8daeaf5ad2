//! Signal router: maps signal numbers to handlers and drives the dispatch loop
//! that keeps the worker alive.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::Result;

/// What the dispatch loop does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub type Handler = Box<dyn FnMut() -> BoxFuture<'static, Flow> + Send>;

/// Every signal a process can catch. The listener subscribes to all of them
/// and drops the ones without a handler.
pub const DELIVERABLE: &[i32] = &[
    libc::SIGHUP,
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGABRT,
    libc::SIGUSR1,
    libc::SIGUSR2,
    libc::SIGPIPE,
    libc::SIGALRM,
    libc::SIGTERM,
    libc::SIGCHLD,
    libc::SIGCONT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
    libc::SIGURG,
    libc::SIGXCPU,
    libc::SIGXFSZ,
    libc::SIGVTALRM,
    libc::SIGPROF,
    libc::SIGWINCH,
    libc::SIGIO,
    libc::SIGSYS,
];

#[derive(Default)]
pub struct SignalRouter {
    handlers: HashMap<i32, Handler>,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handler for `signal`. The last registration wins.
    pub fn register(&mut self, signal: i32, handler: Handler) {
        if self.handlers.insert(signal, handler).is_some() {
            debug!("Replaced handler for signal {}", signal);
        }
    }

    pub fn is_registered(&self, signal: i32) -> bool {
        self.handlers.contains_key(&signal)
    }

    /// Run the handler for `signal` in the caller's task. `None` when nothing
    /// is registered for it.
    pub async fn dispatch(&mut self, signal: i32) -> Option<Flow> {
        let handler = self.handlers.get_mut(&signal)?;
        Some(handler().await)
    }

    /// Start receiving every deliverable signal plus any registered extra.
    /// Signals that arrive before [`SignalRouter::listen_on`] runs are queued.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel::<i32>(1);

        let mut subscribed: Vec<i32> = DELIVERABLE.to_vec();
        for signo in self.handlers.keys() {
            if !subscribed.contains(signo) {
                subscribed.push(*signo);
            }
        }

        let mut forwarders = Vec::with_capacity(subscribed.len());
        for signo in subscribed {
            let mut stream = match signal(SignalKind::from_raw(signo)) {
                Ok(stream) => stream,
                Err(e) => {
                    // Platform refuses this one; a handler for it never fires.
                    debug!("Not listening for signal {}: {}", signo, e);
                    continue;
                }
            };
            let tx = tx.clone();
            forwarders.push(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.send(signo).await.is_err() {
                        break;
                    }
                }
            }));
        }

        Subscription { rx, forwarders }
    }

    /// Subscribe and dispatch until a handler asks for [`Flow::Exit`].
    pub async fn listen(&mut self) -> Result<()> {
        let subscription = self.subscribe();
        self.listen_on(subscription).await
    }

    /// Run handlers one at a time as signals arrive on `subscription`.
    /// Returns only after a handler asks for [`Flow::Exit`].
    pub async fn listen_on(&mut self, mut subscription: Subscription) -> Result<()> {
        debug!("Listening for signals");
        while let Some(signo) = subscription.rx.recv().await {
            match self.dispatch(signo).await {
                Some(Flow::Exit) => {
                    debug!("Handler for signal {} requested exit", signo);
                    return Ok(());
                }
                Some(Flow::Continue) => {}
                None => trace!("Dropped unhandled signal {}", signo),
            }
        }
        Ok(())
    }
}

/// Live signal streams feeding one dispatch loop. Dropping it stops the
/// forwarding tasks.
pub struct Subscription {
    rx: mpsc::Receiver<i32>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}
