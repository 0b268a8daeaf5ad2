#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pankha_daemon::Workload;

/// Workload that only counts lifecycle calls.
#[derive(Default)]
pub struct Counters {
    pub start: AtomicUsize,
    pub stop: AtomicUsize,
    pub restart: AtomicUsize,
}

impl Counters {
    pub fn starts(&self) -> usize {
        self.start.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn restarts(&self) -> usize {
        self.restart.load(Ordering::SeqCst)
    }
}

pub struct TestWorkload {
    pub name: String,
    pub dir: PathBuf,
    pub counters: Arc<Counters>,
}

impl TestWorkload {
    pub fn new(name: &str, dir: &Path) -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let workload = Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            counters: Arc::clone(&counters),
        };
        (workload, counters)
    }
}

#[async_trait]
impl Workload for TestWorkload {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn pid_save_path(&self) -> PathBuf {
        self.dir.clone()
    }

    async fn start(&self) {
        self.counters.start.fetch_add(1, Ordering::SeqCst);
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.counters.stop.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn restart(&self) -> anyhow::Result<()> {
        self.counters.restart.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll until `path` exists with non-empty content, or give up after `timeout`.
pub async fn wait_for_content(path: &Path, timeout: Duration) -> Option<String> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(content) = std::fs::read_to_string(path) {
            if !content.is_empty() {
                return Some(content);
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}
