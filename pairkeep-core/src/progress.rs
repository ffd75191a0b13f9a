use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

/// Counters shared by every call chain of a run, with an optional heartbeat
/// that logs them periodically.
#[derive(Clone, Debug)]
pub struct Progress {
    enabled: bool,
    pub stage: Arc<Mutex<String>>,
    pub pairs_done: Arc<AtomicU64>,
    pub blocks_done: Arc<AtomicU64>,
    pub bytes_done: Arc<AtomicU64>,
    pub bad_blocks: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stage: Arc::new(Mutex::new(String::new())),
            pairs_done: Arc::new(AtomicU64::new(0)),
            blocks_done: Arc::new(AtomicU64::new(0)),
            bytes_done: Arc::new(AtomicU64::new(0)),
            bad_blocks: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_stage(&self, s: &str) {
        if self.enabled {
            if let Ok(mut stage) = self.stage.lock() {
                *stage = s.to_string();
            }
        }
    }

    pub fn inc_pair(&self) {
        self.pairs_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_block(&self, bytes: u64) {
        self.blocks_done.fetch_add(1, Ordering::Relaxed);
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_bad_block(&self) {
        self.bad_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blocks(&self) -> u64 {
        self.blocks_done.load(Ordering::Relaxed)
    }

    pub fn bad(&self) -> u64 {
        self.bad_blocks.load(Ordering::Relaxed)
    }

    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let this = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while this.running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_secs(5));
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                let stage = this.stage.lock().map(|s| s.clone()).unwrap_or_default();
                info!(
                    elapsed_s = t0.elapsed().as_secs(),
                    stage = %stage,
                    pairs = this.pairs_done.load(Ordering::Relaxed),
                    blocks = this.blocks(),
                    mib = this.bytes_done.load(Ordering::Relaxed) >> 20,
                    bad = this.bad(),
                    "progress"
                );
            }
        });
    }

    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}
