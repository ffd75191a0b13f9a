use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::block::{BlockPool, PooledBlock};
use crate::config::SyncSettings;
use crate::error::{Result, SyncError};
use crate::fsio::FileSystem;
use crate::progress::Progress;
use crate::sidecar;

/// Cooperative cancellation flag, polled once per block.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Which file of a pair is read first when both are streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrder {
    FirstThenSecond,
    SecondThenFirst,
}

/// State shared by all call chains of one run.
#[derive(Debug)]
pub struct SharedState {
    rng: Mutex<StdRng>,
    second_first: Mutex<bool>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }
}

impl SharedState {
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self { rng: Mutex::new(rng), second_first: Mutex::new(false) }
    }

    /// Run `f` with exclusive access to the shared generator.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut rng)
    }

    /// Flip the read-order toggle and return the new order. Concurrent
    /// callers may occasionally observe the same order.
    pub fn next_read_order(&self) -> ReadOrder {
        let mut flag = self.second_first.lock().unwrap_or_else(|p| p.into_inner());
        *flag = !*flag;
        if *flag {
            ReadOrder::SecondThenFirst
        } else {
            ReadOrder::FirstThenSecond
        }
    }
}

/// Everything a call chain needs, passed explicitly from the dispatcher down
/// to the block loops.
#[derive(Clone)]
pub struct SyncContext {
    pub fs: Arc<dyn FileSystem>,
    pub settings: Arc<SyncSettings>,
    pub cancel: CancelToken,
    pub shared: Arc<SharedState>,
    pub progress: Progress,
    pub pool: Arc<BlockPool>,
    clock: Option<DateTime<Utc>>,
}

impl SyncContext {
    pub fn new(fs: Arc<dyn FileSystem>, settings: SyncSettings) -> Self {
        Self {
            fs,
            settings: Arc::new(settings),
            cancel: CancelToken::new(),
            shared: Arc::new(SharedState::default()),
            progress: Progress::default(),
            pool: Arc::new(BlockPool::default()),
            clock: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_shared(mut self, shared: Arc<SharedState>) -> Self {
        self.shared = shared;
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Pin "now" (tests of the skip heuristic).
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(now);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn block(&self) -> PooledBlock {
        self.pool.acquire()
    }

    pub fn ledger_path(&self, data: &Path) -> PathBuf {
        sidecar::ledger_path(data, &self.settings.ledger_dir, &self.settings.ledger_ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn read_order_alternates() {
        let s = SharedState::with_seed(1);
        let a = s.next_read_order();
        let b = s.next_read_order();
        assert_ne!(a, b);
        assert_eq!(a, s.next_read_order());
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let a = SharedState::with_seed(7).with_rng(|r| r.gen::<u64>());
        let b = SharedState::with_seed(7).with_rng(|r| r.gen::<u64>());
        assert_eq!(a, b);
    }
}
