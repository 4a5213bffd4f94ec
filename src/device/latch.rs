use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Resolves a race between competing events (device found vs. scan timeout)
/// to exactly one winner. Each scan attempt gets a fresh latch, so a failed
/// attempt never blocks the next one.
#[derive(Debug, Clone, Default)]
pub struct OneShotLatch {
    settled: Arc<AtomicBool>,
}

impl OneShotLatch {
    pub fn new() -> Self {
        OneShotLatch::default()
    }

    /// Returns true for the first caller only.
    pub fn try_settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}
