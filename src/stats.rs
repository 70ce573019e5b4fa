use core::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Default)]
pub(crate) struct AtomicStats {
    pub(crate) trials: AtomicU64,
    pub(crate) partials: AtomicU64,
    pub(crate) failures: AtomicU64,
    pub(crate) successes: AtomicU64,
    pub(crate) best_depth: AtomicU64,
}

impl AtomicStats {
    pub(crate) fn report(&self) -> SearchSnapshot {
        SearchSnapshot {
            trials: self.trials.load(Ordering::Relaxed),
            partials: self.partials.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            best_depth: self.best_depth.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn restore(snapshot: &SearchSnapshot) -> Self {
        Self {
            trials: AtomicU64::new(snapshot.trials),
            partials: AtomicU64::new(snapshot.partials),
            failures: AtomicU64::new(snapshot.failures),
            successes: AtomicU64::new(snapshot.successes),
            best_depth: AtomicU64::new(snapshot.best_depth),
        }
    }

    pub(crate) fn record_depth(&self, depth: usize) {
        self.best_depth.fetch_max(depth as u64, Ordering::Relaxed);
    }
}

/// Point-in-time view of the shared counters; also the piece of search state
/// an external checkpointer persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchSnapshot {
    pub trials: u64,
    pub partials: u64,
    pub failures: u64,
    pub successes: u64,
    pub best_depth: u64,
}

impl SearchSnapshot {
    /// Rough seconds until a success, assuming a path with `weight`
    /// constrained state bits succeeds about once per `2^weight` trials.
    pub fn estimate_time_to_success(&self, weight: u32, elapsed_secs: f64) -> f64 {
        let expected = 2.0_f64.powi(weight.min(1023) as i32);
        let done = self.trials as f64;
        let tps = done / elapsed_secs;
        (expected - done).max(0.0) / tps
    }
}
