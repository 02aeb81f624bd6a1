use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one pipeline instance, updated from both threads.
#[derive(Default)]
pub struct PipelineStats {
    frames_received: AtomicU64,
    frames_evicted: AtomicU64,
    frames_taken: AtomicU64,
    frames_released: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self) {
        self.frames_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_taken(&self) {
        self.frames_taken.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_released(&self, count: u64) {
        self.frames_released.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_evicted: self.frames_evicted.load(Ordering::Relaxed),
            frames_taken: self.frames_taken.load(Ordering::Relaxed),
            frames_released: self.frames_released.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    /// Dropped from the incoming queue under backpressure.
    pub frames_evicted: u64,
    pub frames_taken: u64,
    /// Returned to the engine by the pipeline (consumed, evicted or drained).
    pub frames_released: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} evicted={} taken={} released={}",
            self.frames_received, self.frames_evicted, self.frames_taken, self.frames_released
        )
    }
}
