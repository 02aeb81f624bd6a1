use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::pipeline::SlotIndex;

/// Advisory "new frame ready" signal from decode threads to the render thread.
///
/// Nothing waits on it for correctness; the render thread polls every tick
/// anyway and may use the hint to tick early.
#[derive(Clone)]
pub struct FrameHint {
    inner: Arc<HintInner>,
}

struct HintInner {
    pending: Vec<AtomicBool>,
    notify: Notify,
}

impl FrameHint {
    pub fn new(slots: usize) -> Self {
        Self {
            inner: Arc::new(HintInner {
                pending: (0..slots).map(|_| AtomicBool::new(false)).collect(),
                notify: Notify::new(),
            }),
        }
    }

    /// Marks `slot` as having fresh frames and wakes a waiting render loop.
    pub fn notify(&self, slot: SlotIndex) {
        if let Some(flag) = self.inner.pending.get(slot.index()) {
            flag.store(true, Ordering::Release);
        }
        self.inner.notify.notify_one();
    }

    /// Clears and returns the pending flag of `slot`.
    pub fn take(&self, slot: SlotIndex) -> bool {
        self.inner
            .pending
            .get(slot.index())
            .is_some_and(|flag| flag.swap(false, Ordering::AcqRel))
    }

    pub fn is_pending(&self, slot: SlotIndex) -> bool {
        self.inner
            .pending
            .get(slot.index())
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Resolves after the next `notify` (or immediately if one is already stored).
    pub async fn notified(&self) {
        self.inner.notify.notified().await
    }
}
