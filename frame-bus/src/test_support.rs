//! Hand-driven engine for deterministic pipeline and supervisor tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::engine::{DecodeEngine, EngineFactory};
use crate::error::{ConfigurationError, EngineRuntimeError, StartError};
use crate::frame::{BufferLedger, Caps};
use crate::pipeline::{FrameSink, SlotIndex};

/// Locator prefixes understood by [`ManualFactory`].
pub const FAIL_CONFIGURE: &str = "bad-config";
pub const FAIL_START: &str = "bad-start";

#[derive(Default)]
pub struct ManualControl {
    sink: Mutex<Option<FrameSink>>,
    pub locator: Mutex<String>,
    pub stops: AtomicUsize,
    pub terminates: AtomicUsize,
    fail_configure: bool,
    fail_start: bool,
}

impl ManualControl {
    pub fn for_locator(locator: &str) -> Arc<Self> {
        Arc::new(Self {
            locator: Mutex::new(locator.to_string()),
            fail_configure: locator.starts_with(FAIL_CONFIGURE),
            fail_start: locator.starts_with(FAIL_START),
            ..Default::default()
        })
    }

    fn sink(&self) -> FrameSink {
        match self.sink.lock().clone() {
            Some(sink) => sink,
            None => panic!("engine was never configured"),
        }
    }

    pub fn push(&self, ledger: &Arc<BufferLedger>, caps: &Arc<Caps>, len: usize) {
        let buffer = ledger.issue(Arc::clone(caps), Bytes::from(vec![0u8; len]));
        self.sink().on_frame_available(buffer);
    }

    /// End of stream, or the acknowledgement of a pending stop.
    pub fn end_of_stream(&self) {
        self.sink().on_finished();
    }

    pub fn fail(&self, message: &str) {
        self.sink().on_error(EngineRuntimeError::new(message));
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn terminates(&self) -> usize {
        self.terminates.load(Ordering::SeqCst)
    }
}

pub struct ManualEngine {
    control: Arc<ManualControl>,
}

impl ManualEngine {
    pub fn new(control: Arc<ManualControl>) -> Box<dyn DecodeEngine> {
        Box::new(Self { control })
    }
}

impl DecodeEngine for ManualEngine {
    fn configure(&mut self, locator: &str, sink: FrameSink) -> Result<(), ConfigurationError> {
        if self.control.fail_configure {
            return Err(ConfigurationError::OpenFailed {
                locator: locator.to_string(),
                reason: "no such source".to_string(),
            });
        }
        *self.control.sink.lock() = Some(sink);
        Ok(())
    }

    fn start(&mut self) -> Result<(), StartError> {
        if self.control.fail_start {
            return Err(StartError::Rejected("refused to play".to_string()));
        }
        Ok(())
    }

    // acknowledged later through `ManualControl::end_of_stream`
    fn stop(&mut self) {
        self.control.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn terminate(&mut self) {
        self.control.terminates.fetch_add(1, Ordering::SeqCst);
    }
}

/// Remembers every engine it built, in creation order.
#[derive(Default)]
pub struct ManualFactory {
    created: Mutex<Vec<(SlotIndex, Arc<ManualControl>)>>,
}

impl ManualFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The most recently created engine for `slot`.
    pub fn latest(&self, slot: usize) -> Arc<ManualControl> {
        let created = self.created.lock();
        match created.iter().rev().find(|(s, _)| s.index() == slot) {
            Some((_, control)) => Arc::clone(control),
            None => panic!("no engine created for slot {}", slot),
        }
    }

    pub fn created_for(&self, slot: usize) -> usize {
        self.created
            .lock()
            .iter()
            .filter(|(s, _)| s.index() == slot)
            .count()
    }
}

impl EngineFactory for ManualFactory {
    fn create(&self, slot: SlotIndex, locator: &str) -> Box<dyn DecodeEngine> {
        let control = ManualControl::for_locator(locator);
        self.created.lock().push((slot, Arc::clone(&control)));
        ManualEngine::new(control)
    }
}
