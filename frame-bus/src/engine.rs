use crate::error::{ConfigurationError, StartError};
use crate::pipeline::{FrameSink, SlotIndex};

/// One decoding session, driven by its own worker thread(s).
///
/// Every callback the engine makes goes through the [`FrameSink`] passed to
/// `configure`. After a successful `configure`, the engine must eventually call
/// `FrameSink::on_finished` or `FrameSink::on_error` exactly once: on end of
/// stream, on a fatal decode error, or as the acknowledgement of `stop`.
pub trait DecodeEngine: Send {
    fn configure(&mut self, locator: &str, sink: FrameSink) -> Result<(), ConfigurationError>;

    fn start(&mut self) -> Result<(), StartError>;

    /// Asks the engine to wind down. Must not block on the worker; the
    /// acknowledgement comes later from an engine thread, never from this call.
    fn stop(&mut self);

    /// Tears the session down without waiting for an acknowledgement. Called
    /// when a stop request timed out; callbacks arriving afterwards are ignored.
    fn terminate(&mut self) {
        self.stop();
    }
}

/// Builds a fresh engine for each pipeline instance.
pub trait EngineFactory: Send + Sync {
    fn create(&self, slot: SlotIndex, locator: &str) -> Box<dyn DecodeEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn(SlotIndex, &str) -> Box<dyn DecodeEngine> + Send + Sync,
{
    fn create(&self, slot: SlotIndex, locator: &str) -> Box<dyn DecodeEngine> {
        self(slot, locator)
    }
}
