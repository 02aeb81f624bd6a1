/// Registers the decoding backends. Call once at startup before creating
/// any pipeline that plays files.
pub fn init() -> Result<(), error::ConfigurationError> {
    #[cfg(feature = "ffmpeg")]
    ffmpeg::init()?;
    Ok(())
}

pub mod engine;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod format;
pub mod frame;
pub mod hint;
pub mod pipeline;
pub mod queue;
pub mod stats;
pub mod supervisor;
pub mod testsrc;

#[cfg(test)]
mod test_support;

pub use engine::{DecodeEngine, EngineFactory};
pub use error::{ConfigurationError, EngineRuntimeError, StartError, SupervisorError};
pub use format::{ColourFormat, FormatLayout, StreamFormat, TexelFormat};
pub use frame::{BufferId, BufferLedger, Caps, FrameBuffer, RgbLayout};
pub use pipeline::{FinishReason, FrameSink, InstanceId, PipelineState, SlotIndex, StreamPipeline};
pub use queue::BoundedHandoffQueue;
pub use supervisor::{
    FrameConsumer, NewFrame, PipelineSupervisor, RestartPolicy, SupervisorConfig, SupervisorMode,
};
