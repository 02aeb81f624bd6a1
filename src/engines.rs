use frame_bus::testsrc::{TestSourceEngine, is_test_source};
use frame_bus::{DecodeEngine, EngineFactory, SlotIndex};

/// Picks the engine for a locator: the test pattern for `testsrc` locators,
/// FFmpeg for everything else.
pub struct EngineSelector;

impl EngineFactory for EngineSelector {
    fn create(&self, slot: SlotIndex, locator: &str) -> Box<dyn DecodeEngine> {
        if is_test_source(locator) {
            log::debug!("slot {}: using test source", slot);
            Box::new(TestSourceEngine::new())
        } else {
            file_engine()
        }
    }
}

#[cfg(feature = "ffmpeg")]
fn file_engine() -> Box<dyn DecodeEngine> {
    Box::new(frame_bus::ffmpeg::FfmpegEngine::new())
}

#[cfg(not(feature = "ffmpeg"))]
fn file_engine() -> Box<dyn DecodeEngine> {
    Box::new(NoFileSupport)
}

/// Stands in for the FFmpeg engine in builds without it.
#[cfg(not(feature = "ffmpeg"))]
struct NoFileSupport;

#[cfg(not(feature = "ffmpeg"))]
impl DecodeEngine for NoFileSupport {
    fn configure(
        &mut self,
        locator: &str,
        _sink: frame_bus::FrameSink,
    ) -> Result<(), frame_bus::ConfigurationError> {
        Err(frame_bus::ConfigurationError::MissingComponent(format!(
            "file playback (built without the ffmpeg feature), cannot open {:?}",
            locator
        )))
    }

    fn start(&mut self) -> Result<(), frame_bus::StartError> {
        Err(frame_bus::StartError::Rejected("not configured".to_string()))
    }

    fn stop(&mut self) {}
}
