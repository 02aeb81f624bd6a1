//! Synthetic test-pattern engine, used when no file is given.
//!
//! Locators look like `testsrc` or `testsrc:width=320&height=240&fps=30&frames=100&format=i420`.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::sync::CancellationToken;

use crate::engine::DecodeEngine;
use crate::error::{ConfigurationError, EngineRuntimeError, StartError};
use crate::frame::{BufferLedger, Caps, RgbLayout};
use crate::pipeline::FrameSink;

pub const TESTSRC_SCHEME: &str = "testsrc";

/// Largest synthetic picture edge.
pub const MAX_DIMENSION: u32 = 16384;

pub fn is_test_source(locator: &str) -> bool {
    locator.is_empty()
        || locator == TESTSRC_SCHEME
        || locator
            .strip_prefix(TESTSRC_SCHEME)
            .is_some_and(|rest| rest.starts_with(':'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestFormat {
    I420,
    Uyvy,
    Rgb,
    Bgr,
    Argb,
    Bgra,
    /// Announced under a caps name nothing recognizes.
    Other(String),
}

impl TestFormat {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "i420" => TestFormat::I420,
            "uyvy" => TestFormat::Uyvy,
            "rgb" => TestFormat::Rgb,
            "bgr" => TestFormat::Bgr,
            "argb" => TestFormat::Argb,
            "bgra" => TestFormat::Bgra,
            _ => TestFormat::Other(value.to_string()),
        }
    }

    fn caps(&self, width: u32, height: u32) -> Caps {
        let rgb = |depth, red_mask, green_mask, blue_mask, alpha_mask| RgbLayout {
            bpp: depth,
            depth,
            red_mask,
            green_mask,
            blue_mask,
            alpha_mask,
        };
        match self {
            TestFormat::I420 => Caps::yuv(*b"I420", width, height),
            TestFormat::Uyvy => Caps::yuv(*b"UYVY", width, height),
            TestFormat::Rgb => Caps::rgb(rgb(24, 0xff0000, 0xff00, 0xff, 0), width, height),
            TestFormat::Bgr => Caps::rgb(rgb(24, 0xff, 0xff00, 0xff0000, 0), width, height),
            TestFormat::Argb => Caps::rgb(
                rgb(32, 0xff000000, 0xff0000, 0xff00, 0xff),
                width,
                height,
            ),
            TestFormat::Bgra => Caps::rgb(
                rgb(32, 0xff0000, 0xff00, 0xff, 0xff000000),
                width,
                height,
            ),
            TestFormat::Other(name) => Caps::other(format!("video/x-{}", name), width, height),
        }
    }

    fn frame_bytes(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            TestFormat::I420 => w * h * 3 / 2,
            TestFormat::Uyvy => w * h * 2,
            TestFormat::Rgb | TestFormat::Bgr => w * h * 3,
            TestFormat::Argb | TestFormat::Bgra => w * h * 4,
            TestFormat::Other(_) => w * h,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSourceSettings {
    pub width: u32,
    pub height: u32,
    // 0 = as fast as possible
    pub fps: u32,
    // None = endless
    pub frames: Option<u64>,
    pub format: TestFormat,
    /// Report an engine error instead of end of stream after this many frames.
    pub error_after: Option<u64>,
    /// Never acknowledge `stop`; only `terminate` ends the worker.
    pub ignore_stop: bool,
}

impl Default for TestSourceSettings {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: 30,
            frames: None,
            format: TestFormat::I420,
            error_after: None,
            ignore_stop: false,
        }
    }
}

impl TestSourceSettings {
    pub fn parse(locator: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidLocator {
            locator: locator.to_string(),
            reason,
        };
        if !is_test_source(locator) {
            return Err(invalid("not a testsrc locator".to_string()));
        }

        let mut settings = Self::default();
        let query = locator
            .strip_prefix(TESTSRC_SCHEME)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or("");
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected key=value, got {:?}", pair)))?;
            let number = |value: &str| {
                value
                    .parse::<u64>()
                    .map_err(|e| invalid(format!("{}: {}", key, e)))
            };
            let small = |value: &str| {
                value
                    .parse::<u32>()
                    .map_err(|e| invalid(format!("{}: {}", key, e)))
            };
            match key {
                "width" => settings.width = small(value)?,
                "height" => settings.height = small(value)?,
                "fps" => settings.fps = small(value)?,
                "frames" => settings.frames = Some(number(value)?),
                "format" => settings.format = TestFormat::parse(value),
                "error_after" => settings.error_after = Some(number(value)?),
                "ignore_stop" => settings.ignore_stop = value == "true" || value == "1",
                _ => return Err(invalid(format!("unknown key {:?}", key))),
            }
        }

        if settings.width == 0 || settings.height == 0 {
            return Err(invalid("width and height must be non-zero".to_string()));
        }
        if settings.width > MAX_DIMENSION || settings.height > MAX_DIMENSION {
            return Err(invalid(format!(
                "width and height must not exceed {}",
                MAX_DIMENSION
            )));
        }
        Ok(settings)
    }

    fn frame_interval(&self) -> Duration {
        if self.fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / self.fps as f64)
        }
    }
}

enum WorkerExit {
    EndOfStream,
    Stopped,
    Failed(u64),
    Terminated,
}

pub struct TestSourceEngine {
    ledger: Arc<BufferLedger>,
    settings: Option<TestSourceSettings>,
    sink: Option<FrameSink>,
    cancel: CancellationToken,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl TestSourceEngine {
    pub fn new() -> Self {
        Self {
            ledger: BufferLedger::new(TESTSRC_SCHEME),
            settings: None,
            sink: None,
            cancel: CancellationToken::new(),
            stop_tx: None,
            worker: None,
        }
    }

    pub fn ledger(&self) -> Arc<BufferLedger> {
        Arc::clone(&self.ledger)
    }

    fn worker_loop(
        settings: TestSourceSettings,
        sink: FrameSink,
        ledger: Arc<BufferLedger>,
        cancel: CancellationToken,
        stop_rx: Receiver<()>,
    ) {
        let caps = Arc::new(settings.format.caps(settings.width, settings.height));
        let frame_len = settings.format.frame_bytes(settings.width, settings.height);
        let interval = settings.frame_interval();
        let mut produced = 0u64;
        let mut stopping = false;

        let exit = loop {
            if cancel.is_cancelled() {
                break WorkerExit::Terminated;
            }
            if stopping && !settings.ignore_stop {
                break WorkerExit::Stopped;
            }
            if settings.error_after.is_some_and(|n| produced >= n) {
                break WorkerExit::Failed(produced);
            }
            if settings.frames.is_some_and(|n| produced >= n) {
                break WorkerExit::EndOfStream;
            }

            let data = Self::render_pattern(frame_len, produced);
            sink.on_frame_available(ledger.issue(Arc::clone(&caps), data));
            produced += 1;

            match stop_rx.recv_timeout(interval.max(Duration::from_micros(50))) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => stopping = true,
                Err(RecvTimeoutError::Timeout) => {}
            }
        };

        log::debug!(
            "testsrc {}: worker exiting after {} frames",
            sink.slot(),
            produced
        );
        match exit {
            WorkerExit::EndOfStream | WorkerExit::Stopped => sink.on_finished(),
            WorkerExit::Failed(n) => sink.on_error(
                EngineRuntimeError::new("synthetic decode error")
                    .with_details(format!("raised after {} frames", n)),
            ),
            WorkerExit::Terminated => {}
        }
    }

    /// Moving diagonal gradient; each frame differs from the previous one.
    fn render_pattern(len: usize, frame_no: u64) -> Bytes {
        let mut buf = BytesMut::with_capacity(len);
        let shift = (frame_no % 256) as usize;
        for i in 0..len {
            buf.put_u8(((i + shift) % 256) as u8);
        }
        buf.freeze()
    }
}

impl Default for TestSourceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeEngine for TestSourceEngine {
    fn configure(&mut self, locator: &str, sink: FrameSink) -> Result<(), ConfigurationError> {
        if self.sink.is_some() {
            return Err(ConfigurationError::AlreadyConfigured);
        }
        let settings = TestSourceSettings::parse(locator)?;
        log::debug!("testsrc {}: configured {:?}", sink.slot(), settings);
        self.settings = Some(settings);
        self.sink = Some(sink);
        Ok(())
    }

    fn start(&mut self) -> Result<(), StartError> {
        if self.worker.is_some() {
            return Err(StartError::Rejected("already started".to_string()));
        }
        let (Some(settings), Some(sink)) = (self.settings.clone(), self.sink.clone()) else {
            return Err(StartError::Rejected("not configured".to_string()));
        };

        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let ledger = Arc::clone(&self.ledger);
        let cancel = self.cancel.clone();
        let worker = std::thread::Builder::new()
            .name(format!("testsrc-{}", sink.slot()))
            .spawn(move || Self::worker_loop(settings, sink, ledger, cancel, stop_rx))
            .map_err(|e| StartError::Rejected(format!("spawn worker: {}", e)))?;

        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        match &self.stop_tx {
            Some(tx) => {
                let _ = tx.send(());
            }
            // configured but never started: acknowledge from a helper thread
            None => {
                let Some(sink) = self.sink.take() else {
                    return;
                };
                let spawned = std::thread::Builder::new()
                    .name(format!("testsrc-{}-stop", sink.slot()))
                    .spawn(move || sink.on_finished());
                match spawned {
                    Ok(handle) => self.worker = Some(handle),
                    Err(e) => log::error!("testsrc: cannot acknowledge stop: {}", e),
                }
            }
        }
    }

    fn terminate(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for TestSourceEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("testsrc: worker panicked");
            }
        }
    }
}

#[cfg(test)]
#[path = "testsrc_test.rs"]
mod testsrc_test;
