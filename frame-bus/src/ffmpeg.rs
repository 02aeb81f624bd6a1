//! File and network playback through FFmpeg.
//!
//! Decodes the best video stream of the source and hands every frame to the
//! pipeline as tightly packed planes. Pixel formats the renderer cannot upload
//! are converted to `yuv420p` first.

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use tokio_util::sync::CancellationToken;

use crate::engine::DecodeEngine;
use crate::error::{ConfigurationError, EngineRuntimeError, StartError};
use crate::frame::{BufferLedger, Caps};
use crate::pipeline::FrameSink;

/// Registers FFmpeg's demuxers and decoders.
pub fn init() -> Result<(), ConfigurationError> {
    ffmpeg_next::init().map_err(|e| ConfigurationError::MissingComponent(format!("ffmpeg: {}", e)))?;
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Error);
    Ok(())
}

const YUV420P_PLANES: &[usize] = &[1, 1, 1];

/// FFmpeg pixel formats delivered untouched, with their bytes per pixel per plane.
fn passthrough(pixel: Pixel) -> Option<(&'static str, &'static [usize])> {
    match pixel {
        Pixel::YUV420P => Some(("yuv420p", YUV420P_PLANES)),
        Pixel::YUVJ420P => Some(("yuvj420p", YUV420P_PLANES)),
        Pixel::UYVY422 => Some(("uyvy422", &[2])),
        Pixel::YUYV422 => Some(("yuyv422", &[2])),
        Pixel::RGB24 => Some(("rgb24", &[3])),
        Pixel::BGR24 => Some(("bgr24", &[3])),
        Pixel::ARGB => Some(("argb", &[4])),
        Pixel::BGRA => Some(("bgra", &[4])),
        _ => None,
    }
}

struct VideoSource {
    input: ffmpeg_next::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg_next::codec::decoder::Video,
    scaler: Option<scaling::Context>,
    frame_interval: Duration,
}

unsafe impl Send for VideoSource {}

impl VideoSource {
    fn open(locator: &str) -> anyhow::Result<Self> {
        let path = Path::new(locator);
        let input = ffmpeg_next::format::input(path)?;
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("no video stream"))?;
        let stream_index = stream.index();

        let rate = stream.avg_frame_rate();
        let frame_interval = if rate.numerator() > 0 && rate.denominator() > 0 {
            Duration::from_secs_f64(rate.denominator() as f64 / rate.numerator() as f64)
        } else {
            Duration::from_millis(40)
        };

        let ctx = ffmpeg_next::codec::Context::from_parameters(stream.parameters())?;
        let decoder = ctx.decoder().video()?;
        if decoder.format() == Pixel::None || decoder.width() == 0 || decoder.height() == 0 {
            return Err(anyhow::anyhow!("missing codec parameters"));
        }

        let scaler = if passthrough(decoder.format()).is_some() {
            None
        } else {
            log::info!(
                "ffmpeg: converting {:?} to yuv420p for upload",
                decoder.format()
            );
            Some(scaling::Context::get(
                decoder.format(),
                decoder.width(),
                decoder.height(),
                Pixel::YUV420P,
                decoder.width(),
                decoder.height(),
                scaling::Flags::BILINEAR,
            )?)
        };

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            frame_interval,
        })
    }
}

/// Copies the visible part of every plane, dropping the line padding.
fn pack_frame(frame: &ffmpeg_next::frame::Video, bytes_per_pixel: &[usize]) -> Bytes {
    let mut len = 0;
    for (plane, bpp) in bytes_per_pixel.iter().enumerate() {
        len += frame.plane_width(plane) as usize * bpp * frame.plane_height(plane) as usize;
    }
    let mut buf = BytesMut::with_capacity(len);
    for (plane, bpp) in bytes_per_pixel.iter().enumerate() {
        let row = frame.plane_width(plane) as usize * bpp;
        let stride = frame.stride(plane);
        let data = frame.data(plane);
        for y in 0..frame.plane_height(plane) as usize {
            let start = y * stride;
            buf.put_slice(&data[start..start + row]);
        }
    }
    buf.freeze()
}

enum WorkerExit {
    EndOfStream,
    Stopped,
    Terminated,
}

pub struct FfmpegEngine {
    ledger: Arc<BufferLedger>,
    source: Option<VideoSource>,
    sink: Option<FrameSink>,
    cancel: CancellationToken,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self {
            ledger: BufferLedger::new("ffmpeg"),
            source: None,
            sink: None,
            cancel: CancellationToken::new(),
            stop_tx: None,
            worker: None,
        }
    }

    pub fn ledger(&self) -> Arc<BufferLedger> {
        Arc::clone(&self.ledger)
    }

    fn deliver(
        source: &mut VideoSource,
        decoded: &ffmpeg_next::frame::Video,
        sink: &FrameSink,
        ledger: &Arc<BufferLedger>,
    ) -> anyhow::Result<()> {
        let (name, data) = match source.scaler.as_mut() {
            Some(scaler) => {
                let mut converted = ffmpeg_next::frame::Video::empty();
                scaler.run(decoded, &mut converted)?;
                ("yuv420p", pack_frame(&converted, YUV420P_PLANES))
            }
            None => {
                let (name, planes) = passthrough(decoded.format())
                    .ok_or_else(|| anyhow::anyhow!("pixel format changed to {:?}", decoded.format()))?;
                (name, pack_frame(decoded, planes))
            }
        };
        let caps = Arc::new(Caps::raw(name, decoded.width(), decoded.height()));
        sink.on_frame_available(ledger.issue(caps, data));
        Ok(())
    }

    fn drain_decoder(
        source: &mut VideoSource,
        sink: &FrameSink,
        ledger: &Arc<BufferLedger>,
        stop_rx: &Receiver<()>,
    ) -> anyhow::Result<bool> {
        let mut decoded = ffmpeg_next::frame::Video::empty();
        loop {
            match source.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    Self::deliver(source, &decoded, sink, ledger)?;
                    match stop_rx.recv_timeout(source.frame_interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(true),
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(false),
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn decode_loop(
        source: &mut VideoSource,
        sink: &FrameSink,
        ledger: &Arc<BufferLedger>,
        cancel: &CancellationToken,
        stop_rx: &Receiver<()>,
    ) -> anyhow::Result<WorkerExit> {
        loop {
            if cancel.is_cancelled() {
                return Ok(WorkerExit::Terminated);
            }
            match stop_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return Ok(WorkerExit::Stopped),
                Err(TryRecvError::Empty) => {}
            }
            let packet = source
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match packet {
                Some((index, packet)) => {
                    if index != source.stream_index {
                        continue;
                    }
                    if let Err(e) = source.decoder.send_packet(&packet) {
                        log::warn!("ffmpeg {}: send packet error: {}", sink.slot(), e);
                        continue;
                    }
                }
                None => {
                    source.decoder.send_eof()?;
                    Self::drain_decoder(source, sink, ledger, stop_rx)?;
                    return Ok(WorkerExit::EndOfStream);
                }
            }
            if Self::drain_decoder(source, sink, ledger, stop_rx)? {
                return Ok(WorkerExit::Stopped);
            }
        }
    }

    fn worker_loop(
        mut source: VideoSource,
        sink: FrameSink,
        ledger: Arc<BufferLedger>,
        cancel: CancellationToken,
        stop_rx: Receiver<()>,
    ) {
        match Self::decode_loop(&mut source, &sink, &ledger, &cancel, &stop_rx) {
            Ok(WorkerExit::EndOfStream) | Ok(WorkerExit::Stopped) => sink.on_finished(),
            Ok(WorkerExit::Terminated) => {}
            Err(e) => sink.on_error(
                EngineRuntimeError::new("decode failed").with_details(format!("{:#}", e)),
            ),
        }
        log::debug!("ffmpeg {}: worker exiting", sink.slot());
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeEngine for FfmpegEngine {
    fn configure(&mut self, locator: &str, sink: FrameSink) -> Result<(), ConfigurationError> {
        if self.sink.is_some() {
            return Err(ConfigurationError::AlreadyConfigured);
        }
        let source = VideoSource::open(locator).map_err(|e| ConfigurationError::OpenFailed {
            locator: locator.to_string(),
            reason: format!("{:#}", e),
        })?;
        log::info!(
            "ffmpeg {}: opened {:?}, {}x{} {:?}",
            sink.slot(),
            locator,
            source.decoder.width(),
            source.decoder.height(),
            source.decoder.format()
        );
        self.source = Some(source);
        self.sink = Some(sink);
        Ok(())
    }

    fn start(&mut self) -> Result<(), StartError> {
        let (Some(source), Some(sink)) = (self.source.take(), self.sink.clone()) else {
            return Err(StartError::Rejected("not configured".to_string()));
        };

        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let ledger = Arc::clone(&self.ledger);
        let cancel = self.cancel.clone();
        let worker = std::thread::Builder::new()
            .name(format!("ffmpeg-{}", sink.slot()))
            .spawn(move || Self::worker_loop(source, sink, ledger, cancel, stop_rx))
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
                    .name(format!("ffmpeg-{}-stop", sink.slot()))
                    .spawn(move || sink.on_finished());
                match spawned {
                    Ok(handle) => self.worker = Some(handle),
                    Err(e) => log::error!("ffmpeg: cannot acknowledge stop: {}", e),
                }
            }
        }
    }

    fn terminate(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for FfmpegEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("ffmpeg: worker panicked");
            }
        }
    }
}
