use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;

use crate::engine::DecodeEngine;
use crate::error::{ConfigurationError, EngineRuntimeError, StartError};
use crate::format::StreamFormat;
use crate::frame::FrameBuffer;
use crate::hint::FrameHint;
use crate::queue::BoundedHandoffQueue;
use crate::stats::{PipelineStats, StatsSnapshot};

/// Stable identifier of one played stream; survives pipeline restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(usize);

impl SlotIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for SlotIndex {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl Display for SlotIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one pipeline instance, i.e. one attempt at playing a slot's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl Display for InstanceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one pipeline instance. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PipelineState {
    Unconfigured = 0,
    Configured = 1,
    Playing = 2,
    StopRequested = 3,
    Finished = 4,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Unconfigured,
            1 => PipelineState::Configured,
            2 => PipelineState::Playing,
            3 => PipelineState::StopRequested,
            _ => PipelineState::Finished,
        }
    }

    pub fn can_transition_to(&self, target: PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (Unconfigured, Configured) => true,
            (Configured, Playing) => true,
            (Configured, StopRequested) | (Playing, StopRequested) => true,
            (Finished, _) => false,
            (_, Finished) => true,
            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Unconfigured => "Unconfigured",
            PipelineState::Configured => "Configured",
            PipelineState::Playing => "Playing",
            PipelineState::StopRequested => "StopRequested",
            PipelineState::Finished => "Finished",
        }
    }

    pub fn is_finished(&self) -> bool {
        *self == PipelineState::Finished
    }
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(PipelineState::Unconfigured as u8))
    }

    fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `target` if allowed from the current state; returns the previous
    /// state, or the current one on refusal.
    fn advance(&self, target: PipelineState) -> Result<PipelineState, PipelineState> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                PipelineState::from_u8(current)
                    .can_transition_to(target)
                    .then_some(target as u8)
            })
            .map(PipelineState::from_u8)
            .map_err(PipelineState::from_u8)
    }
}

/// Why a pipeline instance reached `Finished`.
#[derive(Debug, Clone)]
pub enum FinishReason {
    EndOfStream,
    /// Acknowledged stop request.
    Stopped,
    EngineError(EngineRuntimeError),
    ConfigurationFailed(String),
    StartFailed(String),
    /// The engine never acknowledged a stop request and was torn down.
    StopTimedOut,
}

impl FinishReason {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FinishReason::EngineError(_)
                | FinishReason::ConfigurationFailed(_)
                | FinishReason::StartFailed(_)
                | FinishReason::StopTimedOut
        )
    }
}

impl Display for FinishReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::EndOfStream => write!(f, "end of stream"),
            FinishReason::Stopped => write!(f, "stopped"),
            FinishReason::EngineError(e) => match &e.details {
                Some(details) => write!(f, "engine error: {} ({})", e.message, details),
                None => write!(f, "engine error: {}", e.message),
            },
            FinishReason::ConfigurationFailed(e) => write!(f, "configuration failed: {}", e),
            FinishReason::StartFailed(e) => write!(f, "start failed: {}", e),
            FinishReason::StopTimedOut => write!(f, "stop timed out"),
        }
    }
}

/// Completion notification, sent from the decode thread to the supervisor.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub slot: SlotIndex,
    pub instance: InstanceId,
    pub reason: FinishReason,
}

/// Everything a pipeline needs from its owner besides the engine.
#[derive(Clone)]
pub struct PipelineContext {
    pub queue_capacity: usize,
    pub hint_threshold: usize,
    pub hint: FrameHint,
    pub events: UnboundedSender<PipelineEvent>,
}

struct PipelineShared {
    slot: SlotIndex,
    instance: InstanceId,
    state: StateCell,
    format: OnceLock<StreamFormat>,
    incoming: BoundedHandoffQueue<FrameBuffer>,
    outgoing: BoundedHandoffQueue<FrameBuffer>,
    hint: FrameHint,
    hint_threshold: usize,
    events: UnboundedSender<PipelineEvent>,
    stats: PipelineStats,
}

impl PipelineShared {
    fn discover_format(&self, buffer: &FrameBuffer) -> StreamFormat {
        log::info!(
            "pipeline {}/{}: received first frame ({})",
            self.slot,
            self.instance,
            buffer.caps()
        );
        let (format, err) = StreamFormat::discover(buffer.caps());
        if let Some(e) = err {
            log::warn!(
                "pipeline {}/{}: format discovery failed, frames will not be uploaded: {}",
                self.slot,
                self.instance,
                e
            );
        }
        format
    }

    fn drain_queues(&self) -> u64 {
        let mut released = 0;
        for buffer in self.incoming.drain().into_iter().chain(self.outgoing.drain()) {
            buffer.release();
            released += 1;
        }
        self.stats.record_released(released);
        released
    }

    /// Enters `Finished` and frees every queued buffer. Returns false when the
    /// pipeline had already finished.
    fn enter_finished(&self, reason: &FinishReason) -> bool {
        let previous = match self.state.advance(PipelineState::Finished) {
            Ok(previous) => previous,
            Err(_) => return false,
        };
        let released = self.drain_queues();
        log::info!(
            "pipeline {}/{}: {} -> Finished ({}), released {} queued buffers, {}",
            self.slot,
            self.instance,
            previous,
            reason,
            released,
            self.stats.snapshot()
        );
        true
    }

    fn finish(&self, reason: FinishReason) {
        if !self.enter_finished(&reason) {
            log::debug!(
                "pipeline {}/{}: ignoring completion ({}), already finished",
                self.slot,
                self.instance,
                reason
            );
            return;
        }
        let event = PipelineEvent {
            slot: self.slot,
            instance: self.instance,
            reason,
        };
        if self.events.send(event).is_err() {
            log::debug!(
                "pipeline {}/{}: supervisor gone, completion dropped",
                self.slot,
                self.instance
            );
        }
    }
}

/// Engine-facing side of a pipeline; all of its methods run on decode threads.
#[derive(Clone)]
pub struct FrameSink {
    shared: Arc<PipelineShared>,
}

impl FrameSink {
    /// Hands a freshly decoded buffer to the pipeline.
    ///
    /// Discovers the stream format from the first buffer, queues the buffer
    /// for the render thread (evicting the oldest one when full), and frees at
    /// most one buffer the render thread is done with.
    pub fn on_frame_available(&self, buffer: FrameBuffer) {
        let shared = &self.shared;
        shared.stats.record_received();

        if shared.state.get().is_finished() {
            buffer.release();
            shared.stats.record_released(1);
            return;
        }

        shared.format.get_or_init(|| shared.discover_format(&buffer));
        log::trace!(
            "pipeline {}/{}: queued buffer {}",
            shared.slot,
            shared.instance,
            buffer.id()
        );

        if let Some(evicted) = shared.incoming.put(buffer) {
            log::debug!(
                "pipeline {}/{}: incoming queue full, dropping buffer {}",
                shared.slot,
                shared.instance,
                evicted.id()
            );
            evicted.release();
            shared.stats.record_evicted();
            shared.stats.record_released(1);
        }

        // finished while we were queueing
        if shared.state.get().is_finished() {
            shared.drain_queues();
            return;
        }

        if shared.incoming.len() > shared.hint_threshold {
            shared.hint.notify(shared.slot);
        }

        if let Some(consumed) = shared.outgoing.get() {
            consumed.release();
            shared.stats.record_released(1);
        }
    }

    /// End of stream, or acknowledgement of a stop request.
    pub fn on_finished(&self) {
        let reason = if self.shared.state.get() == PipelineState::StopRequested {
            FinishReason::Stopped
        } else {
            FinishReason::EndOfStream
        };
        self.shared.finish(reason);
    }

    pub fn on_error(&self, error: EngineRuntimeError) {
        let reason = FinishReason::EngineError(error);
        log::error!(
            "pipeline {}/{}: {}",
            self.shared.slot,
            self.shared.instance,
            reason
        );
        self.shared.finish(reason);
    }

    pub fn slot(&self) -> SlotIndex {
        self.shared.slot
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.state.get() >= PipelineState::StopRequested
    }
}

/// One decoding session for a slot, owned by the render thread.
pub struct StreamPipeline {
    shared: Arc<PipelineShared>,
    locator: String,
    engine: Box<dyn DecodeEngine>,
    stop_requested_at: Option<Instant>,
}

impl StreamPipeline {
    pub fn new(
        slot: SlotIndex,
        instance: InstanceId,
        locator: &str,
        engine: Box<dyn DecodeEngine>,
        ctx: &PipelineContext,
    ) -> Self {
        let shared = Arc::new(PipelineShared {
            slot,
            instance,
            state: StateCell::new(),
            format: OnceLock::new(),
            incoming: BoundedHandoffQueue::new(ctx.queue_capacity),
            outgoing: BoundedHandoffQueue::new(ctx.queue_capacity),
            hint: ctx.hint.clone(),
            hint_threshold: ctx.hint_threshold,
            events: ctx.events.clone(),
            stats: PipelineStats::new(),
        });
        Self {
            shared,
            locator: locator.to_string(),
            engine,
            stop_requested_at: None,
        }
    }

    pub fn configure(&mut self) -> Result<(), ConfigurationError> {
        if self.state() != PipelineState::Unconfigured {
            return Err(ConfigurationError::AlreadyConfigured);
        }
        let sink = FrameSink {
            shared: Arc::clone(&self.shared),
        };
        self.engine.configure(&self.locator, sink)?;
        // a fast engine may already have failed from its worker
        let _ = self.shared.state.advance(PipelineState::Configured);
        log::info!(
            "pipeline {}/{}: configured for {:?}",
            self.slot(),
            self.instance(),
            self.locator
        );
        Ok(())
    }

    /// Starts playback. On failure the pipeline is already `Finished` and its
    /// completion event has been queued.
    pub fn start(&mut self) -> Result<(), StartError> {
        // Playing is entered before the engine runs so that an early end of
        // stream from the worker cannot be overtaken by this transition.
        if let Err(current) = self.shared.state.advance(PipelineState::Playing) {
            return Err(StartError::InvalidState(current.description()));
        }
        if let Err(e) = self.engine.start() {
            log::error!(
                "pipeline {}/{}: failed to start: {}",
                self.slot(),
                self.instance(),
                e
            );
            self.shared.finish(FinishReason::StartFailed(e.to_string()));
            return Err(e);
        }
        log::info!("pipeline {}/{}: playing", self.slot(), self.instance());
        Ok(())
    }

    /// Requests an asynchronous stop. Idempotent; `Finished` follows only when
    /// the engine acknowledges.
    pub fn stop(&mut self) {
        match self.shared.state.advance(PipelineState::StopRequested) {
            Ok(previous) => {
                log::info!(
                    "pipeline {}/{}: {} -> StopRequested",
                    self.slot(),
                    self.instance(),
                    previous
                );
                self.stop_requested_at = Some(Instant::now());
                self.engine.stop();
            }
            Err(current) => {
                log::debug!(
                    "pipeline {}/{}: stop ignored in state {}",
                    self.slot(),
                    self.instance(),
                    current
                );
            }
        }
    }

    /// Tears the session down without waiting for the engine. No completion
    /// event is emitted; the caller handles the outcome.
    pub fn terminate(&mut self) -> bool {
        self.engine.terminate();
        self.shared.enter_finished(&FinishReason::StopTimedOut)
    }

    /// Pops the next decoded frame, if any, together with the stream format.
    pub fn try_take_next_frame(&self) -> Option<(FrameBuffer, StreamFormat)> {
        let buffer = self.shared.incoming.get()?;
        match self.shared.format.get() {
            Some(format) => {
                self.shared.stats.record_taken();
                Some((buffer, *format))
            }
            None => {
                // cannot happen: the format is fixed before a buffer is queued
                log::error!(
                    "pipeline {}/{}: frame without stream format, releasing",
                    self.slot(),
                    self.instance()
                );
                buffer.release();
                self.shared.stats.record_released(1);
                None
            }
        }
    }

    /// Gives a consumed frame back for the decode thread to release.
    pub fn return_frame(&self, buffer: FrameBuffer) {
        if self.state().is_finished() {
            buffer.release();
            self.shared.stats.record_released(1);
            return;
        }
        if let Some(evicted) = self.shared.outgoing.put(buffer) {
            evicted.release();
            self.shared.stats.record_released(1);
        }
    }

    pub fn slot(&self) -> SlotIndex {
        self.shared.slot
    }

    pub fn instance(&self) -> InstanceId {
        self.shared.instance
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state.get()
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.shared.format.get().copied()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn stop_requested_at(&self) -> Option<Instant> {
        self.stop_requested_at
    }

    pub fn incoming_len(&self) -> usize {
        self.shared.incoming.len()
    }

    pub fn outgoing_len(&self) -> usize {
        self.shared.outgoing.len()
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        if !self.state().is_finished() {
            self.engine.terminate();
            let _ = self.shared.state.advance(PipelineState::Finished);
        }
        // buffers the render thread returned after the final drain
        self.shared.drain_queues();
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
