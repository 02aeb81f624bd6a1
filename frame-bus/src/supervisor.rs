use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError, unbounded_channel};

use crate::engine::EngineFactory;
use crate::error::SupervisorError;
use crate::format::{FormatLayout, StreamFormat};
use crate::frame::{BufferId, FrameBuffer};
use crate::hint::FrameHint;
use crate::pipeline::{
    FinishReason, InstanceId, PipelineContext, PipelineEvent, PipelineState, SlotIndex,
    StreamPipeline,
};
use crate::queue::DEFAULT_CAPACITY;
use crate::stats::StatsSnapshot;

/// What to do when a slot's pipeline keeps failing.
///
/// A pipeline that fails, or reaches end of stream without delivering a
/// single frame, counts as a consecutive failure. Each one doubles the delay
/// before the next attempt; after `max_consecutive_failures` the slot is left
/// empty until its source is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    // None = retry forever
    pub max_consecutive_failures: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: Some(5),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RestartPolicy {
    /// Restart immediately and forever.
    pub fn unbounded() -> Self {
        Self {
            max_consecutive_failures: None,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exp = consecutive_failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exp)
            .min(self.max_backoff)
    }

    pub fn gives_up_after(&self, consecutive_failures: u32) -> bool {
        self.max_consecutive_failures
            .is_some_and(|max| consecutive_failures >= max)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub queue_capacity: usize,
    /// The new-frame hint fires once the incoming queue holds more than this.
    pub hint_threshold: usize,
    /// How long a pipeline may take to acknowledge a stop before it is torn down.
    pub stop_timeout: Duration,
    pub restart: RestartPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_CAPACITY,
            hint_threshold: 0,
            stop_timeout: Duration::from_secs(5),
            restart: RestartPolicy::default(),
        }
    }
}

/// A frame that just became the slot's current frame.
pub struct NewFrame<'a> {
    pub slot: SlotIndex,
    pub instance: InstanceId,
    pub buffer: &'a FrameBuffer,
    pub format: StreamFormat,
}

impl NewFrame<'_> {
    pub fn layout(&self) -> Option<&'static FormatLayout> {
        self.format.layout()
    }

    /// Known layout and a payload large enough for it.
    pub fn is_uploadable(&self) -> bool {
        self.format.is_uploadable()
            && self
                .layout()
                .is_some_and(|l| self.buffer.len() >= l.frame_bytes(self.format.width, self.format.height))
    }
}

/// Render-thread side that turns frames into textures.
pub trait FrameConsumer {
    /// Called with each new uploadable frame, at most once per slot per tick.
    fn upload(&mut self, frame: &NewFrame<'_>);

    /// Called instead of `upload` for frames that must not be uploaded.
    fn skip(&mut self, frame: &NewFrame<'_>) {
        log::trace!(
            "slot {}: skipping frame {} ({})",
            frame.slot,
            frame.buffer.id(),
            frame.format
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorMode {
    Running,
    ShuttingDown,
    /// Every slot is empty; the process may exit.
    Complete,
}

struct HeldFrame {
    buffer: FrameBuffer,
    format: StreamFormat,
    instance: InstanceId,
}

struct Slot {
    index: SlotIndex,
    locator: String,
    pipeline: Option<StreamPipeline>,
    held: Option<HeldFrame>,
    restart_at: Option<Instant>,
    consecutive_failures: u32,
    restarts: u64,
    gave_up: bool,
}

/// Owns one pipeline per slot, restarts finished pipelines and coordinates shutdown.
///
/// All methods run on the render thread. Decode threads only reach the
/// supervisor through the completion channel, which `tick` drains.
pub struct PipelineSupervisor {
    config: SupervisorConfig,
    factory: Arc<dyn EngineFactory>,
    slots: Vec<Slot>,
    events_tx: UnboundedSender<PipelineEvent>,
    events_rx: UnboundedReceiver<PipelineEvent>,
    hint: FrameHint,
    mode: SupervisorMode,
    next_instance: u64,
}

impl PipelineSupervisor {
    pub fn new<I, S>(locators: I, factory: Arc<dyn EngineFactory>, config: SupervisorConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots: Vec<Slot> = locators
            .into_iter()
            .enumerate()
            .map(|(i, locator)| Slot {
                index: SlotIndex::new(i),
                locator: locator.into(),
                pipeline: None,
                held: None,
                restart_at: None,
                consecutive_failures: 0,
                restarts: 0,
                gave_up: false,
            })
            .collect();
        let (events_tx, events_rx) = unbounded_channel();
        let hint = FrameHint::new(slots.len());

        Self {
            config,
            factory,
            slots,
            events_tx,
            events_rx,
            hint,
            mode: SupervisorMode::Running,
            next_instance: 1,
        }
    }

    /// Configures and starts a pipeline for every slot.
    pub fn start(&mut self) {
        for idx in 0..self.slots.len() {
            if self.slots[idx].pipeline.is_none() {
                self.launch(idx);
            }
        }
    }

    fn pipeline_context(&self) -> PipelineContext {
        PipelineContext {
            queue_capacity: self.config.queue_capacity,
            hint_threshold: self.config.hint_threshold,
            hint: self.hint.clone(),
            events: self.events_tx.clone(),
        }
    }

    fn launch(&mut self, idx: usize) {
        let ctx = self.pipeline_context();
        let instance = InstanceId(self.next_instance);
        self.next_instance += 1;

        let slot = &mut self.slots[idx];
        slot.restart_at = None;
        let engine = self.factory.create(slot.index, &slot.locator);
        let mut pipeline = StreamPipeline::new(slot.index, instance, &slot.locator, engine, &ctx);

        match pipeline.configure() {
            // a start failure already queued its completion
            Ok(()) => {
                let _ = pipeline.start();
            }
            Err(e) => {
                log::error!(
                    "slot {}: cannot configure {:?}: {}",
                    slot.index,
                    slot.locator,
                    e
                );
                let event = PipelineEvent {
                    slot: slot.index,
                    instance,
                    reason: FinishReason::ConfigurationFailed(e.to_string()),
                };
                let _ = self.events_tx.send(event);
            }
        }
        slot.pipeline = Some(pipeline);
    }

    /// One render frame: handles completions, restarts and timeouts, then
    /// offers each slot's next frame to `consumer`. Returns the number of new frames.
    pub fn tick(&mut self, consumer: &mut dyn FrameConsumer) -> usize {
        self.process_events();
        self.enforce_stop_timeouts();
        self.run_due_restarts();

        let mut new_frames = 0;
        for idx in 0..self.slots.len() {
            let slot = SlotIndex::new(idx);
            self.hint.take(slot);
            if let Some(frame) = self.try_take_next_frame(slot) {
                new_frames += 1;
                if frame.is_uploadable() {
                    consumer.upload(&frame);
                } else {
                    consumer.skip(&frame);
                }
            }
        }
        new_frames
    }

    /// Pops at most one new frame for `slot`. The frame it replaces goes back
    /// to its pipeline for release; with nothing new the current frame stays.
    pub fn try_take_next_frame(&mut self, slot: SlotIndex) -> Option<NewFrame<'_>> {
        let entry = self.slots.get_mut(slot.index())?;
        let pipeline = entry.pipeline.as_ref()?;
        let (buffer, format) = pipeline.try_take_next_frame()?;
        let instance = pipeline.instance();

        if let Some(previous) = entry.held.take() {
            if previous.instance == instance {
                pipeline.return_frame(previous.buffer);
            } else {
                previous.buffer.release();
            }
        }

        let held = entry.held.insert(HeldFrame {
            buffer,
            format,
            instance,
        });
        Some(NewFrame {
            slot,
            instance: held.instance,
            buffer: &held.buffer,
            format: held.format,
        })
    }

    /// The frame the consumer currently renders for `slot`.
    pub fn current_frame(&self, slot: SlotIndex) -> Option<NewFrame<'_>> {
        let held = self.slots.get(slot.index())?.held.as_ref()?;
        Some(NewFrame {
            slot,
            instance: held.instance,
            buffer: &held.buffer,
            format: held.format,
        })
    }

    /// Handles the completions queued so far. Completions caused by this
    /// call (e.g. a restart that fails to configure) wait for the next one.
    pub fn process_events(&mut self) -> usize {
        let mut events = Vec::new();
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        let handled = events.len();
        for event in events {
            self.on_pipeline_finished(event);
        }
        handled
    }

    fn on_pipeline_finished(&mut self, event: PipelineEvent) {
        let Some(entry) = self.slots.get_mut(event.slot.index()) else {
            log::warn!("completion for unknown slot {}", event.slot);
            return;
        };
        let current = entry.pipeline.as_ref().map(|p| p.instance());
        if current != Some(event.instance) {
            log::debug!(
                "slot {}: ignoring stale completion of pipeline {} ({})",
                event.slot,
                event.instance,
                event.reason
            );
            return;
        }
        if let Some(pipeline) = entry.pipeline.take() {
            self.retire(event.slot.index(), pipeline, event.reason);
        }
    }

    fn retire(&mut self, idx: usize, pipeline: StreamPipeline, reason: FinishReason) {
        let stats = pipeline.stats();
        let entry = &mut self.slots[idx];
        if let Some(held) = entry.held.take() {
            held.buffer.release();
        }
        log::info!(
            "slot {}: pipeline {} finished ({}), {}",
            entry.index,
            pipeline.instance(),
            reason,
            stats
        );
        // joins the engine's worker
        drop(pipeline);

        match self.mode {
            SupervisorMode::Running => self.schedule_restart(idx, &reason, stats.frames_received),
            SupervisorMode::ShuttingDown | SupervisorMode::Complete => {
                log::info!("slot {}: empty", idx);
                self.check_shutdown_complete();
            }
        }
    }

    fn schedule_restart(&mut self, idx: usize, reason: &FinishReason, delivered: u64) {
        let entry = &mut self.slots[idx];
        // an instance that played counts as a success whatever ended it
        let failed = delivered == 0
            && (reason.is_failure() || matches!(reason, FinishReason::EndOfStream));
        if failed {
            entry.consecutive_failures += 1;
        } else {
            entry.consecutive_failures = 0;
        }

        if self.config.restart.gives_up_after(entry.consecutive_failures) {
            log::error!(
                "slot {}: giving up on {:?} after {} consecutive failures",
                entry.index,
                entry.locator,
                entry.consecutive_failures
            );
            entry.gave_up = true;
            return;
        }

        entry.restarts += 1;
        let delay = self.config.restart.backoff(entry.consecutive_failures);
        if delay.is_zero() {
            self.launch(idx);
        } else {
            log::warn!(
                "slot {}: restarting {:?} in {:?} (failure {})",
                entry.index,
                entry.locator,
                delay,
                entry.consecutive_failures
            );
            entry.restart_at = Some(Instant::now() + delay);
        }
    }

    fn run_due_restarts(&mut self) {
        if self.mode != SupervisorMode::Running {
            return;
        }
        let now = Instant::now();
        for idx in 0..self.slots.len() {
            let due = self.slots[idx].restart_at.is_some_and(|at| at <= now);
            if due && self.slots[idx].pipeline.is_none() {
                self.launch(idx);
            }
        }
    }

    fn enforce_stop_timeouts(&mut self) {
        let now = Instant::now();
        let timeout = self.config.stop_timeout;
        for idx in 0..self.slots.len() {
            let timed_out = self.slots[idx].pipeline.as_ref().is_some_and(|p| {
                p.state() == PipelineState::StopRequested
                    && p.stop_requested_at()
                        .is_some_and(|at| now.duration_since(at) >= timeout)
            });
            if !timed_out {
                continue;
            }
            if let Some(mut pipeline) = self.slots[idx].pipeline.take() {
                log::warn!(
                    "slot {}: pipeline {} did not acknowledge stop within {:?}, terminating",
                    idx,
                    pipeline.instance(),
                    timeout
                );
                pipeline.terminate();
                self.retire(idx, pipeline, FinishReason::StopTimedOut);
            }
        }
    }

    /// Stops every pipeline and stops restarting them. Returns immediately;
    /// shutdown completes once every pipeline has reported back.
    pub fn request_shutdown(&mut self) {
        if self.mode != SupervisorMode::Running {
            return;
        }
        log::info!("shutdown requested, stopping {} slots", self.slots.len());
        self.mode = SupervisorMode::ShuttingDown;
        for entry in &mut self.slots {
            entry.restart_at = None;
            if let Some(pipeline) = entry.pipeline.as_mut() {
                pipeline.stop();
            }
        }
        self.check_shutdown_complete();
    }

    fn check_shutdown_complete(&mut self) {
        if self.mode == SupervisorMode::ShuttingDown
            && self.slots.iter().all(|s| s.pipeline.is_none())
        {
            log::info!("all pipelines finished, safe to terminate");
            self.mode = SupervisorMode::Complete;
        }
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.mode == SupervisorMode::Complete
    }

    /// Points `slot` at a new source. The running pipeline is stopped and the
    /// regular restart path brings up a fresh one on `locator`.
    pub fn replace_source(&mut self, slot: SlotIndex, locator: &str) -> Result<(), SupervisorError> {
        if self.mode != SupervisorMode::Running {
            return Err(SupervisorError::ShuttingDown);
        }
        let entry = self
            .slots
            .get_mut(slot.index())
            .ok_or(SupervisorError::UnknownSlot(slot))?;
        log::info!("slot {}: source {:?} -> {:?}", slot, entry.locator, locator);
        entry.locator = locator.to_string();
        entry.consecutive_failures = 0;
        entry.gave_up = false;

        match entry.pipeline.as_mut() {
            Some(pipeline) => pipeline.stop(),
            None => self.launch(slot.index()),
        }
        Ok(())
    }

    pub fn mode(&self) -> SupervisorMode {
        self.mode
    }

    pub fn hint(&self) -> FrameHint {
        self.hint.clone()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn locator(&self, slot: SlotIndex) -> Option<&str> {
        self.slots.get(slot.index()).map(|s| s.locator.as_str())
    }

    pub fn slot_state(&self, slot: SlotIndex) -> Option<PipelineState> {
        self.pipeline(slot).map(|p| p.state())
    }

    pub fn slot_instance(&self, slot: SlotIndex) -> Option<InstanceId> {
        self.pipeline(slot).map(|p| p.instance())
    }

    pub fn slot_format(&self, slot: SlotIndex) -> Option<StreamFormat> {
        self.pipeline(slot).and_then(|p| p.format())
    }

    pub fn slot_stats(&self, slot: SlotIndex) -> Option<StatsSnapshot> {
        self.pipeline(slot).map(|p| p.stats())
    }

    pub fn slot_restarts(&self, slot: SlotIndex) -> u64 {
        self.slots.get(slot.index()).map_or(0, |s| s.restarts)
    }

    pub fn has_given_up(&self, slot: SlotIndex) -> bool {
        self.slots.get(slot.index()).is_some_and(|s| s.gave_up)
    }

    pub fn is_restart_pending(&self, slot: SlotIndex) -> bool {
        self.slots
            .get(slot.index())
            .is_some_and(|s| s.restart_at.is_some())
    }

    /// Id of the buffer the consumer currently holds for `slot`.
    pub fn held_buffer(&self, slot: SlotIndex) -> Option<BufferId> {
        self.slots
            .get(slot.index())
            .and_then(|s| s.held.as_ref())
            .map(|h| h.buffer.id())
    }

    fn pipeline(&self, slot: SlotIndex) -> Option<&StreamPipeline> {
        self.slots.get(slot.index())?.pipeline.as_ref()
    }
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod supervisor_test;
