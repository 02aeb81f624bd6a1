use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use super::{FinishReason, InstanceId, PipelineContext, PipelineEvent, PipelineState, SlotIndex, StreamPipeline};
use crate::error::{ConfigurationError, StartError};
use crate::format::ColourFormat;
use crate::frame::{BufferLedger, Caps};
use crate::hint::FrameHint;
use crate::test_support::{FAIL_START, ManualControl, ManualEngine};

const I420_LEN: usize = 8 * 4 * 3 / 2;

fn context(capacity: usize, hint_threshold: usize) -> (PipelineContext, UnboundedReceiver<PipelineEvent>) {
    let (events, rx) = unbounded_channel();
    let ctx = PipelineContext {
        queue_capacity: capacity,
        hint_threshold,
        hint: FrameHint::new(1),
        events,
    };
    (ctx, rx)
}

fn playing(locator: &str, ctx: &PipelineContext) -> (StreamPipeline, Arc<ManualControl>) {
    let control = ManualControl::for_locator(locator);
    let mut pipeline = StreamPipeline::new(
        SlotIndex::new(0),
        InstanceId(1),
        locator,
        ManualEngine::new(Arc::clone(&control)),
        ctx,
    );
    pipeline.configure().unwrap();
    pipeline.start().unwrap();
    (pipeline, control)
}

fn i420() -> Arc<Caps> {
    Arc::new(Caps::yuv(*b"I420", 8, 4))
}

#[test]
fn test_transition_table() {
    use PipelineState::*;
    assert!(Unconfigured.can_transition_to(Configured));
    assert!(Configured.can_transition_to(Playing));
    assert!(Playing.can_transition_to(StopRequested));
    assert!(Configured.can_transition_to(StopRequested));
    assert!(Playing.can_transition_to(Finished));
    assert!(Unconfigured.can_transition_to(Finished));

    assert!(!Playing.can_transition_to(Configured));
    assert!(!StopRequested.can_transition_to(Playing));
    assert!(!Finished.can_transition_to(Finished));
    assert!(!Finished.can_transition_to(Unconfigured));
    assert!(!Unconfigured.can_transition_to(Playing));
}

#[test]
fn test_lifecycle_with_acknowledged_stop() {
    let (ctx, mut rx) = context(4, 0);
    let control = ManualControl::for_locator("ok");
    let mut pipeline = StreamPipeline::new(
        SlotIndex::new(0),
        InstanceId(7),
        "ok",
        ManualEngine::new(Arc::clone(&control)),
        &ctx,
    );
    assert_eq!(pipeline.state(), PipelineState::Unconfigured);

    pipeline.configure().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Configured);
    pipeline.start().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Playing);

    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::StopRequested);
    assert!(pipeline.stop_requested_at().is_some());
    assert!(rx.try_recv().is_err());

    control.end_of_stream();
    assert_eq!(pipeline.state(), PipelineState::Finished);
    let event = rx.try_recv().unwrap();
    assert_eq!(event.instance, InstanceId(7));
    assert!(matches!(event.reason, FinishReason::Stopped));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_configure_twice_is_rejected() {
    let (ctx, _rx) = context(4, 0);
    let (mut pipeline, _control) = playing("ok", &ctx);
    assert!(matches!(
        pipeline.configure(),
        Err(ConfigurationError::AlreadyConfigured)
    ));
}

#[test]
fn test_start_requires_configured() {
    let (ctx, _rx) = context(4, 0);
    let control = ManualControl::for_locator("ok");
    let mut pipeline = StreamPipeline::new(
        SlotIndex::new(0),
        InstanceId(1),
        "ok",
        ManualEngine::new(control),
        &ctx,
    );
    assert!(matches!(pipeline.start(), Err(StartError::InvalidState(_))));
    assert_eq!(pipeline.state(), PipelineState::Unconfigured);
}

#[test]
fn test_start_failure_finishes_and_reports() {
    let (ctx, mut rx) = context(4, 0);
    let control = ManualControl::for_locator(FAIL_START);
    let mut pipeline = StreamPipeline::new(
        SlotIndex::new(0),
        InstanceId(1),
        FAIL_START,
        ManualEngine::new(control),
        &ctx,
    );
    pipeline.configure().unwrap();
    assert!(pipeline.start().is_err());
    assert_eq!(pipeline.state(), PipelineState::Finished);

    let event = rx.try_recv().unwrap();
    assert!(matches!(event.reason, FinishReason::StartFailed(_)));
    assert!(event.reason.is_failure());
}

#[test]
fn test_format_frozen_by_first_frame() {
    let (ctx, _rx) = context(4, 0);
    let (pipeline, control) = playing("ok", &ctx);
    let ledger = BufferLedger::new("format");
    assert!(pipeline.format().is_none());

    control.push(&ledger, &i420(), I420_LEN);
    control.push(&ledger, &Arc::new(Caps::yuv(*b"UYVY", 16, 16)), 16 * 16 * 2);

    let format = pipeline.format().unwrap();
    assert_eq!(format.colour_format, ColourFormat::Planar420);
    assert_eq!((format.width, format.height), (8, 4));

    let (_, first) = pipeline.try_take_next_frame().unwrap();
    let (second, format_of_second) = pipeline.try_take_next_frame().unwrap();
    assert_eq!(first, format);
    assert_eq!(format_of_second, format);
    assert_eq!(second.width(), 16);
}

#[test]
fn test_unrecognised_format_is_still_delivered() {
    let (ctx, _rx) = context(4, 0);
    let (pipeline, control) = playing("ok", &ctx);
    let ledger = BufferLedger::new("unknown");

    control.push(&ledger, &Arc::new(Caps::other("video/x-bayer", 8, 8)), 64);

    let (frame, format) = pipeline.try_take_next_frame().unwrap();
    assert_eq!(format.colour_format, ColourFormat::Unknown);
    assert!(!format.is_uploadable());
    assert_eq!(frame.len(), 64);
}

#[test]
fn test_overflow_releases_oldest() {
    let (ctx, _rx) = context(4, 0);
    let (pipeline, control) = playing("ok", &ctx);
    let ledger = BufferLedger::new("overflow");

    for _ in 0..6 {
        control.push(&ledger, &i420(), I420_LEN);
    }
    assert_eq!(pipeline.incoming_len(), 4);
    assert_eq!(ledger.released(), 2);
    assert_eq!(pipeline.stats().frames_evicted, 2);

    let ids: Vec<u64> = std::iter::from_fn(|| pipeline.try_take_next_frame())
        .map(|(frame, _)| frame.id().value())
        .collect();
    assert_eq!(ids.len(), 4);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(ledger.outstanding(), 0);
}

#[test]
fn test_returned_frame_released_on_next_delivery() {
    let (ctx, _rx) = context(4, 0);
    let (pipeline, control) = playing("ok", &ctx);
    let ledger = BufferLedger::new("return");

    control.push(&ledger, &i420(), I420_LEN);
    let (frame, _) = pipeline.try_take_next_frame().unwrap();
    let id = frame.id();
    pipeline.return_frame(frame);
    assert_eq!(pipeline.outgoing_len(), 1);
    assert!(ledger.is_outstanding(id));

    control.push(&ledger, &i420(), I420_LEN);
    assert_eq!(pipeline.outgoing_len(), 0);
    assert!(!ledger.is_outstanding(id));
    assert_eq!(ledger.outstanding(), 1);
}

#[test]
fn test_finish_releases_everything_queued() {
    let (ctx, mut rx) = context(4, 0);
    let (pipeline, control) = playing("ok", &ctx);
    let ledger = BufferLedger::new("eos");

    for _ in 0..3 {
        control.push(&ledger, &i420(), I420_LEN);
    }
    let (held, _) = pipeline.try_take_next_frame().unwrap();
    pipeline.return_frame(held);

    control.end_of_stream();
    assert_eq!(pipeline.state(), PipelineState::Finished);
    assert_eq!(ledger.outstanding(), 0);
    assert!(matches!(rx.try_recv().unwrap().reason, FinishReason::EndOfStream));

    // late frames from the worker are freed on arrival
    control.push(&ledger, &i420(), I420_LEN);
    assert_eq!(ledger.outstanding(), 0);
    assert!(pipeline.try_take_next_frame().is_none());

    // a second completion is ignored
    control.fail("late");
    assert!(rx.try_recv().is_err());
    assert_eq!(ledger.unknown_releases(), 0);
}

#[test]
fn test_return_after_finish_releases_directly() {
    let (ctx, _rx) = context(4, 0);
    let (pipeline, control) = playing("ok", &ctx);
    let ledger = BufferLedger::new("late-return");

    control.push(&ledger, &i420(), I420_LEN);
    let (frame, _) = pipeline.try_take_next_frame().unwrap();
    control.end_of_stream();
    assert_eq!(ledger.outstanding(), 1);

    pipeline.return_frame(frame);
    assert_eq!(ledger.outstanding(), 0);
    assert_eq!(pipeline.outgoing_len(), 0);
}

#[test]
fn test_engine_error_reports_failure() {
    let (ctx, mut rx) = context(4, 0);
    let (pipeline, control) = playing("ok", &ctx);

    control.fail("decoder exploded");
    assert_eq!(pipeline.state(), PipelineState::Finished);
    match rx.try_recv().unwrap().reason {
        FinishReason::EngineError(e) => assert_eq!(e.message, "decoder exploded"),
        other => panic!("unexpected reason {}", other),
    }
}

#[test]
fn test_stop_is_idempotent() {
    let (ctx, _rx) = context(4, 0);
    let (mut pipeline, control) = playing("ok", &ctx);

    pipeline.stop();
    let first = pipeline.stop_requested_at();
    pipeline.stop();
    assert_eq!(control.stops(), 1);
    assert_eq!(pipeline.stop_requested_at(), first);
    assert_eq!(pipeline.state(), PipelineState::StopRequested);
}

#[test]
fn test_terminate_without_acknowledgement() {
    let (ctx, mut rx) = context(4, 0);
    let (mut pipeline, control) = playing("ok", &ctx);
    let ledger = BufferLedger::new("terminate");
    control.push(&ledger, &i420(), I420_LEN);

    pipeline.stop();
    assert!(pipeline.terminate());
    assert_eq!(pipeline.state(), PipelineState::Finished);
    assert_eq!(control.terminates(), 1);
    assert_eq!(ledger.outstanding(), 0);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_hint_threshold() {
    let (ctx, _rx) = context(8, 2);
    let hint = ctx.hint.clone();
    let (_pipeline, control) = playing("ok", &ctx);
    let ledger = BufferLedger::new("hint");
    let slot = SlotIndex::new(0);

    control.push(&ledger, &i420(), I420_LEN);
    control.push(&ledger, &i420(), I420_LEN);
    assert!(!hint.is_pending(slot));

    control.push(&ledger, &i420(), I420_LEN);
    assert!(hint.take(slot));
    assert!(!hint.is_pending(slot));
}

#[test]
fn test_drop_terminates_running_engine() {
    let (ctx, _rx) = context(4, 0);
    let (pipeline, control) = playing("ok", &ctx);
    let ledger = BufferLedger::new("drop");
    control.push(&ledger, &i420(), I420_LEN);
    control.push(&ledger, &i420(), I420_LEN);

    drop(pipeline);
    assert_eq!(control.terminates(), 1);
    assert_eq!(ledger.outstanding(), 0);
}
