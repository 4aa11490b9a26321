//! Turns the glitchy frame stream of a depth camera recording into a
//! constant-rate frame sequence.
//!
//! Hardware delivery has four kinds of defects: missing depth+colour pairs,
//! repeated or non-advancing timestamps, dropped frames (timestamp gaps) and
//! an unreliable tail. Each event is fed through [`step`], a pure function of
//! the current [`ReconcilerState`] and [`Accumulator`]; [`reconcile_stream`]
//! drives it against a real [`FrameStream`] and flushes to a [`FrameSink`].

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::error::SyncError;

/// One unit delivered by the capture device.
#[derive(Debug, Clone)]
pub enum RawFrameEvent {
    Frame {
        /// Device frame counter. Usually increasing; may repeat or jump.
        frame_number: u64,
        /// Device clock, milliseconds.
        timestamp_ms: f64,
        image: RgbImage,
    },
    /// The device failed to deliver a synchronized depth+colour pair.
    MissingPair,
}

/// A live or replayed device stream.
pub trait FrameStream {
    /// Total recorded duration in milliseconds, if the device reports one.
    fn duration_ms(&self) -> Option<f64>;

    /// Next event, `Ok(None)` at the end of the stream, or
    /// [`SyncError::DeviceRead`] when the device faults.
    fn next_event(&mut self) -> Result<Option<RawFrameEvent>, SyncError>;
}

/// Consumer of corrected frames, e.g. a video encoder.
pub trait FrameSink {
    fn write_fragment(&mut self, frames: &[Rc<RgbImage>]) -> Result<(), SyncError>;
}

/// Collects corrected frames in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<Rc<RgbImage>>,
    /// Length of every fragment received, in order.
    pub fragment_sizes: Vec<usize>,
}

impl FrameSink for MemorySink {
    fn write_fragment(&mut self, frames: &[Rc<RgbImage>]) -> Result<(), SyncError> {
        self.fragment_sizes.push(frames.len());
        self.frames.extend(frames.iter().cloned());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Ideal inter-frame duration; 1000/30 ms at the fixed 30 fps capture rate.
    pub nominal_period_ms: f64,
    /// A gap between accepted timestamps above this counts as dropped frames.
    /// Default `2 * period - 10`, tuned empirically against capture jitter.
    pub gap_threshold_ms: f64,
    /// Stop once a normalized timestamp comes this close to the stream duration.
    pub tail_margin_ms: f64,
    /// Hand buffered frames to the sink every this many accepted frames.
    pub flush_interval: usize,
    /// Most repeats a single timestamp gap may add. Larger gaps (device clock
    /// jumps) are clamped so the buffer stays bounded between flushes.
    pub max_backfill: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        let period = 1000.0 / 30.0;
        Self {
            nominal_period_ms: period,
            gap_threshold_ms: 2.0 * period - 10.0,
            tail_margin_ms: period,
            flush_interval: 30 * 30,
            max_backfill: 30 * 30,
        }
    }
}

/// Why the reconciler reached DONE.
#[derive(Debug, Clone, PartialEq)]
pub enum DoneReason {
    /// A frame number went below the maximum seen: the recording looped.
    FrameNumberRegressed { max_seen: u64, got: u64 },
    /// The stream got within the tail margin of its duration.
    TailReached { timestamp_ms: f64 },
    DeviceError(String),
    StreamEnded,
    Interrupted,
    EncodingFailed(String),
}

impl DoneReason {
    /// Failure text for the log table, `None` for a clean finish.
    pub fn failure(&self) -> Option<String> {
        match self {
            DoneReason::DeviceError(msg) | DoneReason::EncodingFailed(msg) => Some(msg.clone()),
            DoneReason::Interrupted => Some("interrupted".to_string()),
            DoneReason::FrameNumberRegressed { .. }
            | DoneReason::TailReached { .. }
            | DoneReason::StreamEnded => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilerState {
    /// No valid frame seen yet.
    Init,
    Streaming,
    Done(DoneReason),
}

/// What a single [`step`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Missing pair before any valid frame.
    Placeholder,
    /// Missing pair filled with the last valid frame.
    RepeatedMissing,
    /// Non-advancing timestamp; last valid frame repeated, `prev_ts` untouched.
    RepeatedDuplicate { timestamp_ms: f64 },
    /// New frame appended after `backfilled` gap repeats; `clamped` more
    /// were owed but exceeded `max_backfill`.
    Accepted {
        timestamp_ms: f64,
        backfilled: usize,
        clamped: usize,
    },
    Finished(DoneReason),
    /// Event arrived after DONE.
    Ignored,
}

/// One output slot of the corrected sequence.
#[derive(Debug, Clone)]
pub enum FrameSlot {
    Captured(Rc<RgbImage>),
    Repeat(Rc<RgbImage>),
    /// Filler emitted before any valid frame existed.
    Placeholder,
}

impl FrameSlot {
    pub fn image(&self) -> Option<&Rc<RgbImage>> {
        match self {
            FrameSlot::Captured(img) | FrameSlot::Repeat(img) => Some(img),
            FrameSlot::Placeholder => None,
        }
    }
}

/// Everything the reconciler carries from one event to the next.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    slots: Vec<FrameSlot>,
    duration_ms: Option<f64>,
    t0: Option<f64>,
    prev_ts: Option<f64>,
    max_frame_number: u64,
    last_valid: Option<Rc<RgbImage>>,
    first_valid: Option<Rc<RgbImage>>,
    captured: usize,
    repeated: usize,
    placeholders: usize,
}

impl Accumulator {
    pub fn new(duration_ms: Option<f64>) -> Self {
        Self {
            duration_ms: duration_ms.filter(|d| d.is_finite() && *d > 0.0),
            ..Self::default()
        }
    }

    /// Slots buffered since the last drain.
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Last accepted normalized timestamp.
    pub fn prev_ts(&self) -> Option<f64> {
        self.prev_ts
    }

    pub fn captured(&self) -> usize {
        self.captured
    }

    /// Repeats of real frames, plus placeholders (which become repeats of the
    /// first valid frame when drained).
    pub fn repeated(&self) -> usize {
        self.repeated + self.placeholders
    }

    pub fn has_valid_frame(&self) -> bool {
        self.first_valid.is_some()
    }

    /// Last accepted normalized timestamp in seconds; 0 before any frame.
    pub fn effective_duration_secs(&self) -> f64 {
        self.prev_ts.unwrap_or(0.0) / 1000.0
    }

    fn flush_due(&self, config: &ReconcileConfig) -> bool {
        config.flush_interval > 0 && self.captured % config.flush_interval == 0
    }

    fn repeat_last(&mut self, times: usize) -> bool {
        let Some(last) = &self.last_valid else {
            return false;
        };
        for _ in 0..times {
            self.slots.push(FrameSlot::Repeat(last.clone()));
        }
        self.repeated += times;
        true
    }

    /// Take every buffered slot, resolving leading placeholders to the first
    /// valid frame.
    pub fn drain(&mut self) -> Result<Vec<Rc<RgbImage>>, SyncError> {
        if self.slots.is_empty() {
            return Ok(Vec::new());
        }
        let first = self.first_valid.clone().ok_or(SyncError::NoValidFrames)?;
        Ok(self
            .slots
            .drain(..)
            .map(|slot| match slot {
                FrameSlot::Captured(img) | FrameSlot::Repeat(img) => img,
                FrameSlot::Placeholder => first.clone(),
            })
            .collect())
    }
}

/// Advance the state machine by one event. Pure: no I/O, no clocks.
pub fn step(
    state: ReconcilerState,
    mut acc: Accumulator,
    event: RawFrameEvent,
    config: &ReconcileConfig,
) -> (ReconcilerState, Accumulator, Transition) {
    let state = match state {
        ReconcilerState::Done(reason) => {
            return (ReconcilerState::Done(reason), acc, Transition::Ignored)
        }
        live => live,
    };

    let (frame_number, timestamp_ms, image) = match event {
        RawFrameEvent::MissingPair => {
            if acc.repeat_last(1) {
                return (state, acc, Transition::RepeatedMissing);
            }
            acc.slots.push(FrameSlot::Placeholder);
            acc.placeholders += 1;
            return (state, acc, Transition::Placeholder);
        }
        RawFrameEvent::Frame {
            frame_number,
            timestamp_ms,
            image,
        } => (frame_number, timestamp_ms, image),
    };

    if frame_number < acc.max_frame_number {
        let reason = DoneReason::FrameNumberRegressed {
            max_seen: acc.max_frame_number,
            got: frame_number,
        };
        return finish(acc, reason);
    }
    acc.max_frame_number = frame_number;

    let t0 = *acc.t0.get_or_insert(timestamp_ms);
    let ts = timestamp_ms - t0;

    if let Some(duration) = acc.duration_ms {
        if ts + config.tail_margin_ms > duration {
            return finish(acc, DoneReason::TailReached { timestamp_ms: ts });
        }
    }

    let mut backfilled = 0;
    let mut clamped = 0;
    if let Some(prev) = acc.prev_ts {
        if ts <= prev {
            acc.repeat_last(1);
            return (
                ReconcilerState::Streaming,
                acc,
                Transition::RepeatedDuplicate { timestamp_ms: ts },
            );
        }
        let gap = ts - prev;
        if gap > config.gap_threshold_ms {
            let owed = ((gap / config.nominal_period_ms).round() as usize).saturating_sub(1);
            backfilled = owed.min(config.max_backfill);
            clamped = owed - backfilled;
            acc.repeat_last(backfilled);
        }
    }

    let image = Rc::new(image);
    acc.slots.push(FrameSlot::Captured(image.clone()));
    acc.first_valid.get_or_insert_with(|| image.clone());
    acc.last_valid = Some(image);
    acc.prev_ts = Some(ts);
    acc.captured += 1;

    (
        ReconcilerState::Streaming,
        acc,
        Transition::Accepted {
            timestamp_ms: ts,
            backfilled,
            clamped,
        },
    )
}

fn finish(acc: Accumulator, reason: DoneReason) -> (ReconcilerState, Accumulator, Transition) {
    (
        ReconcilerState::Done(reason.clone()),
        acc,
        Transition::Finished(reason),
    )
}

/// Outcome of reconciling one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub reason: DoneReason,
    /// Last accepted normalized timestamp, seconds.
    pub effective_duration_secs: f64,
    pub failure: Option<String>,
    /// Frames handed to the sink.
    pub corrected_frame_count: usize,
    pub captured_frame_count: usize,
    pub repeated_frame_count: usize,
    pub fragment_count: usize,
}

/// Feed `stream` through the state machine until DONE and hand the corrected
/// frames to `sink`, every `flush_interval` accepted frames and once at the end.
///
/// Device faults and `interrupt` end the stream like any other DONE
/// transition: buffered frames are still flushed. Returns
/// [`SyncError::NoValidFrames`] if the stream never delivered a usable frame.
pub fn reconcile_stream(
    stream: &mut impl FrameStream,
    sink: &mut impl FrameSink,
    config: &ReconcileConfig,
    interrupt: &AtomicBool,
) -> Result<ReconcileReport, SyncError> {
    let mut state = ReconcilerState::Init;
    let mut acc = Accumulator::new(stream.duration_ms());
    let mut written = 0usize;
    let mut fragment_count = 0usize;

    info!(duration_ms = ?stream.duration_ms(), "reconciling frame stream");

    let mut reason = loop {
        if interrupt.load(Ordering::Relaxed) {
            warn!("interrupt requested, finalizing");
            break DoneReason::Interrupted;
        }

        let event = match stream.next_event() {
            Ok(Some(event)) => event,
            Ok(None) => break DoneReason::StreamEnded,
            Err(e) => {
                warn!(error = %e, prev_ts = ?acc.prev_ts(), "device read failed, finalizing at last good timestamp");
                break DoneReason::DeviceError(e.to_string());
            }
        };

        let (next_state, next_acc, transition) = step(state, acc, event, config);
        state = next_state;
        acc = next_acc;

        match transition {
            Transition::Finished(reason) => break reason,
            Transition::Accepted {
                timestamp_ms,
                backfilled,
                clamped,
            } => {
                if backfilled > 0 {
                    warn!(timestamp_ms, backfilled, "timestamp gap, backfilled dropped frames");
                }
                if clamped > 0 {
                    warn!(
                        timestamp_ms,
                        clamped,
                        max_backfill = config.max_backfill,
                        "timestamp gap exceeds backfill limit, clamped"
                    );
                }
                if acc.flush_due(config) {
                    let frames = acc.drain()?;
                    if let Err(e) = sink.write_fragment(&frames) {
                        break DoneReason::EncodingFailed(e.to_string());
                    }
                    written += frames.len();
                    fragment_count += 1;
                    info!(written, captured = acc.captured(), "fragment flushed");
                }
            }
            Transition::RepeatedDuplicate { timestamp_ms } => {
                debug!(timestamp_ms, "duplicate or out-of-order frame repeated");
            }
            Transition::RepeatedMissing | Transition::Placeholder => {
                debug!(?transition, "missing frame pair filled");
            }
            Transition::Ignored => {}
        }
    };

    if !acc.has_valid_frame() {
        warn!(?reason, "stream ended without a valid frame");
        return Err(SyncError::NoValidFrames);
    }

    if !matches!(reason, DoneReason::EncodingFailed(_)) {
        let frames = acc.drain()?;
        if !frames.is_empty() {
            match sink.write_fragment(&frames) {
                Ok(()) => {
                    written += frames.len();
                    fragment_count += 1;
                }
                Err(e) => reason = DoneReason::EncodingFailed(e.to_string()),
            }
        }
    }

    let report = ReconcileReport {
        failure: reason.failure(),
        reason,
        effective_duration_secs: acc.effective_duration_secs(),
        corrected_frame_count: written,
        captured_frame_count: acc.captured(),
        repeated_frame_count: acc.repeated(),
        fragment_count,
    };

    info!(
        reason = ?report.reason,
        duration_secs = report.effective_duration_secs,
        corrected = report.corrected_frame_count,
        captured = report.captured_frame_count,
        repeated = report.repeated_frame_count,
        "reconciler finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use image::Rgb;
    use tracing_test::traced_test;

    use super::*;

    const PERIOD: f64 = 1000.0 / 30.0;

    fn img(v: u8) -> RgbImage {
        RgbImage::from_pixel(2, 2, Rgb([v, v, v]))
    }

    fn frame(n: u64) -> RawFrameEvent {
        frame_at(n, 5000.0 + n as f64 * PERIOD)
    }

    fn frame_at(n: u64, timestamp_ms: f64) -> RawFrameEvent {
        RawFrameEvent::Frame {
            frame_number: n,
            timestamp_ms,
            image: img(n as u8 + 1),
        }
    }

    struct ScriptedStream {
        duration_ms: Option<f64>,
        events: VecDeque<Result<RawFrameEvent, SyncError>>,
    }

    impl ScriptedStream {
        fn new(events: Vec<RawFrameEvent>) -> Self {
            Self {
                duration_ms: None,
                events: events.into_iter().map(Ok).collect(),
            }
        }
    }

    impl FrameStream for ScriptedStream {
        fn duration_ms(&self) -> Option<f64> {
            self.duration_ms
        }

        fn next_event(&mut self) -> Result<Option<RawFrameEvent>, SyncError> {
            self.events.pop_front().transpose()
        }
    }

    struct FailingSink;

    impl FrameSink for FailingSink {
        fn write_fragment(&mut self, _frames: &[Rc<RgbImage>]) -> Result<(), SyncError> {
            Err(SyncError::Encoding("disk full".to_string()))
        }
    }

    fn run(stream: &mut ScriptedStream, config: &ReconcileConfig) -> (ReconcileReport, MemorySink) {
        let mut sink = MemorySink::default();
        let report = reconcile_stream(stream, &mut sink, config, &AtomicBool::new(false)).unwrap();
        (report, sink)
    }

    #[test]
    fn clean_stream_passes_through() {
        let mut stream = ScriptedStream::new((0..10).map(frame).collect());
        let (report, sink) = run(&mut stream, &ReconcileConfig::default());

        assert_eq!(report.reason, DoneReason::StreamEnded);
        assert_eq!(report.corrected_frame_count, 10);
        assert_eq!(report.repeated_frame_count, 0);
        assert!(report.failure.is_none());
        assert!((report.effective_duration_secs - 9.0 * PERIOD / 1000.0).abs() < 1e-9);
        assert_eq!(*sink.frames[9], img(10));
    }

    #[test]
    fn missing_pair_is_filled_with_one_repeat() {
        let mut events: Vec<_> = (0..5).map(frame).collect();
        events.push(RawFrameEvent::MissingPair);
        events.extend((5..10).map(frame));
        let input_len = events.len();

        let (report, sink) = run(&mut ScriptedStream::new(events), &ReconcileConfig::default());

        assert_eq!(sink.frames.len(), input_len);
        assert_eq!(report.repeated_frame_count, 1);
        assert_eq!(*sink.frames[5], *sink.frames[4]);
        assert_eq!(*sink.frames[6], img(6));
    }

    #[test]
    fn leading_placeholders_become_first_valid_frame() {
        let mut events = vec![RawFrameEvent::MissingPair; 3];
        events.extend((0..4).map(frame));

        let (report, sink) = run(&mut ScriptedStream::new(events), &ReconcileConfig::default());

        assert_eq!(sink.frames.len(), 7);
        for slot in &sink.frames[..3] {
            assert_eq!(**slot, img(1));
        }
        assert_eq!(report.repeated_frame_count, 3);
        assert_eq!(report.captured_frame_count, 4);
    }

    #[test]
    #[traced_test]
    fn frame_number_regression_stops_without_accepting() {
        let mut events: Vec<_> = (0..6).map(frame).collect();
        events.push(frame_at(2, 9000.0));
        events.push(frame(7));

        let (report, sink) = run(&mut ScriptedStream::new(events), &ReconcileConfig::default());

        assert_eq!(report.captured_frame_count, 6);
        assert_eq!(sink.frames.len(), 6);
        assert_eq!(
            report.reason,
            DoneReason::FrameNumberRegressed { max_seen: 5, got: 2 }
        );
        assert!(logs_contain("FrameNumberRegressed"));
    }

    #[test]
    fn repeated_frame_number_is_not_a_regression() {
        let events = vec![frame(0), frame(1), frame_at(1, 5000.0 + 2.0 * PERIOD), frame(3)];
        let (report, _) = run(&mut ScriptedStream::new(events), &ReconcileConfig::default());
        assert_eq!(report.reason, DoneReason::StreamEnded);
        assert_eq!(report.captured_frame_count, 4);
    }

    #[test]
    fn duplicate_timestamp_repeats_and_keeps_prev_ts() {
        let events = vec![
            frame(0),
            frame(1),
            frame_at(2, 5000.0 + PERIOD),
            frame_at(3, 5000.0 + 2.0 * PERIOD),
        ];
        let (report, sink) = run(&mut ScriptedStream::new(events), &ReconcileConfig::default());

        assert_eq!(sink.frames.len(), 4);
        assert_eq!(*sink.frames[2], img(2));
        assert_eq!(*sink.frames[3], img(4));
        assert_eq!(report.captured_frame_count, 3);
        assert_eq!(report.repeated_frame_count, 1);
    }

    #[test]
    fn timestamp_gap_is_backfilled_before_new_frame() {
        let events = vec![frame(0), frame(1), frame_at(4, 5000.0 + 4.0 * PERIOD)];
        let (report, sink) = run(&mut ScriptedStream::new(events), &ReconcileConfig::default());

        // slots 2 and 3 were dropped by the device
        assert_eq!(sink.frames.len(), 5);
        assert_eq!(*sink.frames[2], img(2));
        assert_eq!(*sink.frames[3], img(2));
        assert_eq!(*sink.frames[4], img(5));
        assert_eq!(report.repeated_frame_count, 2);
    }

    #[test]
    #[traced_test]
    fn clock_jump_backfill_is_clamped() {
        let config = ReconcileConfig {
            max_backfill: 5,
            ..ReconcileConfig::default()
        };
        let events = vec![frame(0), frame(1), frame_at(2, 5000.0 + 1000.0 * PERIOD)];
        let (report, sink) = run(&mut ScriptedStream::new(events), &config);

        assert_eq!(report.repeated_frame_count, 5);
        assert_eq!(sink.frames.len(), 8);
        assert_eq!(*sink.frames[7], img(3));
        assert!(logs_contain("clamped"));
    }

    #[test]
    fn out_of_order_timestamp_repeats_and_keeps_prev_ts() {
        let config = ReconcileConfig::default();
        let mut state = ReconcilerState::Init;
        let mut acc = Accumulator::new(None);
        for event in [frame(0), frame(1), frame(2)] {
            (state, acc, _) = step(state, acc, event, &config);
        }
        let prev = acc.prev_ts();

        let (_, acc, transition) = step(state, acc, frame_at(3, 5000.0 + 0.5 * PERIOD), &config);
        assert!(matches!(transition, Transition::RepeatedDuplicate { .. }));
        assert_eq!(acc.prev_ts(), prev);
        assert_eq!(acc.slots().len(), 4);
        assert_eq!(acc.repeated(), 1);
        assert_eq!(acc.captured(), 3);
        assert_eq!(**acc.slots()[3].image().unwrap(), img(3));
    }

    #[test]
    fn jitter_below_threshold_is_not_a_gap() {
        let events = vec![frame(0), frame_at(1, 5000.0 + 50.0), frame_at(2, 5000.0 + 70.0)];
        let (report, _) = run(&mut ScriptedStream::new(events), &ReconcileConfig::default());
        assert_eq!(report.repeated_frame_count, 0);
        assert_eq!(report.corrected_frame_count, 3);
    }

    #[test]
    fn tail_of_stream_is_dropped() {
        let mut stream = ScriptedStream::new((0..40).map(frame).collect());
        stream.duration_ms = Some(990.0);
        let (report, _) = run(&mut stream, &ReconcileConfig::default());

        assert!(matches!(report.reason, DoneReason::TailReached { .. }));
        assert_eq!(report.captured_frame_count, 29);
        assert!(report.failure.is_none());
    }

    #[test]
    fn device_error_finalizes_at_last_good_timestamp() {
        let mut stream = ScriptedStream::new((0..4).map(frame).collect());
        stream.events.push_back(Err(SyncError::DeviceRead("usb reset".to_string())));
        stream.events.push_back(Ok(frame(4)));

        let (report, sink) = run(&mut stream, &ReconcileConfig::default());

        assert!(matches!(report.reason, DoneReason::DeviceError(_)));
        assert!(report.failure.unwrap().contains("usb reset"));
        assert_eq!(sink.frames.len(), 4);
        assert!((report.effective_duration_secs - 3.0 * PERIOD / 1000.0).abs() < 1e-9);
    }

    #[test]
    fn only_missing_pairs_is_no_valid_frames() {
        let mut stream = ScriptedStream::new(vec![RawFrameEvent::MissingPair; 5]);
        let mut sink = MemorySink::default();
        let err = reconcile_stream(
            &mut stream,
            &mut sink,
            &ReconcileConfig::default(),
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::NoValidFrames));
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn periodic_flush_splits_fragments() {
        let config = ReconcileConfig {
            flush_interval: 4,
            ..ReconcileConfig::default()
        };
        let (report, sink) = run(&mut ScriptedStream::new((0..10).map(frame).collect()), &config);
        assert_eq!(sink.fragment_sizes, vec![4, 4, 2]);
        assert_eq!(report.fragment_count, 3);
        assert_eq!(report.corrected_frame_count, 10);
    }

    #[test]
    fn first_flush_resolves_placeholders() {
        let config = ReconcileConfig {
            flush_interval: 2,
            ..ReconcileConfig::default()
        };
        let mut events = vec![RawFrameEvent::MissingPair; 2];
        events.extend((0..3).map(frame));
        let (_, sink) = run(&mut ScriptedStream::new(events), &config);

        assert_eq!(sink.fragment_sizes, vec![4, 1]);
        assert_eq!(*sink.frames[0], img(1));
        assert_eq!(*sink.frames[1], img(1));
    }

    #[test]
    fn interrupt_flushes_what_was_reconciled() {
        struct Interrupting<'a> {
            inner: ScriptedStream,
            flag: &'a AtomicBool,
            after: usize,
        }

        impl FrameStream for Interrupting<'_> {
            fn duration_ms(&self) -> Option<f64> {
                None
            }

            fn next_event(&mut self) -> Result<Option<RawFrameEvent>, SyncError> {
                self.after = self.after.saturating_sub(1);
                if self.after == 0 {
                    self.flag.store(true, Ordering::Relaxed);
                }
                self.inner.next_event()
            }
        }

        let flag = AtomicBool::new(false);
        let mut stream = Interrupting {
            inner: ScriptedStream::new((0..10).map(frame).collect()),
            flag: &flag,
            after: 3,
        };
        let mut sink = MemorySink::default();
        let report =
            reconcile_stream(&mut stream, &mut sink, &ReconcileConfig::default(), &flag).unwrap();

        assert_eq!(report.reason, DoneReason::Interrupted);
        assert_eq!(report.failure.as_deref(), Some("interrupted"));
        assert_eq!(sink.frames.len(), 3);
    }

    #[test]
    fn sink_failure_is_reported() {
        let mut stream = ScriptedStream::new((0..5).map(frame).collect());
        let report = reconcile_stream(
            &mut stream,
            &mut FailingSink,
            &ReconcileConfig::default(),
            &AtomicBool::new(false),
        )
        .unwrap();

        assert!(matches!(report.reason, DoneReason::EncodingFailed(_)));
        assert!(report.failure.unwrap().contains("disk full"));
        assert_eq!(report.corrected_frame_count, 0);
    }

    #[test]
    fn step_ignores_events_after_done() {
        let config = ReconcileConfig::default();
        let done = ReconcilerState::Done(DoneReason::StreamEnded);
        let (state, acc, transition) = step(done.clone(), Accumulator::new(None), frame(0), &config);
        assert_eq!(state, done);
        assert_eq!(transition, Transition::Ignored);
        assert!(acc.slots().is_empty());
    }

    #[test]
    fn step_moves_from_init_to_streaming_on_first_frame() {
        let config = ReconcileConfig::default();
        let (state, acc, transition) = step(
            ReconcilerState::Init,
            Accumulator::new(None),
            RawFrameEvent::MissingPair,
            &config,
        );
        assert_eq!(state, ReconcilerState::Init);
        assert_eq!(transition, Transition::Placeholder);

        let (state, acc, transition) = step(state, acc, frame_at(7, 123.0), &config);
        assert_eq!(state, ReconcilerState::Streaming);
        assert_eq!(
            transition,
            Transition::Accepted {
                timestamp_ms: 0.0,
                backfilled: 0,
                clamped: 0,
            }
        );
        assert_eq!(acc.prev_ts(), Some(0.0));
        assert_eq!(acc.slots().len(), 2);
        assert!(matches!(acc.slots()[0], FrameSlot::Placeholder));
    }
}
