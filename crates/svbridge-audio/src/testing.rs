//! Test doubles for the audio pipeline.
//!
//! Enabled for downstream crates through the `test-utils` feature.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::AudioError;
use crate::output::{MarkerCallback, OutputDevice};

/// A gated `feed` gives up after this long so a broken test cannot hang.
const GATE_SAFETY_TIMEOUT: Duration = Duration::from_secs(5);

/// One call observed by [`RecordingOutput`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Feed(Vec<u8>),
    Marker,
    Stop,
    Pause(bool),
    Idle,
    Close,
}

#[derive(Default)]
struct RecorderState {
    events: Vec<DeviceEvent>,
    gated: bool,
    blocked: bool,
    fail_feeds: bool,
    /// The device epoch: bumped by every `stop`.
    stops: u64,
    interrupted: usize,
    latched: bool,
    discarded: usize,
    buffered: bool,
    unplayed: usize,
}

/// Output device that records every call.
///
/// With the feed gate enabled, each `feed` blocks until `stop` is called or
/// the gate is opened. A feed released by `stop` counts as interrupted and
/// is not recorded as rendered.
///
/// A latched device holds each `feed` until [`RecordingOutput::release_latch`],
/// even across a `stop`, which models a write that was already past its
/// liveness check when the stop landed. A buffered device keeps rendered
/// buffers unplayed until [`RecordingOutput::play_out`].
#[derive(Default)]
pub struct RecordingOutput {
    state: Mutex<RecorderState>,
    changed: Condvar,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose `feed` blocks until released.
    pub fn gated() -> Self {
        let output = Self::default();
        output.state().gated = true;
        output
    }

    /// A device whose `feed` waits for [`RecordingOutput::release_latch`].
    pub fn latched() -> Self {
        let output = Self::default();
        output.state().latched = true;
        output
    }

    /// A device whose rendered buffers stay queued until played out.
    pub fn buffered() -> Self {
        let output = Self::default();
        output.state().buffered = true;
        output
    }

    fn state(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: DeviceEvent) {
        self.state().events.push(event);
        self.changed.notify_all();
    }

    /// Let blocked and future feeds through.
    pub fn open_gate(&self) {
        self.state().gated = false;
        self.changed.notify_all();
    }

    /// Let latched feeds continue.
    pub fn release_latch(&self) {
        self.state().latched = false;
        self.changed.notify_all();
    }

    /// Finish playing every queued buffer.
    pub fn play_out(&self) {
        self.state().unplayed = 0;
        self.changed.notify_all();
    }

    /// Buffers rendered but not yet played.
    pub fn unplayed(&self) -> usize {
        self.state().unplayed
    }

    /// Writes dropped because a `stop` had moved the device past their epoch.
    pub fn discarded(&self) -> usize {
        self.state().discarded
    }

    /// Make every later `feed` fail.
    pub fn fail_feeds(&self, fail: bool) {
        self.state().fail_feeds = fail;
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state().events.clone()
    }

    /// Every payload rendered so far, concatenated.
    pub fn rendered(&self) -> Vec<u8> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Feed(pcm) => Some(pcm.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn feed_count(&self) -> usize {
        self.count(|e| matches!(e, DeviceEvent::Feed(_)))
    }

    pub fn idle_count(&self) -> usize {
        self.count(|e| *e == DeviceEvent::Idle)
    }

    pub fn stop_count(&self) -> usize {
        self.count(|e| *e == DeviceEvent::Stop)
    }

    /// Feeds that were released by `stop` instead of rendering.
    pub fn interrupted(&self) -> usize {
        self.state().interrupted
    }

    pub fn is_feed_blocked(&self) -> bool {
        self.state().blocked
    }

    fn count(&self, pred: impl Fn(&DeviceEvent) -> bool) -> usize {
        self.state().events.iter().filter(|e| pred(e)).count()
    }

    /// Wait until `pred` holds for the recorded state. Returns whether it did.
    pub fn wait_until(&self, timeout: Duration, pred: impl Fn(&[DeviceEvent]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            if pred(&state.events) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wait until a `feed` is parked on the gate.
    pub fn wait_for_blocked_feed(&self, timeout: Duration) -> bool {
        let state = self.state();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| !s.blocked)
            .unwrap_or_else(PoisonError::into_inner);
        state.blocked
    }
}

impl OutputDevice for RecordingOutput {
    fn epoch(&self) -> u64 {
        self.state().stops
    }

    fn feed(&self, pcm: &[u8], epoch: u64) -> Result<(), AudioError> {
        let mut state = self.state();
        if state.fail_feeds {
            return Err(AudioError::Closed);
        }
        if state.latched {
            state.blocked = true;
            self.changed.notify_all();
            let (mut released, _) = self
                .changed
                .wait_timeout_while(state, GATE_SAFETY_TIMEOUT, |s| s.latched)
                .unwrap_or_else(PoisonError::into_inner);
            released.blocked = false;
            state = released;
        }
        if state.gated {
            let stops = state.stops;
            state.blocked = true;
            self.changed.notify_all();
            let (mut released, timeout) = self
                .changed
                .wait_timeout_while(state, GATE_SAFETY_TIMEOUT, |s| {
                    s.gated && s.stops == stops
                })
                .unwrap_or_else(PoisonError::into_inner);
            released.blocked = false;
            if timeout.timed_out() || released.stops != stops {
                released.interrupted += 1;
                drop(released);
                self.changed.notify_all();
                return Ok(());
            }
            state = released;
        }
        if state.stops != epoch {
            state.discarded += 1;
        } else {
            state.events.push(DeviceEvent::Feed(pcm.to_vec()));
            if state.buffered {
                state.unplayed += 1;
            }
        }
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    fn feed_marker(&self, on_done: MarkerCallback) -> Result<(), AudioError> {
        self.record(DeviceEvent::Marker);
        on_done();
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state();
        state.stops += 1;
        state.unplayed = 0;
        state.events.push(DeviceEvent::Stop);
        drop(state);
        self.changed.notify_all();
    }

    fn pause(&self, paused: bool) {
        self.record(DeviceEvent::Pause(paused));
    }

    fn idle(&self) {
        self.record(DeviceEvent::Idle);
    }

    fn wait_until_played(&self, epoch: u64) {
        let state = self.state();
        let _ = self
            .changed
            .wait_timeout_while(state, GATE_SAFETY_TIMEOUT, |s| {
                s.unplayed > 0 && s.stops == epoch
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn close(&self) {
        self.record(DeviceEvent::Close);
    }
}
