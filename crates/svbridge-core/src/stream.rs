//! The engine read loop.
//!
//! Whichever side owns the native handle pumps `read` until the engine
//! reports `Done` or `Error`, turning every poll into [`AudioChunk`]s for a
//! [`ChunkSink`]. The sink is the local audio queue in-process and an
//! `audio` event writer inside the helper process.
//!
//! Every utterance ends with exactly one final chunk, whether it finished
//! normally, the engine reported an error, the native call itself failed,
//! or it was cancelled.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::chunk::AudioChunk;
use crate::engine::{EngineHandle, ItemKind};
use crate::text::split_utterance;

// ── Backoff ────────────────────────────────────────────────────────

/// Delay between `read` polls that returned nothing.
///
/// `factor` of 1.0 gives a fixed interval; larger factors grow the delay
/// geometrically up to `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    pub const fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
            factor: 1.0,
            current: interval,
        }
    }

    pub fn exponential(initial: Duration, max: Duration, factor: f64) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            factor: factor.max(1.0),
            current: initial,
        }
    }

    /// The delay to sleep now; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        // A product too large for `Duration` saturates at `max`.
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.factor)
            .map_or(self.max, |next| next.min(self.max));
        delay
    }

    /// Return to the initial delay, after a poll that produced something.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(1))
    }
}

// ── Sink ───────────────────────────────────────────────────────────

/// Destination of the chunks produced by the read loop.
///
/// Delivery failures are the sink's to log; the read loop carries on so
/// the engine is always drained to its terminal item.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn push(&self, chunk: AudioChunk);
}

// ── Read loop ──────────────────────────────────────────────────────

/// How one segment's read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    Done,
    Failed,
    Cancelled,
}

/// How a whole utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Tuning for [`speak_utterance`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub max_utterance_chars: usize,
    pub read_buffer_bytes: usize,
    pub backoff: Backoff,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_utterance_chars: 1200,
            read_buffer_bytes: 65_536,
            backoff: Backoff::default(),
        }
    }
}

/// Poll the engine until it finishes the current request.
///
/// Audio is pushed tagged with `sequence`. The terminal item is reported
/// through the return value only; [`speak_utterance`] owns the final chunk.
pub async fn pump_audio(
    engine: &EngineHandle,
    sink: &dyn ChunkSink,
    sequence: u64,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
    buf: &mut [u8],
) -> PumpOutcome {
    backoff.reset();
    loop {
        if cancel.is_cancelled() {
            tracing::debug!(sequence, "Read loop cancelled");
            return PumpOutcome::Cancelled;
        }

        let item = match engine.read(buf) {
            Ok(item) => item,
            Err(e) => {
                tracing::error!(sequence, error = %e, "Engine read failed");
                return PumpOutcome::Failed;
            }
        };

        match item.kind {
            ItemKind::Audio if item.bytes_read > 0 => {
                backoff.reset();
                let payload = buf[..item.bytes_read].to_vec();
                sink.push(AudioChunk::audio(payload, sequence)).await;
                // The engine call never suspends; let a pending stop run.
                tokio::task::yield_now().await;
            }
            ItemKind::Done => return PumpOutcome::Done,
            ItemKind::Error => {
                tracing::error!(sequence, code = item.value, "Engine reported an error");
                return PumpOutcome::Failed;
            }
            ItemKind::None | ItemKind::Audio => {
                tokio::select! {
                    () = tokio::time::sleep(backoff.next_delay()) => {}
                    () = cancel.cancelled() => {}
                }
            }
        }
    }
}

/// Speak `text` as one logical utterance.
///
/// Long text is split into segments that are spoken back to back under the
/// same `sequence`. A refused `startSpeak` or a failed segment ends the
/// utterance early. Whatever the outcome, exactly one final chunk is pushed
/// last; after a cancel it carries a sequence the consumer already treats
/// as stale.
pub async fn speak_utterance(
    engine: &EngineHandle,
    text: &str,
    sequence: u64,
    sink: &dyn ChunkSink,
    cancel: &CancellationToken,
    options: &StreamOptions,
) -> UtteranceOutcome {
    let outcome = speak_segments(engine, text, sequence, sink, cancel, options).await;
    sink.push(AudioChunk::end_of_utterance(sequence)).await;
    outcome
}

async fn speak_segments(
    engine: &EngineHandle,
    text: &str,
    sequence: u64,
    sink: &dyn ChunkSink,
    cancel: &CancellationToken,
    options: &StreamOptions,
) -> UtteranceOutcome {
    let segments = split_utterance(text, options.max_utterance_chars);
    if segments.is_empty() {
        return UtteranceOutcome::Completed;
    }

    let mut backoff = options.backoff.clone();
    let mut buf = vec![0u8; options.read_buffer_bytes.max(1)];
    tracing::debug!(sequence, segments = segments.len(), "Speaking utterance");

    for (i, segment) in segments.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return UtteranceOutcome::Cancelled;
        }
        if let Err(e) = engine.start_speak(segment) {
            tracing::error!(sequence, segment = i, error = %e, "startSpeak failed");
            return UtteranceOutcome::Failed;
        }
        match pump_audio(engine, sink, sequence, cancel, &mut backoff, &mut buf).await {
            PumpOutcome::Done => {}
            PumpOutcome::Failed => return UtteranceOutcome::Failed,
            PumpOutcome::Cancelled => return UtteranceOutcome::Cancelled,
        }
    }

    UtteranceOutcome::Completed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_never_grows() {
        let mut backoff = Backoff::fixed(Duration::from_millis(1));
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Duration::from_millis(1));
        }
    }

    #[test]
    fn exponential_backoff_is_capped_and_resets() {
        let mut backoff =
            Backoff::exponential(Duration::from_millis(1), Duration::from_millis(8), 2.0);
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
    }

    #[test]
    fn factor_below_one_is_treated_as_fixed() {
        let mut backoff =
            Backoff::exponential(Duration::from_millis(4), Duration::from_millis(2), 0.5);
        assert_eq!(backoff.next_delay(), Duration::from_millis(4));
        assert_eq!(backoff.next_delay(), Duration::from_millis(4));
    }

    #[test]
    fn huge_factor_saturates_at_max() {
        let mut backoff =
            Backoff::exponential(Duration::from_millis(1), Duration::from_secs(1), 1e300);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));

        let mut infinite =
            Backoff::exponential(Duration::from_millis(1), Duration::from_millis(5), f64::INFINITY);
        infinite.next_delay();
        assert_eq!(infinite.next_delay(), Duration::from_millis(5));
    }
}
