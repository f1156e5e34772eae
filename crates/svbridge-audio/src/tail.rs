//! Tail-hold smoothing.
//!
//! The consumer may keep the last few milliseconds of each utterance's audio
//! back from the device until it knows whether more audio follows. How much
//! is a tuning decision, so it lives behind [`TailHoldPolicy`].

use svbridge_core::AudioFormat;

pub trait TailHoldPolicy: Send + Sync {
    /// Bytes of output-format audio to hold back. Must be frame aligned.
    fn hold_bytes(&self, format: &AudioFormat) -> usize;
}

/// No smoothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTailHold;

impl TailHoldPolicy for NoTailHold {
    fn hold_bytes(&self, _format: &AudioFormat) -> usize {
        0
    }
}

/// Hold `round(pause_percent × 1.6)` ms, capped at 200 ms.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearTailHold {
    pause_percent: u8,
}

impl LinearTailHold {
    const MS_PER_PERCENT: f64 = 1.6;
    const MAX_MS: u64 = 200;

    pub const fn new(pause_percent: u8) -> Self {
        Self { pause_percent }
    }

    pub fn hold_ms(&self) -> u64 {
        let ms = (f64::from(self.pause_percent) * Self::MS_PER_PERCENT).round();
        // Non-negative and small; the cast cannot truncate.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ms = ms as u64;
        ms.min(Self::MAX_MS)
    }
}

impl TailHoldPolicy for LinearTailHold {
    fn hold_bytes(&self, format: &AudioFormat) -> usize {
        let frame = format.frame_bytes();
        let bytes = format.bytes_per_second() as u64 * self.hold_ms() / 1000;
        let bytes = usize::try_from(bytes).unwrap_or(usize::MAX);
        bytes - bytes % frame
    }
}
