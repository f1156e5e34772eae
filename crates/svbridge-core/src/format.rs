//! Audio format and engine capability types.

use serde::{Deserialize, Serialize};

/// PCM format produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Format assumed when the engine cannot report one.
    pub const FALLBACK: Self = Self {
        sample_rate: 22_050,
        channels: 1,
        bits_per_sample: 16,
    };

    /// Bytes per interleaved frame (one sample for every channel).
    pub const fn frame_bytes(&self) -> usize {
        let bytes = (self.channels as usize) * (self.bits_per_sample as usize / 8);
        if bytes == 0 { 1 } else { bytes }
    }

    /// Bytes of audio per second of playback.
    pub const fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.frame_bytes()
    }

    /// Whether the payload is unsigned 8-bit and must be widened for output.
    pub const fn needs_widening(&self) -> bool {
        self.bits_per_sample == 8
    }

    /// The format the output device is opened with.
    ///
    /// Unsigned 8-bit engines are rendered as signed 16-bit because several
    /// output backends cannot play 8-bit PCM.
    pub const fn output_format(&self) -> Self {
        if self.needs_widening() {
            Self {
                bits_per_sample: 16,
                ..*self
            }
        } else {
            *self
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::FALLBACK
    }
}

/// What the caller learns from `initialize`.
///
/// Optional exports are probed once, when the engine is loaded, so callers
/// can adapt without re-probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(flatten)]
    pub format: AudioFormat,
    pub has_pause_factor: bool,
    pub has_trim_silence: bool,
}
