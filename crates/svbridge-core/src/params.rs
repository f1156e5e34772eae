//! Allow-listed engine parameter setters.
//!
//! Control messages may arrive over an IPC surface that crosses a process
//! boundary, so setters are never looked up by arbitrary name. Every
//! permitted setter is a variant of [`EngineParam`]; the wrapper library's
//! export for each variant is bound once at load time and anything that
//! does not parse into a variant is rejected with [`ParamError::Disallowed`].

use std::fmt;
use std::str::FromStr;

use crate::error::ParamError;

/// A parameter setter the engine is allowed to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineParam {
    Rate,
    Pitch,
    F0Range,
    F0Perturb,
    VowelFactor,
    AvBias,
    AfBias,
    AhBias,
    Personality,
    F0Style,
    VoicingMode,
    Gender,
    GlottalSource,
    SpeakingMode,
    Voice,
    PauseFactor,
    TrimSilence,
    MaxLeadMs,
}

impl EngineParam {
    /// Every permitted setter, in export order.
    pub const ALL: [Self; 18] = [
        Self::Rate,
        Self::Pitch,
        Self::F0Range,
        Self::F0Perturb,
        Self::VowelFactor,
        Self::AvBias,
        Self::AfBias,
        Self::AhBias,
        Self::Personality,
        Self::F0Style,
        Self::VoicingMode,
        Self::Gender,
        Self::GlottalSource,
        Self::SpeakingMode,
        Self::Voice,
        Self::PauseFactor,
        Self::TrimSilence,
        Self::MaxLeadMs,
    ];

    /// The exported symbol name in the wrapper library.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Rate => "sv_setRate",
            Self::Pitch => "sv_setPitch",
            Self::F0Range => "sv_setF0Range",
            Self::F0Perturb => "sv_setF0Perturb",
            Self::VowelFactor => "sv_setVowelFactor",
            Self::AvBias => "sv_setAVBias",
            Self::AfBias => "sv_setAFBias",
            Self::AhBias => "sv_setAHBias",
            Self::Personality => "sv_setPersonality",
            Self::F0Style => "sv_setF0Style",
            Self::VoicingMode => "sv_setVoicingMode",
            Self::Gender => "sv_setGender",
            Self::GlottalSource => "sv_setGlottalSource",
            Self::SpeakingMode => "sv_setSpeakingMode",
            Self::Voice => "sv_setVoice",
            Self::PauseFactor => "sv_setPauseFactor",
            Self::TrimSilence => "sv_setTrimSilence",
            Self::MaxLeadMs => "sv_setMaxLeadMs",
        }
    }

    /// Short user-facing name (used by the CLI's `--param NAME=VALUE`).
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Rate => "rate",
            Self::Pitch => "pitch",
            Self::F0Range => "inflection",
            Self::F0Perturb => "perturb",
            Self::VowelFactor => "vfactor",
            Self::AvBias => "avbias",
            Self::AfBias => "afbias",
            Self::AhBias => "ahbias",
            Self::Personality => "variant",
            Self::F0Style => "intstyle",
            Self::VoicingMode => "vmode",
            Self::Gender => "gender",
            Self::GlottalSource => "glot",
            Self::SpeakingMode => "smode",
            Self::Voice => "voice",
            Self::PauseFactor => "pausefactor",
            Self::TrimSilence => "trimsilence",
            Self::MaxLeadMs => "maxleadms",
        }
    }

    /// Look up a setter by its exported symbol name.
    pub fn from_symbol(symbol: &str) -> Result<Self, ParamError> {
        Self::ALL
            .into_iter()
            .find(|p| p.symbol() == symbol)
            .ok_or_else(|| ParamError::Disallowed(symbol.to_string()))
    }

    /// Engine-side range for settings expressed to users as a percentage.
    ///
    /// Enumerated settings (voice, personality, styles, modes) and the
    /// wrapper-only tuning knobs return `None`; their values pass through.
    pub const fn percent_range(self) -> Option<(i32, i32)> {
        match self {
            Self::Rate => Some((20, 500)),
            Self::Pitch => Some((10, 2000)),
            Self::F0Range | Self::F0Perturb | Self::VowelFactor => Some((0, 500)),
            Self::AvBias | Self::AfBias | Self::AhBias => Some((-50, 50)),
            _ => None,
        }
    }
}

impl fmt::Display for EngineParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for EngineParam {
    type Err = ParamError;

    /// Accepts either the exported symbol or the short name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_symbol(s).or_else(|_| {
            Self::ALL
                .into_iter()
                .find(|p| p.short_name().eq_ignore_ascii_case(s))
                .ok_or_else(|| ParamError::Disallowed(s.to_string()))
        })
    }
}

/// Map a 0–100 percentage onto `[min, max]`, rounding to the nearest step.
pub fn percent_to_param(percent: u8, min: i32, max: i32) -> i32 {
    let ratio = f64::from(percent.min(100)) / 100.0;
    (f64::from(max - min).mul_add(ratio, f64::from(min))).round() as i32
}

/// Engine values derived from the user's pause-factor percentage.
///
/// The engine's pause factor runs the other way round (100 = no pauses),
/// and silence trimming is switched on for the low-pause half of the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseSettings {
    pub engine_pause_factor: i32,
    pub trim_silence: bool,
}

pub fn pause_factor_settings(percent: u8) -> PauseSettings {
    let percent = percent.min(100);
    PauseSettings {
        engine_pause_factor: 100 - i32::from(percent),
        trim_silence: percent < 50,
    }
}
