//! Core types for the svbridge speech bridge.
//!
//! This crate owns everything that does not depend on which side of the
//! process boundary it runs on: the engine binding and its handle manager,
//! the read loop that turns engine polls into audio chunks, parameter and
//! format types, text splitting and configuration.

pub mod chunk;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod params;
pub mod stream;
pub mod text;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use chunk::AudioChunk;
pub use config::{
    BackoffConfig, Bitness, BridgeConfig, BridgeMode, InstallationReport, check_installation,
};
pub use engine::{
    EngineConfig, EngineHandle, EngineLease, EngineLoader, EngineManager, ItemKind, NativeLoader,
    ReadItem, SynthEngine,
};
pub use error::{ConfigError, EngineError, ParamError};
pub use format::{AudioFormat, Capabilities};
pub use params::{EngineParam, PauseSettings, pause_factor_settings, percent_to_param};
pub use stream::{
    Backoff, ChunkSink, PumpOutcome, StreamOptions, UtteranceOutcome, pump_audio, speak_utterance,
};
pub use text::split_utterance;
