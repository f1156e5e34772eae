//! Native engine binding: the opaque-handle lifecycle around the wrapper.
//!
//! The [`SynthEngine`] trait is the seam between the bridge and the vendored
//! synthesis library. [`native::NativeLoader`] binds the real 32-bit wrapper
//! through `libloading`; tests use the scripted engine from
//! [`crate::testing`].
//!
//! The engine is a foreign, non-reentrant resource: at most one call may be
//! in flight per handle. [`EngineHandle`] enforces that by wrapping the
//! engine in a mutex that is held only for the duration of a single call.
//! Because `read` is a non-blocking poll, a concurrent `stop` never waits
//! longer than one poll.

pub mod manager;
pub mod native;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::EngineError;
use crate::format::{AudioFormat, Capabilities};
use crate::params::EngineParam;

pub use manager::{EngineLease, EngineManager};
pub use native::NativeLoader;

// ── Read items ─────────────────────────────────────────────────────

/// Kind of item returned by one `read` poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Nothing ready yet; poll again later.
    None,
    /// Audio bytes were copied into the caller's buffer.
    Audio,
    /// The current `startSpeak` request has been fully synthesized.
    Done,
    /// The engine reported a failure; `value` holds its code.
    Error,
}

impl ItemKind {
    /// Decode the wrapper's integer item type.
    pub fn from_raw(raw: i32) -> Result<Self, EngineError> {
        match raw {
            0 => Ok(Self::None),
            1 => Ok(Self::Audio),
            2 => Ok(Self::Done),
            3 => Ok(Self::Error),
            other => Err(EngineError::UnknownItem(other)),
        }
    }
}

/// Result of one `read` poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadItem {
    pub kind: ItemKind,
    /// Optional integer payload (error code for [`ItemKind::Error`]).
    pub value: i32,
    /// Number of bytes written into the read buffer.
    pub bytes_read: usize,
}

impl ReadItem {
    pub const fn none() -> Self {
        Self {
            kind: ItemKind::None,
            value: 0,
            bytes_read: 0,
        }
    }
}

// ── Engine trait ───────────────────────────────────────────────────

/// Where the engine lives on disk and how it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Path to the wrapper library (`softvoice_wrapper.dll`).
    pub wrapper_path: PathBuf,
    /// Path to the synthesis library handed to the wrapper's init call.
    pub engine_path: PathBuf,
    /// Initial voice selector (1 = English, 2 = Spanish).
    pub initial_voice: i32,
}

/// One live engine instance.
///
/// Implementations own exactly one native handle; [`SynthEngine::free`]
/// releases it and no other method may be called afterwards.
pub trait SynthEngine: Send {
    /// Queue text for synthesis. A non-zero native status becomes
    /// [`EngineError::SpeakFailed`].
    fn start_speak(&mut self, text: &str) -> Result<(), EngineError>;

    /// Poll for the next item, copying audio into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadItem, EngineError>;

    /// Cancel current and queued speech.
    fn stop(&mut self);

    /// Invoke an allow-listed setter.
    fn set_param(&mut self, param: EngineParam, value: i32) -> Result<(), EngineError>;

    /// Whether the loaded library exports the setter for `param`.
    fn supports(&self, param: EngineParam) -> bool;

    /// Output format of the current session, if the engine reports one.
    fn format(&mut self) -> Option<AudioFormat>;

    /// Release the native handle.
    fn free(&mut self);
}

/// Creates engine instances. Implementations may cache the loaded library
/// across init/free cycles.
pub trait EngineLoader: Send + Sync {
    fn load(&self, config: &EngineConfig) -> Result<Box<dyn SynthEngine>, EngineError>;
}

// ── Shared handle ──────────────────────────────────────────────────

/// Shared, call-serialising handle to a live engine.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<Mutex<Box<dyn SynthEngine>>>,
}

impl EngineHandle {
    pub fn new(engine: Box<dyn SynthEngine>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn SynthEngine>> {
        // A panic inside an engine call leaves the engine itself untouched;
        // keep serving rather than poisoning every later call.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start_speak(&self, text: &str) -> Result<(), EngineError> {
        self.lock().start_speak(text)
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<ReadItem, EngineError> {
        self.lock().read(buf)
    }

    pub fn stop(&self) {
        self.lock().stop();
    }

    pub fn set_param(&self, param: EngineParam, value: i32) -> Result<(), EngineError> {
        self.lock().set_param(param, value)
    }

    pub fn supports(&self, param: EngineParam) -> bool {
        self.lock().supports(param)
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.lock().format()
    }

    /// Probe the format and optional exports once.
    pub fn capabilities(&self) -> Capabilities {
        let mut engine = self.lock();
        let format = engine.format().unwrap_or_else(|| {
            tracing::warn!("Engine did not report a format, assuming fallback");
            AudioFormat::FALLBACK
        });
        Capabilities {
            format,
            has_pause_factor: engine.supports(EngineParam::PauseFactor),
            has_trim_silence: engine.supports(EngineParam::TrimSilence),
        }
    }

    pub(crate) fn free(&self) {
        self.lock().free();
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}
