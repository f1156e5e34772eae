//! In-memory engine for tests.
//!
//! [`ScriptedEngine`] replays a fixed list of read items for every
//! `start_speak` and records what it was asked to do in a shared
//! [`EngineProbe`]. It can also stream audio indefinitely until stopped,
//! which is what cancellation tests need.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::{EngineConfig, EngineLoader, ItemKind, ReadItem, SynthEngine};
use crate::error::EngineError;
use crate::format::AudioFormat;
use crate::params::EngineParam;

/// One scripted `read` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptItem {
    Nothing,
    Audio(Vec<u8>),
    Done,
    Error(i32),
    /// The binding call itself fails.
    Raise(String),
}

#[derive(Debug, Default)]
struct ProbeState {
    loads: usize,
    stops: usize,
    frees: usize,
    spoken: Vec<String>,
    params: Vec<(EngineParam, i32)>,
}

/// Shared record of the calls a scripted engine received.
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl EngineProbe {
    fn state(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn loads(&self) -> usize {
        self.state().loads
    }

    pub fn stops(&self) -> usize {
        self.state().stops
    }

    pub fn frees(&self) -> usize {
        self.state().frees
    }

    /// Every text passed to `start_speak`, in order.
    pub fn spoken(&self) -> Vec<String> {
        self.state().spoken.clone()
    }

    pub fn params(&self) -> Vec<(EngineParam, i32)> {
        self.state().params.clone()
    }
}

/// Scripted stand-in for the native engine.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    script: Vec<ScriptItem>,
    endless: Option<Vec<u8>>,
    speak_status: i32,
    supported: HashSet<EngineParam>,
    format: Option<AudioFormat>,
    pending: VecDeque<ScriptItem>,
    streaming: bool,
    probe: EngineProbe,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    /// Two audio chunks then `Done`, every setter supported, 22 050 Hz mono 16-bit.
    pub fn new() -> Self {
        Self {
            script: vec![
                ScriptItem::Audio(vec![0x10; 32]),
                ScriptItem::Nothing,
                ScriptItem::Audio(vec![0x20; 32]),
                ScriptItem::Done,
            ],
            endless: None,
            speak_status: 0,
            supported: EngineParam::ALL.into_iter().collect(),
            format: Some(AudioFormat::FALLBACK),
            pending: VecDeque::new(),
            streaming: false,
            probe: EngineProbe::default(),
        }
    }

    #[must_use]
    pub fn with_script(mut self, script: Vec<ScriptItem>) -> Self {
        self.script = script;
        self
    }

    /// Yield `chunk` forever after the script runs out, until `stop`.
    #[must_use]
    pub fn endless(mut self, chunk: Vec<u8>) -> Self {
        self.endless = Some(chunk);
        self
    }

    #[must_use]
    pub const fn with_speak_status(mut self, status: i32) -> Self {
        self.speak_status = status;
        self
    }

    #[must_use]
    pub fn with_supported(mut self, params: &[EngineParam]) -> Self {
        self.supported = params.iter().copied().collect();
        self
    }

    #[must_use]
    pub const fn with_format(mut self, format: Option<AudioFormat>) -> Self {
        self.format = format;
        self
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }
}

impl SynthEngine for ScriptedEngine {
    fn start_speak(&mut self, text: &str) -> Result<(), EngineError> {
        self.probe.state().spoken.push(text.to_string());
        if self.speak_status != 0 {
            return Err(EngineError::SpeakFailed {
                status: self.speak_status,
            });
        }
        self.pending.extend(self.script.iter().cloned());
        self.streaming = self.endless.is_some();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadItem, EngineError> {
        let item = match self.pending.pop_front() {
            Some(item) => item,
            None => match (&self.endless, self.streaming) {
                (Some(chunk), true) => ScriptItem::Audio(chunk.clone()),
                _ => ScriptItem::Nothing,
            },
        };

        let read = |kind, value, bytes_read| ReadItem {
            kind,
            value,
            bytes_read,
        };
        match item {
            ScriptItem::Nothing => Ok(ReadItem::none()),
            ScriptItem::Audio(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(read(ItemKind::Audio, 0, n))
            }
            ScriptItem::Done => Ok(read(ItemKind::Done, 0, 0)),
            ScriptItem::Error(code) => Ok(read(ItemKind::Error, code, 0)),
            ScriptItem::Raise(reason) => Err(EngineError::ReadFailed(reason)),
        }
    }

    fn stop(&mut self) {
        self.probe.state().stops += 1;
        self.pending.clear();
        self.streaming = false;
    }

    fn set_param(&mut self, param: EngineParam, value: i32) -> Result<(), EngineError> {
        if !self.supported.contains(&param) {
            return Err(EngineError::Unsupported(param));
        }
        self.probe.state().params.push((param, value));
        Ok(())
    }

    fn supports(&self, param: EngineParam) -> bool {
        self.supported.contains(&param)
    }

    fn format(&mut self) -> Option<AudioFormat> {
        self.format
    }

    fn free(&mut self) {
        self.probe.state().frees += 1;
    }
}

/// Hands out clones of a template [`ScriptedEngine`] sharing one probe.
#[derive(Debug, Clone)]
pub struct ScriptedLoader {
    template: Option<ScriptedEngine>,
    failure: Option<String>,
    probe: EngineProbe,
}

impl ScriptedLoader {
    pub fn new(template: ScriptedEngine) -> Self {
        let probe = template.probe();
        Self {
            template: Some(template),
            failure: None,
            probe,
        }
    }

    /// A loader whose every `load` fails with [`EngineError::InitFailed`].
    pub fn failing(reason: &str) -> Self {
        Self {
            template: None,
            failure: Some(reason.to_string()),
            probe: EngineProbe::default(),
        }
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }
}

impl EngineLoader for ScriptedLoader {
    fn load(&self, _config: &EngineConfig) -> Result<Box<dyn SynthEngine>, EngineError> {
        if let Some(reason) = &self.failure {
            return Err(EngineError::InitFailed(reason.clone()));
        }
        let engine = self
            .template
            .clone()
            .ok_or_else(|| EngineError::InitFailed("no scripted engine".to_string()))?;
        self.probe.state().loads += 1;
        Ok(Box::new(engine))
    }
}
