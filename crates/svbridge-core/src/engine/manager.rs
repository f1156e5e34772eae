//! Reference-counted ownership of the single engine handle.
//!
//! A process may host several logical sessions that share one engine. The
//! manager initialises the engine on the first [`EngineManager::acquire`]
//! and frees it when the matching [`EngineManager::release`] brings the
//! count back to zero.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{EngineConfig, EngineHandle, EngineLoader};
use crate::error::EngineError;
use crate::format::Capabilities;

/// What a session receives from [`EngineManager::acquire`].
#[derive(Debug, Clone)]
pub struct EngineLease {
    pub handle: EngineHandle,
    pub capabilities: Capabilities,
}

struct Slot {
    handle: EngineHandle,
    capabilities: Capabilities,
    refs: usize,
}

/// Owns the process's one engine handle.
pub struct EngineManager {
    loader: Box<dyn EngineLoader>,
    slot: Mutex<Option<Slot>>,
}

impl EngineManager {
    pub fn new(loader: Box<dyn EngineLoader>) -> Self {
        Self {
            loader,
            slot: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Slot>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a reference to the engine, initialising it if this is the first.
    ///
    /// Later acquires reuse the live handle; `config` is only consulted when
    /// the engine has to be created.
    pub fn acquire(&self, config: &EngineConfig) -> Result<EngineLease, EngineError> {
        let mut slot = self.slot();
        if let Some(live) = slot.as_mut() {
            live.refs += 1;
            tracing::debug!(refs = live.refs, "Engine reference acquired");
            return Ok(EngineLease {
                handle: live.handle.clone(),
                capabilities: live.capabilities,
            });
        }

        let handle = EngineHandle::new(self.loader.load(config)?);
        let capabilities = handle.capabilities();
        tracing::info!(
            sample_rate = capabilities.format.sample_rate,
            channels = capabilities.format.channels,
            bits = capabilities.format.bits_per_sample,
            pause_factor = capabilities.has_pause_factor,
            trim_silence = capabilities.has_trim_silence,
            "Engine initialized"
        );
        *slot = Some(Slot {
            handle: handle.clone(),
            capabilities,
            refs: 1,
        });
        Ok(EngineLease {
            handle,
            capabilities,
        })
    }

    /// Drop one reference, freeing the engine when none remain.
    ///
    /// Returns the remaining count. Releasing with no live engine is a no-op.
    pub fn release(&self) -> usize {
        let mut slot = self.slot();
        let Some(live) = slot.as_mut() else {
            return 0;
        };
        live.refs = live.refs.saturating_sub(1);
        if live.refs > 0 {
            tracing::debug!(refs = live.refs, "Engine reference released");
            return live.refs;
        }
        if let Some(last) = slot.take() {
            last.handle.stop();
            last.handle.free();
        }
        0
    }

    /// The live handle, if the engine is initialised.
    pub fn current(&self) -> Option<EngineHandle> {
        self.slot().as_ref().map(|live| live.handle.clone())
    }

    pub fn ref_count(&self) -> usize {
        self.slot().as_ref().map_or(0, |live| live.refs)
    }
}

impl std::fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineManager")
            .field("refs", &self.ref_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedEngine, ScriptedLoader};

    fn config() -> EngineConfig {
        EngineConfig {
            wrapper_path: "wrapper.dll".into(),
            engine_path: "tibase32.dll".into(),
            initial_voice: 1,
        }
    }

    #[test]
    fn engine_is_loaded_once_and_freed_at_zero() {
        let loader = ScriptedLoader::new(ScriptedEngine::new());
        let probe = loader.probe();
        let manager = EngineManager::new(Box::new(loader));

        manager.acquire(&config()).unwrap();
        manager.acquire(&config()).unwrap();
        assert_eq!(manager.ref_count(), 2);
        assert_eq!(probe.loads(), 1);

        assert_eq!(manager.release(), 1);
        assert_eq!(probe.frees(), 0);
        assert_eq!(manager.release(), 0);
        assert_eq!(probe.frees(), 1);
        assert!(manager.current().is_none());
    }

    #[test]
    fn release_without_engine_is_noop() {
        let manager = EngineManager::new(Box::new(ScriptedLoader::new(ScriptedEngine::new())));
        assert_eq!(manager.release(), 0);
    }

    #[test]
    fn load_failure_leaves_manager_empty() {
        let manager = EngineManager::new(Box::new(ScriptedLoader::failing("no engine")));
        assert!(matches!(
            manager.acquire(&config()),
            Err(EngineError::InitFailed(_))
        ));
        assert_eq!(manager.ref_count(), 0);
    }

    #[test]
    fn capabilities_come_from_engine() {
        let engine = ScriptedEngine::new().with_supported(&[crate::params::EngineParam::PauseFactor]);
        let manager = EngineManager::new(Box::new(ScriptedLoader::new(engine)));
        let lease = manager.acquire(&config()).unwrap();
        assert!(lease.capabilities.has_pause_factor);
        assert!(!lease.capabilities.has_trim_silence);
        assert_eq!(lease.capabilities.format.sample_rate, 22_050);
    }
}
