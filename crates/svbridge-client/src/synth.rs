//! One object for callers that do not care where the engine runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use svbridge_audio::{LinearTailHold, MarkerCallback};
use svbridge_core::{
    BridgeConfig, BridgeMode, Capabilities, EngineManager, EngineParam, NativeLoader,
    UtteranceOutcome, pause_factor_settings, percent_to_param,
};

use crate::backend::{SessionOptions, SpeechBackend};
use crate::direct::DirectBackend;
use crate::error::ClientError;
use crate::queue::SpeechQueue;
use crate::remote::RemoteBackend;

/// A speech session: one backend plus the queue that feeds it.
pub struct Synth {
    mode: BridgeMode,
    backend: Arc<dyn SpeechBackend>,
    queue: SpeechQueue,
}

impl Synth {
    /// Build the backend for `mode`.
    ///
    /// The add-on directory is taken to be the one holding the wrapper
    /// library; the helper executable is looked up there in remote mode.
    pub async fn connect(
        mode: BridgeMode,
        config: &BridgeConfig,
        session: SessionOptions,
    ) -> Result<Self, ClientError> {
        let backend: Arc<dyn SpeechBackend> = match mode {
            BridgeMode::Direct => {
                let manager = Arc::new(EngineManager::new(Box::new(NativeLoader::new())));
                Arc::new(DirectBackend::start(manager, config, session)?)
            }
            BridgeMode::Remote => {
                let addon_dir = addon_dir(config);
                Arc::new(RemoteBackend::spawn(config, &addon_dir, session).await?)
            }
        };
        tracing::info!(mode = ?mode, "Speech session connected");
        Ok(Self::with_backend(mode, backend))
    }

    /// Wrap an already constructed backend.
    pub fn with_backend(mode: BridgeMode, backend: Arc<dyn SpeechBackend>) -> Self {
        let queue = SpeechQueue::new(Arc::clone(&backend));
        Self {
            mode,
            backend,
            queue,
        }
    }

    pub const fn mode(&self) -> BridgeMode {
        self.mode
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    /// Queue `text` behind whatever is already queued.
    pub async fn speak(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.queue.enqueue(text).await
    }

    /// Speak `text` now, bypassing the queue, and wait until the engine
    /// has produced all of it.
    pub async fn speak_now(&self, text: &str) -> Result<UtteranceOutcome, ClientError> {
        self.backend.speak(text).await
    }

    /// Drop queued utterances and silence the current one.
    pub async fn stop(&self) {
        self.queue.cancel();
        self.backend.stop().await;
    }

    pub async fn set_parameter(&self, param: EngineParam, value: i32) -> Result<(), ClientError> {
        self.backend.set_parameter(param, value).await
    }

    /// Set a percentage-style parameter, scaling it to the engine's range.
    /// Parameters without a range are passed through unchanged.
    pub async fn set_percent(&self, param: EngineParam, percent: u8) -> Result<(), ClientError> {
        let value = param.percent_range().map_or(i32::from(percent), |(min, max)| {
            percent_to_param(percent, min, max)
        });
        self.set_parameter(param, value).await
    }

    /// Apply the user's pause setting: the engine's pause factor and silence
    /// trimming where supported, and the matching local tail hold.
    pub async fn set_pause_factor(&self, percent: u8) -> Result<(), ClientError> {
        let capabilities = self.capabilities();
        let settings = pause_factor_settings(percent);
        if capabilities.has_pause_factor {
            self.set_parameter(EngineParam::PauseFactor, settings.engine_pause_factor)
                .await?;
        }
        if capabilities.has_trim_silence {
            self.set_parameter(EngineParam::TrimSilence, i32::from(settings.trim_silence))
                .await?;
        }
        self.backend
            .set_tail_hold(Box::new(LinearTailHold::new(percent.min(100))));
        Ok(())
    }

    pub fn pause(&self, paused: bool) {
        self.backend.pause(paused);
    }

    pub fn feed_marker(&self, on_done: MarkerCallback) -> Result<(), ClientError> {
        self.backend.feed_marker(on_done)
    }

    pub fn player_idle(&self) {
        self.backend.player_idle();
    }

    /// Stop speaking, drain the workers and release the backend.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.backend.stop().await;
        self.queue.shutdown().await;
        self.backend.shutdown().await
    }
}

impl std::fmt::Debug for Synth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synth")
            .field("mode", &self.mode)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

fn addon_dir(config: &BridgeConfig) -> PathBuf {
    config
        .wrapper_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}
