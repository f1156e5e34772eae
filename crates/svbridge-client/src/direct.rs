//! In-process backend, used when the caller can load the engine itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use svbridge_audio::{AudioPipeline, MarkerCallback, TailHoldPolicy};
use svbridge_core::{
    BridgeConfig, Capabilities, EngineHandle, EngineManager, EngineParam, StreamOptions,
    UtteranceOutcome, speak_utterance,
};
use tokio_util::sync::CancellationToken;

use crate::backend::{SessionOptions, SpeechBackend, open_pipeline};
use crate::error::ClientError;

/// Drives the engine on the caller's runtime and renders locally.
pub struct DirectBackend {
    manager: Arc<EngineManager>,
    engine: EngineHandle,
    capabilities: Capabilities,
    pipeline: AudioPipeline,
    stream: StreamOptions,
    /// Parent of every utterance's token; replaced on each stop.
    cancel: Mutex<CancellationToken>,
    closed: AtomicBool,
}

impl DirectBackend {
    /// Take a reference on the engine and open the output device.
    ///
    /// The reference is given back if the device cannot be opened.
    pub fn start(
        manager: Arc<EngineManager>,
        config: &BridgeConfig,
        session: SessionOptions,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let lease = manager.acquire(&config.engine_config())?;
        let pipeline = match open_pipeline(
            lease.capabilities.format,
            config.consumer_poll(),
            session,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                manager.release();
                return Err(e);
            }
        };

        tracing::info!(
            sample_rate = lease.capabilities.format.sample_rate,
            refs = manager.ref_count(),
            "Direct backend ready"
        );
        Ok(Self {
            engine: lease.handle,
            capabilities: lease.capabilities,
            manager,
            pipeline,
            stream: config.stream_options(),
            cancel: Mutex::new(CancellationToken::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn utterance_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    fn cancel_utterances(&self) {
        let mut parent = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        parent.cancel();
        *parent = CancellationToken::new();
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechBackend for DirectBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn speak_unless(
        &self,
        text: &str,
        withdrawn: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<UtteranceOutcome, ClientError> {
        self.ensure_open()?;
        let cancel = self.utterance_token();
        let sequence = self.pipeline.begin_utterance();
        if withdrawn() {
            tracing::debug!(sequence, "Utterance withdrawn before it started");
            return Ok(UtteranceOutcome::Cancelled);
        }
        Ok(speak_utterance(
            &self.engine,
            text,
            sequence,
            &self.pipeline,
            &cancel,
            &self.stream,
        )
        .await)
    }

    async fn stop(&self) {
        self.pipeline.cancel();
        self.cancel_utterances();
        self.engine.stop();
    }

    async fn set_parameter(&self, param: EngineParam, value: i32) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.engine.set_param(param, value)?;
        tracing::debug!(param = %param, value, "Parameter set");
        Ok(())
    }

    fn pause(&self, paused: bool) {
        self.pipeline.pause(paused);
    }

    fn feed_marker(&self, on_done: MarkerCallback) -> Result<(), ClientError> {
        Ok(self.pipeline.feed_marker(on_done)?)
    }

    fn player_idle(&self) {
        self.pipeline.idle();
    }

    fn set_tail_hold(&self, policy: Box<dyn TailHoldPolicy>) {
        self.pipeline.set_tail_hold(policy);
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel_utterances();
        self.engine.stop();
        self.pipeline.close();
        let remaining = self.manager.release();
        tracing::info!(remaining, "Direct backend shut down");
        Ok(())
    }
}

impl Drop for DirectBackend {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancel_utterances();
            self.pipeline.close();
            self.manager.release();
        }
    }
}

impl std::fmt::Debug for DirectBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectBackend")
            .field("capabilities", &self.capabilities)
            .field("pipeline", &self.pipeline)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
