//! Command dispatch inside the helper process.
//!
//! [`Dispatcher::serve`] owns the channel's read side. Every command except
//! `speak` is handled inline and answered before the next frame is read.
//! `speak` pumps the engine until the utterance ends, so it runs on its own
//! task and answers when it finishes; the receive loop stays free for a
//! concurrent `stop`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use svbridge_core::{
    AudioChunk, BridgeConfig, ChunkSink, EngineConfig, EngineHandle, EngineLease, EngineLoader,
    EngineManager, EngineParam, StreamOptions, UtteranceOutcome, speak_utterance,
};
use svbridge_ipc::{
    AudioEvent, ChannelError, Envelope, FrameReceiver, FrameSender, InitializeRequest, Payload,
    SetParameterRequest, SpeakRequest, StatusReply, StreamSettings, commands, events, from_payload,
    to_payload,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{DispatchError, ServeError};

/// Tuning for a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub stream: StreamOptions,
    /// How long a new `speak`, a `stop` or a `shutdown` waits for the
    /// previous utterance's task.
    pub speak_join_timeout: Duration,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for DispatcherOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            stream: config.stream_options(),
            speak_join_timeout: config.speak_join_timeout(),
        }
    }
}

/// What a handler asks the receive loop to do next.
enum Reply {
    /// Send this payload as the response now.
    Now(Payload),
    /// The response is sent later by a spawned task.
    Deferred,
    /// Send this payload, then stop serving.
    Shutdown(Payload),
}

impl Reply {
    fn now<T: Serialize>(value: &T) -> Result<Self, DispatchError> {
        Ok(Self::Now(to_payload(value)?))
    }
}

struct SpeechSlot {
    /// Parent of every in-flight utterance's token; replaced on each stop.
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Serves one caller connection.
pub struct Dispatcher {
    manager: EngineManager,
    /// Replaced by the stream settings an `initialize` carries.
    options: Mutex<DispatcherOptions>,
    lease: Mutex<Option<EngineLease>>,
    speech: tokio::sync::Mutex<SpeechSlot>,
}

impl Dispatcher {
    pub fn new(loader: Box<dyn EngineLoader>, options: DispatcherOptions) -> Self {
        Self {
            manager: EngineManager::new(loader),
            options: Mutex::new(options),
            lease: Mutex::new(None),
            speech: tokio::sync::Mutex::new(SpeechSlot {
                cancel: CancellationToken::new(),
                task: None,
            }),
        }
    }

    fn lease(&self) -> MutexGuard<'_, Option<EngineLease>> {
        self.lease.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn options(&self) -> DispatcherOptions {
        self.options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn engine(&self) -> Result<EngineHandle, DispatchError> {
        self.lease()
            .as_ref()
            .map(|lease| lease.handle.clone())
            .ok_or(DispatchError::NotInitialized)
    }

    /// Handle commands until the caller disconnects or sends `shutdown`.
    ///
    /// The engine reference taken by `initialize` is released on the way
    /// out either way.
    pub async fn serve(
        &self,
        sender: FrameSender,
        mut receiver: FrameReceiver,
    ) -> Result<(), ServeError> {
        tracing::info!("Dispatcher serving");
        let result = self.receive_loop(&sender, &mut receiver).await;
        self.halt_speech().await;
        self.release_engine();
        sender.close().await;
        match &result {
            Ok(()) => tracing::info!("Dispatcher finished"),
            Err(e) => tracing::error!(error = %e, "Dispatcher stopped on channel failure"),
        }
        result
    }

    async fn receive_loop(
        &self,
        sender: &FrameSender,
        receiver: &mut FrameReceiver,
    ) -> Result<(), ServeError> {
        loop {
            let envelope = match receiver.recv().await {
                Ok(envelope) => envelope,
                Err(ChannelError::PeerClosed) => {
                    tracing::info!("Caller closed the channel");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let (id, command, payload) = match envelope {
                Envelope::Command {
                    id,
                    command,
                    payload,
                } => (id, command, payload),
                other => {
                    tracing::warn!(kind = other.kind(), "Ignoring non-command frame");
                    continue;
                }
            };

            tracing::debug!(id, command = %command, "Command received");
            match self.dispatch(id, &command, payload, sender).await {
                Ok(Reply::Now(payload)) => sender.send(&Envelope::ok(id, payload)).await?,
                Ok(Reply::Deferred) => {}
                Ok(Reply::Shutdown(payload)) => {
                    sender.send(&Envelope::ok(id, payload)).await?;
                    tracing::info!(id, "Shutdown requested");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(id, command = %command, error = %e, "Command failed");
                    sender.send(&Envelope::error(id, e.code())).await?;
                }
            }
        }
    }

    async fn dispatch(
        &self,
        id: u64,
        command: &str,
        payload: Payload,
        sender: &FrameSender,
    ) -> Result<Reply, DispatchError> {
        match command {
            commands::INITIALIZE => self.initialize(payload),
            commands::SPEAK => self.speak(id, payload, sender).await,
            commands::STOP => self.stop(sender).await,
            commands::SET_PARAMETER | commands::DLL_CALL => self.set_parameter(command, payload),
            commands::GET_FORMAT => self.get_format(),
            commands::SHUTDOWN | commands::DELETE => self.shutdown().await,
            other => Err(DispatchError::UnknownCommand(other.to_string())),
        }
    }

    fn initialize(&self, payload: Payload) -> Result<Reply, DispatchError> {
        let request: InitializeRequest = from_payload(payload)
            .map_err(|e| DispatchError::bad_payload(commands::INITIALIZE, &e))?;
        if let Some(settings) = &request.stream {
            self.apply_stream_settings(settings)?;
        }

        let mut lease = self.lease();
        if let Some(existing) = lease.as_ref() {
            tracing::debug!("Already initialized, reusing engine");
            return Reply::now(&existing.capabilities);
        }

        let config = EngineConfig {
            wrapper_path: request.wrapper_path.into(),
            engine_path: request.engine_path.into(),
            initial_voice: request.initial_voice,
        };
        let acquired = self.manager.acquire(&config)?;
        let reply = Reply::now(&acquired.capabilities);
        *lease = Some(acquired);
        reply
    }

    fn apply_stream_settings(&self, settings: &StreamSettings) -> Result<(), DispatchError> {
        let mut config = BridgeConfig::default();
        settings.apply_to(&mut config);
        config
            .validate()
            .map_err(|e| DispatchError::bad_payload(commands::INITIALIZE, &e))?;
        *self.options.lock().unwrap_or_else(PoisonError::into_inner) =
            DispatcherOptions::from(&config);
        tracing::debug!(
            max_utterance_chars = settings.max_utterance_chars,
            read_buffer_bytes = settings.read_buffer_bytes,
            "Caller stream settings applied"
        );
        Ok(())
    }

    async fn speak(
        &self,
        id: u64,
        payload: Payload,
        sender: &FrameSender,
    ) -> Result<Reply, DispatchError> {
        let request: SpeakRequest =
            from_payload(payload).map_err(|e| DispatchError::bad_payload(commands::SPEAK, &e))?;
        let engine = self.engine()?;

        let mut slot = self.speech.lock().await;
        let previous = slot.task.take();
        let cancel = slot.cancel.child_token();
        let sender = sender.clone();
        let DispatcherOptions {
            stream,
            speak_join_timeout: join_timeout,
        } = self.options();

        slot.task = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if tokio::time::timeout(join_timeout, previous).await.is_err() {
                    tracing::warn!(id, "Previous utterance still running, speaking anyway");
                }
            }

            let sink = EventSink {
                sender: sender.clone(),
                tag: request.sequence,
            };
            let sequence = request.sequence.unwrap_or_default();
            let outcome =
                speak_utterance(&engine, &request.text, sequence, &sink, &cancel, &stream).await;
            tracing::debug!(id, sequence, outcome = ?outcome, "Utterance finished");

            let reply = StatusReply::with_outcome(outcome_name(outcome));
            let response = match to_payload(&reply) {
                Ok(payload) => Envelope::ok(id, payload),
                Err(e) => Envelope::error(id, DispatchError::from(e).code()),
            };
            if let Err(e) = sender.send(&response).await {
                tracing::warn!(id, error = %e, "Failed to send speak response");
            }
        }));
        Ok(Reply::Deferred)
    }

    async fn stop(&self, sender: &FrameSender) -> Result<Reply, DispatchError> {
        let task = {
            let mut slot = self.speech.lock().await;
            slot.cancel.cancel();
            slot.cancel = CancellationToken::new();
            slot.task.take()
        };
        if let Some(engine) = self.manager.current() {
            engine.stop();
        }
        if let Err(e) = sender
            .send(&Envelope::event(events::STOPPED, Payload::new()))
            .await
        {
            tracing::warn!(error = %e, "Failed to send stopped event");
        }
        if let Some(task) = task {
            self.join(task).await;
        }
        Reply::now(&StatusReply::ok())
    }

    fn set_parameter(&self, command: &str, payload: Payload) -> Result<Reply, DispatchError> {
        let request: SetParameterRequest =
            from_payload(payload).map_err(|e| DispatchError::bad_payload(command, &e))?;
        let param = EngineParam::from_symbol(&request.name)?;
        let engine = self.engine()?;
        engine.set_param(param, request.value)?;
        tracing::debug!(param = %param, value = request.value, "Parameter set");
        Reply::now(&StatusReply::ok())
    }

    fn get_format(&self) -> Result<Reply, DispatchError> {
        let lease = self.lease();
        let lease = lease.as_ref().ok_or(DispatchError::NotInitialized)?;
        Reply::now(&lease.capabilities.format)
    }

    async fn shutdown(&self) -> Result<Reply, DispatchError> {
        self.halt_speech().await;
        self.release_engine();
        Ok(Reply::Shutdown(to_payload(&StatusReply::ok())?))
    }

    /// Cancel any utterance and wait for its task.
    async fn halt_speech(&self) {
        let task = {
            let mut slot = self.speech.lock().await;
            slot.cancel.cancel();
            slot.cancel = CancellationToken::new();
            slot.task.take()
        };
        if let Some(task) = task {
            if let Some(engine) = self.manager.current() {
                engine.stop();
            }
            self.join(task).await;
        }
    }

    async fn join(&self, task: JoinHandle<()>) {
        match tokio::time::timeout(self.options().speak_join_timeout, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Speak task failed"),
            Err(_) => tracing::warn!("Speak task did not finish in time"),
        }
    }

    fn release_engine(&self) {
        if self.lease().take().is_some() {
            let remaining = self.manager.release();
            tracing::debug!(remaining, "Engine reference released");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

const fn outcome_name(outcome: UtteranceOutcome) -> &'static str {
    match outcome {
        UtteranceOutcome::Completed => "completed",
        UtteranceOutcome::Failed => "failed",
        UtteranceOutcome::Cancelled => "cancelled",
    }
}

/// Relays chunks to the caller as `audio` events.
struct EventSink {
    sender: FrameSender,
    /// The caller's sequence, echoed back untouched.
    tag: Option<u64>,
}

#[async_trait]
impl ChunkSink for EventSink {
    async fn push(&self, chunk: AudioChunk) {
        let mut event = AudioEvent::from_chunk(chunk);
        event.sequence = self.tag;
        let payload = match to_payload(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode audio event");
                return;
            }
        };
        if let Err(e) = self
            .sender
            .send(&Envelope::event(events::AUDIO, payload))
            .await
        {
            tracing::warn!(error = %e, "Failed to send audio event");
        }
    }
}
