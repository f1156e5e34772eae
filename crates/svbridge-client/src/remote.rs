//! Proxy for an engine living in the helper process.
//!
//! Commands are correlated with their responses through a
//! [`PendingTable`]. One receiver task owns the read half of the channel:
//! responses resolve pending entries, `audio` events go straight into the
//! local audio pipeline, and a closed or failed channel fails everything
//! still waiting.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use svbridge_audio::{AudioPipeline, MarkerCallback, TailHoldPolicy};
use svbridge_core::{BridgeConfig, Capabilities, EngineParam, UtteranceOutcome};
use svbridge_ipc::{
    AudioEvent, ChannelError, Envelope, FrameReceiver, FrameSender, InitializeRequest, Payload,
    SetParameterRequest, SpeakRequest, StatusReply, StreamSettings, codes, commands, events,
    from_payload, to_payload,
};
use tokio::task::JoinHandle;

use crate::backend::{SessionOptions, SpeechBackend, open_pipeline};
use crate::error::ClientError;
use crate::host_process::HostProcess;
use crate::pending::PendingTable;

/// How long shutdown waits for the receiver task to notice the close.
const RECEIVER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the receiver task delivers events.
#[derive(Default)]
struct EventRouter {
    /// Set once `initialize` has answered; audio arriving earlier is dropped.
    pipeline: OnceLock<Arc<AudioPipeline>>,
    /// Sequence captured at the start of the current `speak`, for events
    /// the helper did not tag.
    fallback_sequence: AtomicU64,
}

impl EventRouter {
    fn deliver(&self, event: &str, payload: Payload) {
        match event {
            events::AUDIO => {
                let audio: AudioEvent = match from_payload(payload) {
                    Ok(audio) => audio,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping malformed audio event");
                        return;
                    }
                };
                let Some(pipeline) = self.pipeline.get() else {
                    tracing::warn!("Audio event before initialize, dropping");
                    return;
                };
                let fallback = self.fallback_sequence.load(Ordering::SeqCst);
                pipeline.enqueue(audio.into_chunk(fallback));
            }
            events::STOPPED => tracing::debug!("Helper acknowledged stop"),
            other => tracing::debug!(event = %other, "Ignoring unknown event"),
        }
    }
}

async fn receive_loop(
    mut receiver: FrameReceiver,
    pending: Arc<PendingTable>,
    router: Arc<EventRouter>,
) {
    loop {
        match receiver.recv().await {
            Ok(Envelope::Response { id, payload, error }) => {
                let reply = error.map_or(Ok(payload), Err);
                if !pending.resolve(id, reply) {
                    tracing::debug!(id, "Discarding response nobody is waiting for");
                }
            }
            Ok(Envelope::Event { event, payload }) => router.deliver(&event, payload),
            Ok(other) => tracing::warn!(kind = other.kind(), "Ignoring frame from helper"),
            Err(ChannelError::PeerClosed) => {
                let failed = pending.fail_all(codes::CONNECTION_CLOSED);
                tracing::info!(failed, "Helper closed the channel");
                return;
            }
            Err(e) => {
                let failed = pending.fail_all(codes::RECEIVER_EXCEPTION);
                tracing::error!(error = %e, failed, "Receiver failed");
                return;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    command: Duration,
    speak: Duration,
    shutdown: Duration,
}

/// Speaks through the helper process and renders locally.
pub struct RemoteBackend {
    sender: FrameSender,
    pending: Arc<PendingTable>,
    router: Arc<EventRouter>,
    pipeline: Arc<AudioPipeline>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    host: tokio::sync::Mutex<Option<HostProcess>>,
    capabilities: Capabilities,
    timeouts: Timeouts,
    closed: AtomicBool,
}

impl RemoteBackend {
    /// Start the helper from `addon_dir` and initialize the engine in it.
    pub async fn spawn(
        config: &BridgeConfig,
        addon_dir: &Path,
        session: SessionOptions,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let (host, receiver) = HostProcess::spawn(config, addon_dir).await?;
        let sender = host.sender();
        Self::connect(sender, receiver, Some(host), config, session).await
    }

    /// Initialize the engine over an already authenticated channel.
    ///
    /// `host`, when given, is stopped by [`SpeechBackend::shutdown`] or when
    /// initialization fails.
    pub async fn connect(
        sender: FrameSender,
        receiver: FrameReceiver,
        host: Option<HostProcess>,
        config: &BridgeConfig,
        session: SessionOptions,
    ) -> Result<Self, ClientError> {
        let pending = Arc::new(PendingTable::new());
        let router = Arc::new(EventRouter::default());
        let receiver = tokio::spawn(receive_loop(
            receiver,
            Arc::clone(&pending),
            Arc::clone(&router),
        ));
        let timeouts = Timeouts {
            command: config.command_timeout(),
            speak: config.speak_timeout(),
            shutdown: config.shutdown_timeout(),
        };

        let initialized = Self::initialize(&sender, &pending, config, timeouts.command)
            .await
            .and_then(|capabilities| {
                let pipeline =
                    open_pipeline(capabilities.format, config.consumer_poll(), session)?;
                Ok((capabilities, Arc::new(pipeline)))
            });

        let (capabilities, pipeline) = match initialized {
            Ok(ready) => ready,
            Err(e) => {
                tracing::error!(error = %e, "Helper initialization failed");
                sender.close().await;
                receiver.abort();
                if let Some(host) = host {
                    let _ = host.shutdown().await;
                }
                return Err(e);
            }
        };
        // The router is fresh and this is its only initialization.
        let _ = router.pipeline.set(Arc::clone(&pipeline));

        tracing::info!(
            sample_rate = capabilities.format.sample_rate,
            bits = capabilities.format.bits_per_sample,
            "Remote backend ready"
        );
        Ok(Self {
            sender,
            pending,
            router,
            pipeline,
            receiver: Mutex::new(Some(receiver)),
            host: tokio::sync::Mutex::new(host),
            capabilities,
            timeouts,
            closed: AtomicBool::new(false),
        })
    }

    async fn initialize(
        sender: &FrameSender,
        pending: &PendingTable,
        config: &BridgeConfig,
        timeout: Duration,
    ) -> Result<Capabilities, ClientError> {
        let request = InitializeRequest {
            wrapper_path: config.wrapper_path.to_string_lossy().into_owned(),
            engine_path: config.engine_path.to_string_lossy().into_owned(),
            initial_voice: config.initial_voice,
            stream: Some(StreamSettings::from(config)),
        };
        let reply = call(
            sender,
            pending,
            commands::INITIALIZE,
            to_payload(&request)?,
            timeout,
        )
        .await?;
        Ok(from_payload(reply)?)
    }

    async fn call(
        &self,
        command: &'static str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        call(&self.sender, &self.pending, command, payload, timeout).await
    }

    /// Ask the helper to repeat its format.
    pub async fn query_format(&self) -> Result<svbridge_core::AudioFormat, ClientError> {
        let reply = self
            .call(commands::GET_FORMAT, Payload::new(), self.timeouts.command)
            .await?;
        Ok(from_payload(reply)?)
    }

    /// Commands still waiting for a response.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn take_receiver(&self) -> Option<JoinHandle<()>> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Send one command and wait for its response.
///
/// The entry is registered before the frame is written so a fast response
/// cannot be missed. A timeout removes the entry; nothing is retried.
async fn call(
    sender: &FrameSender,
    pending: &PendingTable,
    command: &'static str,
    payload: Payload,
    timeout: Duration,
) -> Result<Payload, ClientError> {
    let (id, mut reply) = pending.register();
    tracing::debug!(id, command, "Sending command");
    if let Err(e) = sender.send(&Envelope::command(id, command, payload)).await {
        pending.forget(id);
        // A channel already known to be dead reports why, not the write error.
        if let Ok(Err(code)) = reply.try_recv() {
            return Err(ClientError::from_code(command, code));
        }
        return Err(e.into());
    }

    match tokio::time::timeout(timeout, reply).await {
        Ok(Ok(Ok(payload))) => Ok(payload),
        Ok(Ok(Err(code))) => Err(ClientError::from_code(command, code)),
        Ok(Err(_)) => Err(ClientError::ConnectionClosed),
        Err(_) => {
            pending.forget(id);
            tracing::error!(id, command, ?timeout, "Command timed out");
            Err(ClientError::Timeout {
                command,
                after: timeout,
            })
        }
    }
}

fn parse_outcome(reply: &StatusReply) -> UtteranceOutcome {
    match reply.outcome.as_deref() {
        Some("cancelled") => UtteranceOutcome::Cancelled,
        Some("failed") => UtteranceOutcome::Failed,
        _ => UtteranceOutcome::Completed,
    }
}

#[async_trait]
impl SpeechBackend for RemoteBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn speak_unless(
        &self,
        text: &str,
        withdrawn: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<UtteranceOutcome, ClientError> {
        let sequence = self.pipeline.begin_utterance();
        if withdrawn() {
            tracing::debug!(sequence, "Utterance withdrawn before it started");
            return Ok(UtteranceOutcome::Cancelled);
        }
        self.router
            .fallback_sequence
            .store(sequence, Ordering::SeqCst);
        let request = SpeakRequest {
            text: text.to_string(),
            sequence: Some(sequence),
        };
        let reply = self
            .call(commands::SPEAK, to_payload(&request)?, self.timeouts.speak)
            .await?;
        let reply: StatusReply = from_payload(reply)?;
        Ok(parse_outcome(&reply))
    }

    async fn stop(&self) {
        self.pipeline.cancel();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        // Fire and forget: the response is discarded by the receiver.
        let id = self.pending.next_id();
        if let Err(e) = self
            .sender
            .send(&Envelope::command(id, commands::STOP, Payload::new()))
            .await
        {
            tracing::warn!(error = %e, "Failed to send stop to helper");
        }
    }

    async fn set_parameter(&self, param: EngineParam, value: i32) -> Result<(), ClientError> {
        let request = SetParameterRequest {
            name: param.symbol().to_string(),
            value,
        };
        self.call(
            commands::SET_PARAMETER,
            to_payload(&request)?,
            self.timeouts.command,
        )
        .await?;
        tracing::debug!(param = %param, value, "Parameter set in helper");
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

    /// Close audio, ask the helper to shut down, then tear the channel and
    /// the process down. Every step runs even if an earlier one failed.
    async fn shutdown(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pipeline.close();

        if let Err(e) = call(
            &self.sender,
            &self.pending,
            commands::SHUTDOWN,
            Payload::new(),
            self.timeouts.shutdown,
        )
        .await
        {
            tracing::warn!(error = %e, "Helper did not acknowledge shutdown");
        }

        if let Some(receiver) = self.take_receiver() {
            if tokio::time::timeout(RECEIVER_JOIN_TIMEOUT, receiver)
                .await
                .is_err()
            {
                tracing::warn!("Receiver did not finish in time");
            }
        }
        self.sender.close().await;

        if let Some(host) = self.host.lock().await.take() {
            if let Err(e) = host.shutdown().await {
                tracing::warn!(error = %e, "Failed to stop helper");
            }
        }
        self.pending.fail_all(codes::CONNECTION_CLOSED);
        tracing::info!("Remote backend shut down");
        Ok(())
    }
}

impl Drop for RemoteBackend {
    fn drop(&mut self) {
        self.pipeline.close();
        if let Some(receiver) = self.take_receiver() {
            receiver.abort();
        }
    }
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("capabilities", &self.capabilities)
            .field("pending", &self.pending)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_names_map_back() {
        assert_eq!(
            parse_outcome(&StatusReply::with_outcome("cancelled")),
            UtteranceOutcome::Cancelled
        );
        assert_eq!(
            parse_outcome(&StatusReply::with_outcome("failed")),
            UtteranceOutcome::Failed
        );
        assert_eq!(parse_outcome(&StatusReply::ok()), UtteranceOutcome::Completed);
    }
}
