//! The seam between the caller and whichever side owns the engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use svbridge_audio::{
    AudioError, AudioPipeline, DoneCallback, MarkerCallback, OutputDevice, PipelineOptions,
    TailHoldPolicy,
};
use svbridge_core::{AudioFormat, Capabilities, EngineParam, UtteranceOutcome};

use crate::error::ClientError;

/// Opens the output device once the engine's output format is known.
pub type OutputFactory =
    Box<dyn FnOnce(AudioFormat) -> Result<Arc<dyn OutputDevice>, AudioError> + Send>;

/// Speech operations common to the in-process and helper-process backends.
///
/// Both render through their own audio pipeline, so a consumer sees the
/// same completion and cancellation behaviour either way.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// What `initialize` reported.
    fn capabilities(&self) -> Capabilities;

    /// Speak one logical utterance, returning once the engine has produced
    /// all of its audio. Playback may still be in progress.
    async fn speak(&self, text: &str) -> Result<UtteranceOutcome, ClientError> {
        self.speak_unless(text, &|| false).await
    }

    /// As [`SpeechBackend::speak`], but `withdrawn` is consulted after the
    /// pipeline has been armed for the new utterance. If it reports true,
    /// nothing reaches the engine and the outcome is `Cancelled`, so a stop
    /// that lands while a queued job is starting cannot be undone by it.
    async fn speak_unless(
        &self,
        text: &str,
        withdrawn: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<UtteranceOutcome, ClientError>;

    /// Silence queued and playing audio, then tell the engine to stop.
    /// Never waits for the engine to acknowledge.
    async fn stop(&self);

    async fn set_parameter(&self, param: EngineParam, value: i32) -> Result<(), ClientError>;

    fn pause(&self, paused: bool);

    fn feed_marker(&self, on_done: MarkerCallback) -> Result<(), ClientError>;

    fn player_idle(&self);

    /// Replace how much trailing audio is held back until an utterance ends.
    fn set_tail_hold(&self, policy: Box<dyn TailHoldPolicy>);

    /// Release the engine and the output device. Idempotent.
    async fn shutdown(&self) -> Result<(), ClientError>;
}

/// How a backend session is set up, besides its configuration.
pub struct SessionOptions {
    pub output: OutputFactory,
    /// Fired once per utterance after its audio has played out.
    pub on_done: Option<DoneCallback>,
}

impl SessionOptions {
    pub fn new(output: OutputFactory) -> Self {
        Self {
            output,
            on_done: None,
        }
    }

    #[must_use]
    pub fn on_done(mut self, callback: DoneCallback) -> Self {
        self.on_done = Some(callback);
        self
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("on_done", &self.on_done.is_some())
            .finish_non_exhaustive()
    }
}

/// Open the device for `format` and start the consumer behind it.
pub(crate) fn open_pipeline(
    format: AudioFormat,
    poll: Duration,
    session: SessionOptions,
) -> Result<AudioPipeline, ClientError> {
    let device = (session.output)(format.output_format())?;
    let pipeline = AudioPipeline::new(
        device,
        format,
        PipelineOptions {
            poll,
            on_done: session.on_done,
            ..PipelineOptions::default()
        },
    )?;
    Ok(pipeline)
}
