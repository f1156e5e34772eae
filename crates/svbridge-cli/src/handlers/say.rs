//! `svbridge say`: speak one utterance and wait for it to play out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use svbridge_audio::{OutputDevice, RodioOutput, WavFileOutput};
use svbridge_client::{OutputFactory, SessionOptions, Synth};
use svbridge_core::{BridgeMode, EngineParam, UtteranceOutcome};
use tokio::sync::mpsc;

use crate::bootstrap::CliContext;
use crate::error::CliError;

/// Play on the default device, or write to `wav` when given.
fn output_for(wav: Option<&Path>) -> OutputFactory {
    match wav.map(Path::to_path_buf) {
        Some(path) => Box::new(move |format| {
            let device: Arc<dyn OutputDevice> = Arc::new(WavFileOutput::create(&path, format)?);
            Ok(device)
        }),
        None => Box::new(|format| {
            let device: Arc<dyn OutputDevice> = Arc::new(RodioOutput::open(format)?);
            Ok(device)
        }),
    }
}

pub async fn execute(
    ctx: &CliContext,
    text: &str,
    wav: Option<PathBuf>,
    mode: BridgeMode,
    params: &[(EngineParam, i32)],
) -> Result<(), CliError> {
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let session = SessionOptions::new(output_for(wav.as_deref())).on_done(Arc::new(move || {
        let _ = done_tx.send(());
    }));

    tracing::info!(mode = ?mode, chars = text.chars().count(), "Connecting");
    let synth = Synth::connect(mode, &ctx.config, session).await?;
    let result = speak(&synth, text, params, done_rx, ctx.config.speak_timeout()).await;
    if let Err(e) = synth.shutdown().await {
        tracing::warn!(error = %e, "Shutdown failed");
    }
    if result.is_ok() {
        if let Some(path) = wav {
            println!("Wrote {}", path.display());
        }
    }
    result
}

async fn speak(
    synth: &Synth,
    text: &str,
    params: &[(EngineParam, i32)],
    mut done: mpsc::UnboundedReceiver<()>,
    playback_timeout: Duration,
) -> Result<(), CliError> {
    for &(param, value) in params {
        synth.set_parameter(param, value).await?;
    }

    match synth.speak_now(text).await? {
        UtteranceOutcome::Completed => {}
        UtteranceOutcome::Failed => {
            return Err(CliError::Speech("the engine reported an error".to_string()));
        }
        UtteranceOutcome::Cancelled => {
            return Err(CliError::Speech("the utterance was cancelled".to_string()));
        }
    }

    match tokio::time::timeout(playback_timeout, done.recv()).await {
        Ok(Some(())) => Ok(()),
        Ok(None) => Err(CliError::Speech("audio pipeline closed early".to_string())),
        Err(_) => Err(CliError::Speech("playback did not finish in time".to_string())),
    }
}
