use std::path::PathBuf;
use std::time::Duration;

use svbridge_audio::AudioError;
use svbridge_core::{ConfigError, EngineError};
use svbridge_ipc::{ChannelError, codes};
use thiserror::Error;

/// Errors seen by the caller of a speech backend.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No response arrived in time. The command may still complete; its
    /// late response is discarded.
    #[error("{command} timed out after {after:?}")]
    Timeout {
        command: &'static str,
        after: Duration,
    },

    /// The helper went away while the command was pending.
    #[error("Connection to the helper process closed")]
    ConnectionClosed,

    /// The helper answered with an error code.
    #[error("{command} failed in the helper: {code}")]
    Remote { command: &'static str, code: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Malformed reply: {0}")]
    Json(#[from] serde_json::Error),

    /// No helper executable or override was found.
    #[error("Helper executable not found (looked for {looked_for})")]
    HostNotFound { looked_for: PathBuf },

    #[error("Failed to start helper {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The speech queue or backend has been shut down.
    #[error("Speech backend is shut down")]
    Closed,
}

impl ClientError {
    /// Map a pending-table failure code onto the matching variant.
    pub(crate) fn from_code(command: &'static str, code: String) -> Self {
        if code == codes::CONNECTION_CLOSED {
            Self::ConnectionClosed
        } else {
            Self::Remote { command, code }
        }
    }

    /// Whether the helper connection is gone for good.
    pub const fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::Channel(ChannelError::PeerClosed)
        )
    }
}
