use svbridge_core::{EngineError, ParamError};
use svbridge_ipc::{ChannelError, codes};
use thiserror::Error;

/// Per-command failures. None of them are fatal to the channel.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("Malformed {command} payload: {reason}")]
    BadPayload { command: String, reason: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DispatchError {
    /// The `error` string sent back in the response.
    pub fn code(&self) -> String {
        match self {
            Self::UnknownCommand(_) => codes::UNKNOWN_COMMAND.to_string(),
            Self::Param(_) => codes::DISALLOWED_PARAMETER.to_string(),
            Self::NotInitialized | Self::Engine(EngineError::NotInitialized) => {
                codes::NOT_INITIALIZED.to_string()
            }
            Self::BadPayload { .. } | Self::Encode(_) => codes::BAD_PAYLOAD.to_string(),
            Self::Engine(e) => format!("{}: {e}", codes::ENGINE_ERROR),
        }
    }

    pub(crate) fn bad_payload(command: &str, err: &impl std::fmt::Display) -> Self {
        Self::BadPayload {
            command: command.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Why [`crate::Dispatcher::serve`] stopped.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Channel failed: {0}")]
    Channel(#[from] ChannelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            DispatchError::UnknownCommand("x".into()).code(),
            "unknownCommand"
        );
        assert_eq!(
            DispatchError::Param(ParamError::Disallowed("system".into())).code(),
            "disallowedParameter"
        );
        assert_eq!(DispatchError::NotInitialized.code(), "notInitialized");
        assert!(
            DispatchError::Engine(EngineError::SpeakFailed { status: 3 })
                .code()
                .starts_with("engineError")
        );
    }
}
