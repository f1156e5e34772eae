//! CLI error type and its exit codes.

use svbridge_audio::AudioError;
use svbridge_client::ClientError;
use svbridge_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// Argument parsing error.
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Required files are missing from the add-on directory.
    #[error("Installation incomplete, missing: {}", .0.join(", "))]
    Installation(Vec<&'static str>),

    /// The engine or the helper process could not be reached.
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    /// The engine was reached but the utterance did not complete.
    #[error("Speech failed: {0}")]
    Speech(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl CliError {
    /// Map error to a sysexits-style exit code.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Arguments(_) => 64,    // EX_USAGE
            Self::Config(_) => 78,       // EX_CONFIG
            Self::Installation(_) => 72, // EX_OSFILE
            Self::Unavailable(_) => 69,  // EX_UNAVAILABLE
            Self::Speech(_) => 1,
            Self::Io(_) => 74, // EX_IOERR
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<AudioError> for CliError {
    fn from(err: AudioError) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<ClientError> for CliError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Config(e) => Self::Config(e.to_string()),
            ClientError::Audio(e) => Self::Io(e.to_string()),
            ClientError::Remote { .. } | ClientError::Engine(_) => Self::Speech(err.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
