use thiserror::Error;

/// Transport errors. Every variant is fatal to the channel it came from.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The connecting side did not present the expected key.
    #[error("Handshake rejected: authentication key mismatch")]
    HandshakeRejected,

    /// The peer closed the connection, possibly mid-frame.
    #[error("Peer closed the connection")]
    PeerClosed,

    /// A frame header announced more bytes than the channel accepts.
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// A frame body was not a valid envelope.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// An authentication key string could not be parsed.
    #[error("Invalid authentication key: {0}")]
    InvalidKey(String),

    #[error("Channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Envelope serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChannelError {
    /// Map end-of-file during a read onto [`ChannelError::PeerClosed`].
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::PeerClosed
        } else {
            Self::Io(err)
        }
    }
}
