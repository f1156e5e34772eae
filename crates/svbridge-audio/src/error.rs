use thiserror::Error;

/// Errors from the audio pipeline and its output devices.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The playback device could not be opened.
    #[error("Failed to open output stream: {0}")]
    OutputStream(String),

    /// The device cannot render this sample width.
    #[error("Unsupported output format: {bits} bits per sample")]
    UnsupportedFormat { bits: u16 },

    /// The audio worker thread could not be started.
    #[error("Failed to spawn audio thread: {0}")]
    ThreadSpawn(String),

    /// The device's owning thread exited.
    #[error("Audio thread died unexpectedly")]
    ThreadDied,

    /// The device was used after `close`.
    #[error("Output device is closed")]
    Closed,

    #[error("WAV output error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Audio I/O error: {0}")]
    Io(#[from] std::io::Error),
}
