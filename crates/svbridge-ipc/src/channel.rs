//! The two halves of an established channel.
//!
//! [`FrameSender`] is cheap to clone and serialises concurrent senders with
//! an async mutex so frames never interleave. [`FrameReceiver`] is owned by
//! exactly one reader task.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::envelope::Envelope;
use crate::error::ChannelError;
use crate::frame::{encode_frame, read_frame};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a channel.
#[derive(Clone)]
pub struct FrameSender {
    writer: Arc<Mutex<BoxedWriter>>,
}

impl FrameSender {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Send one envelope as a single frame.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        let frame = encode_frame(envelope)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut down the write direction; the peer's reader sees end-of-stream.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "Channel shutdown failed");
        }
    }
}

impl std::fmt::Debug for FrameSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSender").finish_non_exhaustive()
    }
}

/// Read half of a channel.
pub struct FrameReceiver {
    reader: BoxedReader,
}

impl FrameReceiver {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }

    /// Receive the next envelope.
    ///
    /// Fails with [`ChannelError::PeerClosed`] if the peer closes before a
    /// full frame arrives.
    pub async fn recv(&mut self) -> Result<Envelope, ChannelError> {
        read_frame(&mut self.reader).await
    }
}

impl std::fmt::Debug for FrameReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReceiver").finish_non_exhaustive()
    }
}

/// Split an authenticated socket into channel halves.
pub fn split_stream(stream: TcpStream) -> (FrameSender, FrameReceiver) {
    let (read, write) = stream.into_split();
    (FrameSender::new(write), FrameReceiver::new(read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Payload;

    #[tokio::test]
    async fn sends_arrive_in_order() {
        let (a, b) = tokio::io::duplex(64);
        let sender = FrameSender::new(a);
        let mut receiver = FrameReceiver::new(b);

        let writer = tokio::spawn(async move {
            for id in 0..20 {
                sender.send(&Envelope::ok(id, Payload::new())).await.unwrap();
            }
        });

        for id in 0..20 {
            assert_eq!(receiver.recv().await.unwrap(), Envelope::ok(id, Payload::new()));
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn closed_peer_is_reported() {
        let (a, b) = tokio::io::duplex(64);
        let mut receiver = FrameReceiver::new(b);
        drop(a);
        assert!(matches!(receiver.recv().await, Err(ChannelError::PeerClosed)));
    }
}
