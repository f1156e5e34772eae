//! Length-prefixed framing.
//!
//! ```text
//! +----------------+---------------------------+
//! | len: u32 (BE)  | len bytes of JSON envelope |
//! +----------------+---------------------------+
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::envelope::Envelope;
use crate::error::ChannelError;

pub const HEADER_LEN: usize = 4;

/// Upper bound on a single frame body.
///
/// Utterance text is capped well below this and audio events carry one
/// engine read buffer, so anything larger is a corrupt header.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Serialize `envelope` into one complete frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, ChannelError> {
    let body = serde_json::to_vec(envelope)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }
    // Checked against MAX_FRAME_LEN above.
    #[allow(clippy::cast_possible_truncation)]
    let len = body.len() as u32;
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame, and
/// otherwise the envelope plus the number of bytes consumed.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Envelope, usize)>, ChannelError> {
    let Some(header) = buf.get(..HEADER_LEN) else {
        return Ok(None);
    };
    let len = body_len(header)?;
    let Some(body) = buf.get(HEADER_LEN..HEADER_LEN + len) else {
        return Ok(None);
    };
    let envelope = parse_body(body)?;
    Ok(Some((envelope, HEADER_LEN + len)))
}

/// Read exactly one frame, looping until the declared length is satisfied.
pub async fn read_frame<R>(reader: &mut R) -> Result<Envelope, ChannelError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(ChannelError::from_read)?;
    let len = body_len(&header)?;

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(ChannelError::from_read)?;
    parse_body(&body)
}

fn body_len(header: &[u8]) -> Result<usize, ChannelError> {
    let bytes: [u8; HEADER_LEN] = header
        .try_into()
        .map_err(|_| ChannelError::Malformed("short frame header".to_string()))?;
    let len = u32::from_be_bytes(bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(len)
}

fn parse_body(body: &[u8]) -> Result<Envelope, ChannelError> {
    serde_json::from_slice(body).map_err(|e| ChannelError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Payload;
    use serde_json::json;

    fn event_with_bytes(n: usize) -> Envelope {
        let mut payload = Payload::new();
        payload.insert("data".into(), json!("x".repeat(n)));
        Envelope::event("audio", payload)
    }

    #[test]
    fn header_is_big_endian_length() {
        let frame = encode_frame(&Envelope::ok(1, Payload::new())).unwrap();
        let len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - HEADER_LEN);
    }

    #[test]
    fn partial_buffers_are_incomplete() {
        let envelope = event_with_bytes(100);
        let frame = encode_frame(&envelope).unwrap();
        assert!(decode_frame(&frame[..2]).unwrap().is_none());
        assert!(decode_frame(&frame[..frame.len() - 1]).unwrap().is_none());

        let (decoded, used) = decode_frame(&frame).unwrap().unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(used, frame.len());
    }

    #[test]
    fn consecutive_frames_decode_in_order() {
        let first = Envelope::ok(1, Payload::new());
        let second = Envelope::error(2, "unknownCommand");
        let mut buf = encode_frame(&first).unwrap();
        buf.extend(encode_frame(&second).unwrap());

        let (a, used) = decode_frame(&buf).unwrap().unwrap();
        let (b, _) = decode_frame(&buf[used..]).unwrap().unwrap();
        assert_eq!((a, b), (first, second));
    }

    #[test]
    fn oversized_header_is_rejected() {
        let mut buf = u32::MAX.to_be_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        assert!(matches!(
            decode_frame(&buf),
            Err(ChannelError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn garbage_body_is_malformed() {
        let mut buf = 3u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"nah");
        assert!(matches!(decode_frame(&buf), Err(ChannelError::Malformed(_))));
    }
}
