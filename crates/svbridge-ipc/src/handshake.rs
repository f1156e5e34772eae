//! Pre-shared-key handshake over TCP loopback.
//!
//! The listening side generates an [`AuthKey`], passes it to the process it
//! spawns, and waits. The spawned process connects and writes the raw key
//! bytes, unframed, as the first thing on the socket. Anything else closes
//! the connection before a single frame is read.

use std::fmt::Write;
use std::net::{Ipv4Addr, SocketAddr};

use rand::TryRngCore;
use rand::rngs::OsRng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::channel::{FrameReceiver, FrameSender, split_stream};
use crate::error::ChannelError;

pub const AUTH_KEY_LEN: usize = 16;

/// Random 16-byte secret shared between the two processes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AuthKey([u8; AUTH_KEY_LEN]);

impl AuthKey {
    /// Draw all 128 bits from the operating system's generator.
    pub fn generate() -> Result<Self, ChannelError> {
        let mut bytes = [0u8; AUTH_KEY_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| ChannelError::Io(std::io::Error::other(e)))?;
        Ok(Self(bytes))
    }

    pub const fn as_bytes(&self) -> &[u8; AUTH_KEY_LEN] {
        &self.0
    }

    /// 32 lowercase hex characters, as passed on the command line.
    pub fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(AUTH_KEY_LEN * 2);
        for byte in &self.0 {
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }

    pub fn from_hex(hex: &str) -> Result<Self, ChannelError> {
        let hex = hex.trim();
        if hex.len() != AUTH_KEY_LEN * 2 {
            return Err(ChannelError::InvalidKey(format!(
                "expected {} hex characters, got {}",
                AUTH_KEY_LEN * 2,
                hex.len()
            )));
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ChannelError::InvalidKey(
                "expected only hex digits".to_string(),
            ));
        }
        let mut bytes = [0u8; AUTH_KEY_LEN];
        for (byte, pair) in bytes.iter_mut().zip(hex.as_bytes().chunks_exact(2)) {
            *byte = (hex_digit(pair[0]) << 4) | hex_digit(pair[1]);
        }
        Ok(Self(bytes))
    }

    /// Compare without short-circuiting on the first differing byte.
    fn matches(&self, other: &[u8]) -> bool {
        other.len() == AUTH_KEY_LEN
            && self
                .0
                .iter()
                .zip(other)
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

/// Value of one ASCII hex digit, already checked by the caller.
const fn hex_digit(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => c - b'A' + 10,
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthKey(..)")
    }
}

/// Listen on an ephemeral loopback port.
pub async fn bind_loopback() -> Result<TcpListener, ChannelError> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await?;
    tracing::debug!(addr = ?listener.local_addr().ok(), "Listening for helper connection");
    Ok(listener)
}

/// Accept one connection and verify its key.
///
/// On mismatch the socket is dropped (closed) and
/// [`ChannelError::HandshakeRejected`] is returned.
pub async fn accept_authenticated(
    listener: &TcpListener,
    key: &AuthKey,
) -> Result<(FrameSender, FrameReceiver), ChannelError> {
    let (mut stream, peer) = listener.accept().await?;

    let mut presented = [0u8; AUTH_KEY_LEN];
    if let Err(e) = stream.read_exact(&mut presented).await {
        tracing::warn!(%peer, error = %e, "Peer closed during handshake");
        return Err(ChannelError::HandshakeRejected);
    }
    if !key.matches(&presented) {
        tracing::warn!(%peer, "Rejected connection with wrong key");
        drop(stream);
        return Err(ChannelError::HandshakeRejected);
    }

    stream.set_nodelay(true)?;
    tracing::debug!(%peer, "Helper connection authenticated");
    Ok(split_stream(stream))
}

/// Connect to `addr` and present `key`.
pub async fn connect_authenticated(
    addr: SocketAddr,
    key: &AuthKey,
) -> Result<(FrameSender, FrameReceiver), ChannelError> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(key.as_bytes()).await?;
    stream.set_nodelay(true)?;
    Ok(split_stream(stream))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn hex_round_trip() {
        let key = AuthKey::generate().unwrap();
        let hex = key.to_hex();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(AuthKey::from_hex(&hex).unwrap(), key);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(AuthKey::from_hex("abc").is_err());
        assert!(AuthKey::from_hex(&"z".repeat(32)).is_err());
        assert!(AuthKey::from_hex(&"+f".repeat(16)).is_err());
        // A hyphenated UUID is not a key.
        assert!(AuthKey::from_hex("67e55044-10b1-426f-9247-bb680e5fe0c8").is_err());
    }

    #[test]
    fn keys_are_random() {
        assert_ne!(AuthKey::generate().unwrap(), AuthKey::generate().unwrap());
    }

    #[test]
    fn no_bits_of_the_key_are_fixed() {
        // A v4 UUID pins the version nibble and the variant bits; a key
        // must not.
        let keys: Vec<AuthKey> = (0..64).map(|_| AuthKey::generate().unwrap()).collect();
        let nibbles: HashSet<u8> = keys.iter().map(|k| k.as_bytes()[6] >> 4).collect();
        let variants: HashSet<u8> = keys.iter().map(|k| k.as_bytes()[8] >> 6).collect();
        assert!(nibbles.len() > 1);
        assert!(variants.len() > 1);
    }

    #[test]
    fn hex_is_lowercase_and_ordered() {
        let key = AuthKey::from_hex("000102030405060708090A0B0C0D0EFF").unwrap();
        assert_eq!(key.as_bytes()[15], 0xff);
        assert_eq!(key.to_hex(), "000102030405060708090a0b0c0d0eff");
    }

    #[test]
    fn comparison_checks_length() {
        let key = AuthKey::generate().unwrap();
        assert!(key.matches(key.as_bytes()));
        assert!(!key.matches(&key.as_bytes()[..8]));
    }
}
