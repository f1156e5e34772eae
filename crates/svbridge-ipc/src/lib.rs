//! Private channel between the caller and the 32-bit helper process.
//!
//! One TCP loopback connection, opened with a pre-shared-key handshake and
//! then carrying length-prefixed JSON envelopes in both directions.

pub mod channel;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod protocol;

pub use channel::{FrameReceiver, FrameSender, split_stream};
pub use envelope::{Envelope, Payload, codes, from_payload, to_payload};
pub use error::ChannelError;
pub use frame::{MAX_FRAME_LEN, decode_frame, encode_frame, read_frame};
pub use handshake::{AUTH_KEY_LEN, AuthKey, accept_authenticated, bind_loopback, connect_authenticated};
pub use protocol::{
    AudioEvent, InitializeRequest, SetParameterRequest, SpeakRequest, StatusReply, StreamSettings,
    commands, events,
};
