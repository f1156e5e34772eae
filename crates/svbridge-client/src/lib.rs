//! Caller side of the svbridge speech bridge.
//!
//! A caller whose bitness matches the engine uses [`DirectBackend`] and
//! loads it in-process. Any other caller uses [`RemoteBackend`], which
//! starts the 32-bit helper, authenticates its connection and proxies every
//! engine call over it. Both render through a local audio pipeline behind
//! the [`SpeechBackend`] trait, and [`Synth`] picks one from a
//! [`svbridge_core::BridgeMode`].

pub mod backend;
pub mod direct;
pub mod error;
pub mod host_process;
pub mod pending;
pub mod queue;
pub mod remote;
pub mod synth;

pub use backend::{OutputFactory, SessionOptions, SpeechBackend};
pub use direct::DirectBackend;
pub use error::ClientError;
pub use host_process::{HostCommand, HostProcess, resolve_host_command, shutdown_child};
pub use pending::PendingTable;
pub use queue::SpeechQueue;
pub use remote::RemoteBackend;
pub use synth::Synth;
