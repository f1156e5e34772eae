//! The 32-bit helper process.
//!
//! The caller spawns `svbridge-host32` with a loopback address and a
//! one-time key. The host connects back, presents the key and then serves
//! engine commands over the channel until it is told to shut down or the
//! caller goes away.

pub mod dispatcher;
pub mod error;

pub use dispatcher::{Dispatcher, DispatcherOptions};
pub use error::{DispatchError, ServeError};
