//! Output devices.
//!
//! Every method takes `&self` so a device can be shared between the
//! consumer thread, which feeds it under the render lock, and the cancel
//! path, which calls [`OutputDevice::stop`] without that lock. `stop` must
//! therefore return promptly even while another thread is inside `feed`,
//! and must make that `feed` return.
//!
//! Every `stop` moves the device to a new epoch. The consumer reads the
//! epoch before deciding a chunk is still live and hands it to `feed`; a
//! device must drop a write whose epoch is no longer current, so audio
//! judged live just before a stop never reaches the post-stop buffer.

mod rodio_out;
mod wav;

pub use rodio_out::RodioOutput;
pub use wav::WavFileOutput;

use crate::error::AudioError;

/// Callback invoked when a marker is reached.
pub type MarkerCallback = Box<dyn FnOnce() + Send + 'static>;

pub trait OutputDevice: Send + Sync {
    /// The current stop epoch. Devices that never discard audio keep it at 0.
    fn epoch(&self) -> u64 {
        0
    }

    /// Render PCM in the device's output format, unless a `stop` has moved
    /// the device past `epoch`. May block for buffer space.
    fn feed(&self, pcm: &[u8], epoch: u64) -> Result<(), AudioError>;

    /// Queue a zero-length marker whose callback fires when playback
    /// reaches it. Devices without marker support fire it immediately,
    /// after everything fed so far has been handed off.
    fn feed_marker(&self, on_done: MarkerCallback) -> Result<(), AudioError> {
        on_done();
        Ok(())
    }

    /// Discard buffered audio and release any blocked `feed`.
    fn stop(&self);

    fn pause(&self, paused: bool);

    /// No more audio is coming for now.
    fn idle(&self);

    /// Block until everything fed in `epoch` has played out, or until a
    /// `stop` ends that epoch. Devices without a playback queue return at once.
    fn wait_until_played(&self, _epoch: u64) {}

    fn close(&self);
}
