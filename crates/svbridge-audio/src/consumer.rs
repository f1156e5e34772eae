//! The audio consumer thread.
//!
//! One thread per session pulls chunks off the [`AudioQueue`] and renders
//! them. It owns no engine state and never blocks on anything but the queue
//! (with a short timeout) and the device's `feed`.
//!
//! For each chunk, at dequeue time:
//!
//! * a sequence different from the live counter means the chunk is stale
//!   and is dropped unrendered;
//! * an end-of-utterance marker flushes any held tail, idles the device,
//!   waits for the device to play everything out and then fires the
//!   completion callback, unless a stop intervened;
//! * audio is widened if needed and fed to the device under the render lock.
//!
//! Only whole sample frames are fed; a partial frame at the end of a chunk
//! is carried over to the next one.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use svbridge_core::{AudioChunk, AudioFormat};

use crate::convert::convert_u8_to_i16;
use crate::error::AudioError;
use crate::output::OutputDevice;
use crate::queue::{AudioQueue, SequenceCounter};
use crate::tail::TailHoldPolicy;

/// Invoked once per utterance that completes without being cancelled.
pub type DoneCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Serialises device calls made on behalf of the consumer and the caller.
pub type RenderLock = Arc<Mutex<()>>;

pub(crate) fn lock_render(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the consumer thread shares with its pipeline.
pub(crate) struct ConsumerShared {
    pub queue: Arc<AudioQueue>,
    pub counter: SequenceCounter,
    pub stopping: Arc<AtomicBool>,
    pub device: Arc<dyn OutputDevice>,
    pub render_lock: RenderLock,
    pub tail: Arc<Mutex<Box<dyn TailHoldPolicy>>>,
    pub on_done: Option<DoneCallback>,
    pub engine_format: AudioFormat,
    pub poll: Duration,
}

/// Handle to a running consumer thread.
pub struct AudioConsumer {
    queue: Arc<AudioQueue>,
    stopping: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AudioConsumer {
    pub(crate) fn spawn(shared: ConsumerShared) -> Result<Self, AudioError> {
        let queue = Arc::clone(&shared.queue);
        let stopping = Arc::clone(&shared.stopping);
        let thread = thread::Builder::new()
            .name("svbridge-audio".into())
            .spawn(move || Worker::new(shared).run())
            .map_err(|e| AudioError::ThreadSpawn(e.to_string()))?;
        Ok(Self {
            queue,
            stopping,
            thread: Some(thread),
        })
    }

    /// Whether a stop is in progress.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Close the queue and join the thread.
    pub fn shutdown(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.queue.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Audio consumer thread panicked");
            }
        }
    }
}

impl Drop for AudioConsumer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    shared: ConsumerShared,
    widen: bool,
    output_format: AudioFormat,
    held: Vec<u8>,
    held_sequence: u64,
}

impl Worker {
    fn new(shared: ConsumerShared) -> Self {
        let widen = shared.engine_format.needs_widening();
        let output_format = shared.engine_format.output_format();
        Self {
            shared,
            widen,
            output_format,
            held: Vec::new(),
            held_sequence: 0,
        }
    }

    fn stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    fn run(mut self) {
        tracing::debug!("Audio consumer started");
        loop {
            let Some(chunk) = self.shared.queue.pop_timeout(self.shared.poll) else {
                if self.shared.queue.is_closed() {
                    break;
                }
                continue;
            };
            self.handle(chunk);
        }
        tracing::debug!("Audio consumer exiting");
    }

    fn handle(&mut self, chunk: AudioChunk) {
        if !self.shared.counter.is_current(chunk.sequence) {
            tracing::trace!(sequence = chunk.sequence, "Dropping stale chunk");
            self.held.clear();
            return;
        }
        if self.held_sequence != chunk.sequence {
            self.held.clear();
            self.held_sequence = chunk.sequence;
        }

        if chunk.is_end_marker() {
            self.finish_utterance(chunk.sequence);
            return;
        }
        if self.stopping() {
            self.held.clear();
            return;
        }

        let pcm = if self.widen {
            convert_u8_to_i16(&chunk.payload)
        } else {
            chunk.payload
        };
        let ready = self.hold_tail(pcm);
        if !ready.is_empty() {
            self.render(chunk.sequence, &ready);
        }
    }

    /// Append `pcm` to the held tail and return what may be rendered now:
    /// whole frames only, keeping back the policy's hold.
    fn hold_tail(&mut self, pcm: Vec<u8>) -> Vec<u8> {
        let hold = self
            .shared
            .tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .hold_bytes(&self.output_format);
        let frame = self.output_format.frame_bytes();
        if hold == 0 && self.held.is_empty() && pcm.len() % frame == 0 {
            return pcm;
        }
        self.held.extend_from_slice(&pcm);
        let ready = self.held.len().saturating_sub(hold);
        let ready = ready - ready % frame;
        let rest = self.held.split_off(ready);
        std::mem::replace(&mut self.held, rest)
    }

    fn render(&self, sequence: u64, pcm: &[u8]) {
        let _guard = lock_render(&self.shared.render_lock);
        // Taken before the liveness check: a stop landing after the check
        // moves the device past this epoch and the write is dropped.
        let epoch = self.shared.device.epoch();
        if self.stopping() || !self.shared.counter.is_current(sequence) {
            return;
        }
        if let Err(e) = self.shared.device.feed(pcm, epoch) {
            tracing::warn!(error = %e, bytes = pcm.len(), "Output device feed failed");
        }
    }

    fn finish_utterance(&mut self, sequence: u64) {
        let tail = std::mem::take(&mut self.held);
        if self.stopping() {
            return;
        }
        let epoch = {
            let _guard = lock_render(&self.shared.render_lock);
            let epoch = self.shared.device.epoch();
            if self.stopping() || !self.shared.counter.is_current(sequence) {
                return;
            }
            if !tail.is_empty() {
                if let Err(e) = self.shared.device.feed(&tail, epoch) {
                    tracing::warn!(error = %e, "Output device feed failed");
                }
            }
            self.shared.device.idle();
            epoch
        };

        // Outside the render lock so pause and markers still get through.
        self.shared.device.wait_until_played(epoch);
        if self.stopping() || !self.shared.counter.is_current(sequence) {
            tracing::trace!(sequence, "Stopped before playback finished");
            return;
        }
        if let Some(on_done) = &self.shared.on_done {
            if catch_unwind(AssertUnwindSafe(|| on_done())).is_err() {
                tracing::error!(sequence, "Done callback panicked");
            }
        }
    }
}
