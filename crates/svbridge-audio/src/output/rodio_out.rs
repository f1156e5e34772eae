//! Playback on the default output device via `rodio`.
//!
//! `rodio::OutputStream` is `!Send` on some platforms, so it lives on a
//! dedicated thread for the device's whole lifetime. Only the `Send + Sync`
//! stream handle and sinks cross threads.
//!
//! `feed` applies back-pressure by waiting while the sink already holds
//! [`MAX_QUEUED_BUFFERS`] buffers. `stop` bumps the generation, which is the
//! device epoch, and swaps in a fresh sink so the old one's audio is
//! discarded. Both happen under the sink lock, and `feed` compares its epoch
//! under the same lock before appending, so a stale write can never land in
//! the fresh sink. A bumped generation also releases any waiting `feed` or
//! `wait_until_played`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use svbridge_core::AudioFormat;

use super::{MarkerCallback, OutputDevice};
use crate::convert::i16_samples;
use crate::error::AudioError;

/// Buffers queued in the sink before `feed` starts waiting.
pub const MAX_QUEUED_BUFFERS: usize = 8;

const FEED_POLL: Duration = Duration::from_millis(5);

pub struct RodioOutput {
    format: AudioFormat,
    handle: OutputStreamHandle,
    sink: Mutex<Arc<Sink>>,
    generation: AtomicU64,
    stream_thread: Mutex<Option<(mpsc::Sender<()>, thread::JoinHandle<()>)>>,
}

impl RodioOutput {
    /// Open the default device for 16-bit PCM in `format`.
    pub fn open(format: AudioFormat) -> Result<Self, AudioError> {
        if format.bits_per_sample != 16 {
            return Err(AudioError::UnsupportedFormat {
                bits: format.bits_per_sample,
            });
        }

        let (init_tx, init_rx) = mpsc::channel::<Result<OutputStreamHandle, AudioError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("svbridge-output".into())
            .spawn(move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = init_tx.send(Err(AudioError::OutputStream(e.to_string())));
                        return;
                    }
                };
                if init_tx.send(Ok(handle)).is_err() {
                    return;
                }
                // Block until close; any result (including a dropped sender) ends the stream.
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("Output stream thread shutting down");
            })
            .map_err(|e| AudioError::ThreadSpawn(e.to_string()))?;

        let handle = init_rx.recv().map_err(|_| AudioError::ThreadDied)??;
        let sink = Sink::try_new(&handle).map_err(|e| AudioError::OutputStream(e.to_string()))?;

        tracing::info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Audio playback initialized on default output device"
        );

        Ok(Self {
            format,
            handle,
            sink: Mutex::new(Arc::new(sink)),
            generation: AtomicU64::new(0),
            stream_thread: Mutex::new(Some((shutdown_tx, thread))),
        })
    }

    fn sink_slot(&self) -> MutexGuard<'_, Arc<Sink>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_sink(&self) -> Arc<Sink> {
        Arc::clone(&self.sink_slot())
    }

    fn is_closed(&self) -> bool {
        self.stream_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl OutputDevice for RodioOutput {
    fn epoch(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn feed(&self, pcm: &[u8], epoch: u64) -> Result<(), AudioError> {
        if self.is_closed() {
            return Err(AudioError::Closed);
        }
        let samples = i16_samples(pcm);
        if samples.is_empty() {
            return Ok(());
        }
        let buffer = SamplesBuffer::new(self.format.channels, self.format.sample_rate, samples);

        loop {
            {
                let sink = self.sink_slot();
                if self.generation.load(Ordering::SeqCst) != epoch {
                    tracing::trace!(epoch, "Discarding audio from before a stop");
                    return Ok(());
                }
                if sink.len() < MAX_QUEUED_BUFFERS {
                    sink.append(buffer);
                    return Ok(());
                }
            }
            thread::sleep(FEED_POLL);
        }
    }

    fn feed_marker(&self, on_done: MarkerCallback) -> Result<(), AudioError> {
        let callback = Mutex::new(Some(on_done));
        let marker = EmptyCallback::<f32>::new(Box::new(move || {
            let taken = callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(on_done) = taken {
                on_done();
            }
        }));
        self.current_sink().append(marker);
        Ok(())
    }

    fn stop(&self) {
        let old = {
            let mut slot = self.sink_slot();
            self.generation.fetch_add(1, Ordering::SeqCst);
            match Sink::try_new(&self.handle) {
                Ok(fresh) => std::mem::replace(&mut *slot, Arc::new(fresh)),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not create a fresh sink, reusing the old one");
                    Arc::clone(&slot)
                }
            }
        };
        old.stop();
        tracing::debug!("Audio playback stopped");
    }

    fn pause(&self, paused: bool) {
        let sink = self.current_sink();
        if paused {
            sink.pause();
        } else {
            sink.play();
        }
    }

    fn idle(&self) {
        tracing::trace!(queued = self.current_sink().len(), "Output idle");
    }

    fn wait_until_played(&self, epoch: u64) {
        while self.generation.load(Ordering::SeqCst) == epoch && !self.is_closed() {
            if self.current_sink().empty() {
                return;
            }
            thread::sleep(FEED_POLL);
        }
    }

    fn close(&self) {
        self.stop();
        let taken = self
            .stream_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((shutdown_tx, thread)) = taken {
            let _ = shutdown_tx.send(());
            let _ = thread.join();
        }
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        self.close();
    }
}
