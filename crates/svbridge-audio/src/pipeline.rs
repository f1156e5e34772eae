//! The caller-side audio pipeline: queue, consumer and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use svbridge_core::{AudioChunk, AudioFormat, ChunkSink};

use crate::consumer::{AudioConsumer, ConsumerShared, DoneCallback, RenderLock, lock_render};
use crate::error::AudioError;
use crate::output::{MarkerCallback, OutputDevice};
use crate::queue::{AudioQueue, SequenceCounter};
use crate::tail::{NoTailHold, TailHoldPolicy};

/// How an [`AudioPipeline`] is built.
pub struct PipelineOptions {
    /// Consumer queue poll timeout.
    pub poll: Duration,
    pub on_done: Option<DoneCallback>,
    pub tail: Box<dyn TailHoldPolicy>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(100),
            on_done: None,
            tail: Box::new(NoTailHold),
        }
    }
}

impl std::fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("poll", &self.poll)
            .field("on_done", &self.on_done.is_some())
            .finish_non_exhaustive()
    }
}

/// One session's rendering destination.
///
/// Producers push chunks through the [`ChunkSink`] impl; the consumer
/// thread renders them. [`AudioPipeline::cancel`] silences everything
/// in flight.
pub struct AudioPipeline {
    queue: Arc<AudioQueue>,
    counter: SequenceCounter,
    stopping: Arc<AtomicBool>,
    device: Arc<dyn OutputDevice>,
    render_lock: RenderLock,
    tail: Arc<Mutex<Box<dyn TailHoldPolicy>>>,
    consumer: Mutex<Option<AudioConsumer>>,
}

impl AudioPipeline {
    /// Start the consumer thread for audio in `engine_format`.
    pub fn new(
        device: Arc<dyn OutputDevice>,
        engine_format: AudioFormat,
        options: PipelineOptions,
    ) -> Result<Self, AudioError> {
        let queue = Arc::new(AudioQueue::new());
        let counter = SequenceCounter::new();
        let stopping = Arc::new(AtomicBool::new(false));
        let render_lock: RenderLock = Arc::new(Mutex::new(()));
        let tail = Arc::new(Mutex::new(options.tail));

        let consumer = AudioConsumer::spawn(ConsumerShared {
            queue: Arc::clone(&queue),
            counter: counter.clone(),
            stopping: Arc::clone(&stopping),
            device: Arc::clone(&device),
            render_lock: Arc::clone(&render_lock),
            tail: Arc::clone(&tail),
            on_done: options.on_done,
            engine_format,
            poll: options.poll,
        })?;

        tracing::debug!(
            sample_rate = engine_format.sample_rate,
            bits = engine_format.bits_per_sample,
            "Audio pipeline started"
        );

        Ok(Self {
            queue,
            counter,
            stopping,
            device,
            render_lock,
            tail,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    /// The live sequence counter, shared with producers.
    pub fn counter(&self) -> &SequenceCounter {
        &self.counter
    }

    pub fn sequence(&self) -> u64 {
        self.counter.current()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Accept audio again and return the sequence new chunks must carry.
    pub fn begin_utterance(&self) -> u64 {
        self.stopping.store(false, Ordering::SeqCst);
        self.counter.current()
    }

    /// Silence everything in flight. Returns the new sequence.
    ///
    /// The device is stopped without the render lock held: the consumer
    /// may be blocked inside `feed` while holding it, and `stop` is what
    /// releases it. The engine must be told to stop by the caller after
    /// this returns.
    pub fn cancel(&self) -> u64 {
        let sequence = self.counter.advance();
        self.stopping.store(true, Ordering::SeqCst);
        self.device.stop();
        let dropped = self.queue.drain();
        tracing::debug!(sequence, dropped, "Audio cancelled");
        sequence
    }

    /// Queue a chunk from a non-async producer.
    pub fn enqueue(&self, chunk: AudioChunk) {
        self.queue.push(chunk);
    }

    pub fn pause(&self, paused: bool) {
        let _guard = lock_render(&self.render_lock);
        self.device.pause(paused);
    }

    /// Queue a marker behind the audio already handed to the device.
    pub fn feed_marker(&self, on_done: MarkerCallback) -> Result<(), AudioError> {
        let _guard = lock_render(&self.render_lock);
        self.device.feed_marker(on_done)
    }

    pub fn idle(&self) {
        let _guard = lock_render(&self.render_lock);
        self.device.idle();
    }

    pub fn set_tail_hold(&self, policy: Box<dyn TailHoldPolicy>) {
        *self.tail.lock().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Stop the consumer and close the device. Idempotent.
    pub fn close(&self) {
        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut consumer) = consumer else {
            return;
        };
        self.counter.advance();
        self.device.stop();
        consumer.shutdown();
        let _guard = lock_render(&self.render_lock);
        self.device.close();
        tracing::debug!("Audio pipeline closed");
    }
}

#[async_trait]
impl ChunkSink for AudioPipeline {
    async fn push(&self, chunk: AudioChunk) {
        self.enqueue(chunk);
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for AudioPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPipeline")
            .field("sequence", &self.sequence())
            .field("stopping", &self.is_stopping())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}
