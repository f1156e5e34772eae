//! The generation counter and the chunk queue between producer and consumer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use svbridge_core::AudioChunk;

/// Utterance generation number.
///
/// Advanced exactly once per cancel; a chunk is current only while its
/// sequence equals [`SequenceCounter::current`].
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Invalidate everything tagged with the current value; returns the new one.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, sequence: u64) -> bool {
        sequence == self.current()
    }
}

#[derive(Default)]
struct QueueState {
    chunks: VecDeque<AudioChunk>,
    closed: bool,
}

/// Unbounded FIFO of chunks with a timed pop.
#[derive(Default)]
pub struct AudioQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl AudioQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk. Chunks pushed after [`AudioQueue::close`] are dropped.
    pub fn push(&self, chunk: AudioChunk) {
        let mut state = self.state();
        if state.closed {
            return;
        }
        state.chunks.push_back(chunk);
        drop(state);
        self.ready.notify_one();
    }

    /// Wait up to `timeout` for the next chunk.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioChunk> {
        let state = self.state();
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.chunks.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        state.chunks.pop_front()
    }

    /// Discard every queued chunk; returns how many were dropped.
    pub fn drain(&self) -> usize {
        let mut state = self.state();
        let dropped = state.chunks.len();
        state.chunks.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.state().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting chunks and wake every waiter.
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.chunks.clear();
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl std::fmt::Debug for AudioQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioQueue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn counter_advances_by_one() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.advance(), 1);
        assert!(counter.is_current(1));
        assert!(!counter.is_current(0));
    }

    #[test]
    fn pop_is_fifo() {
        let queue = AudioQueue::new();
        queue.push(AudioChunk::audio(vec![1], 0));
        queue.push(AudioChunk::audio(vec![2], 0));
        assert_eq!(queue.pop_timeout(Duration::ZERO).unwrap().payload, vec![1]);
        assert_eq!(queue.pop_timeout(Duration::ZERO).unwrap().payload, vec![2]);
    }

    #[test]
    fn pop_times_out_when_empty() {
        let queue = AudioQueue::new();
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn drain_empties_the_queue() {
        let queue = AudioQueue::new();
        for i in 0..5 {
            queue.push(AudioChunk::audio(vec![i], 0));
        }
        assert_eq!(queue.drain(), 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn close_wakes_a_waiting_consumer() {
        let queue = Arc::new(AudioQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop_timeout(Duration::from_secs(10)))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(waiter.join().unwrap().is_none());

        queue.push(AudioChunk::audio(vec![1], 0));
        assert!(queue.is_empty());
    }
}
