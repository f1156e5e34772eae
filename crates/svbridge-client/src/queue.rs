//! Bounded speech job queue drained by a fixed pool of workers.
//!
//! With the default single worker, utterances are spoken in the order they
//! were queued. [`SpeechQueue::cancel`] discards jobs that have not started
//! yet; stopping the one in progress is the backend's job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::SpeechBackend;
use crate::error::ClientError;

/// Default number of jobs that may wait for a worker.
pub const DEFAULT_CAPACITY: usize = 32;

struct SpeechJob {
    text: String,
    generation: u64,
}

/// Speech jobs waiting for a worker.
pub struct SpeechQueue {
    sender: Mutex<Option<mpsc::Sender<SpeechJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    generation: Arc<AtomicU64>,
}

impl SpeechQueue {
    /// One worker, so utterances never overlap or reorder.
    pub fn new(backend: Arc<dyn SpeechBackend>) -> Self {
        Self::with_workers(backend, 1, DEFAULT_CAPACITY)
    }

    pub fn with_workers(backend: Arc<dyn SpeechBackend>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let generation = Arc::new(AtomicU64::new(0));

        let workers = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&backend),
                    Arc::clone(&receiver),
                    Arc::clone(&generation),
                ))
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            generation,
        }
    }

    /// Queue `text`, waiting for room if the queue is full.
    pub async fn enqueue(&self, text: impl Into<String>) -> Result<(), ClientError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ClientError::Closed)?;
        let job = SpeechJob {
            text: text.into(),
            generation: self.generation.load(Ordering::SeqCst),
        };
        sender.send(job).await.map_err(|_| ClientError::Closed)
    }

    /// Discard every job that has not started.
    pub fn cancel(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(generation, "Speech queue cancelled");
    }

    /// Close the queue and wait for the workers to finish what they hold.
    /// Jobs still queued are discarded. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel();
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Speech worker failed");
            }
        }
    }
}

impl std::fmt::Debug for SpeechQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechQueue")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    worker: usize,
    backend: Arc<dyn SpeechBackend>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<SpeechJob>>>,
    generation: Arc<AtomicU64>,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            tracing::debug!(worker, "Speech worker exiting");
            return;
        };
        if job.generation != generation.load(Ordering::SeqCst) {
            tracing::debug!(worker, "Skipping cancelled speech job");
            continue;
        }
        // Checked again by the backend once the pipeline is armed: a cancel
        // between here and there must still win.
        let (current, started) = (Arc::clone(&generation), job.generation);
        let withdrawn = move || current.load(Ordering::SeqCst) != started;
        match backend.speak_unless(&job.text, &withdrawn).await {
            Ok(outcome) => tracing::debug!(worker, ?outcome, "Speech job finished"),
            Err(e) => tracing::warn!(worker, error = %e, "Speech job failed"),
        }
    }
}
