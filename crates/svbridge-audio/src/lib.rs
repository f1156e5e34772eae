//! Caller-side audio rendering for svbridge.
//!
//! Chunks produced by the engine read loop (in-process or relayed from the
//! helper process) land in a sequence-numbered [`AudioQueue`]. One consumer
//! thread per session renders current chunks to an [`OutputDevice`] and
//! drops stale ones. [`AudioPipeline::cancel`] is the stop path: advance the
//! counter, raise the stopping flag, stop the device without the render
//! lock, drain the queue.

pub mod consumer;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod queue;
pub mod tail;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use consumer::{AudioConsumer, DoneCallback};
pub use convert::convert_u8_to_i16;
pub use error::AudioError;
pub use output::{MarkerCallback, OutputDevice, RodioOutput, WavFileOutput};
pub use pipeline::{AudioPipeline, PipelineOptions};
pub use queue::{AudioQueue, SequenceCounter};
pub use tail::{LinearTailHold, NoTailHold, TailHoldPolicy};
