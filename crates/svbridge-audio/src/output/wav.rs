//! Writes rendered audio to a `.wav` file instead of a speaker.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use hound::{SampleFormat, WavSpec, WavWriter};
use svbridge_core::AudioFormat;

use super::OutputDevice;
use crate::convert::i16_samples;
use crate::error::AudioError;

pub struct WavFileOutput {
    path: PathBuf,
    writer: Mutex<Option<WavWriter<BufWriter<File>>>>,
}

impl WavFileOutput {
    /// Create (or truncate) `path` for 16-bit PCM in `format`.
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self, AudioError> {
        if format.bits_per_sample != 16 {
            return Err(AudioError::UnsupportedFormat {
                bits: format.bits_per_sample,
            });
        }
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        tracing::debug!(path = %path.display(), "Writing speech to WAV file");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> MutexGuard<'_, Option<WavWriter<BufWriter<File>>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutputDevice for WavFileOutput {
    // Nothing written is ever discarded, so the epoch stays at 0.
    fn feed(&self, pcm: &[u8], _epoch: u64) -> Result<(), AudioError> {
        let mut guard = self.writer();
        let writer = guard.as_mut().ok_or(AudioError::Closed)?;
        for sample in i16_samples(pcm) {
            writer.write_sample(sample)?;
        }
        Ok(())
    }

    // Audio already written stays in the file.
    fn stop(&self) {}

    fn pause(&self, _paused: bool) {}

    fn idle(&self) {
        if let Some(writer) = self.writer().as_mut() {
            if let Err(e) = writer.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "WAV flush failed");
            }
        }
    }

    fn close(&self) {
        if let Some(writer) = self.writer().take() {
            if let Err(e) = writer.finalize() {
                tracing::warn!(path = %self.path.display(), error = %e, "WAV finalize failed");
            }
        }
    }
}

impl Drop for WavFileOutput {
    fn drop(&mut self) {
        self.close();
    }
}
