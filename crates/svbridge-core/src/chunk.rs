//! The unit of streamed audio.

/// One piece of streamed audio plus its generation tag.
///
/// An empty payload with `is_final` set marks the end of an utterance.
/// `index` is reserved for marker correlation; the engine path never sets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub payload: Vec<u8>,
    pub index: Option<i32>,
    pub is_final: bool,
    pub sequence: u64,
}

impl AudioChunk {
    /// A chunk carrying engine audio.
    pub const fn audio(payload: Vec<u8>, sequence: u64) -> Self {
        Self {
            payload,
            index: None,
            is_final: false,
            sequence,
        }
    }

    /// The end-of-utterance marker for `sequence`.
    pub const fn end_of_utterance(sequence: u64) -> Self {
        Self {
            payload: Vec::new(),
            index: None,
            is_final: true,
            sequence,
        }
    }

    /// True for the empty terminal chunk.
    pub fn is_end_marker(&self) -> bool {
        self.is_final && self.payload.is_empty() && self.index.is_none()
    }
}
