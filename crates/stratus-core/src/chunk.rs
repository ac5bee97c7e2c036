//! The unit of body delivery — an immutable byte range plus its
//! position in the stream.

use bytes::Bytes;

/// One contiguous slice of response body, sequenced relative to its stream.
///
/// Ownership transfers from the transport to the consumer on delivery.
/// `Bytes` keeps the view cheap to hand off; a consumer that needs the
/// data past the release of the stream must copy it out.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Zero-based position of this chunk within its stream.
    pub sequence: u64,
    /// The payload bytes.
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(sequence: u64, payload: Bytes) -> Self {
        Self { sequence, payload }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
