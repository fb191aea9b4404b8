//! EOF-terminated chunk framing for MTU-limited transports.
//!
//! A message is its JSON text split into consecutive slices of at most the
//! negotiated chunk size, followed by one chunk holding exactly `EOF`. The
//! receiver accumulates chunks in delivery order and completes a message only
//! on a chunk byte-for-byte equal to the marker.

use bytes::{Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// End-of-message sentinel chunk.
pub const EOF_MARKER: &[u8] = b"EOF";

/// Default bound on a reassembled message (64KB)
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Framing error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("Data chunk {index} is identical to the EOF marker")]
    SentinelCollision { index: usize },

    #[error("Message too large: {0} bytes (max: {1})")]
    TooLarge(usize, usize),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Splits payloads into transport-sized chunks.
#[derive(Debug, Clone, Copy)]
pub struct ChunkCodec {
    max_chunk_len: usize,
}

impl ChunkCodec {
    pub fn new(max_chunk_len: usize) -> Result<Self, FramingError> {
        if max_chunk_len == 0 {
            return Err(FramingError::ZeroChunkSize);
        }
        Ok(Self { max_chunk_len })
    }

    pub fn max_chunk_len(&self) -> usize {
        self.max_chunk_len
    }

    /// Split `payload` into data chunks followed by the EOF marker.
    ///
    /// An empty payload yields just the marker.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<Bytes>, FramingError> {
        let data_chunks = payload.len().div_ceil(self.max_chunk_len);
        let mut chunks = Vec::with_capacity(data_chunks + 1);
        for (index, slice) in payload.chunks(self.max_chunk_len).enumerate() {
            if slice == EOF_MARKER {
                return Err(FramingError::SentinelCollision { index });
            }
            chunks.push(Bytes::copy_from_slice(slice));
        }
        chunks.push(Bytes::from_static(EOF_MARKER));
        Ok(chunks)
    }

    /// Serialize `message` as JSON and chunk it.
    pub fn encode_json<T: Serialize>(&self, message: &T) -> Result<Vec<Bytes>, FramingError> {
        let json =
            serde_json::to_vec(message).map_err(|e| FramingError::Serialization(e.to_string()))?;
        self.encode(&json)
    }
}

/// Reassembles chunks into complete messages.
#[derive(Debug)]
pub struct ChunkAccumulator {
    buf: BytesMut,
    max_message_len: usize,
}

impl Default for ChunkAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_LEN)
    }
}

impl ChunkAccumulator {
    pub fn new(max_message_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_message_len,
        }
    }

    /// Bytes buffered for the message in progress.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partially received message.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Feed one chunk. Returns the raw message once the marker arrives.
    ///
    /// An oversized message is discarded and reported; the accumulator is
    /// ready for the next message afterwards.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Bytes>, FramingError> {
        if chunk == EOF_MARKER {
            return Ok(Some(self.buf.split().freeze()));
        }
        let total = self.buf.len() + chunk.len();
        if total > self.max_message_len {
            self.buf.clear();
            return Err(FramingError::TooLarge(total, self.max_message_len));
        }
        self.buf.extend_from_slice(chunk);
        Ok(None)
    }

    /// Feed one chunk and JSON-decode the completed message.
    ///
    /// Malformed JSON is reported as [`FramingError::Malformed`]; the buffer
    /// has already been cleared so the next message starts clean.
    pub fn push_json<T: DeserializeOwned>(&mut self, chunk: &[u8]) -> Result<Option<T>, FramingError> {
        match self.push(chunk)? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| FramingError::Malformed(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        kind: String,
        body: Vec<u8>,
    }

    fn reassemble(chunks: &[Bytes]) -> Bytes {
        let mut acc = ChunkAccumulator::default();
        let mut out = None;
        for chunk in chunks {
            if let Some(msg) = acc.push(chunk).unwrap() {
                out = Some(msg);
            }
        }
        out.unwrap()
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert_eq!(ChunkCodec::new(0).unwrap_err(), FramingError::ZeroChunkSize);
    }

    #[test]
    fn test_empty_payload_is_just_marker() {
        let codec = ChunkCodec::new(20).unwrap();
        let chunks = codec.encode(b"").unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(EOF_MARKER)]);
        assert!(reassemble(&chunks).is_empty());
    }

    #[test]
    fn test_exact_multiple_of_chunk_size() {
        let codec = ChunkCodec::new(20).unwrap();
        let payload = vec![b'a'; 60];
        let chunks = codec.encode(&payload).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks[..3].iter().all(|c| c.len() == 20));
        assert_eq!(&chunks[3][..], EOF_MARKER);
    }

    #[test]
    fn test_sentinel_collision_detected() {
        let codec = ChunkCodec::new(3).unwrap();
        let err = codec.encode(b"abcEOFxyz").unwrap_err();
        assert_eq!(err, FramingError::SentinelCollision { index: 1 });

        // Containing the marker is fine as long as no chunk equals it
        let codec = ChunkCodec::new(4).unwrap();
        assert!(codec.encode(b"abcEOFxyz").is_ok());
    }

    #[test]
    fn test_marker_inside_chunk_does_not_terminate() {
        let mut acc = ChunkAccumulator::default();
        assert_eq!(acc.push(b"xxEOF").unwrap(), None);
        assert_eq!(acc.push(b"EOFx").unwrap(), None);
        assert_eq!(acc.push(EOF_MARKER).unwrap().unwrap(), Bytes::from_static(b"xxEOFEOFx"));
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn test_malformed_json_clears_buffer() {
        let mut acc = ChunkAccumulator::default();
        acc.push(b"{not json").unwrap();
        let err = acc.push_json::<Note>(EOF_MARKER).unwrap_err();
        assert!(matches!(err, FramingError::Malformed(_)));
        assert_eq!(acc.pending_len(), 0);

        // Next message decodes normally
        let codec = ChunkCodec::new(7).unwrap();
        let note = Note { kind: "syn".into(), body: vec![1, 2, 3] };
        let mut decoded = None;
        for chunk in codec.encode_json(&note).unwrap() {
            if let Some(n) = acc.push_json::<Note>(&chunk).unwrap() {
                decoded = Some(n);
            }
        }
        assert_eq!(decoded, Some(note));
    }

    #[test]
    fn test_oversized_message_is_discarded() {
        let mut acc = ChunkAccumulator::new(8);
        acc.push(b"12345").unwrap();
        assert_eq!(acc.push(b"6789").unwrap_err(), FramingError::TooLarge(9, 8));
        assert_eq!(acc.pending_len(), 0);
        acc.push(b"ok").unwrap();
        assert_eq!(acc.push(EOF_MARKER).unwrap().unwrap(), Bytes::from_static(b"ok"));
    }

    proptest! {
        #[test]
        fn prop_chunking_round_trip(
            data in prop::collection::vec(any::<u8>(), 0..2048),
            mtu in 4usize..64,
        ) {
            let codec = ChunkCodec::new(mtu).unwrap();
            let chunks = codec.encode(&data).unwrap();
            prop_assert_eq!(chunks.len(), data.len().div_ceil(mtu) + 1);
            prop_assert!(chunks.iter().all(|c| c.len() <= mtu));
            prop_assert_eq!(reassemble(&chunks).to_vec(), data);
        }
    }
}
