//! Deflate compression plus fixed-size chunk framing (§4.F).
//!
//! The GATT characteristic write has a ~512-byte MTU ceiling while
//! reconciliation payloads are larger, so every message is deflated and
//! split into `[index][payload][total]` frames before being handed to the
//! transport adapter.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::ChunkError;

/// Payload bytes per chunk, matching the Kotlin/Android reference this
/// protocol interoperates with.
pub const CHUNK_SIZE: usize = 500;

/// A single `[index][payload][total]` frame, `payload.len() <= CHUNK_SIZE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u8,
    pub payload: Vec<u8>,
    pub total: u8,
}

impl Chunk {
    /// Serialise to the wire representation: index byte, payload, total byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 2);
        out.push(self.index);
        out.extend_from_slice(&self.payload);
        out.push(self.total);
        out
    }

    /// Parse a wire frame. Fails with `FrameTooShort` if it can't even hold
    /// the 2-byte index/total header.
    pub fn from_bytes(frame: &[u8]) -> Result<Self, ChunkError> {
        if frame.len() < 2 {
            return Err(ChunkError::FrameTooShort);
        }
        let index = frame[0];
        let total = frame[frame.len() - 1];
        let payload = frame[1..frame.len() - 1].to_vec();
        Ok(Self {
            index,
            payload,
            total,
        })
    }
}

/// Compress `message` and split it into chunks of at most [`CHUNK_SIZE`]
/// compressed bytes. Fails with `TooManyChunks` if the result needs more
/// than 255 chunks (a single index byte can't address more).
pub fn split(message: &[u8]) -> Result<Vec<Chunk>, ChunkError> {
    let compressed = compress(message)?;

    let num_chunks = compressed.len().div_ceil(CHUNK_SIZE).max(1);
    if num_chunks > 255 {
        return Err(ChunkError::TooManyChunks(num_chunks));
    }
    let total = num_chunks as u8;

    Ok(compressed
        .chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(i, payload)| Chunk {
            index: i as u8,
            payload: payload.to_vec(),
            total,
        })
        .collect())
}

/// Reassemble chunks back into the original message: sort by index,
/// concatenate payloads, inflate.
pub fn join(mut chunks: Vec<Chunk>) -> Result<Vec<u8>, ChunkError> {
    if chunks.is_empty() {
        return Err(ChunkError::Empty);
    }
    chunks.sort_by_key(|c| c.index);

    let mut compressed = Vec::new();
    for chunk in &chunks {
        compressed.extend_from_slice(&chunk.payload);
    }

    decompress(&compressed)
}

fn compress(data: &[u8]) -> Result<Vec<u8>, ChunkError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| ChunkError::Compress(e.to_string()))?;
    encoder.finish().map_err(|e| ChunkError::Compress(e.to_string()))
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, ChunkError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ChunkError::Decompress(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_small_message() {
        let message = b"negentropy reconciliation over BLE";
        let chunks = split(message).unwrap();
        assert_eq!(join(chunks).unwrap(), message);
    }

    #[test]
    fn round_trip_empty_message() {
        let chunks = split(b"").unwrap();
        assert_eq!(join(chunks).unwrap(), b"");
    }

    #[test]
    fn zeros_compress_into_one_chunk() {
        let message = vec![0u8; 2000];
        let chunks = split(&message).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].total, 1);
        assert_eq!(join(chunks).unwrap(), message);
    }

    #[test]
    fn large_incompressible_message_splits_across_chunks() {
        // Pseudo-random bytes don't compress, so this should need several
        // chunks at 500 compressed bytes each.
        let message: Vec<u8> = (0..20_000u32).map(|i| (i * 2654435761) as u8).collect();
        let chunks = split(&message).unwrap();
        assert!(chunks.len() > 1);
        let total = chunks[0].total;
        assert!(chunks.iter().all(|c| c.total == total));
        assert_eq!(chunks.len(), total as usize);
        assert_eq!(join(chunks).unwrap(), message);
    }

    #[test]
    fn too_many_chunks_is_rejected() {
        // 255 * 500 bytes of incompressible data needs exactly the limit;
        // push one byte over to force 256 chunks.
        let message: Vec<u8> = (0..(255 * 500 + 1) as u32)
            .map(|i| (i * 2654435761) as u8)
            .collect();
        assert!(matches!(split(&message), Err(ChunkError::TooManyChunks(_))));
    }

    #[test]
    fn chunk_frame_round_trips_bytes() {
        let chunk = Chunk {
            index: 3,
            payload: vec![1, 2, 3, 4],
            total: 7,
        };
        let frame = chunk.to_bytes();
        assert_eq!(Chunk::from_bytes(&frame).unwrap(), chunk);
    }

    #[test]
    fn frame_too_short_is_rejected() {
        assert!(matches!(
            Chunk::from_bytes(&[1]),
            Err(ChunkError::FrameTooShort)
        ));
    }

    #[test]
    fn join_reorders_out_of_order_chunks() {
        let message = vec![7u8; 3000];
        let mut chunks = split(&message).unwrap();
        chunks.reverse();
        assert_eq!(join(chunks).unwrap(), message);
    }
}
