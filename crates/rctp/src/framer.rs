/// Message framing: split an opaque payload into fixed-size chunks and put
/// it back together.
///
/// Chunk `i` spans `[i*S, min(len, (i+1)*S))` where `S` is the chunk payload
/// size; the final chunk is zero-padded to `S`. A payload that is an exact
/// multiple of `S` produces no trailing empty chunk, and an empty payload
/// produces no chunks at all.

use std::collections::BTreeMap;

use crate::bitfield::ChunkBitfield;
use crate::error::TransferError;
use crate::protocol::{
    Chunk, ChunkIndex, ChunkIndexing, MAX_CHUNKS, MessageKind, Metadata, Packet, RadioPacket,
};

/// A completed message handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub data: Vec<u8>,
}

/// A payload cut into chunk payloads, ready to be sent.
#[derive(Debug, Clone)]
pub struct FramedMessage {
    pub metadata: Metadata,
    pub indexing: ChunkIndexing,
    /// Each entry is exactly one chunk payload size long.
    pub chunks: Vec<Vec<u8>>,
}

impl FramedMessage {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn metadata_packet(&self) -> RadioPacket {
        Packet::Metadata(self.metadata).encode(self.indexing)
    }

    /// Encoded data packet for chunk `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn chunk_packet(&self, index: ChunkIndex) -> RadioPacket {
        Packet::Chunk(Chunk {
            index: Some(index),
            payload: &self.chunks[index as usize],
        })
        .encode(self.indexing)
    }
}

/// Largest payload a single message can carry under `indexing`.
pub fn max_payload(indexing: ChunkIndexing) -> usize {
    (MAX_CHUNKS * indexing.chunk_payload_size()).min(u32::MAX as usize)
}

/// Split `payload` into the metadata announcement and padded chunk payloads.
pub fn split(
    payload: &[u8],
    kind: MessageKind,
    indexing: ChunkIndexing,
) -> Result<FramedMessage, TransferError> {
    let max = max_payload(indexing);
    if payload.len() > max {
        return Err(TransferError::PayloadTooLarge {
            len: payload.len(),
            max,
        });
    }

    let size = indexing.chunk_payload_size();
    let chunks = payload
        .chunks(size)
        .map(|slice| {
            let mut chunk = vec![0u8; size];
            chunk[..slice.len()].copy_from_slice(slice);
            chunk
        })
        .collect();

    Ok(FramedMessage {
        metadata: Metadata {
            kind,
            total_length: payload.len() as u32,
        },
        indexing,
        chunks,
    })
}

/// Concatenate chunks by ascending index and truncate to `total_length`.
///
/// Fails with `IncompleteMessage` if any index in `[0, count)` is absent.
/// Entries past the expected count are ignored.
pub fn assemble(
    chunks: &BTreeMap<ChunkIndex, Vec<u8>>,
    total_length: usize,
    chunk_size: usize,
) -> Result<Vec<u8>, TransferError> {
    let count = total_length.div_ceil(chunk_size);
    let missing = (0..count)
        .filter(|&i| i > ChunkIndex::MAX as usize || !chunks.contains_key(&(i as ChunkIndex)))
        .count();
    if missing > 0 {
        return Err(TransferError::IncompleteMessage { missing });
    }

    let mut data = Vec::with_capacity(count * chunk_size);
    for i in 0..count {
        if let Some(chunk) = chunks.get(&(i as ChunkIndex)) {
            data.extend_from_slice(chunk);
        }
    }
    data.truncate(total_length);
    Ok(data)
}

/// Result of offering a chunk to a reassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Stored,
    Duplicate,
    OutOfRange,
}

/// Receive-side buffer for one message: chunk payloads keyed by index plus a
/// bitfield for cheap duplicate and gap checks.
#[derive(Debug, Clone)]
pub struct Reassembler {
    metadata: Metadata,
    chunk_size: usize,
    chunks: BTreeMap<ChunkIndex, Vec<u8>>,
    received: ChunkBitfield,
}

impl Reassembler {
    pub fn new(metadata: Metadata, indexing: ChunkIndexing) -> Self {
        let count = metadata.chunk_count(indexing);
        Self {
            metadata,
            chunk_size: indexing.chunk_payload_size(),
            chunks: BTreeMap::new(),
            received: ChunkBitfield::new(count),
        }
    }

    pub fn metadata(&self) -> Metadata {
        self.metadata
    }

    pub fn chunk_count(&self) -> usize {
        self.received.total()
    }

    /// Number of distinct chunks stored.
    pub fn stored(&self) -> usize {
        self.received.received()
    }

    pub fn contains(&self, index: ChunkIndex) -> bool {
        self.received.get(index)
    }

    /// Store a chunk payload. Duplicates are never re-stored.
    pub fn insert(&mut self, index: ChunkIndex, payload: &[u8]) -> Insert {
        if index as usize >= self.chunk_count() {
            return Insert::OutOfRange;
        }
        if !self.received.set(index) {
            return Insert::Duplicate;
        }
        let mut chunk = vec![0u8; self.chunk_size];
        let n = payload.len().min(self.chunk_size);
        chunk[..n].copy_from_slice(&payload[..n]);
        self.chunks.insert(index, chunk);
        Insert::Stored
    }

    pub fn is_complete(&self) -> bool {
        self.received.is_complete()
    }

    /// Lowest index not yet stored at or after `start`.
    pub fn first_missing_from(&self, start: usize) -> Option<ChunkIndex> {
        self.received.first_missing_from(start)
    }

    /// Indices not yet stored, in ascending order.
    pub fn missing(&self) -> Vec<ChunkIndex> {
        self.received.missing_chunks()
    }

    /// Assemble the message. Fails if any chunk is still missing.
    pub fn finish(self) -> Result<Message, TransferError> {
        let data = assemble(
            &self.chunks,
            self.metadata.total_length as usize,
            self.chunk_size,
        )?;
        Ok(Message {
            kind: self.metadata.kind,
            data,
        })
    }
}
