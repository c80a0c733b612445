/// Received-chunk tracking using a compact bitfield.
///
/// A message can span up to `MAX_CHUNKS` (65535) chunks, so the word vector is
/// sized per message rather than fixed: `ceil(chunk_count / 64)` words.

use crate::protocol::ChunkIndex;

/// Compact bitfield tracking which chunks of one message have arrived.
#[derive(Clone, Debug)]
pub struct ChunkBitfield {
    bits: Vec<u64>,
    chunk_count: usize,
    received_count: usize,
}

impl ChunkBitfield {
    /// Create a new bitfield for a message with `chunk_count` chunks.
    pub fn new(chunk_count: usize) -> Self {
        Self {
            bits: vec![0u64; chunk_count.div_ceil(64)],
            chunk_count,
            received_count: 0,
        }
    }

    /// Mark a chunk as received. Returns true if it was newly received (not
    /// duplicate). Indices past the chunk count are ignored.
    #[inline]
    pub fn set(&mut self, index: ChunkIndex) -> bool {
        let idx = index as usize;
        if idx >= self.chunk_count {
            return false;
        }
        let mask = 1u64 << (idx % 64);
        let word = &mut self.bits[idx / 64];
        if *word & mask != 0 {
            return false;
        }
        *word |= mask;
        self.received_count += 1;
        true
    }

    /// Check if a chunk has been received.
    #[inline]
    pub fn get(&self, index: ChunkIndex) -> bool {
        let idx = index as usize;
        if idx >= self.chunk_count {
            return false;
        }
        self.bits[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    /// Returns true if every chunk has been received. An empty message is
    /// complete from the start.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.received_count >= self.chunk_count
    }

    #[inline]
    pub fn received(&self) -> usize {
        self.received_count
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.chunk_count
    }

    /// Lowest missing index at or after `start`, skipping whole words that
    /// are already full.
    pub fn first_missing_from(&self, start: usize) -> Option<ChunkIndex> {
        let mut idx = start;
        while idx < self.chunk_count {
            let word = self.bits[idx / 64];
            if word == u64::MAX && idx % 64 == 0 {
                idx += 64;
                continue;
            }
            if word & (1u64 << (idx % 64)) == 0 {
                return Some(idx as ChunkIndex);
            }
            idx += 1;
        }
        None
    }

    /// Collect indices of all missing chunks.
    pub fn missing_chunks(&self) -> Vec<ChunkIndex> {
        (0..self.chunk_count)
            .map(|i| i as ChunkIndex)
            .filter(|&i| !self.get(i))
            .collect()
    }
}
