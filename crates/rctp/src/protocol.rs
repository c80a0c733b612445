/// Radio wire format for reliable chunked transfer.
///
/// ```text
/// SYNC        "SYNC"                                 sender → receiver
/// ACK         "ACK"                                  receiver → sender (handshake)
/// Metadata    [FF FF] [tag 4] [length u32 BE]        indexed mode, 10 bytes
///             [tag 4] [length u32 BE]                positional mode, 8 bytes
/// Chunk       [index u16 BE] [payload 30]            indexed mode, 32 bytes
///             [payload 32]                           positional mode, 32 bytes
/// Chunk ACK   "ACK" [index u16 BE]                   5 bytes, FFFF acks metadata
/// DONE        "DONE"                                 sender → receiver
/// ACK_DONE    "ACK_DONE"                             receiver → sender
/// ```
///
/// Every packet fits the 32-byte radio MTU. Decoding is structural only:
/// it checks lengths and tags, never whether a packet makes sense in the
/// current session state.

use std::fmt;
use std::ops::Deref;

use crate::error::DecodeError;

/// Maximum bytes the radio carries in one packet.
pub const MTU: usize = 32;

/// Size of the chunk index prefix in indexed mode.
pub const INDEX_SIZE: usize = 2;

/// Reserved index naming the metadata packet rather than a data chunk.
pub const CONTROL_INDEX: ChunkIndex = 0xFFFF;

/// Largest number of data chunks in one message (indices `0..=0xFFFE`).
pub const MAX_CHUNKS: usize = CONTROL_INDEX as usize;

pub const SYNC_TAG: &[u8; 4] = b"SYNC";
pub const HANDSHAKE_ACK_TAG: &[u8; 3] = b"ACK";
pub const ACK_TAG: &[u8; 3] = b"ACK";
pub const DONE_TAG: &[u8; 4] = b"DONE";
pub const DONE_ACK_TAG: &[u8; 8] = b"ACK_DONE";
pub const SENSOR_TAG: &[u8; 4] = b"SENS";
pub const IMAGE_TAG: &[u8; 4] = b"IMAG";

/// Chunk ACK length: 3-byte tag + u16 index.
const ACK_LEN: usize = ACK_TAG.len() + INDEX_SIZE;

/// Metadata body: 4-byte kind tag + u32 total length.
const METADATA_BODY: usize = 8;

/// Session-scoped chunk position, monotonic from 0.
pub type ChunkIndex = u16;

/// How data chunks identify their position in the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkIndexing {
    /// Every chunk carries a 2-byte index prefix.
    #[default]
    Indexed,
    /// Bare 32-byte payloads; position is implied by strict send order.
    Positional,
}

impl ChunkIndexing {
    /// Header bytes each data chunk spends on its index.
    pub fn header_size(self) -> usize {
        match self {
            Self::Indexed => INDEX_SIZE,
            Self::Positional => 0,
        }
    }

    /// Payload bytes per data chunk: `MTU - header`.
    pub fn chunk_payload_size(self) -> usize {
        MTU - self.header_size()
    }
}

/// Kind of telemetry carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Sensor,
    Image,
}

impl MessageKind {
    pub fn tag(self) -> &'static [u8; 4] {
        match self {
            Self::Sensor => SENSOR_TAG,
            Self::Image => IMAGE_TAG,
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        if tag == SENSOR_TAG {
            Some(Self::Sensor)
        } else if tag == IMAGE_TAG {
            Some(Self::Image)
        } else {
            None
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor => f.write_str("sensor"),
            Self::Image => f.write_str("image"),
        }
    }
}

/// A single radio packet: at most `MTU` bytes, stored inline.
#[derive(Clone, Copy)]
pub struct RadioPacket {
    buf: [u8; MTU],
    len: u8,
}

impl RadioPacket {
    /// Copy `bytes` into a packet. Returns None if longer than the MTU.
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MTU {
            return None;
        }
        let mut buf = [0u8; MTU];
        buf[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            buf,
            len: bytes.len() as u8,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    fn from_parts(parts: &[&[u8]]) -> Self {
        let mut buf = [0u8; MTU];
        let mut len = 0usize;
        for part in parts {
            buf[len..len + part.len()].copy_from_slice(part);
            len += part.len();
        }
        Self { buf, len: len as u8 }
    }

    /// Packet padded with zeros up to `total` bytes.
    fn padded(parts: &[&[u8]], total: usize) -> Self {
        let mut packet = Self::from_parts(parts);
        packet.len = total as u8;
        packet
    }
}

impl Deref for RadioPacket {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for RadioPacket {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for RadioPacket {}

impl fmt::Debug for RadioPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RadioPacket({})", hex::encode(self.as_bytes()))
    }
}

/// Message announcement sent before the first data chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub kind: MessageKind,
    pub total_length: u32,
}

impl Metadata {
    /// `ceil(total_length / chunk_payload_size)`; zero for an empty message.
    pub fn chunk_count(&self, indexing: ChunkIndexing) -> usize {
        let size = indexing.chunk_payload_size();
        (self.total_length as usize).div_ceil(size)
    }
}

/// A data chunk as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Explicit index in indexed mode, None in positional mode.
    pub index: Option<ChunkIndex>,
    /// Exactly one chunk payload, zero-padded on the final chunk.
    pub payload: &'a [u8],
}

/// Decoded radio packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Sync,
    HandshakeAck,
    Metadata(Metadata),
    Chunk(Chunk<'a>),
    /// Acknowledges one chunk, or the metadata when naming `CONTROL_INDEX`.
    Ack(ChunkIndex),
    Done,
    DoneAck,
}

impl Packet<'_> {
    /// Encode into a radio packet.
    ///
    /// # Panics
    /// Panics if a chunk payload exceeds the chunk payload size for `indexing`,
    /// or if a chunk has no index (or names `CONTROL_INDEX`) in indexed mode.
    pub fn encode(&self, indexing: ChunkIndexing) -> RadioPacket {
        match self {
            Self::Sync => RadioPacket::from_parts(&[SYNC_TAG]),
            Self::HandshakeAck => RadioPacket::from_parts(&[HANDSHAKE_ACK_TAG]),
            Self::Metadata(meta) => {
                let length = meta.total_length.to_be_bytes();
                match indexing {
                    ChunkIndexing::Indexed => RadioPacket::from_parts(&[
                        &CONTROL_INDEX.to_be_bytes(),
                        meta.kind.tag(),
                        &length,
                    ]),
                    ChunkIndexing::Positional => {
                        RadioPacket::from_parts(&[meta.kind.tag(), &length])
                    }
                }
            }
            Self::Chunk(chunk) => {
                assert!(chunk.payload.len() <= indexing.chunk_payload_size());
                match indexing {
                    ChunkIndexing::Indexed => {
                        let index = chunk.index.filter(|&i| i != CONTROL_INDEX);
                        let index = match index {
                            Some(i) => i,
                            None => panic!("indexed chunk needs a data index"),
                        };
                        RadioPacket::padded(&[&index.to_be_bytes(), chunk.payload], MTU)
                    }
                    ChunkIndexing::Positional => RadioPacket::padded(&[chunk.payload], MTU),
                }
            }
            Self::Ack(index) => RadioPacket::from_parts(&[ACK_TAG, &index.to_be_bytes()]),
            Self::Done => RadioPacket::from_parts(&[DONE_TAG]),
            Self::DoneAck => RadioPacket::from_parts(&[DONE_ACK_TAG]),
        }
    }
}

/// Decode a raw packet. Never looks at payload contents beyond tags.
pub fn decode(buf: &[u8], indexing: ChunkIndexing) -> Result<Packet<'_>, DecodeError> {
    let len = buf.len();
    if len == 0 {
        return Err(DecodeError::Empty);
    }
    if len > MTU {
        return Err(DecodeError::Oversized { len });
    }

    match indexing {
        ChunkIndexing::Indexed => {
            if len >= INDEX_SIZE && u16::from_be_bytes([buf[0], buf[1]]) == CONTROL_INDEX {
                if len != INDEX_SIZE + METADATA_BODY {
                    return Err(DecodeError::Malformed { len });
                }
                return decode_metadata(&buf[INDEX_SIZE..]).ok_or(DecodeError::Malformed { len });
            }
            if len == MTU {
                let index = u16::from_be_bytes([buf[0], buf[1]]);
                return Ok(Packet::Chunk(Chunk {
                    index: Some(index),
                    payload: &buf[INDEX_SIZE..],
                }));
            }
        }
        ChunkIndexing::Positional => {
            if len == MTU {
                return Ok(Packet::Chunk(Chunk {
                    index: None,
                    payload: buf,
                }));
            }
            if len == METADATA_BODY {
                if let Some(packet) = decode_metadata(buf) {
                    return Ok(packet);
                }
            }
        }
    }

    decode_control(buf)
}

fn decode_metadata(body: &[u8]) -> Option<Packet<'static>> {
    let kind = MessageKind::from_tag(&body[..4])?;
    let total_length = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
    Some(Packet::Metadata(Metadata { kind, total_length }))
}

fn decode_control(buf: &[u8]) -> Result<Packet<'static>, DecodeError> {
    if buf == SYNC_TAG {
        Ok(Packet::Sync)
    } else if buf == HANDSHAKE_ACK_TAG {
        Ok(Packet::HandshakeAck)
    } else if buf == DONE_TAG {
        Ok(Packet::Done)
    } else if buf == DONE_ACK_TAG {
        Ok(Packet::DoneAck)
    } else if buf.len() == ACK_LEN && &buf[..3] == ACK_TAG {
        Ok(Packet::Ack(u16::from_be_bytes([buf[3], buf[4]])))
    } else {
        Err(DecodeError::UnknownTag)
    }
}
