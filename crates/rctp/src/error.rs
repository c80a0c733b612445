use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::ChunkIndex;

/// Outcome of a transfer that did not deliver its message.
///
/// Sender-side variants abort only the current message. Receiver-side
/// variants discard the partial session; the receiver keeps listening.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("handshake failed: no ACK after {attempts} SYNC attempts")]
    HandshakeFailed { attempts: u32 },

    #[error("metadata not acknowledged after {attempts} attempts")]
    MetadataDeliveryFailed { attempts: u32 },

    #[error("chunk {index} not acknowledged after {attempts} attempts")]
    ChunkDeliveryFailed { index: ChunkIndex, attempts: u32 },

    /// Positional mode: the receiver acknowledged a later position than the
    /// chunk in flight, so it stored a resend as the next chunk.
    #[error("receiver acknowledged chunk {acked} while chunk {in_flight} was in flight")]
    ChunkDesync { in_flight: ChunkIndex, acked: ChunkIndex },

    /// Positional mode: the receiver only releases the message on DONE.
    #[error("closing DONE not acknowledged after {attempts} attempts")]
    DoneNotAcknowledged { attempts: u32 },

    /// `expected` is None outside the chunk phase.
    #[error("no packet from sender for {waited:?} (expecting chunk {expected:?})")]
    ReceiveTimeout {
        waited: Duration,
        expected: Option<ChunkIndex>,
    },

    #[error("message incomplete: {missing} chunk(s) missing")]
    IncompleteMessage { missing: usize },

    #[error("chunk {got} arrived while expecting {expected}")]
    OutOfOrderChunk { expected: ChunkIndex, got: ChunkIndex },

    #[error("payload of {len} bytes exceeds the {max}-byte message limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// Structural decode failure. Sessions drop these packets as channel noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty packet")]
    Empty,

    #[error("{len}-byte packet exceeds the radio MTU")]
    Oversized { len: usize },

    #[error("malformed {len}-byte packet")]
    Malformed { len: usize },

    #[error("unrecognised control tag")]
    UnknownTag,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{len}-byte packet exceeds the radio MTU")]
    Oversized { len: usize },

    #[error("send attempted while the radio is listening")]
    NotTransmitting,

    #[error("transport has no piggyback acknowledgement facility")]
    PiggybackUnsupported,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Unrecognised name for one of the strategy enums.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what} {value:?}")]
pub struct ParseStrategyError {
    pub what: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("{key} out of range: {reason}")]
    OutOfRange {
        key: &'static str,
        reason: &'static str,
    },
}
