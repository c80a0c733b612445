/// Transfer logging trait for structured protocol events.
///
/// Sender and receiver sessions report lifecycle and per-chunk events
/// through a `TransferLogger`, so a node can route them to `tracing`, a test
/// collector, or nowhere.

use std::fmt;

use crate::error::DecodeError;
use crate::protocol::{ChunkIndex, MessageKind};

/// Missing indices rendered in a timeout line before the rest are counted.
const MISSING_SHOWN: usize = 8;

/// Structured log entry for one session.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub session: u32,
    pub event: TransferEvent,
}

/// Which stop-and-wait exchange a sender event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Handshake,
    Metadata,
    Chunk(ChunkIndex),
    Done,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake => f.write_str("sync"),
            Self::Metadata => f.write_str("metadata"),
            Self::Chunk(i) => write!(f, "chunk#{}", i),
            Self::Done => f.write_str("done"),
        }
    }
}

/// Transfer events that can be logged.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Sender: handshake ACK received
    HandshakeComplete { attempts: u32 },
    /// Sender: metadata acknowledged
    MetadataAcked {
        kind: MessageKind,
        total_length: u32,
        chunks: usize,
    },
    /// Sender: chunk acknowledged
    ChunkAcked { index: ChunkIndex, attempts: u32 },
    /// Sender: ack window expired without the expected reply
    AckTimeout { exchange: Exchange, attempt: u32 },
    /// Sender: same packet sent again
    Retransmit { exchange: Exchange, attempt: u32 },
    /// Sender: ack for something already acknowledged
    StaleAck { exchange: Exchange, acked: ChunkIndex },
    /// Receiver: handshake answered
    HandshakeAnswered,
    /// Receiver: metadata accepted, session created
    SessionOpened {
        kind: MessageKind,
        total_length: u32,
        chunks: usize,
    },
    /// Receiver: chunk stored
    ChunkStored { index: ChunkIndex, expected: ChunkIndex },
    /// Receiver: chunk seen before, ack re-sent
    DuplicateChunk { index: ChunkIndex },
    /// Receiver: chunk ahead of the expected index stored
    GapBuffered { index: ChunkIndex, expected: ChunkIndex },
    /// Receiver: partial session discarded by a new handshake or metadata
    SessionAbandoned { stored: usize, chunks: usize },
    /// Receiver: no packet within the inactivity timeout
    SessionTimedOut {
        waited_ms: u64,
        stored: usize,
        chunks: usize,
        missing: Vec<ChunkIndex>,
    },
    /// Transfer complete
    TransferComplete {
        kind: MessageKind,
        bytes: usize,
        chunks: usize,
        retransmits: u64,
        duration_ms: u64,
    },
    /// Transfer aborted
    Aborted { reason: String },
    /// Undecodable packet dropped
    PacketDropped { error: DecodeError, bytes: String },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeComplete { attempts } => {
                write!(f, "handshake_complete attempts={}", attempts)
            }
            Self::MetadataAcked { kind, total_length, chunks } => {
                write!(f, "metadata_acked kind={} len={} chunks={}", kind, total_length, chunks)
            }
            Self::ChunkAcked { index, attempts } => {
                write!(f, "chunk_acked idx={} attempts={}", index, attempts)
            }
            Self::AckTimeout { exchange, attempt } => {
                write!(f, "ack_timeout what={} attempt={}", exchange, attempt)
            }
            Self::Retransmit { exchange, attempt } => {
                write!(f, "retransmit what={} attempt={}", exchange, attempt)
            }
            Self::StaleAck { exchange, acked } => {
                write!(f, "stale_ack what={} acked={}", exchange, acked)
            }
            Self::HandshakeAnswered => f.write_str("handshake_answered"),
            Self::SessionOpened { kind, total_length, chunks } => {
                write!(f, "session_opened kind={} len={} chunks={}", kind, total_length, chunks)
            }
            Self::ChunkStored { index, expected } => {
                write!(f, "chunk_stored idx={} expected={}", index, expected)
            }
            Self::DuplicateChunk { index } => write!(f, "duplicate_chunk idx={}", index),
            Self::GapBuffered { index, expected } => {
                write!(f, "gap_buffered idx={} expected={}", index, expected)
            }
            Self::SessionAbandoned { stored, chunks } => {
                write!(f, "session_abandoned stored={}/{}", stored, chunks)
            }
            Self::SessionTimedOut { waited_ms, stored, chunks, missing } => {
                write!(f, "session_timed_out waited_ms={} stored={}/{}", waited_ms, stored, chunks)?;
                if !missing.is_empty() {
                    write!(f, " missing={:?}", &missing[..missing.len().min(MISSING_SHOWN)])?;
                    if missing.len() > MISSING_SHOWN {
                        write!(f, "+{}", missing.len() - MISSING_SHOWN)?;
                    }
                }
                Ok(())
            }
            Self::TransferComplete { kind, bytes, chunks, retransmits, duration_ms } => {
                write!(
                    f,
                    "transfer_complete kind={} bytes={} chunks={} retransmits={} duration_ms={}",
                    kind, bytes, chunks, retransmits, duration_ms
                )
            }
            Self::Aborted { reason } => write!(f, "aborted: {}", reason),
            Self::PacketDropped { error, bytes } => {
                write!(f, "packet_dropped error={} bytes={}", error, bytes)
            }
        }
    }
}

/// Trait for transfer logging. Implementations can write to tracing, collect
/// entries for inspection, or discard them.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        // info for session lifecycle, warn for failures, debug for per-chunk spam
        match &entry.event {
            TransferEvent::HandshakeComplete { .. }
            | TransferEvent::SessionOpened { .. }
            | TransferEvent::TransferComplete { .. } => {
                tracing::info!(
                    component = entry.component,
                    session = entry.session,
                    "{}",
                    entry.event,
                );
            }
            TransferEvent::Aborted { .. }
            | TransferEvent::SessionTimedOut { .. }
            | TransferEvent::SessionAbandoned { .. } => {
                tracing::warn!(
                    component = entry.component,
                    session = entry.session,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::debug!(
                    component = entry.component,
                    session = entry.session,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_render_as_key_value() {
        let event = TransferEvent::Retransmit {
            exchange: Exchange::Chunk(2),
            attempt: 3,
        };
        assert_eq!(event.to_string(), "retransmit what=chunk#2 attempt=3");

        let event = TransferEvent::PacketDropped {
            error: DecodeError::UnknownTag,
            bytes: hex::encode(b"XYZ"),
        };
        assert_eq!(
            event.to_string(),
            "packet_dropped error=unrecognised control tag bytes=58595a"
        );
    }

    #[test]
    fn timeout_lists_the_first_missing_chunks() {
        let event = TransferEvent::SessionTimedOut {
            waited_ms: 2000,
            stored: 1,
            chunks: 12,
            missing: (1..12).collect(),
        };
        assert_eq!(
            event.to_string(),
            "session_timed_out waited_ms=2000 stored=1/12 missing=[1, 2, 3, 4, 5, 6, 7, 8]+3"
        );

        let event = TransferEvent::SessionTimedOut {
            waited_ms: 2000,
            stored: 0,
            chunks: 0,
            missing: Vec::new(),
        };
        assert_eq!(event.to_string(), "session_timed_out waited_ms=2000 stored=0/0");
    }
}
