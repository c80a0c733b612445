/// RCTP: reliable chunked transfer over a half-duplex, 32-byte-MTU radio.
///
/// Provides one-message-at-a-time delivery with:
/// - SYNC/ACK handshake per message
/// - Metadata announcement keyed to a reserved control index
/// - Stop-and-wait chunks with per-chunk acks and bounded retries
/// - Indexed or positional chunk addressing
/// - Dedicated or piggyback acknowledgement channel
/// - Gap buffering or strict in-order abort on the receiver

pub mod bitfield;
pub mod config;
pub mod error;
pub mod framer;
pub mod logging;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod transport;

// Re-export key types for convenience.
pub use bitfield::ChunkBitfield;
pub use config::{AckChannel, ChunkIndexing, GapPolicy, ProtocolConfig};
pub use error::{ConfigError, DecodeError, ParseStrategyError, TransferError, TransportError};
pub use framer::{FramedMessage, Message, Reassembler, assemble, split};
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use protocol::{
    CONTROL_INDEX, ChunkIndex, MAX_CHUNKS, MTU, MessageKind, Metadata, Packet, RadioPacket,
    decode,
};
pub use receiver::{Receiver, ReceiverState};
pub use sender::{SendReport, Sender, SenderState};
pub use stats::TransferStats;
pub use transport::{LinkConditions, MemoryLink, RadioMode, Transport, UdpLink};
