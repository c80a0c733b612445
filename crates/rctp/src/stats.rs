/// Per-transfer counters, returned with every send report and kept by the
/// receiver for the session in flight.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Packets handed to the transport, retransmissions included.
    pub packets_sent: u64,
    /// Sends beyond the first attempt for the same packet.
    pub retransmits: u64,
    /// Acks naming something already acknowledged.
    pub stale_acks: u64,
    /// Acks the receiver returned (handshake, metadata, chunk, DONE).
    pub acks_sent: u64,
    /// Chunks that arrived again after being stored.
    pub duplicate_chunks: u64,
    /// Chunks stored ahead of the expected index.
    pub gaps_buffered: u64,
    /// Packets dropped as undecodable noise.
    pub decode_errors: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }
}
