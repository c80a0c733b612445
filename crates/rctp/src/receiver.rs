/// Receiver session: answers the handshake, accepts metadata, then stores and
/// acknowledges chunks until the message is complete.
///
/// `Complete` and `TimedOut` are outcomes rather than resting states: a
/// finished message is returned from [`Receiver::poll`], a timeout as
/// `Err(ReceiveTimeout)`, and in both cases the receiver is back to `Idle`
/// and listening.
///
/// Lossy-link artifacts are absorbed here. A repeated SYNC or metadata packet
/// is re-acknowledged, a chunk that was already stored only has its ack
/// re-sent, and chunks of the message just delivered are re-acknowledged so
/// the sender can finish even if it lost the final ack.
///
/// Positional chunks carry no index, so a resent chunk is indistinguishable
/// from the next one. A positional session that fills up is held in
/// `AwaitingDone` and only released when the closing DONE arrives.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{AckChannel, GapPolicy, ProtocolConfig};
use crate::error::TransferError;
use crate::framer::{Insert, Message, Reassembler};
use crate::logging::{TracingLogger, TransferEvent, TransferLog, TransferLogger};
use crate::protocol::{
    CONTROL_INDEX, Chunk, ChunkIndex, ChunkIndexing, MAX_CHUNKS, Metadata, Packet, decode,
};
use crate::stats::TransferStats;
use crate::transport::{RadioMode, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    /// Handshake answered, no metadata yet.
    AwaitingMetadata,
    AwaitingChunk { expected: ChunkIndex },
    /// Positional mode: every chunk stored, message held until DONE.
    AwaitingDone,
}

/// The message most recently delivered, kept to re-ack its late duplicates.
#[derive(Debug, Clone, Copy)]
struct Delivered {
    metadata: Metadata,
    chunks: usize,
}

pub struct Receiver<T: Transport> {
    transport: T,
    config: ProtocolConfig,
    state: ReceiverState,
    session: Option<Reassembler>,
    delivered: Option<Delivered>,
    last_activity: Instant,
    opened_at: Instant,
    stats: TransferStats,
    logger: Option<Arc<dyn TransferLogger>>,
    session_id: u32,
}

impl<T: Transport> Receiver<T> {
    pub fn new(transport: T, config: ProtocolConfig) -> Self {
        Self {
            transport,
            config,
            state: ReceiverState::Idle,
            session: None,
            delivered: None,
            last_activity: Instant::now(),
            opened_at: Instant::now(),
            stats: TransferStats::new(),
            logger: Some(Arc::new(TracingLogger)),
            session_id: 0,
        }
    }

    pub fn with_logger(mut self, logger: Option<Arc<dyn TransferLogger>>) -> Self {
        self.logger = logger;
        self
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Counters for the session in flight, or the last one if idle.
    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Distinct chunks stored in the session in flight.
    pub fn stored_chunks(&self) -> usize {
        self.session.as_ref().map_or(0, Reassembler::stored)
    }

    /// Drop any partial session and return to `Idle`.
    pub fn reset(&mut self) {
        self.session = None;
        self.state = ReceiverState::Idle;
    }

    /// Handle at most one buffered packet.
    ///
    /// Returns `Ok(Some(_))` when a message completes. Inactivity inside a
    /// session is reported as `ReceiveTimeout` and the partial session is
    /// discarded.
    pub fn poll(&mut self) -> Result<Option<Message>, TransferError> {
        self.transport.set_mode(RadioMode::Listen)?;
        self.check_inactivity()?;
        match self.transport.poll()? {
            Some(raw) => self.handle_packet(raw.as_bytes()),
            None => Ok(None),
        }
    }

    /// Poll until a message completes, a session fails, or `wait` elapses.
    pub fn recv_timeout(&mut self, wait: Duration) -> Result<Option<Message>, TransferError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(message) = self.poll()? {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(self.config.poll_interval.min(deadline - now));
        }
    }

    /// Feed one raw packet through the state machine.
    pub fn handle_packet(&mut self, raw: &[u8]) -> Result<Option<Message>, TransferError> {
        let packet = match decode(raw, self.config.indexing) {
            Ok(packet) => packet,
            Err(error) => {
                self.stats.decode_errors += 1;
                self.log(TransferEvent::PacketDropped {
                    error,
                    bytes: hex::encode(raw),
                });
                return Ok(None);
            }
        };

        match packet {
            Packet::Sync => self.on_sync().map(|()| None),
            Packet::Metadata(metadata) => self.on_metadata(metadata),
            Packet::Chunk(chunk) => self.on_chunk(chunk),
            Packet::Done => self.on_done(),
            Packet::HandshakeAck | Packet::Ack(_) | Packet::DoneAck => {
                tracing::debug!(?packet, "ignoring acknowledgement addressed to a sender");
                Ok(None)
            }
        }
    }

    fn on_sync(&mut self) -> Result<(), TransferError> {
        self.last_activity = Instant::now();
        if matches!(
            self.state,
            ReceiverState::AwaitingChunk { .. } | ReceiverState::AwaitingDone
        ) {
            self.abandon();
        }
        // A new handshake means the sender is past the last delivered message.
        self.delivered = None;
        self.state = ReceiverState::AwaitingMetadata;
        self.reply(Packet::HandshakeAck)?;
        self.log(TransferEvent::HandshakeAnswered);
        Ok(())
    }

    fn on_metadata(&mut self, metadata: Metadata) -> Result<Option<Message>, TransferError> {
        let current = self.session.as_ref().map(Reassembler::metadata);
        let repeated = match self.state {
            ReceiverState::AwaitingChunk { .. } | ReceiverState::AwaitingDone => {
                current == Some(metadata)
            }
            ReceiverState::Idle => self.delivered.is_some_and(|d| d.metadata == metadata),
            ReceiverState::AwaitingMetadata => false,
        };
        if repeated {
            // The sender missed our metadata ack.
            self.last_activity = Instant::now();
            return self.reply(Packet::Ack(CONTROL_INDEX)).map(|()| None);
        }

        let chunks = metadata.chunk_count(self.config.indexing);
        if chunks > MAX_CHUNKS {
            tracing::debug!(
                total_length = metadata.total_length,
                chunks,
                "metadata announces more chunks than a session can index"
            );
            return Ok(None);
        }

        if self.session.is_some() {
            self.abandon();
        }
        self.session_id = self.session_id.wrapping_add(1);
        self.stats = TransferStats::new();
        self.last_activity = Instant::now();
        self.opened_at = self.last_activity;
        self.delivered = None;
        self.session = Some(Reassembler::new(metadata, self.config.indexing));
        self.state = ReceiverState::AwaitingChunk { expected: 0 };
        self.log(TransferEvent::SessionOpened {
            kind: metadata.kind,
            total_length: metadata.total_length,
            chunks,
        });

        self.reply(Packet::Ack(CONTROL_INDEX))?;

        if chunks == 0 {
            return self.filled();
        }
        Ok(None)
    }

    fn on_chunk(&mut self, chunk: Chunk<'_>) -> Result<Option<Message>, TransferError> {
        if self.state == ReceiverState::AwaitingDone {
            return self.on_held_chunk().map(|()| None);
        }
        let ReceiverState::AwaitingChunk { expected } = self.state else {
            return self.on_late_chunk(chunk).map(|()| None);
        };
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };

        // Positional chunks carry no index: they are whatever comes next.
        let index = chunk.index.unwrap_or(expected);
        if index != expected
            && !session.contains(index)
            && self.config.gap_policy == GapPolicy::Abort
            && (index as usize) < session.chunk_count()
        {
            self.log(TransferEvent::Aborted {
                reason: format!("chunk {} arrived while expecting {}", index, expected),
            });
            self.reset();
            return Err(TransferError::OutOfOrderChunk { expected, got: index });
        }

        match session.insert(index, chunk.payload) {
            Insert::OutOfRange => {
                tracing::debug!(
                    session = self.session_id,
                    index,
                    chunks = session.chunk_count(),
                    "dropping chunk beyond the announced count"
                );
                return Ok(None);
            }
            Insert::Duplicate => {
                self.last_activity = Instant::now();
                self.stats.duplicate_chunks += 1;
                self.log(TransferEvent::DuplicateChunk { index });
                return self.reply(Packet::Ack(index)).map(|()| None);
            }
            Insert::Stored => {}
        }

        self.last_activity = Instant::now();
        let complete = session.is_complete();
        if index == expected {
            let next = session
                .first_missing_from(index as usize + 1)
                .unwrap_or(session.chunk_count() as ChunkIndex);
            self.state = ReceiverState::AwaitingChunk { expected: next };
            self.log(TransferEvent::ChunkStored { index, expected: next });
        } else {
            self.stats.gaps_buffered += 1;
            self.log(TransferEvent::GapBuffered { index, expected });
        }

        self.reply(Packet::Ack(index))?;

        if complete {
            return self.filled();
        }
        Ok(None)
    }

    /// A chunk while a positional message waits for DONE. Only the final
    /// ack can have been missed; any earlier resend means the sender is
    /// behind, and this ack makes it abort.
    fn on_held_chunk(&mut self) -> Result<(), TransferError> {
        let Some(last) = self.session.as_ref().and_then(|s| s.chunk_count().checked_sub(1)) else {
            return Ok(());
        };
        let index = last as ChunkIndex;
        self.last_activity = Instant::now();
        self.stats.duplicate_chunks += 1;
        self.log(TransferEvent::DuplicateChunk { index });
        self.reply(Packet::Ack(index))
    }

    /// A chunk outside any session: re-ack it if it belongs to the message
    /// just delivered, otherwise drop it.
    fn on_late_chunk(&mut self, chunk: Chunk<'_>) -> Result<(), TransferError> {
        let Some(delivered) = self.delivered else {
            tracing::debug!(index = ?chunk.index, "dropping chunk outside a session");
            return Ok(());
        };
        if delivered.chunks == 0 {
            return Ok(());
        }
        let index = match self.config.indexing {
            ChunkIndexing::Indexed => chunk.index.filter(|&i| (i as usize) < delivered.chunks),
            // Only the final ack can have been missed.
            ChunkIndexing::Positional => Some((delivered.chunks - 1) as ChunkIndex),
        };
        match index {
            Some(index) => {
                self.log(TransferEvent::DuplicateChunk { index });
                self.reply(Packet::Ack(index))
            }
            None => Ok(()),
        }
    }

    fn on_done(&mut self) -> Result<Option<Message>, TransferError> {
        match self.state {
            ReceiverState::AwaitingChunk { .. } => {
                tracing::debug!(session = self.session_id, "ignoring DONE inside a session");
                Ok(None)
            }
            ReceiverState::AwaitingDone => {
                self.last_activity = Instant::now();
                self.reply(Packet::DoneAck)?;
                self.complete().map(Some)
            }
            ReceiverState::Idle | ReceiverState::AwaitingMetadata => {
                self.reply(Packet::DoneAck).map(|()| None)
            }
        }
    }

    /// Every chunk is stored.
    fn filled(&mut self) -> Result<Option<Message>, TransferError> {
        if self.config.indexing == ChunkIndexing::Positional {
            self.state = ReceiverState::AwaitingDone;
            tracing::debug!(session = self.session_id, "all chunks stored, holding message for DONE");
            return Ok(None);
        }
        self.complete().map(Some)
    }

    fn complete(&mut self) -> Result<Message, TransferError> {
        self.state = ReceiverState::Idle;
        let Some(session) = self.session.take() else {
            return Err(TransferError::IncompleteMessage { missing: 0 });
        };
        let metadata = session.metadata();
        let chunks = session.chunk_count();
        let message = session.finish()?;

        self.delivered = Some(Delivered { metadata, chunks });
        self.log(TransferEvent::TransferComplete {
            kind: message.kind,
            bytes: message.data.len(),
            chunks,
            retransmits: self.stats.duplicate_chunks,
            duration_ms: self.opened_at.elapsed().as_millis() as u64,
        });
        Ok(message)
    }

    fn abandon(&mut self) {
        if let Some(session) = self.session.take() {
            self.log(TransferEvent::SessionAbandoned {
                stored: session.stored(),
                chunks: session.chunk_count(),
            });
        }
        self.state = ReceiverState::Idle;
    }

    fn check_inactivity(&mut self) -> Result<(), TransferError> {
        if self.state == ReceiverState::Idle {
            return Ok(());
        }
        let waited = self.last_activity.elapsed();
        if waited < self.config.inactivity_timeout {
            return Ok(());
        }

        let expected = match self.state {
            ReceiverState::AwaitingChunk { expected } => Some(expected),
            _ => None,
        };
        let (stored, chunks, missing) = self
            .session
            .as_ref()
            .map_or((0, 0, Vec::new()), |s| (s.stored(), s.chunk_count(), s.missing()));
        self.log(TransferEvent::SessionTimedOut {
            waited_ms: waited.as_millis() as u64,
            stored,
            chunks,
            missing,
        });
        self.reset();
        Err(TransferError::ReceiveTimeout { waited, expected })
    }

    fn reply(&mut self, packet: Packet<'_>) -> Result<(), TransferError> {
        let raw = packet.encode(self.config.indexing);
        self.stats.acks_sent += 1;
        if self.config.ack_channel == AckChannel::Piggyback && self.transport.supports_piggyback() {
            self.transport.piggyback(raw.as_bytes())?;
            return Ok(());
        }
        self.transport.set_mode(RadioMode::Transmit)?;
        let sent = self.transport.send(raw.as_bytes());
        self.transport.set_mode(RadioMode::Listen)?;
        sent.map_err(TransferError::from)
    }

    fn log(&self, event: TransferEvent) {
        if let Some(ref logger) = self.logger {
            logger.log(TransferLog {
                component: "receiver",
                session: self.session_id,
                event,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::split;
    use crate::protocol::{MessageKind, RadioPacket};
    use crate::transport::{LinkConditions, MemoryLink};

    /// Hand-driven far end of the link.
    struct Peer {
        link: MemoryLink,
        indexing: ChunkIndexing,
    }

    impl Peer {
        fn send(&mut self, packet: RadioPacket) {
            self.link.set_mode(RadioMode::Transmit).unwrap();
            self.link.send(packet.as_bytes()).unwrap();
            self.link.set_mode(RadioMode::Listen).unwrap();
        }

        fn send_raw(&mut self, bytes: &[u8]) {
            self.send(RadioPacket::new(bytes).unwrap());
        }

        fn expect_ack(&mut self) -> ChunkIndex {
            let raw = self.link.poll().unwrap().expect("no reply");
            match decode(&raw, self.indexing).unwrap() {
                Packet::Ack(index) => index,
                other => panic!("expected ack, got {:?}", other),
            }
        }

        fn expect(&mut self, bytes: &[u8]) {
            let raw = self.link.poll().unwrap().expect("no reply");
            assert_eq!(raw.as_bytes(), bytes);
        }

        fn silent(&mut self) -> bool {
            self.link.poll().unwrap().is_none()
        }
    }

    fn setup(config: ProtocolConfig) -> (Peer, Receiver<MemoryLink>) {
        let (a, b) = MemoryLink::pair(LinkConditions::default());
        let peer = Peer {
            link: a,
            indexing: config.indexing,
        };
        (peer, Receiver::new(b, config).with_logger(None))
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7) as u8).collect()
    }

    /// Handshake plus metadata for `data`; returns the framed chunks.
    fn open(peer: &mut Peer, rx: &mut Receiver<MemoryLink>, data: &[u8]) -> crate::framer::FramedMessage {
        let framed = split(data, MessageKind::Image, peer.indexing).unwrap();
        peer.send_raw(b"SYNC");
        assert!(rx.poll().unwrap().is_none());
        peer.expect(b"ACK");
        assert_eq!(rx.state(), ReceiverState::AwaitingMetadata);

        peer.send(framed.metadata_packet());
        assert!(rx.poll().unwrap().is_none());
        assert_eq!(peer.expect_ack(), CONTROL_INDEX);
        assert_eq!(rx.state(), ReceiverState::AwaitingChunk { expected: 0 });
        framed
    }

    #[test]
    fn delivers_in_order_message() {
        let (mut peer, mut rx) = setup(ProtocolConfig::default());
        let data = payload(100);
        let framed = open(&mut peer, &mut rx, &data);

        for i in 0..3u16 {
            peer.send(framed.chunk_packet(i));
            assert!(rx.poll().unwrap().is_none());
            assert_eq!(peer.expect_ack(), i);
        }
        peer.send(framed.chunk_packet(3));
        let message = rx.poll().unwrap().unwrap();
        assert_eq!(peer.expect_ack(), 3);
        assert_eq!(message.kind, MessageKind::Image);
        assert_eq!(message.data, data);
        assert_eq!(rx.state(), ReceiverState::Idle);

        peer.send_raw(b"DONE");
        assert!(rx.poll().unwrap().is_none());
        peer.expect(b"ACK_DONE");
    }

    #[test]
    fn duplicate_chunk_only_reacks() {
        let (mut peer, mut rx) = setup(ProtocolConfig::default());
        let framed = open(&mut peer, &mut rx, &payload(100));

        // Chunk 1 twice before chunk 0: gap buffered, then duplicate.
        peer.send(framed.chunk_packet(1));
        rx.poll().unwrap();
        assert_eq!(peer.expect_ack(), 1);
        peer.send(framed.chunk_packet(1));
        rx.poll().unwrap();
        assert_eq!(peer.expect_ack(), 1);
        assert_eq!(rx.stored_chunks(), 1);
        assert_eq!(rx.state(), ReceiverState::AwaitingChunk { expected: 0 });

        // 0, then 1 again: stored set is {0, 1}, expected jumps past 1.
        peer.send(framed.chunk_packet(0));
        rx.poll().unwrap();
        assert_eq!(peer.expect_ack(), 0);
        peer.send(framed.chunk_packet(1));
        rx.poll().unwrap();
        assert_eq!(peer.expect_ack(), 1);
        assert_eq!(rx.stored_chunks(), 2);
        assert_eq!(rx.state(), ReceiverState::AwaitingChunk { expected: 2 });
        assert_eq!(rx.stats().duplicate_chunks, 2);
        assert_eq!(rx.stats().gaps_buffered, 1);
    }

    #[test]
    fn any_arrival_order_reassembles() {
        let (mut peer, mut rx) = setup(ProtocolConfig::default());
        let data = payload(250);
        let framed = open(&mut peer, &mut rx, &data);

        let mut delivered = None;
        for &i in &[4u16, 8, 0, 0, 2, 1, 4, 7, 3, 6, 5] {
            peer.send(framed.chunk_packet(i));
            if let Some(message) = rx.poll().unwrap() {
                delivered = Some(message);
            }
            assert_eq!(peer.expect_ack(), i);
        }
        assert_eq!(delivered.unwrap().data, data);
    }

    #[test]
    fn gap_abort_policy_discards_session() {
        let config = ProtocolConfig {
            gap_policy: GapPolicy::Abort,
            ..ProtocolConfig::default()
        };
        let (mut peer, mut rx) = setup(config);
        let framed = open(&mut peer, &mut rx, &payload(100));

        peer.send(framed.chunk_packet(0));
        rx.poll().unwrap();
        assert_eq!(peer.expect_ack(), 0);

        peer.send(framed.chunk_packet(2));
        let err = rx.poll().unwrap_err();
        assert!(matches!(err, TransferError::OutOfOrderChunk { expected: 1, got: 2 }));
        assert!(peer.silent());
        assert_eq!(rx.state(), ReceiverState::Idle);
        assert_eq!(rx.stored_chunks(), 0);

        // Duplicates below expected are still fine under Abort.
        let framed = open(&mut peer, &mut rx, &payload(100));
        peer.send(framed.chunk_packet(0));
        rx.poll().unwrap();
        assert_eq!(peer.expect_ack(), 0);
        peer.send(framed.chunk_packet(0));
        rx.poll().unwrap();
        assert_eq!(peer.expect_ack(), 0);
        assert_eq!(rx.state(), ReceiverState::AwaitingChunk { expected: 1 });
    }

    #[test]
    fn inactivity_times_out_and_next_sync_starts_fresh() {
        let (mut peer, mut rx) = setup(ProtocolConfig::default());
        let framed = open(&mut peer, &mut rx, &payload(90));
        peer.send(framed.chunk_packet(0));
        rx.poll().unwrap();
        assert_eq!(peer.expect_ack(), 0);

        std::thread::sleep(Duration::from_millis(2100));
        match rx.poll() {
            Err(TransferError::ReceiveTimeout { waited, expected }) => {
                assert!(waited >= Duration::from_secs(2));
                assert_eq!(expected, Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rx.state(), ReceiverState::Idle);
        assert_eq!(rx.stored_chunks(), 0);

        // Late chunks of the dead session are dropped without an ack.
        peer.send(framed.chunk_packet(1));
        assert!(rx.poll().unwrap().is_none());
        assert!(peer.silent());

        let data = payload(40);
        let framed = open(&mut peer, &mut rx, &data);
        assert_eq!(rx.stored_chunks(), 0);
        peer.send(framed.chunk_packet(0));
        rx.poll().unwrap();
        peer.send(framed.chunk_packet(1));
        assert_eq!(rx.poll().unwrap().unwrap().data, data);
    }

    #[test]
    fn inactivity_while_awaiting_metadata_returns_to_idle() {
        let config = ProtocolConfig {
            inactivity_timeout: Duration::from_millis(100),
            ..ProtocolConfig::default()
        };
        let (mut peer, mut rx) = setup(config);
        peer.send_raw(b"SYNC");
        assert!(rx.poll().unwrap().is_none());
        peer.expect(b"ACK");
        assert_eq!(rx.state(), ReceiverState::AwaitingMetadata);

        std::thread::sleep(Duration::from_millis(150));
        match rx.poll() {
            Err(TransferError::ReceiveTimeout { waited, expected }) => {
                assert!(waited >= Duration::from_millis(100));
                assert_eq!(expected, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rx.state(), ReceiverState::Idle);

        let data = payload(20);
        let framed = open(&mut peer, &mut rx, &data);
        peer.send(framed.chunk_packet(0));
        assert_eq!(rx.poll().unwrap().unwrap().data, data);
    }

    #[test]
    fn differing_metadata_mid_session_starts_fresh() {
        let (mut peer, mut rx) = setup(ProtocolConfig::default());
        let stale = open(&mut peer, &mut rx, &payload(100));
        for i in 0..2u16 {
            peer.send(stale.chunk_packet(i));
            rx.poll().unwrap();
            assert_eq!(peer.expect_ack(), i);
        }
        assert_eq!(rx.stored_chunks(), 2);

        let data: Vec<u8> = payload(40).iter().map(|b| b ^ 0xAA).collect();
        let framed = split(&data, MessageKind::Sensor, ChunkIndexing::Indexed).unwrap();
        peer.send(framed.metadata_packet());
        assert!(rx.poll().unwrap().is_none());
        assert_eq!(peer.expect_ack(), CONTROL_INDEX);
        assert_eq!(rx.state(), ReceiverState::AwaitingChunk { expected: 0 });
        assert_eq!(rx.stored_chunks(), 0);

        peer.send(framed.chunk_packet(0));
        assert!(rx.poll().unwrap().is_none());
        assert_eq!(peer.expect_ack(), 0);
        peer.send(framed.chunk_packet(1));
        let message = rx.poll().unwrap().unwrap();
        assert_eq!(message.kind, MessageKind::Sensor);
        assert_eq!(message.data, data);
    }

    #[test]
    fn positional_message_is_released_on_done() {
        let config = ProtocolConfig {
            indexing: ChunkIndexing::Positional,
            ..ProtocolConfig::default()
        };
        let (mut peer, mut rx) = setup(config);
        let data = payload(70);
        let framed = open(&mut peer, &mut rx, &data);

        for i in 0..3u16 {
            peer.send(framed.chunk_packet(i));
            assert!(rx.poll().unwrap().is_none());
            assert_eq!(peer.expect_ack(), i);
        }
        assert_eq!(rx.state(), ReceiverState::AwaitingDone);

        // Final ack lost: the resend is re-acked, nothing is stored.
        peer.send(framed.chunk_packet(2));
        assert!(rx.poll().unwrap().is_none());
        assert_eq!(peer.expect_ack(), 2);
        assert_eq!(rx.stored_chunks(), 3);

        peer.send_raw(b"DONE");
        let message = rx.poll().unwrap().unwrap();
        peer.expect(b"ACK_DONE");
        assert_eq!(message.data, data);
        assert_eq!(rx.state(), ReceiverState::Idle);

        // ACK_DONE lost: the repeat is answered without a second delivery.
        peer.send_raw(b"DONE");
        assert!(rx.poll().unwrap().is_none());
        peer.expect(b"ACK_DONE");
    }

    #[test]
    fn positional_resend_taken_as_next_chunk_is_never_released() {
        let config = ProtocolConfig {
            indexing: ChunkIndexing::Positional,
            inactivity_timeout: Duration::from_millis(100),
            ..ProtocolConfig::default()
        };
        let (mut peer, mut rx) = setup(config);
        let framed = open(&mut peer, &mut rx, &payload(70));

        // Ack 1 is lost, so the sender resends chunk 1 and the receiver
        // stores it in the last position.
        for i in [0u16, 1, 1] {
            peer.send(framed.chunk_packet(i));
            assert!(rx.poll().unwrap().is_none());
        }
        assert_eq!(peer.expect_ack(), 0);
        assert_eq!(peer.expect_ack(), 1);
        assert_eq!(peer.expect_ack(), 2);
        assert_eq!(rx.state(), ReceiverState::AwaitingDone);

        // The sender aborts on ack 2 and never sends DONE.
        std::thread::sleep(Duration::from_millis(150));
        match rx.poll() {
            Err(TransferError::ReceiveTimeout { expected, .. }) => assert_eq!(expected, None),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rx.state(), ReceiverState::Idle);
        assert_eq!(rx.stored_chunks(), 0);

        peer.send_raw(b"DONE");
        assert!(rx.poll().unwrap().is_none());
        peer.expect(b"ACK_DONE");
    }

    #[test]
    fn reacks_late_duplicates_of_delivered_message() {
        let (mut peer, mut rx) = setup(ProtocolConfig::default());
        let framed = open(&mut peer, &mut rx, &payload(30));
        peer.send(framed.chunk_packet(0));
        assert!(rx.poll().unwrap().is_some());
        assert_eq!(peer.expect_ack(), 0);

        // Final ack lost: the sender resends chunk 0.
        peer.send(framed.chunk_packet(0));
        assert!(rx.poll().unwrap().is_none());
        assert_eq!(peer.expect_ack(), 0);
        assert_eq!(rx.state(), ReceiverState::Idle);
    }

    #[test]
    fn repeated_sync_and_metadata_are_reacked() {
        let (mut peer, mut rx) = setup(ProtocolConfig::default());
        let framed = open(&mut peer, &mut rx, &payload(60));

        peer.send(framed.metadata_packet());
        rx.poll().unwrap();
        assert_eq!(peer.expect_ack(), CONTROL_INDEX);
        assert_eq!(rx.state(), ReceiverState::AwaitingChunk { expected: 0 });

        peer.send(framed.chunk_packet(0));
        rx.poll().unwrap();
        assert_eq!(peer.expect_ack(), 0);

        // A SYNC mid-session starts over.
        peer.send_raw(b"SYNC");
        rx.poll().unwrap();
        peer.expect(b"ACK");
        assert_eq!(rx.state(), ReceiverState::AwaitingMetadata);
        assert_eq!(rx.stored_chunks(), 0);
    }

    #[test]
    fn empty_message_completes_on_metadata() {
        let (mut peer, mut rx) = setup(ProtocolConfig::default());
        let framed = split(&[], MessageKind::Sensor, ChunkIndexing::Indexed).unwrap();
        peer.send_raw(b"SYNC");
        rx.poll().unwrap();
        peer.expect(b"ACK");

        peer.send(framed.metadata_packet());
        let message = rx.poll().unwrap().unwrap();
        assert_eq!(peer.expect_ack(), CONTROL_INDEX);
        assert_eq!(message.kind, MessageKind::Sensor);
        assert!(message.data.is_empty());

        // Metadata ack lost: the repeat is re-acked, not delivered again.
        peer.send(framed.metadata_packet());
        assert!(rx.poll().unwrap().is_none());
        assert_eq!(peer.expect_ack(), CONTROL_INDEX);
    }

    #[test]
    fn noise_and_out_of_range_chunks_are_dropped() {
        let (mut peer, mut rx) = setup(ProtocolConfig::default());
        let _framed = open(&mut peer, &mut rx, &payload(60));

        peer.send_raw(b"\x13\x37");
        assert!(rx.poll().unwrap().is_none());
        let mut bogus = [0u8; 32];
        bogus[1] = 9;
        peer.send_raw(&bogus);
        assert!(rx.poll().unwrap().is_none());
        assert!(peer.silent());
        assert_eq!(rx.stats().decode_errors, 1);
        assert_eq!(rx.state(), ReceiverState::AwaitingChunk { expected: 0 });
    }
}
