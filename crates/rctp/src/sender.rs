/// Sender session: handshake, metadata, then one acknowledged chunk at a time.
///
/// Every exchange is stop-and-wait. The sender switches to `Transmit`, sends
/// one packet, switches back to `Listen` and polls until a reply or the
/// wall-clock deadline. A timed-out exchange resends the same packet; running
/// out of attempts aborts the whole message. Acks naming something other than
/// the packet in flight are counted as stale and never move progress.
///
/// Positional chunks carry no index, so a resend that the receiver stored as
/// the next chunk shows up as an ack past the chunk in flight. That aborts
/// the message, and the receiver never releases it without the closing DONE.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ProtocolConfig;
use crate::error::{TransferError, TransportError};
use crate::framer::{FramedMessage, split};
use crate::logging::{Exchange, TracingLogger, TransferEvent, TransferLog, TransferLogger};
use crate::protocol::{
    CONTROL_INDEX, ChunkIndex, ChunkIndexing, MessageKind, Packet, RadioPacket, decode,
};
use crate::stats::TransferStats;
use crate::transport::{RadioMode, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Handshaking,
    SendingMetadata,
    SendingChunk(ChunkIndex),
    /// Closing DONE / ACK_DONE exchange after the last chunk.
    Closing,
    Done,
    Aborted,
}

/// Summary of a delivered message.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub kind: MessageKind,
    pub bytes: usize,
    pub chunks: usize,
    pub stats: TransferStats,
    pub elapsed: Duration,
    /// False when the closing exchange was skipped or went unanswered. The
    /// message itself was fully acknowledged either way.
    pub done_acknowledged: bool,
}

/// How an incoming packet relates to the exchange in flight.
enum Verdict {
    Accept,
    Stale(ChunkIndex),
    Ignore,
    Fatal(TransferError),
}

pub struct Sender<T: Transport> {
    transport: T,
    config: ProtocolConfig,
    state: SenderState,
    logger: Option<Arc<dyn TransferLogger>>,
    session: u32,
}

impl<T: Transport> Sender<T> {
    pub fn new(transport: T, config: ProtocolConfig) -> Self {
        Self {
            transport,
            config,
            state: SenderState::Idle,
            logger: Some(Arc::new(TracingLogger)),
            session: 0,
        }
    }

    /// Replace the logger. `None` silences the session entirely.
    pub fn with_logger(mut self, logger: Option<Arc<dyn TransferLogger>>) -> Self {
        self.logger = logger;
        self
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Deliver one message. Blocks until it is acknowledged or aborted.
    ///
    /// Payloads too large for one session fail before any traffic is sent.
    pub fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<SendReport, TransferError> {
        let framed = split(payload, kind, self.config.indexing)?;
        self.session = self.session.wrapping_add(1);
        let started = Instant::now();
        let mut stats = TransferStats::new();

        match self.run(&framed, &mut stats) {
            Ok(done_acknowledged) => {
                self.state = SenderState::Done;
                let elapsed = started.elapsed();
                self.log(TransferEvent::TransferComplete {
                    kind,
                    bytes: payload.len(),
                    chunks: framed.chunk_count(),
                    retransmits: stats.retransmits,
                    duration_ms: elapsed.as_millis() as u64,
                });
                Ok(SendReport {
                    kind,
                    bytes: payload.len(),
                    chunks: framed.chunk_count(),
                    stats,
                    elapsed,
                    done_acknowledged,
                })
            }
            Err(e) => {
                self.state = SenderState::Aborted;
                self.log(TransferEvent::Aborted {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Returns whether the closing DONE was acknowledged.
    fn run(&mut self, framed: &FramedMessage, stats: &mut TransferStats) -> Result<bool, TransferError> {
        let indexing = self.config.indexing;

        self.state = SenderState::Handshaking;
        let sync = Packet::Sync.encode(indexing);
        let retries = self.config.handshake_retries;
        let timeout = self.config.handshake_timeout;
        let attempts = self
            .exchange(Exchange::Handshake, &sync, timeout, retries, stats, |reply| match reply {
                Packet::HandshakeAck => Verdict::Accept,
                _ => Verdict::Ignore,
            })?
            .ok_or(TransferError::HandshakeFailed { attempts: retries })?;
        self.log(TransferEvent::HandshakeComplete { attempts });

        self.state = SenderState::SendingMetadata;
        let retries = self.config.max_retries;
        let timeout = self.config.chunk_timeout;
        self.exchange(
            Exchange::Metadata,
            &framed.metadata_packet(),
            timeout,
            retries,
            stats,
            |reply| match reply {
                Packet::Ack(CONTROL_INDEX) => Verdict::Accept,
                Packet::Ack(other) => Verdict::Stale(*other),
                _ => Verdict::Ignore,
            },
        )?
        .ok_or(TransferError::MetadataDeliveryFailed { attempts: retries })?;
        self.log(TransferEvent::MetadataAcked {
            kind: framed.metadata.kind,
            total_length: framed.metadata.total_length,
            chunks: framed.chunk_count(),
        });

        let positional = indexing == ChunkIndexing::Positional;
        for i in 0..framed.chunk_count() {
            let index = i as ChunkIndex;
            self.state = SenderState::SendingChunk(index);
            let attempts = self
                .exchange(
                    Exchange::Chunk(index),
                    &framed.chunk_packet(index),
                    timeout,
                    retries,
                    stats,
                    |reply| match reply {
                        Packet::Ack(acked) if *acked == index => Verdict::Accept,
                        Packet::Ack(acked) if positional && *acked > index && *acked != CONTROL_INDEX => {
                            Verdict::Fatal(TransferError::ChunkDesync {
                                in_flight: index,
                                acked: *acked,
                            })
                        }
                        Packet::Ack(other) => Verdict::Stale(*other),
                        _ => Verdict::Ignore,
                    },
                )?
                .ok_or(TransferError::ChunkDeliveryFailed {
                    index,
                    attempts: retries,
                })?;
            self.log(TransferEvent::ChunkAcked { index, attempts });
        }

        if !self.config.closing_exchange && !positional {
            return Ok(false);
        }

        self.state = SenderState::Closing;
        let done = Packet::Done.encode(indexing);
        let acked = self
            .exchange(Exchange::Done, &done, timeout, retries, stats, |reply| match reply {
                Packet::DoneAck => Verdict::Accept,
                Packet::Ack(other) => Verdict::Stale(*other),
                _ => Verdict::Ignore,
            })?
            .is_some();
        if !acked && positional {
            return Err(TransferError::DoneNotAcknowledged { attempts: retries });
        }
        if !acked {
            tracing::warn!(
                session = self.session,
                attempts = retries,
                "closing DONE went unanswered; every chunk was already acknowledged"
            );
        }
        Ok(acked)
    }

    /// Run one stop-and-wait exchange. Returns the attempt that was
    /// acknowledged, or None once every attempt timed out.
    fn exchange<F>(
        &mut self,
        what: Exchange,
        packet: &RadioPacket,
        timeout: Duration,
        attempts: u32,
        stats: &mut TransferStats,
        mut classify: F,
    ) -> Result<Option<u32>, TransferError>
    where
        F: FnMut(&Packet<'_>) -> Verdict,
    {
        let indexing = self.config.indexing;

        for attempt in 1..=attempts {
            if attempt > 1 {
                stats.retransmits += 1;
                self.log(TransferEvent::Retransmit {
                    exchange: what,
                    attempt,
                });
            }
            self.transmit(packet)?;
            stats.packets_sent += 1;

            let deadline = Instant::now() + timeout;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let Some(raw) = self.transport.poll()? else {
                    std::thread::sleep(self.config.poll_interval.min(deadline - now));
                    continue;
                };
                match decode(&raw, indexing) {
                    Ok(reply) => match classify(&reply) {
                        Verdict::Accept => return Ok(Some(attempt)),
                        Verdict::Fatal(e) => return Err(e),
                        Verdict::Stale(acked) => {
                            stats.stale_acks += 1;
                            self.log(TransferEvent::StaleAck {
                                exchange: what,
                                acked,
                            });
                        }
                        Verdict::Ignore => {
                            tracing::trace!(session = self.session, ?reply, "ignoring unrelated packet");
                        }
                    },
                    Err(error) => {
                        stats.decode_errors += 1;
                        self.log(TransferEvent::PacketDropped {
                            error,
                            bytes: hex::encode(raw.as_bytes()),
                        });
                    }
                }
            }

            self.log(TransferEvent::AckTimeout {
                exchange: what,
                attempt,
            });
        }

        Ok(None)
    }

    /// Transmit one packet and return to listening, even if the send failed.
    fn transmit(&mut self, packet: &RadioPacket) -> Result<(), TransportError> {
        self.transport.set_mode(RadioMode::Transmit)?;
        let sent = self.transport.send(packet.as_bytes());
        self.transport.set_mode(RadioMode::Listen)?;
        sent
    }

    fn log(&self, event: TransferEvent) {
        if let Some(ref logger) = self.logger {
            logger.log(TransferLog {
                component: "sender",
                session: self.session,
                event,
            });
        }
    }
}
