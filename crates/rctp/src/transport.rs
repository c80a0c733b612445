/// Transport adapter for a half-duplex packet radio.
///
/// A radio either transmits or listens. Packets that arrive while it is in
/// `Transmit` mode are lost, and every mode switch costs a settle delay. The
/// sessions own all mode switching; application code never touches it.
///
/// Two emulations are provided: [`MemoryLink`], an in-process pair with
/// seeded loss and reorder, and [`UdpLink`], a loopback UDP socket that
/// enforces the MTU and discards whatever queued while transmitting.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver as ChannelRx, Sender as ChannelTx, TryRecvError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::TransportError;
use crate::protocol::{MTU, RadioPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Listen,
    Transmit,
}

impl RadioMode {
    fn as_u8(self) -> u8 {
        match self {
            Self::Listen => 0,
            Self::Transmit => 1,
        }
    }

    fn from_u8(v: u8) -> Self {
        if v == 1 { Self::Transmit } else { Self::Listen }
    }
}

/// A half-duplex radio as seen by a session.
pub trait Transport {
    /// Best-effort send. Requires `Transmit` mode.
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError>;

    /// Non-blocking receive of one buffered packet.
    fn poll(&mut self) -> Result<Option<RadioPacket>, TransportError>;

    /// Switch mode, blocking for the settle delay. Switching to the current
    /// mode is a no-op.
    fn set_mode(&mut self, mode: RadioMode) -> Result<(), TransportError>;

    fn mode(&self) -> RadioMode;

    /// Whether replies can ride on the link-layer acknowledgement.
    fn supports_piggyback(&self) -> bool {
        false
    }

    /// Attach `packet` to the link-layer ack of the next received frame.
    /// Does not require `Transmit` mode.
    fn piggyback(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let _ = packet;
        Err(TransportError::PiggybackUnsupported)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        (**self).send(packet)
    }

    fn poll(&mut self) -> Result<Option<RadioPacket>, TransportError> {
        (**self).poll()
    }

    fn set_mode(&mut self, mode: RadioMode) -> Result<(), TransportError> {
        (**self).set_mode(mode)
    }

    fn mode(&self) -> RadioMode {
        (**self).mode()
    }

    fn supports_piggyback(&self) -> bool {
        (**self).supports_piggyback()
    }

    fn piggyback(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        (**self).piggyback(packet)
    }
}

/// Channel impairments for a [`MemoryLink`] pair.
#[derive(Debug, Clone)]
pub struct LinkConditions {
    /// Probability in `[0, 1]` that a packet is dropped.
    pub loss: f64,
    /// Probability in `[0, 1]` that a packet is held back and delivered after
    /// the next one.
    pub reorder: f64,
    /// Delay paid on every mode switch.
    pub settle: Duration,
    /// Whether endpoints offer piggyback acknowledgements.
    pub piggyback: bool,
    pub seed: u64,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            loss: 0.0,
            reorder: 0.0,
            settle: Duration::ZERO,
            piggyback: false,
            seed: 0,
        }
    }
}

impl LinkConditions {
    pub fn lossy(loss: f64, seed: u64) -> Self {
        Self {
            loss,
            seed,
            ..Self::default()
        }
    }
}

/// Returns true to drop the outgoing packet.
pub type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// One end of an in-memory half-duplex link.
pub struct MemoryLink {
    tx: ChannelTx<RadioPacket>,
    rx: ChannelRx<RadioPacket>,
    mode: Arc<AtomicU8>,
    peer_mode: Arc<AtomicU8>,
    conditions: LinkConditions,
    rng: StdRng,
    held: Option<RadioPacket>,
    drop_filter: Option<DropFilter>,
    sent: Arc<AtomicU64>,
}

impl MemoryLink {
    /// Create two connected endpoints, both starting in `Listen` mode.
    pub fn pair(conditions: LinkConditions) -> (Self, Self) {
        let (a_tx, b_rx) = crossbeam_channel::unbounded();
        let (b_tx, a_rx) = crossbeam_channel::unbounded();
        let a_mode = Arc::new(AtomicU8::new(RadioMode::Listen.as_u8()));
        let b_mode = Arc::new(AtomicU8::new(RadioMode::Listen.as_u8()));

        let a = Self {
            tx: a_tx,
            rx: a_rx,
            mode: a_mode.clone(),
            peer_mode: b_mode.clone(),
            rng: StdRng::seed_from_u64(conditions.seed),
            conditions: conditions.clone(),
            held: None,
            drop_filter: None,
            sent: Arc::new(AtomicU64::new(0)),
        };
        let b = Self {
            tx: b_tx,
            rx: b_rx,
            mode: b_mode,
            peer_mode: a_mode,
            rng: StdRng::seed_from_u64(conditions.seed.wrapping_add(1)),
            conditions,
            held: None,
            drop_filter: None,
            sent: Arc::new(AtomicU64::new(0)),
        };
        (a, b)
    }

    /// Install a filter for scripted loss on packets this endpoint sends.
    pub fn set_drop_filter<F>(&mut self, filter: F)
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.drop_filter = Some(Box::new(filter));
    }

    /// Shared count of packets this endpoint has sent, dropped ones included.
    pub fn sent_counter(&self) -> Arc<AtomicU64> {
        self.sent.clone()
    }

    fn impaired(&mut self, packet: &RadioPacket) -> bool {
        if let Some(filter) = self.drop_filter.as_mut() {
            if filter(packet.as_bytes()) {
                return true;
            }
        }
        self.conditions.loss > 0.0 && self.rng.random::<f64>() < self.conditions.loss
    }

    fn deliver(&self, packet: RadioPacket, check_peer_mode: bool) {
        if check_peer_mode
            && RadioMode::from_u8(self.peer_mode.load(Ordering::Acquire)) == RadioMode::Transmit
        {
            tracing::trace!(bytes = %hex::encode(packet.as_bytes()), "peer transmitting, packet lost");
            return;
        }
        // A disconnected peer is indistinguishable from loss.
        let _ = self.tx.send(packet);
    }

    fn transmit(&mut self, packet: &[u8], check_peer_mode: bool) -> Result<(), TransportError> {
        let packet =
            RadioPacket::new(packet).ok_or(TransportError::Oversized { len: packet.len() })?;
        self.sent.fetch_add(1, Ordering::Relaxed);

        if self.impaired(&packet) {
            return Ok(());
        }
        if self.conditions.reorder > 0.0
            && self.held.is_none()
            && self.rng.random::<f64>() < self.conditions.reorder
        {
            self.held = Some(packet);
            return Ok(());
        }

        self.deliver(packet, check_peer_mode);
        if let Some(held) = self.held.take() {
            self.deliver(held, check_peer_mode);
        }
        Ok(())
    }
}

impl Transport for MemoryLink {
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        if packet.len() > MTU {
            return Err(TransportError::Oversized { len: packet.len() });
        }
        if self.mode() != RadioMode::Transmit {
            return Err(TransportError::NotTransmitting);
        }
        self.transmit(packet, true)
    }

    fn poll(&mut self) -> Result<Option<RadioPacket>, TransportError> {
        match self.rx.try_recv() {
            Ok(packet) => Ok(Some(packet)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn set_mode(&mut self, mode: RadioMode) -> Result<(), TransportError> {
        if self.mode() == mode {
            return Ok(());
        }
        self.mode.store(mode.as_u8(), Ordering::Release);
        if !self.conditions.settle.is_zero() {
            std::thread::sleep(self.conditions.settle);
        }
        Ok(())
    }

    fn mode(&self) -> RadioMode {
        RadioMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    fn supports_piggyback(&self) -> bool {
        self.conditions.piggyback
    }

    fn piggyback(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        if !self.conditions.piggyback {
            return Err(TransportError::PiggybackUnsupported);
        }
        self.transmit(packet, false)
    }
}

/// Half-duplex emulation over a connected, non-blocking UDP socket.
pub struct UdpLink {
    socket: UdpSocket,
    mode: RadioMode,
    settle: Duration,
}

impl UdpLink {
    /// Bind a non-blocking socket at `addr`.
    pub fn bind(addr: SocketAddr, settle: Duration) -> io::Result<Self> {
        Ok(Self {
            socket: create_link_socket(addr)?,
            mode: RadioMode::Listen,
            settle,
        })
    }

    pub fn connect(&self, peer: SocketAddr) -> io::Result<()> {
        self.socket.connect(peer)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Two links on 127.0.0.1, connected to each other.
    pub fn pair_on_loopback(settle: Duration) -> io::Result<(Self, Self)> {
        let any: SocketAddr = SocketAddr::from(([127, 0, 0, 1], 0));
        let a = Self::bind(any, settle)?;
        let b = Self::bind(any, settle)?;
        a.connect(b.local_addr()?)?;
        b.connect(a.local_addr()?)?;
        Ok((a, b))
    }

    /// Discard everything that queued while the radio was deaf.
    fn drain(&mut self) -> io::Result<usize> {
        let mut buf = [0u8; MTU + 1];
        let mut dropped = 0;
        loop {
            match self.socket.recv(&mut buf) {
                Ok(_) => dropped += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(dropped),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Transport for UdpLink {
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        if packet.len() > MTU {
            return Err(TransportError::Oversized { len: packet.len() });
        }
        if self.mode != RadioMode::Transmit {
            return Err(TransportError::NotTransmitting);
        }
        match self.socket.send(packet) {
            Ok(_) => Ok(()),
            // Fire-and-forget: a full buffer or an absent peer is loss.
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::ConnectionRefused =>
            {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn poll(&mut self) -> Result<Option<RadioPacket>, TransportError> {
        if self.mode == RadioMode::Transmit {
            return Ok(None);
        }
        let mut buf = [0u8; MTU + 1];
        loop {
            match self.socket.recv(&mut buf) {
                Ok(n) if n > MTU => {
                    tracing::debug!(len = n, "dropping datagram larger than the radio MTU");
                }
                Ok(n) => return Ok(RadioPacket::new(&buf[..n])),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn set_mode(&mut self, mode: RadioMode) -> Result<(), TransportError> {
        if self.mode == mode {
            return Ok(());
        }
        self.mode = mode;
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        if mode == RadioMode::Listen {
            let dropped = self.drain()?;
            if dropped > 0 {
                tracing::trace!(dropped, "discarded packets received while transmitting");
            }
        }
        Ok(())
    }

    fn mode(&self) -> RadioMode {
        self.mode
    }
}

/// Create a non-blocking UDP socket bound to `addr`.
fn create_link_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transmit(link: &mut impl Transport, bytes: &[u8]) {
        link.set_mode(RadioMode::Transmit).unwrap();
        link.send(bytes).unwrap();
        link.set_mode(RadioMode::Listen).unwrap();
    }

    #[test]
    fn memory_link_delivers_in_order() {
        let (mut a, mut b) = MemoryLink::pair(LinkConditions::default());
        transmit(&mut a, b"SYNC");
        transmit(&mut a, b"DONE");
        assert_eq!(b.poll().unwrap().unwrap().as_bytes(), b"SYNC");
        assert_eq!(b.poll().unwrap().unwrap().as_bytes(), b"DONE");
        assert!(b.poll().unwrap().is_none());
        assert_eq!(a.sent_counter().load(Ordering::Relaxed), 2);
    }

    #[test]
    fn send_requires_transmit_mode_and_mtu() {
        let (mut a, _b) = MemoryLink::pair(LinkConditions::default());
        assert!(matches!(a.send(b"SYNC"), Err(TransportError::NotTransmitting)));

        a.set_mode(RadioMode::Transmit).unwrap();
        assert!(matches!(
            a.send(&[0u8; MTU + 1]),
            Err(TransportError::Oversized { len: 33 })
        ));
    }

    #[test]
    fn packet_to_transmitting_peer_is_lost() {
        let (mut a, mut b) = MemoryLink::pair(LinkConditions::default());
        b.set_mode(RadioMode::Transmit).unwrap();
        transmit(&mut a, b"SYNC");
        b.set_mode(RadioMode::Listen).unwrap();
        assert!(b.poll().unwrap().is_none());
    }

    #[test]
    fn piggyback_bypasses_peer_mode() {
        let conditions = LinkConditions {
            piggyback: true,
            ..LinkConditions::default()
        };
        let (mut a, mut b) = MemoryLink::pair(conditions);
        assert!(a.supports_piggyback());
        b.set_mode(RadioMode::Transmit).unwrap();
        a.piggyback(b"ACK").unwrap();
        assert_eq!(b.poll().unwrap().unwrap().as_bytes(), b"ACK");

        let (mut c, _d) = MemoryLink::pair(LinkConditions::default());
        assert!(matches!(c.piggyback(b"ACK"), Err(TransportError::PiggybackUnsupported)));
    }

    #[test]
    fn drop_filter_scripts_loss() {
        let (mut a, mut b) = MemoryLink::pair(LinkConditions::default());
        a.set_drop_filter(|bytes| bytes == b"ACK\x00\x02");
        transmit(&mut a, b"ACK\x00\x01");
        transmit(&mut a, b"ACK\x00\x02");
        transmit(&mut a, b"ACK\x00\x03");
        assert_eq!(b.poll().unwrap().unwrap().as_bytes(), b"ACK\x00\x01");
        assert_eq!(b.poll().unwrap().unwrap().as_bytes(), b"ACK\x00\x03");
        assert!(b.poll().unwrap().is_none());
        assert_eq!(a.sent_counter().load(Ordering::Relaxed), 3);
    }

    #[test]
    fn reorder_swaps_adjacent_packets() {
        let conditions = LinkConditions {
            reorder: 1.0,
            ..LinkConditions::default()
        };
        let (mut a, mut b) = MemoryLink::pair(conditions);
        transmit(&mut a, b"first");
        assert!(b.poll().unwrap().is_none());
        transmit(&mut a, b"second");
        assert_eq!(b.poll().unwrap().unwrap().as_bytes(), b"second");
        assert_eq!(b.poll().unwrap().unwrap().as_bytes(), b"first");
    }

    #[test]
    fn udp_link_drops_what_arrives_while_transmitting() {
        let (mut a, mut b) = UdpLink::pair_on_loopback(Duration::ZERO).unwrap();

        b.set_mode(RadioMode::Transmit).unwrap();
        transmit(&mut a, b"lost");
        std::thread::sleep(Duration::from_millis(20));
        b.set_mode(RadioMode::Listen).unwrap();
        assert!(b.poll().unwrap().is_none());

        transmit(&mut a, b"SYNC");
        let mut got = None;
        for _ in 0..200 {
            if let Some(p) = b.poll().unwrap() {
                got = Some(p);
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(got.unwrap().as_bytes(), b"SYNC");
    }
}
