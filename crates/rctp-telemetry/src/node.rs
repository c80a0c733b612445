/// Transmitting node: one cycle sends the latest sensor record, then the image
/// captured with it.

use rctp::{MessageKind, SendReport, Sender, TransferError, Transport};

use crate::sensor::SensorRecord;

/// Outcome of one node cycle. Each message succeeds or fails on its own.
#[derive(Debug)]
pub struct CycleReport {
    pub sensor: Result<SendReport, TransferError>,
    pub image: Result<SendReport, TransferError>,
}

impl CycleReport {
    pub fn is_complete(&self) -> bool {
        self.sensor.is_ok() && self.image.is_ok()
    }
}

pub struct Node<T: Transport> {
    sender: Sender<T>,
    cycles: u64,
}

impl<T: Transport> Node<T> {
    pub fn new(sender: Sender<T>) -> Self {
        Self { sender, cycles: 0 }
    }

    pub fn sender(&self) -> &Sender<T> {
        &self.sender
    }

    pub fn sender_mut(&mut self) -> &mut Sender<T> {
        &mut self.sender
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Send `record` then `image`. A failed sensor transfer does not stop the
    /// image; the station uploads it with placeholder readings.
    pub fn run_cycle(&mut self, record: &SensorRecord, image: &[u8]) -> CycleReport {
        self.cycles += 1;

        let sensor = self.sender.send(MessageKind::Sensor, &record.encode());
        if let Err(ref e) = sensor {
            tracing::warn!(cycle = self.cycles, error = %e, "sensor transfer failed");
        }

        let image = self.sender.send(MessageKind::Image, image);
        match image {
            Ok(ref report) => tracing::info!(
                cycle = self.cycles,
                bytes = report.bytes,
                chunks = report.chunks,
                retransmits = report.stats.retransmits,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "image delivered"
            ),
            Err(ref e) => tracing::warn!(cycle = self.cycles, error = %e, "image transfer failed"),
        }

        CycleReport { sensor, image }
    }
}
