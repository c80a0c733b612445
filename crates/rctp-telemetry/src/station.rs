/// Ground station: receives messages, caches sensor readings, pairs each image
/// with the readings that preceded it and uploads the result.
///
/// Nothing here stops the station. Receive timeouts, aborted sessions,
/// unparsable sensor records and upload failures are reported as events and
/// logged; the station goes straight back to listening.

use std::time::{Duration, Instant};

use chrono::Local;
use rctp::{Message, MessageKind, Receiver, TransferError, Transport};

use crate::pairing::SensorSlot;
use crate::sensor::SensorRecord;
use crate::upload::{UploadRecord, Uploader};

#[derive(Debug)]
pub enum StationEvent {
    /// Sensor readings cached. `replaced_stale` is set when unpaired
    /// readings were discarded to make room.
    SensorCached { replaced_stale: bool },
    /// A sensor message arrived but could not be parsed.
    SensorRejected { error: String },
    ImageUploaded { bytes: usize, paired: bool },
    UploadFailed { error: String },
    TransferFailed(TransferError),
}

pub struct Station<T: Transport, U: Uploader> {
    receiver: Receiver<T>,
    uploader: U,
    slot: SensorSlot,
}

impl<T: Transport, U: Uploader> Station<T, U> {
    pub fn new(receiver: Receiver<T>, uploader: U) -> Self {
        Self {
            receiver,
            uploader,
            slot: SensorSlot::new(),
        }
    }

    pub fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    pub fn slot(&self) -> &SensorSlot {
        &self.slot
    }

    /// Poll the receiver once.
    pub fn step(&mut self) -> Option<StationEvent> {
        match self.receiver.poll() {
            Ok(Some(message)) => Some(self.deliver(message)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "transfer failed, listening for the next one");
                Some(StationEvent::TransferFailed(e))
            }
        }
    }

    /// Keep stepping for `duration`, collecting events.
    pub fn run_for(&mut self, duration: Duration) -> Vec<StationEvent> {
        let deadline = Instant::now() + duration;
        let idle = self.receiver.config().poll_interval;
        let mut events = Vec::new();
        while Instant::now() < deadline {
            match self.step() {
                Some(event) => events.push(event),
                None => std::thread::sleep(idle),
            }
        }
        events
    }

    /// Hand a completed message to the application layer.
    pub fn deliver(&mut self, message: Message) -> StationEvent {
        match message.kind {
            MessageKind::Sensor => match SensorRecord::from_bytes(&message.data) {
                Ok(record) => {
                    let replaced_stale = self.slot.store(record.readings()).is_some();
                    if replaced_stale {
                        tracing::warn!("discarding unpaired sensor readings");
                    }
                    tracing::info!(
                        timestamp = record.timestamp(),
                        fields = record.fields().len(),
                        "sensor readings cached"
                    );
                    StationEvent::SensorCached { replaced_stale }
                }
                Err(e) => {
                    // Never pair an image with readings older than this message.
                    self.slot.take();
                    tracing::warn!(error = %e, bytes = message.data.len(), "rejected sensor record");
                    StationEvent::SensorRejected {
                        error: format!("{:#}", e),
                    }
                }
            },
            MessageKind::Image => {
                let readings = self.slot.take();
                let record = UploadRecord::pair(&message.data, readings, Local::now());
                match self.uploader.upload(&record) {
                    Ok(()) => {
                        tracing::info!(
                            bytes = message.data.len(),
                            paired = record.paired,
                            "image uploaded"
                        );
                        StationEvent::ImageUploaded {
                            bytes: message.data.len(),
                            paired: record.paired,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "upload failed");
                        StationEvent::UploadFailed {
                            error: format!("{:#}", e),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::JsonLinesUploader;
    use anyhow::anyhow;
    use rctp::{LinkConditions, MemoryLink, ProtocolConfig};

    struct Offline;

    impl Uploader for Offline {
        fn upload(&mut self, _record: &UploadRecord) -> anyhow::Result<()> {
            Err(anyhow!("network unreachable"))
        }
    }

    fn receiver() -> Receiver<MemoryLink> {
        let (_peer, link) = MemoryLink::pair(LinkConditions::default());
        Receiver::new(link, ProtocolConfig::default()).with_logger(None)
    }

    fn sensor(text: &str) -> Message {
        Message {
            kind: MessageKind::Sensor,
            data: text.as_bytes().to_vec(),
        }
    }

    fn image(data: &[u8]) -> Message {
        Message {
            kind: MessageKind::Image,
            data: data.to_vec(),
        }
    }

    #[test]
    fn readings_are_used_once() {
        let mut station = Station::new(receiver(), JsonLinesUploader::new(Vec::new()));

        assert!(matches!(
            station.deliver(sensor("2025-06-01 10:00:00|T:20.0C")),
            StationEvent::SensorCached { replaced_stale: false }
        ));
        assert!(matches!(
            station.deliver(sensor("2025-06-01 10:00:10|T:21.0C")),
            StationEvent::SensorCached { replaced_stale: true }
        ));
        assert!(matches!(
            station.deliver(image(b"one")),
            StationEvent::ImageUploaded { bytes: 3, paired: true }
        ));
        assert!(station.slot().is_empty());
        assert!(matches!(
            station.deliver(image(b"two")),
            StationEvent::ImageUploaded { paired: false, .. }
        ));

        let text = String::from_utf8(station.uploader().get_ref().clone()).unwrap();
        let lines: Vec<serde_json::Value> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines[0]["sensor_readings"]["T"], serde_json::json!(21.0));
        assert_eq!(lines[1]["sensor_readings"]["error"], "data not received");
    }

    #[test]
    fn failed_upload_still_clears_the_slot() {
        let mut station = Station::new(receiver(), Offline);
        station.deliver(sensor("2025-06-01 10:00:00|T:20.0C"));
        match station.deliver(image(b"jpeg")) {
            StationEvent::UploadFailed { error } => assert!(error.contains("unreachable")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(station.slot().is_empty());
    }

    #[test]
    fn rejected_sensor_drops_cached_readings() {
        let mut station = Station::new(receiver(), JsonLinesUploader::new(Vec::new()));
        station.deliver(sensor("2025-06-01 10:00:00|T:20.0C"));
        assert!(matches!(
            station.deliver(raw_sensor(&[0xFF, 0x00, 0xFE])),
            StationEvent::SensorRejected { .. }
        ));
        assert!(station.slot().is_empty());
    }

    fn raw_sensor(bytes: &[u8]) -> Message {
        Message {
            kind: MessageKind::Sensor,
            data: bytes.to_vec(),
        }
    }
}
