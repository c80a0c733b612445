/// Telemetry application layer on top of RCTP.
///
/// - `Node`: sends a sensor record then an image each cycle
/// - `Station`: receives, pairs the image with the preceding readings, uploads
/// - `SensorSlot`: single-slot cache, emptied on every pairing attempt
/// - `Uploader`: destination for `{timestamp, sensor_readings, image_base64}`

pub mod node;
pub mod pairing;
pub mod sensor;
pub mod station;
pub mod upload;

/// Timestamp layout for sensor records and upload records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Re-export key types for convenience.
pub use node::{CycleReport, Node};
pub use pairing::SensorSlot;
pub use sensor::{Readings, SensorRecord};
pub use station::{Station, StationEvent};
pub use upload::{JsonLinesUploader, UploadRecord, Uploader};
