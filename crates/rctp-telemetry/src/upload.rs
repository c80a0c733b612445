/// Upload records pairing an image with the sensor readings captured before
/// it, and the `Uploader` seam the station posts them through.

use std::io::Write;

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Value, json};

use crate::TIMESTAMP_FORMAT;
use crate::sensor::Readings;

/// `{timestamp, sensor_readings, image_base64}` as posted to the remote log.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub timestamp: String,
    pub sensor_readings: Value,
    pub image_base64: String,
    /// False when no sensor readings were cached for this image.
    #[serde(skip)]
    pub paired: bool,
}

impl UploadRecord {
    /// Pair an image with cached readings, or with a placeholder when none
    /// arrived.
    pub fn pair(image: &[u8], readings: Option<Readings>, at: DateTime<Local>) -> Self {
        let paired = readings.is_some();
        let sensor_readings = match readings {
            Some(map) => Value::Object(map),
            None => json!({ "error": "data not received" }),
        };
        Self {
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            sensor_readings,
            image_base64: BASE64.encode(image),
            paired,
        }
    }
}

/// Destination for completed upload records.
pub trait Uploader {
    fn upload(&mut self, record: &UploadRecord) -> Result<()>;
}

impl<U: Uploader + ?Sized> Uploader for &mut U {
    fn upload(&mut self, record: &UploadRecord) -> Result<()> {
        (**self).upload(record)
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesUploader<W: Write> {
    out: W,
    uploaded: usize,
}

impl<W: Write> JsonLinesUploader<W> {
    pub fn new(out: W) -> Self {
        Self { out, uploaded: 0 }
    }

    pub fn uploaded(&self) -> usize {
        self.uploaded
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Uploader for JsonLinesUploader<W> {
    fn upload(&mut self, record: &UploadRecord) -> Result<()> {
        serde_json::to_writer(&mut self.out, record).context("Failed to serialize upload record")?;
        self.out.write_all(b"\n")?;
        self.out.flush().context("Failed to flush upload record")?;
        self.uploaded += 1;
        Ok(())
    }
}
