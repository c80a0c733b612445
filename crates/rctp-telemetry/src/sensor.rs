/// Pipe-delimited sensor records: `timestamp|KEY:value|KEY:value|...`.
///
/// The station turns a record into a JSON object whose values are numbers
/// whenever the reading has a numeric part (`"21.5C"` becomes `21.5`) and
/// the raw text otherwise.

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};

use crate::TIMESTAMP_FORMAT;

/// Parsed sensor readings keyed by sensor name, plus `capture_timestamp`.
pub type Readings = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorRecord {
    timestamp: String,
    fields: Vec<(String, String)>,
}

impl SensorRecord {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            fields: Vec::new(),
        }
    }

    /// Record stamped with the local wall-clock time.
    pub fn now() -> Self {
        Self::new(chrono::Local::now().format(TIMESTAMP_FORMAT).to_string())
    }

    /// Append one reading. Keys may not contain `|` or `:`, values may not
    /// contain `|`.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let value = value.into();
        if key.contains(['|', ':']) || key.trim().is_empty() {
            bail!("invalid sensor key {:?}", key);
        }
        if value.contains('|') {
            bail!("sensor value for {} contains '|'", key);
        }
        self.fields.push((key, value));
        Ok(self)
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut text = self.timestamp.clone();
        for (key, value) in &self.fields {
            text.push('|');
            text.push_str(key);
            text.push(':');
            text.push_str(value);
        }
        text.into_bytes()
    }

    /// Parse a record. Items without a `:` are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.split('|');
        let timestamp = parts.next().unwrap_or_default().trim();
        if timestamp.is_empty() {
            bail!("sensor record has no timestamp");
        }

        let fields = parts
            .filter_map(|item| item.split_once(':'))
            .map(|(key, value)| (key.trim().to_string(), value.to_string()))
            .collect();

        Ok(Self {
            timestamp: timestamp.to_string(),
            fields,
        })
    }

    /// Parse a received payload, ignoring trailing NUL padding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let text = std::str::from_utf8(&bytes[..end]).context("sensor record is not UTF-8")?;
        Self::parse(text)
    }

    /// JSON readings: `capture_timestamp` plus one entry per field.
    pub fn readings(&self) -> Readings {
        let mut readings = Map::new();
        readings.insert(
            "capture_timestamp".to_string(),
            Value::String(self.timestamp.clone()),
        );
        for (key, raw) in &self.fields {
            readings.insert(key.clone(), reading_value(raw));
        }
        readings
    }
}

/// Keep digits, `.` and `-`; a parsable number wins, else the raw text.
fn reading_value(raw: &str) -> Value {
    let numeric: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    match numeric.parse::<f64>() {
        Ok(n) if n.is_finite() => Value::from(n),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_pipe_delimited() {
        let record = SensorRecord::new("2025-06-01 10:00:00")
            .field("T", "21.5C")
            .unwrap()
            .field("H", "40%")
            .unwrap();
        assert_eq!(record.encode(), b"2025-06-01 10:00:00|T:21.5C|H:40%");
        assert_eq!(SensorRecord::parse("2025-06-01 10:00:00|T:21.5C|H:40%").unwrap(), record);
    }

    #[test]
    fn readings_extract_numbers() {
        let record =
            SensorRecord::from_bytes(b"2025-06-01 10:00:00|T:21.5C|P: -3.25 hPa|GPS:none|junk\0\0\0")
                .unwrap();
        assert_eq!(
            Value::Object(record.readings()),
            json!({
                "capture_timestamp": "2025-06-01 10:00:00",
                "T": 21.5,
                "P": -3.25,
                "GPS": "none",
            })
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(SensorRecord::new("t").field("A|B", "1").is_err());
        assert!(SensorRecord::new("t").field("A:B", "1").is_err());
        assert!(SensorRecord::new("t").field("A", "1|2").is_err());
        assert!(SensorRecord::from_bytes(b"\0\0").is_err());
        assert!(SensorRecord::from_bytes(&[0xFF, 0xFE, b'|']).is_err());
    }

    #[test]
    fn now_uses_upload_timestamp_format() {
        let record = SensorRecord::now();
        assert!(chrono::NaiveDateTime::parse_from_str(record.timestamp(), TIMESTAMP_FORMAT).is_ok());
    }
}
