//! Data particles: immutable, timestamped records built from one sample.
//!
//! Timestamps are NTP seconds (epoch 1900-01-01) as floating point, the unit
//! the port agent stamps frames with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sample::SampleFields;

pub const PKT_FORMAT_ID: &str = "JSON_Data";
pub const PKT_VERSION: u32 = 1;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: f64 = 2_208_988_800.0;

pub fn ntp_timestamp(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_micros()) / 1_000_000.0 + NTP_UNIX_OFFSET
}

pub fn ntp_now() -> f64 {
    ntp_timestamp(Utc::now())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Parsed,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityFlag {
    #[default]
    Ok,
}

/// Which timestamp consumers should order the particle by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampKey {
    #[default]
    PortTimestamp,
    InternalTimestamp,
    DriverTimestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleValue {
    pub value_id: String,
    pub value: serde_json::Value,
}

impl ParticleValue {
    pub fn new(value_id: &str, value: serde_json::Value) -> Self {
        Self { value_id: value_id.to_string(), value }
    }
}

/// Wire form of a particle on one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub pkt_format_id: String,
    pub pkt_version: u32,
    pub stream_name: StreamName,
    pub port_timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_timestamp: Option<f64>,
    pub driver_timestamp: f64,
    pub preferred_timestamp: TimestampKey,
    pub quality_flag: QualityFlag,
    pub values: Vec<ParticleValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataParticle {
    raw: String,
    values: Vec<ParticleValue>,
    port_timestamp: f64,
    internal_timestamp: Option<f64>,
    driver_timestamp: f64,
    preferred_timestamp: TimestampKey,
    quality_flag: QualityFlag,
}

impl DataParticle {
    pub fn build(
        raw: &str,
        fields: &SampleFields,
        port_timestamp: f64,
        internal_timestamp: Option<f64>,
        driver_timestamp: f64,
    ) -> Self {
        Self {
            raw: raw.trim().to_string(),
            values: fields.values(),
            port_timestamp,
            internal_timestamp,
            driver_timestamp,
            preferred_timestamp: TimestampKey::default(),
            quality_flag: QualityFlag::default(),
        }
    }

    pub fn with_preferred_timestamp(mut self, key: TimestampKey) -> Self {
        self.preferred_timestamp = key;
        self
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn values(&self) -> &[ParticleValue] {
        &self.values
    }

    pub fn port_timestamp(&self) -> f64 {
        self.port_timestamp
    }

    pub fn driver_timestamp(&self) -> f64 {
        self.driver_timestamp
    }

    pub fn preferred_timestamp(&self) -> TimestampKey {
        self.preferred_timestamp
    }

    pub fn quality_flag(&self) -> QualityFlag {
        self.quality_flag
    }

    /// The parsed stream carries the extracted values, the raw stream carries
    /// the frame text under the `raw` value id.
    pub fn record(&self, stream: StreamName) -> ParticleRecord {
        let values = match stream {
            StreamName::Parsed => self.values.clone(),
            StreamName::Raw => vec![ParticleValue::new("raw", serde_json::Value::String(self.raw.clone()))],
        };
        ParticleRecord {
            pkt_format_id: PKT_FORMAT_ID.to_string(),
            pkt_version: PKT_VERSION,
            stream_name: stream,
            port_timestamp: self.port_timestamp,
            internal_timestamp: self.internal_timestamp,
            driver_timestamp: self.driver_timestamp,
            preferred_timestamp: self.preferred_timestamp,
            quality_flag: self.quality_flag,
            values,
        }
    }

    pub fn to_json(&self, stream: StreamName) -> serde_json::Result<String> {
        serde_json::to_string(&self.record(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::sample::{extract, SAMPLE_REGEX};
    use serde_json::json;

    const VALID_SAMPLE: &str = "SATPAR0229,10.01,2206748544,234";
    const PORT_TS: f64 = 3555423720.711772;
    const DRIVER_TS: f64 = 3555423722.711772;

    fn particle() -> DataParticle {
        let fields = extract(&SAMPLE_REGEX, VALID_SAMPLE).unwrap();
        DataParticle::build(VALID_SAMPLE, &fields, PORT_TS, None, DRIVER_TS)
    }

    #[test]
    fn test_sample_format() {
        let value: serde_json::Value = serde_json::from_str(&particle().to_json(StreamName::Parsed).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "pkt_format_id": "JSON_Data",
                "pkt_version": 1,
                "stream_name": "parsed",
                "port_timestamp": PORT_TS,
                "driver_timestamp": DRIVER_TS,
                "preferred_timestamp": "port_timestamp",
                "quality_flag": "ok",
                "values": [
                    {"value_id": "serial_num", "value": "0229"},
                    {"value_id": "timer", "value": 10.01},
                    {"value_id": "counts", "value": 2206748544u64},
                    {"value_id": "checksum", "value": 234}
                ]
            })
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        assert_eq!(particle().to_json(StreamName::Parsed).unwrap(), particle().to_json(StreamName::Parsed).unwrap());
        assert_eq!(particle().to_json(StreamName::Raw).unwrap(), particle().to_json(StreamName::Raw).unwrap());
    }

    #[test]
    fn test_raw_record() {
        let record = particle().record(StreamName::Raw);
        assert_eq!(record.stream_name, StreamName::Raw);
        assert_eq!(record.values, vec![ParticleValue::new("raw", json!(VALID_SAMPLE))]);
    }

    #[test]
    fn test_preferred_timestamp_override() {
        let record = particle().with_preferred_timestamp(TimestampKey::DriverTimestamp).record(StreamName::Parsed);
        assert_eq!(record.preferred_timestamp, TimestampKey::DriverTimestamp);
    }

    #[test]
    fn test_ntp_offset() {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        assert_eq!(ntp_timestamp(epoch), 2_208_988_800.0);
    }
}
