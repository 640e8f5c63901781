use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::particle::ParticleValue;
use super::{DataIntegrityError, Result};

/// Satlantic PAR sample frame, e.g. `SATPAR0229,10.01,2206748544,234`
pub static SAMPLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^SATPAR(?P<serial_num>\d{4}),(?P<timer>\d{1,7}\.\d\d),(?P<counts>\d{10}),(?P<checksum>\d{1,3})$")
        .expect("sample pattern compiles")
});

/// Value ids in the order the particle publishes them.
pub const SERIAL_NUM: &str = "serial_num";
pub const TIMER: &str = "timer";
pub const COUNTS: &str = "counts";
pub const CHECKSUM: &str = "checksum";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFields {
    pub serial_num: String,
    /// Seconds since the sensor powered up
    pub timer: f64,
    pub counts: u64,
    pub checksum: u32,
}

impl SampleFields {
    pub fn values(&self) -> Vec<ParticleValue> {
        vec![
            ParticleValue::new(SERIAL_NUM, json!(self.serial_num)),
            ParticleValue::new(TIMER, json!(self.timer)),
            ParticleValue::new(COUNTS, json!(self.counts)),
            ParticleValue::new(CHECKSUM, json!(self.checksum)),
        ]
    }
}

/// Match `line` against `pattern` and convert the named groups. The pattern
/// must define `serial_num`, `timer`, `counts` and `checksum` groups.
pub fn extract(pattern: &Regex, line: &str) -> Result<SampleFields> {
    let line = line.trim();
    let caps = pattern
        .captures(line)
        .ok_or_else(|| DataIntegrityError::NoMatch(line.to_string()))?;

    let group = |field: &'static str| {
        caps.name(field)
            .map(|m| m.as_str())
            .ok_or_else(|| DataIntegrityError::InvalidField { field, line: line.to_string() })
    };
    let invalid = |field: &'static str| DataIntegrityError::InvalidField { field, line: line.to_string() };

    Ok(SampleFields {
        serial_num: group(SERIAL_NUM)?.to_string(),
        timer: group(TIMER)?.parse().map_err(|_| invalid(TIMER))?,
        counts: group(COUNTS)?.parse().map_err(|_| invalid(COUNTS))?,
        checksum: group(CHECKSUM)?.parse().map_err(|_| invalid(CHECKSUM))?,
    })
}
