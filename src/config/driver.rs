use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::publish::PublishOrder;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Driver tuning. Every field has a default so a config file only needs the
/// settings it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub response_timeout_ms: u64,
    /// Bound for each non-final discovery probe
    pub probe_timeout_ms: u64,
    pub publish_queue_capacity: usize,
    pub request_queue_capacity: usize,
    pub publish_order: PublishOrder,
    pub max_line_length: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5000,
            probe_timeout_ms: 2000,
            publish_queue_capacity: 256,
            request_queue_capacity: 32,
            publish_order: PublishOrder::RawFirst,
            max_line_length: 4096,
        }
    }
}

impl DriverConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        log::info!("Loaded driver config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |name: &'static str, value: u64| {
            if value == 0 {
                Err(ConfigError::InvalidSetting { name, reason: "must be greater than zero".into() })
            } else {
                Ok(())
            }
        };
        positive("response_timeout_ms", self.response_timeout_ms)?;
        positive("probe_timeout_ms", self.probe_timeout_ms)?;
        positive("publish_queue_capacity", self.publish_queue_capacity as u64)?;
        positive("request_queue_capacity", self.request_queue_capacity as u64)?;
        if self.max_line_length < 64 {
            return Err(ConfigError::InvalidSetting {
                name: "max_line_length",
                reason: format!("{} is shorter than a sample frame", self.max_line_length),
            });
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: DriverConfig = serde_json::from_str(r#"{"response_timeout_ms": 250, "publish_order": "parsed_first"}"#).unwrap();
        assert_eq!(config.response_timeout(), Duration::from_millis(250));
        assert_eq!(config.publish_order, PublishOrder::ParsedFirst);
        assert_eq!(config.publish_queue_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = DriverConfig { response_timeout_ms: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSetting { name: "response_timeout_ms", .. })));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("par-driver-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"probe_timeout_ms": 100}"#).unwrap();
        let config = DriverConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.probe_timeout(), Duration::from_millis(100));
    }
}
