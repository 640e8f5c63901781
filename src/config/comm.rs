use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ParameterError;

/// Where the port agent for the instrument listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommConfig {
    pub addr: String,
    pub port: u16,
}

impl CommConfig {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self { addr: addr.into(), port }
    }

    /// Parse the comms block handed to `configure`. Extra keys are ignored.
    pub fn from_value(value: &Value) -> Result<Self, ParameterError> {
        let object = value
            .as_object()
            .ok_or_else(|| ParameterError::Malformed(format!("comms config must be an object, got {}", value)))?;

        let addr = match object.get("addr") {
            Some(Value::String(addr)) if !addr.trim().is_empty() => addr.trim().to_string(),
            Some(other) => return Err(ParameterError::InvalidValue { name: "addr".into(), value: other.to_string() }),
            None => return Err(ParameterError::Missing("addr".into())),
        };

        let port = match object.get("port") {
            Some(raw) => raw
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .filter(|p| *p != 0)
                .ok_or_else(|| ParameterError::InvalidValue { name: "port".into(), value: raw.to_string() })?,
            None => return Err(ParameterError::Missing("port".into())),
        };

        Ok(Self { addr, port })
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_config() {
        let config = CommConfig::from_value(&json!({"addr": "localhost", "port": 4001, "cmd_port": 4002})).unwrap();
        assert_eq!(config, CommConfig::new("localhost", 4001));
        assert_eq!(config.socket_addr(), "localhost:4001");
    }

    #[test]
    fn test_bad_configs() {
        assert!(matches!(CommConfig::from_value(&json!("not a config dict")), Err(ParameterError::Malformed(_))));
        assert!(matches!(CommConfig::from_value(&Value::Null), Err(ParameterError::Malformed(_))));
        assert_eq!(CommConfig::from_value(&json!({"port": 1})), Err(ParameterError::Missing("addr".into())));
        assert!(matches!(CommConfig::from_value(&json!({"addr": "", "port": 1})), Err(ParameterError::InvalidValue { .. })));
        assert!(matches!(CommConfig::from_value(&json!({"addr": 7, "port": 1})), Err(ParameterError::InvalidValue { .. })));
        assert_eq!(CommConfig::from_value(&json!({"addr": "h"})), Err(ParameterError::Missing("port".into())));
        assert!(matches!(CommConfig::from_value(&json!({"addr": "h", "port": 0})), Err(ParameterError::InvalidValue { .. })));
        assert!(matches!(CommConfig::from_value(&json!({"addr": "h", "port": 70000})), Err(ParameterError::InvalidValue { .. })));
        assert!(matches!(CommConfig::from_value(&json!({"addr": "h", "port": "4001"})), Err(ParameterError::InvalidValue { .. })));
    }
}
