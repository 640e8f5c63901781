use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ParameterError;

static TELBAUD_RESPONSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Telemetry Baud Rate:\s*(\d+)\s*bps").expect("telbaud pattern compiles"));
static MAXRATE_RESPONSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Maximum Frame Rate:\s*(\d+(?:\.\d+)?)\s*Hz").expect("maxrate pattern compiles"));

const TELBAUD_VALUES: [u64; 10] = [300, 600, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];
/// Hz; 0 lets the sensor pick the fastest rate the baud rate allows
const MAXRATE_VALUES: [f64; 10] = [0.0, 0.125, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 10.0, 12.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Parameter {
    Telbaud,
    Maxrate,
}

impl Parameter {
    /// Registry enumeration order, used for bulk get/set.
    pub const ALL: [Parameter; 2] = [Parameter::Telbaud, Parameter::Maxrate];

    pub fn name(&self) -> &'static str {
        match self {
            Parameter::Telbaud => "TELBAUD",
            Parameter::Maxrate => "MAXRATE",
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            Parameter::Telbaud => "telbaud",
            Parameter::Maxrate => "maxrate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.wire_name() == name)
    }

    /// Check a requested value and return it in canonical form.
    pub fn validate(&self, value: &Value) -> Result<Value, ParameterError> {
        let invalid = || ParameterError::InvalidValue {
            name: self.name().to_string(),
            value: value.to_string(),
        };
        match self {
            Parameter::Telbaud => {
                let baud = value.as_f64().filter(|v| v.fract() == 0.0).ok_or_else(invalid)?;
                match TELBAUD_VALUES.iter().find(|allowed| **allowed as f64 == baud) {
                    Some(allowed) => Ok(Value::from(*allowed)),
                    None => Err(invalid()),
                }
            }
            Parameter::Maxrate => {
                let rate = value.as_f64().ok_or_else(invalid)?;
                if MAXRATE_VALUES.contains(&rate) {
                    Ok(number_value(rate))
                } else {
                    Err(invalid())
                }
            }
        }
    }

    pub fn render_get(&self) -> String {
        format!("show {}\n", self.wire_name())
    }

    /// `value` must already be validated.
    pub fn render_set(&self, value: &Value) -> String {
        format!("set {} {}\n", self.wire_name(), value)
    }

    /// Line the console prints in answer to `show`.
    pub fn render_show_response(&self, value: &Value) -> String {
        match self {
            Parameter::Telbaud => format!("Telemetry Baud Rate: {} bps", value),
            Parameter::Maxrate => format!("Maximum Frame Rate: {} Hz", value),
        }
    }

    pub fn parse_response(&self, line: &str) -> Option<Value> {
        let pattern = match self {
            Parameter::Telbaud => &TELBAUD_RESPONSE,
            Parameter::Maxrate => &MAXRATE_RESPONSE,
        };
        let raw = pattern.captures(line)?.get(1)?.as_str();
        match self {
            Parameter::Telbaud => raw.parse::<u64>().ok().map(Value::from),
            Parameter::Maxrate => raw.parse::<f64>().ok().map(number_value),
        }
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Integral values render as JSON integers so `10` reads back as `10`.
fn number_value(v: f64) -> Value {
    if v.fract() == 0.0 && v >= 0.0 && v <= u32::MAX as f64 {
        Value::from(v as u64)
    } else {
        Value::from(v)
    }
}

/// Name resolution over the instrument's fixed parameter set.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParameterRegistry;

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every name or fail the whole request. Duplicates collapse and
    /// the result follows registry order.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Parameter>, ParameterError> {
        let mut params = Vec::with_capacity(names.len());
        for name in names {
            let param = Parameter::from_name(name).ok_or_else(|| ParameterError::Unknown(name.clone()))?;
            if !params.contains(&param) {
                params.push(param);
            }
        }
        params.sort();
        Ok(params)
    }

    /// Resolve the keys of a set request, in registry order. Values are not
    /// checked here so the caller can validate each entry as it is applied.
    pub fn resolve_entries<'a>(
        &self,
        entries: &'a serde_json::Map<String, Value>,
    ) -> Result<Vec<(Parameter, &'a Value)>, ParameterError> {
        let mut resolved = Vec::with_capacity(entries.len());
        for (name, value) in entries {
            let param = Parameter::from_name(name).ok_or_else(|| ParameterError::Unknown(name.clone()))?;
            resolved.push((param, value));
        }
        resolved.sort_by_key(|(param, _)| *param);
        Ok(resolved)
    }
}
