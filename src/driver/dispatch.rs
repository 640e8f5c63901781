//! Name-based command entry point used by the instrument agent.

use serde_json::{Map, Value};

use super::task::DriverHandle;
use super::{DriverError, Result};
use crate::protocol::{ParameterError, ParameterRegistry, ProtocolEvent};

/// Parameter name standing for the whole registry in `get_resource`.
pub const PARAMETER_ALL: &str = "DRIVER_PARAMETER_ALL";

fn missing(command: &str) -> DriverError {
    ParameterError::Missing(format!("{} arguments", command)).into()
}

fn malformed(command: &str, expected: &str) -> DriverError {
    ParameterError::Malformed(format!("{} expects {}", command, expected)).into()
}

fn object_arg(command: &str, args: Option<Value>) -> Result<Map<String, Value>> {
    match args {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(malformed(command, "an object of parameter values")),
        None => Err(missing(command)),
    }
}

/// A list of names, or `DRIVER_PARAMETER_ALL` on its own.
fn name_list(command: &str, args: Option<Value>) -> Result<Vec<String>> {
    let items = match args {
        Some(Value::Array(items)) => items,
        Some(Value::String(name)) if name == PARAMETER_ALL => return Ok(vec![name]),
        Some(_) => return Err(malformed(command, "a list of parameter names")),
        None => return Err(missing(command)),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(name) => Ok(name),
            _ => Err(malformed(command, "a list of parameter names")),
        })
        .collect()
}

fn event_name(name: &str) -> Result<ProtocolEvent> {
    ProtocolEvent::from_name(name).ok_or_else(|| DriverError::Command(name.to_string()))
}

impl DriverHandle {
    /// Run a driver command by name. Replies are JSON so the caller can
    /// forward them unchanged.
    pub async fn cmd_dvr(&self, command: &str, args: Option<Value>) -> Result<Value> {
        log::debug!("cmd_dvr {} {:?}", command, args);
        match command {
            "configure" => {
                let comm = args.ok_or_else(|| missing(command))?;
                Ok(Value::from(self.configure(comm).await?.as_str()))
            }
            "connect" => Ok(Value::from(self.connect().await?.as_str())),
            "disconnect" => Ok(Value::from(self.disconnect().await?.as_str())),
            "initialize" => Ok(Value::from(self.initialize().await?.as_str())),
            "discover_state" => Ok(Value::from(self.discover_state().await?.as_str())),
            "get_resource_state" => Ok(Value::from(self.state().as_str())),
            "get_resource" => {
                let mut names = name_list(command, args)?;
                let len = names.len();
                names.retain(|n| n != PARAMETER_ALL);
                let values = if names.len() < len {
                    // the rest of the list must still name real parameters
                    ParameterRegistry::new().resolve(&names)?;
                    self.get_config().await?
                } else {
                    self.get_resource(names).await?
                };
                Ok(Value::Object(values))
            }
            "get_config" => Ok(Value::Object(self.get_config().await?)),
            "set_resource" => {
                let entries = object_arg(command, args)?;
                Ok(Value::Object(self.set_resource(entries).await?))
            }
            "restore_config" => {
                let entries = object_arg(command, args)?;
                self.restore_config(entries).await?;
                Ok(Value::Null)
            }
            "execute_resource" => self.dispatch_event(args).await,
            other => Err(DriverError::Command(other.to_string())),
        }
    }

    /// `args` is an event name, or `{"event": name, "data": text}` for
    /// direct access writes.
    async fn dispatch_event(&self, args: Option<Value>) -> Result<Value> {
        let (event, data) = match args {
            Some(Value::String(name)) => (event_name(&name)?, None),
            Some(Value::Object(mut map)) => {
                let name = match map.remove("event") {
                    Some(Value::String(name)) => name,
                    Some(_) => return Err(malformed("execute_resource", "an event name")),
                    None => return Err(ParameterError::Missing("event".to_string()).into()),
                };
                let data = match map.remove("data") {
                    Some(Value::String(text)) => Some(text.into_bytes()),
                    Some(_) => return Err(malformed("execute_resource", "text data")),
                    None => None,
                };
                (event_name(&name)?, data)
            }
            Some(_) => return Err(malformed("execute_resource", "an event name")),
            None => return Err(missing("execute_resource")),
        };

        if let (ProtocolEvent::ExecuteDirect, Some(data)) = (event, data) {
            self.execute_direct(data).await?;
            return Ok(Value::from(self.state().as_str()));
        }

        let reply = self.execute_resource(event).await?;
        let particle = match reply.particle {
            Some(particle) => serde_json::to_value(particle.record(crate::protocol::StreamName::Parsed))
                .map_err(|e| malformed("execute_resource", &e.to_string()))?,
            None => Value::Null,
        };
        Ok(serde_json::json!({ "state": reply.state.as_str(), "particle": particle }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverBuilder;
    use crate::publish::RecordingPublisher;
    use crate::transport::SimulatedPar;
    use serde_json::json;
    use std::sync::Arc;

    fn handle() -> DriverHandle {
        DriverBuilder::new(Arc::new(SimulatedPar::default()), Arc::new(RecordingPublisher::new())).build()
    }

    #[test]
    fn test_name_list_shapes() {
        assert_eq!(name_list("get_resource", Some(json!(["A", "B"]))).unwrap(), vec!["A", "B"]);
        assert_eq!(name_list("get_resource", Some(json!(PARAMETER_ALL))).unwrap(), vec![PARAMETER_ALL]);
        assert!(matches!(
            name_list("get_resource", Some(json!("MAXRATE"))),
            Err(DriverError::Parameter(ParameterError::Malformed(_)))
        ));
        assert!(matches!(
            name_list("get_resource", Some(json!([1]))),
            Err(DriverError::Parameter(ParameterError::Malformed(_)))
        ));
        assert!(matches!(
            name_list("get_resource", None),
            Err(DriverError::Parameter(ParameterError::Missing(_)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_command_and_event() {
        let handle = handle();
        assert!(matches!(handle.cmd_dvr("bogus_command", None).await, Err(DriverError::Command(_))));
        assert!(matches!(
            handle.cmd_dvr("execute_resource", Some(json!("DRIVER_EVENT_BOGUS"))).await,
            Err(DriverError::Command(_))
        ));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_and_malformed_arguments() {
        let handle = handle();
        assert!(matches!(
            handle.cmd_dvr("configure", None).await,
            Err(DriverError::Parameter(ParameterError::Missing(_)))
        ));
        assert!(matches!(
            handle.cmd_dvr("configure", Some(json!("not a config dict"))).await,
            Err(DriverError::Parameter(_))
        ));
        assert!(matches!(
            handle.cmd_dvr("set_resource", Some(json!(["MAXRATE"]))).await,
            Err(DriverError::Parameter(ParameterError::Malformed(_)))
        ));
        assert_eq!(handle.cmd_dvr("get_resource_state", None).await.unwrap(), json!("DRIVER_STATE_UNCONFIGURED"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_lifecycle_by_name() {
        let handle = handle();
        let comm = json!({"addr": "localhost", "port": 4001});
        assert_eq!(handle.cmd_dvr("configure", Some(comm)).await.unwrap(), json!("DRIVER_STATE_DISCONNECTED"));
        assert_eq!(handle.cmd_dvr("connect", None).await.unwrap(), json!("DRIVER_STATE_UNKNOWN"));
        handle.shutdown().await;
    }
}
