pub mod dispatch;
pub mod protocol;
pub mod task;

pub use self::protocol::{ParProtocol, ResourceReply};
pub use task::{DriverBuilder, DriverHandle};

use std::time::Duration;

use crate::protocol::{DataIntegrityError, DriverState, ParameterError};
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("{command} rejected in {state}: {reason}")]
    State {
        command: String,
        state: DriverState,
        reason: String,
    },

    #[error("Unknown command: {0}")]
    Command(String),

    #[error("Data integrity error: {0}")]
    DataIntegrity(#[from] DataIntegrityError),

    #[error("{command} timed out after {waited:?}")]
    Timeout { command: String, waited: Duration },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Driver task is not running")]
    ChannelClosed,
}

impl DriverError {
    pub(crate) fn rejected(command: impl Into<String>, state: DriverState) -> Self {
        DriverError::State {
            command: command.into(),
            state,
            reason: "not accepted in this state".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
