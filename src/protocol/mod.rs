pub mod checksum;
pub mod commands;
pub mod parameters;
pub mod particle;
pub mod sample;
pub mod state;

pub use checksum::{validate, CleanLine};
pub use commands::Command;
pub use parameters::{Parameter, ParameterRegistry};
pub use particle::{DataParticle, ParticleRecord, ParticleValue, QualityFlag, StreamName, TimestampKey};
pub use sample::{extract, SampleFields, SAMPLE_REGEX};
pub use state::{DriverState, ProtocolEvent, ProtocolState};

/// Failure to turn an incoming line into a trusted sample.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataIntegrityError {
    #[error("Checksum mismatch in '{line}': expected {expected}, frame carries {actual}")]
    ChecksumMismatch { line: String, expected: u8, actual: u32 },

    #[error("No checksum field in '{0}'")]
    MalformedChecksum(String),

    #[error("Line does not match sample pattern: '{0}'")]
    NoMatch(String),

    #[error("Invalid {field} field in '{line}'")]
    InvalidField { field: &'static str, line: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    #[error("Unknown parameter: {0}")]
    Unknown(String),

    #[error("Invalid value {value} for parameter {name}")]
    InvalidValue { name: String, value: String },

    #[error("Missing argument: {0}")]
    Missing(String),

    #[error("Malformed argument: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, DataIntegrityError>;
