pub mod framer;
pub mod simulator;
pub mod tcp;

pub use framer::LineFramer;
pub use simulator::{SimulatedPar, SimulatorOptions};
pub use tcp::TcpConnector;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::CommConfig;

/// One line received from the port agent, stamped on arrival (NTP seconds).
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub line: String,
    pub port_timestamp: f64,
}

impl RawFrame {
    pub fn new(line: impl Into<String>, port_timestamp: f64) -> Self {
        Self { line: line.into(), port_timestamp }
    }

    pub fn now(line: impl Into<String>) -> Self {
        Self::new(line, crate::protocol::particle::ntp_now())
    }
}

/// Write half of an open instrument link.
#[async_trait]
pub trait Transport: Send {
    async fn send_data(&mut self, data: &[u8]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens instrument links. Incoming lines are delivered on `frames` until
/// the link closes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, config: &CommConfig, frames: mpsc::Sender<RawFrame>) -> Result<Box<dyn Transport>>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Link closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
