//! Protocol layer of the Satlantic PAR sensor instrument driver.
//!
//! Lines from the port agent are checksummed, parsed into data particles and
//! published; commands from the instrument agent drive a state machine that
//! talks to the sensor's console over the same link.

pub mod config;
pub mod driver;
pub mod protocol;
pub mod publish;
pub mod transport;

pub use config::{CommConfig, DriverConfig};
pub use driver::{DriverBuilder, DriverError, DriverHandle};
pub use protocol::{DataParticle, DriverState, Parameter, ProtocolEvent, ProtocolState};
pub use publish::{ChannelPublisher, Publication, PublishOrder, Publisher};
pub use transport::{Connector, SimulatedPar, TcpConnector};
