pub mod comm;
pub mod driver;

pub use comm::CommConfig;
pub use driver::{ConfigError, DriverConfig};
