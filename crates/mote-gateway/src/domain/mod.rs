//! Domain layer: configuration and connection lifecycle types.

pub mod config;
pub mod connection;

pub use config::{ConfigError, DeviceLinkConfig, GatewayConfig, SfServerConfig, RELAY_PRIORITY};
pub use connection::{ConnectionInfo, ConnectionState};
