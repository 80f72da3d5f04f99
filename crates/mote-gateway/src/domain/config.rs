//! Gateway configuration: the TOML file model and the runtime settings derived
//! from it.
//!
//! ```toml
//! schemas = "config/schemas.toml"
//!
//! [gateway]
//! bind_address = "0.0.0.0"
//! sf_port = 9002
//! message_type = 0x88
//!
//! [device]
//! name = "base-station"
//! address = "127.0.0.1:9001"
//! wire_format = "legacy"
//! device_id = 1
//! record_types = [0x88]
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every key is optional; a missing file yields [`GatewayConfig::default`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mote_bus::{Priority, DEFAULT_PRIORITY};
use mote_core::{DeviceId, MessageType, WireFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Priority of packets relayed from gateway clients towards the device.
pub const RELAY_PRIORITY: Priority = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid address '{address}': {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

// ── File model ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Path of the TOML schema description file.
    #[serde(default = "default_schemas_path")]
    pub schemas: PathBuf,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub device: DeviceSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[gateway]`: the serial-forwarder listener offered to TCP clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_sf_port")]
    pub sf_port: u16,

    /// Message type forwarded to connected clients.
    #[serde(default)]
    pub message_type: MessageType,

    #[serde(default = "default_relay_priority")]
    pub relay_priority: Priority,

    /// Packets buffered per client before the client counts as too slow.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

/// `[device]`: the upstream serial-forwarder link to the base station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSection {
    #[serde(default = "default_device_name")]
    pub name: String,

    /// `host:port` of the base station's serial forwarder.
    #[serde(default = "default_device_address")]
    pub address: String,

    #[serde(default)]
    pub wire_format: WireFormat,

    #[serde(default)]
    pub device_id: Option<DeviceId>,

    /// Priority of plugin commands and acknowledgements.
    #[serde(default = "default_priority")]
    pub priority: Priority,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// AM type of acknowledgement packets; acknowledgements are only logged
    /// when unset.
    #[serde(default)]
    pub ack_type: Option<MessageType>,

    /// Message types whose decoded records are written by the record sink.
    #[serde(default)]
    pub record_types: Vec<MessageType>,

    /// JSON-lines file for decoded records; standard output when unset.
    #[serde(default)]
    pub record_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_schemas_path() -> PathBuf {
    PathBuf::from("schemas.toml")
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_sf_port() -> u16 {
    9002
}
fn default_relay_priority() -> Priority {
    RELAY_PRIORITY
}
fn default_outbound_buffer() -> usize {
    64
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}
fn default_device_name() -> String {
    "base-station".to_string()
}
fn default_device_address() -> String {
    "127.0.0.1:9001".to_string()
}
fn default_priority() -> Priority {
    DEFAULT_PRIORITY
}
fn default_send_timeout_ms() -> u64 {
    5_000
}
fn default_reconnect_interval_ms() -> u64 {
    2_000
}
fn default_queue_capacity() -> usize {
    256
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            schemas: default_schemas_path(),
            gateway: GatewaySection::default(),
            device: DeviceSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            sf_port: default_sf_port(),
            message_type: 0,
            relay_priority: default_relay_priority(),
            outbound_buffer: default_outbound_buffer(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            address: default_device_address(),
            wire_format: WireFormat::default(),
            device_id: None,
            priority: default_priority(),
            send_timeout_ms: default_send_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            queue_capacity: default_queue_capacity(),
            ack_type: None,
            record_types: Vec::new(),
            record_file: None,
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl GatewayConfig {
    /// Reads the configuration at `path`; a missing file gives the defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file exists but cannot be read,
    /// [`ConfigError::Parse`] for malformed TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Runtime settings for the serial-forwarder listener.
    pub fn sf_server_config(&self) -> Result<SfServerConfig, ConfigError> {
        let address = format!("{}:{}", self.gateway.bind_address, self.gateway.sf_port);
        let bind_addr = address
            .parse()
            .map_err(|source| ConfigError::InvalidAddress { address, source })?;
        if self.gateway.outbound_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "gateway.outbound_buffer",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(SfServerConfig {
            bind_addr,
            message_type: self.gateway.message_type,
            wire_format: self.device.wire_format,
            relay_priority: self.gateway.relay_priority,
            outbound_buffer: self.gateway.outbound_buffer,
            handshake_timeout: Duration::from_millis(self.gateway.handshake_timeout_ms),
        })
    }

    /// Runtime settings for the upstream device link.
    pub fn device_link_config(&self) -> Result<DeviceLinkConfig, ConfigError> {
        if self.device.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "device.queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.device.address.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "device.address",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(DeviceLinkConfig {
            name: self.device.name.clone(),
            address: self.device.address.clone(),
            wire_format: self.device.wire_format,
            device_id: self.device.device_id,
            priority: self.device.priority,
            ack_type: self.device.ack_type,
            queue_capacity: self.device.queue_capacity,
            reconnect_interval: Duration::from_millis(self.device.reconnect_interval_ms),
            handshake_timeout: Duration::from_millis(self.gateway.handshake_timeout_ms),
        })
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.device.send_timeout_ms)
    }
}

// ── Runtime settings ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SfServerConfig {
    pub bind_addr: SocketAddr,
    /// Type registered by every connection's relay listener.
    pub message_type: MessageType,
    /// Format inbound client packets must parse as.
    pub wire_format: WireFormat,
    pub relay_priority: Priority,
    pub outbound_buffer: usize,
    pub handshake_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLinkConfig {
    pub name: String,
    pub address: String,
    pub wire_format: WireFormat,
    pub device_id: Option<DeviceId>,
    /// Priority inbound messages are acknowledged with.
    pub priority: Priority,
    pub ack_type: Option<MessageType>,
    pub queue_capacity: usize,
    pub reconnect_interval: Duration,
    pub handshake_timeout: Duration,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
