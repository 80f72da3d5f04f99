//! Generic plugin for schema-described (MIG) messages.
//!
//! Stores every decoded message of its type through a [`RecordSink`] and
//! accepts three operator actions:
//!
//! | Action          | Parameters                          | Command                            |
//! |-----------------|-------------------------------------|------------------------------------|
//! | `tosmsg`        | one per settable schema field       | schema encode, broadcast           |
//! | `payload`       | `destination`, `am_type`, `data`    | `data` bytes wrapped for the mote  |
//! | `binary_packet` | `binary packet`                     | the bytes sent as they are         |
//!
//! Actions are only accepted when the plugin runs for an access node, i.e. a
//! device id of at most [`ACCESS_NODE_BOUNDARY`].

use std::sync::Arc;

use mote_core::wire;
use mote_core::{DeviceId, MessageType, NamedParameters, WireFormat};
use tracing::{debug, warn};

use super::{Command, Plugin, PluginError};
use crate::listener::{Delivery, Listener};
use crate::sink::RecordSink;
use crate::transport::Priority;

/// Highest device id that counts as an access node.
pub const ACCESS_NODE_BOUNDARY: DeviceId = 1024;

const BINARY_PACKET_PARAM: &str = "binary packet";

pub struct MigMessagePlugin {
    name: String,
    message_type: MessageType,
    wire_format: WireFormat,
    device_id: Option<DeviceId>,
    priority: Priority,
    sink: Arc<dyn RecordSink>,
}

impl MigMessagePlugin {
    pub fn new(
        name: impl Into<String>,
        message_type: MessageType,
        wire_format: WireFormat,
        device_id: Option<DeviceId>,
        priority: Priority,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            name: name.into(),
            message_type,
            wire_format,
            device_id,
            priority,
            sink,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    fn payload_command(&self, names: &[String], values: &[String]) -> Result<Command, PluginError> {
        if names.len() != 3 || values.len() != 3 {
            return Err(PluginError::MissingParameter(
                "payload needs exactly 'destination', 'am_type' and 'data'".to_string(),
            ));
        }
        let params = NamedParameters::from_pairs(names, values)?;
        let required = |name: &str| {
            params
                .get(name)
                .ok_or_else(|| PluginError::MissingParameter(name.to_string()))
        };

        let destination = parse_param::<u16>("destination", required("destination")?)?;
        let am_type = parse_param::<MessageType>("am_type", required("am_type")?)?;
        let data = required("data")?.as_bytes();
        if data.is_empty() {
            warn!("{}: payload upload with empty data", self.name);
        }

        let packet = wire::wrap(self.wire_format, destination, am_type, data)?;
        debug!(
            "{}: payload for destination {} with AM type 0x{:02X}",
            self.name, destination, am_type
        );
        Ok(Command::Packet(packet))
    }

    fn binary_packet_command(&self, names: &[String], values: &[String]) -> Result<Command, PluginError> {
        match (names.first(), values.first()) {
            (Some(name), Some(value)) if name.eq_ignore_ascii_case(BINARY_PACKET_PARAM) => {
                if value.is_empty() {
                    return Err(PluginError::InvalidParameter {
                        name: BINARY_PACKET_PARAM.to_string(),
                        value: String::new(),
                    });
                }
                debug!("{}: binary packet of {} bytes", self.name, value.len());
                Ok(Command::Packet(value.as_bytes().to_vec()))
            }
            _ => Err(PluginError::MissingParameter(BINARY_PACKET_PARAM.to_string())),
        }
    }
}

impl Listener for MigMessagePlugin {
    fn on_message(&self, delivery: &Delivery<'_>) -> bool {
        let stored = self.sink.store(&self.name, delivery.record);
        if !stored {
            warn!(
                "{}: message with timestamp {} could not be stored",
                self.name, delivery.timestamp
            );
        }
        stored
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Plugin for MigMessagePlugin {
    fn build_command(&self, action: &str, names: &[String], values: &[String]) -> Result<Command, PluginError> {
        match self.device_id {
            Some(id) if id <= ACCESS_NODE_BOUNDARY => {}
            other => return Err(PluginError::NotAccessNode(other)),
        }
        debug!("{}: action {}", self.name, action);

        if action.eq_ignore_ascii_case("tosmsg") {
            Ok(Command::Encode {
                message_type: self.message_type,
                params: NamedParameters::from_pairs(names, values)?,
            })
        } else if action.eq_ignore_ascii_case("payload") {
            self.payload_command(names, values)
        } else if action.eq_ignore_ascii_case("binary_packet") {
            self.binary_packet_command(names, values)
        } else {
            Err(PluginError::UnsupportedAction(action.to_string()))
        }
    }

    fn command_priority(&self) -> Priority {
        self.priority
    }
}

fn parse_param<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, PluginError> {
    value.trim().parse().map_err(|_| PluginError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
