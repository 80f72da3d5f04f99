//! Plugin contract: listeners that also turn operator actions into commands.

pub mod mig;

use mote_core::{DeviceId, EncodeError, MessageType, NamedParameters, WireError};
use thiserror::Error;

use crate::listener::Listener;
use crate::transport::{Priority, DEFAULT_PRIORITY};

pub use mig::MigMessagePlugin;

/// An outbound command ready for the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Encode `params` with the schema of `message_type`, addressed to
    /// broadcast.
    Encode {
        message_type: MessageType,
        params: NamedParameters,
    },
    /// A packet that is already wrapped in its wire header.
    Packet(Vec<u8>),
}

/// Reasons a plugin refuses an operator action.
#[derive(Debug, Error, PartialEq)]
pub enum PluginError {
    #[error("unsupported action '{0}'")]
    UnsupportedAction(String),

    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    #[error("invalid value '{value}' for parameter '{name}'")]
    InvalidParameter { name: String, value: String },

    /// Commands are only accepted on access nodes.
    #[error("device {0:?} is not an access node")]
    NotAccessNode(Option<DeviceId>),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// A device-specific plugin.
pub trait Plugin: Listener {
    /// Builds the command for `action` from parallel name/value lists.
    ///
    /// # Errors
    ///
    /// [`PluginError::UnsupportedAction`] for actions the plugin does not know,
    /// or a parameter error describing why the command was refused.
    fn build_command(&self, action: &str, names: &[String], values: &[String]) -> Result<Command, PluginError>;

    /// Priority the plugin's commands are sent with.
    fn command_priority(&self) -> Priority {
        DEFAULT_PRIORITY
    }
}
