//! The multiplexer: per-type dispatch of inbound messages and the outbound
//! command path towards the device.
//!
//! # Inbound
//!
//! ```text
//! packet ─► unwrap ─► schema lookup ─► decode ─► snapshot ─► listeners ─► ack?
//! ```
//!
//! Listeners run synchronously in registration order on the dispatching task.
//! A listener that returns `false` or panics counts as failed but does not
//! stop delivery to the others.  The acknowledgement goes out only if at
//! least one listener received the message and every one of them succeeded.
//!
//! # Outbound
//!
//! ```text
//! params ─► schema lookup ─► encode ─► wrap(0xFFFF) ─► Transport::send (bounded)
//! ```
//!
//! Nothing reaches the transport when lookup or encoding fails.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use mote_core::wire::{self, BROADCAST_ADDR};
use mote_core::{
    decode, encode_packet, DecodeError, DeviceId, EncodeError, Frame, MessageType,
    NamedParameters, SchemaError, SchemaRegistry, WireError, WireFormat,
};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::listener::{Delivery, Listener, ListenerRegistry};
use crate::plugin::{Command, Plugin, PluginError};
use crate::transport::{Priority, Transport, TransportError};

/// Default bound on a single transport call.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by multiplexer operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Multiplexer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexerConfig {
    /// Wire format of packets exchanged with the device.
    pub wire_format: WireFormat,
    /// Upper bound on every `send` / `acknowledge` call.
    pub send_timeout: Duration,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Typed publish/dispatch bus for one device link.
///
/// `Send + Sync`; share it as `Arc<Multiplexer>` between the device reader,
/// gateway connections, and plugins.
pub struct Multiplexer {
    name: String,
    schemas: Arc<SchemaRegistry>,
    transport: Arc<dyn Transport>,
    listeners: ListenerRegistry,
    config: MultiplexerConfig,
}

impl Multiplexer {
    pub fn new(
        name: impl Into<String>,
        schemas: Arc<SchemaRegistry>,
        transport: Arc<dyn Transport>,
        config: MultiplexerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            schemas,
            transport,
            listeners: ListenerRegistry::new(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wire_format(&self) -> WireFormat {
        self.config.wire_format
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Registers `listener` for `message_type`.  Registering the same
    /// listener twice is a no-op.
    pub fn register_listener(&self, message_type: MessageType, listener: Arc<dyn Listener>) {
        let name = listener.name().to_string();
        if self.listeners.register(message_type, listener) {
            debug!("{}: registered {} for type 0x{:02X}", self.name, name, message_type);
        }
    }

    /// Removes `listener` from `message_type`; unknown listeners are ignored.
    pub fn deregister_listener(&self, message_type: MessageType, listener: &Arc<dyn Listener>) {
        if self.listeners.deregister(message_type, listener) {
            debug!(
                "{}: deregistered {} from type 0x{:02X}",
                self.name,
                listener.name(),
                message_type
            );
        }
    }

    pub fn listener_count(&self, message_type: MessageType) -> usize {
        self.listeners.count(message_type)
    }

    /// Decodes `frame` as `message_type` and delivers it to the listeners
    /// registered at the time of the call.
    ///
    /// Returns whether the message was acknowledged.
    ///
    /// # Errors
    ///
    /// - [`BusError::Schema`] for an unknown type; nothing is dispatched.
    /// - [`BusError::Decode`] if the frame cannot be decoded at all.
    /// - [`BusError::Transport`] if the acknowledgement fails or times out.
    pub async fn dispatch(
        &self,
        message_type: MessageType,
        device_id: Option<DeviceId>,
        timestamp: i64,
        frame: &Frame,
        priority: Priority,
    ) -> Result<bool, BusError> {
        let schema = self.schemas.lookup(message_type)?;
        let record = decode(&schema, frame, timestamp, device_id).map_err(|e| {
            warn!("{}: dropping {} message: {}", self.name, schema.name(), e);
            e
        })?;

        let listeners = self.listeners.snapshot(message_type);
        if listeners.is_empty() {
            debug!("{}: no listener for type 0x{:02X}", self.name, message_type);
            return Ok(false);
        }

        let delivery = Delivery {
            message_type,
            device_id,
            timestamp,
            raw: frame.buffer(),
            record: &record,
        };
        let mut all_succeeded = true;
        for listener in listeners.iter() {
            let ok = match catch_unwind(AssertUnwindSafe(|| listener.on_message(&delivery))) {
                Ok(ok) => ok,
                Err(_) => {
                    error!("{}: listener {} panicked", self.name, listener.name());
                    false
                }
            };
            if !ok {
                debug!("{}: listener {} failed on message {}", self.name, listener.name(), timestamp);
                all_succeeded = false;
            }
        }

        if !all_succeeded {
            return Ok(false);
        }
        self.bounded(self.transport.acknowledge(device_id, timestamp, priority))
            .await?;
        Ok(true)
    }

    /// Unwraps a received packet with the configured wire format and
    /// dispatches its payload.  Listeners see the whole packet as raw bytes.
    ///
    /// # Errors
    ///
    /// [`BusError::Wire`] if the packet does not parse, otherwise the errors
    /// of [`Multiplexer::dispatch`].
    pub async fn dispatch_packet(
        &self,
        device_id: Option<DeviceId>,
        timestamp: i64,
        packet: Vec<u8>,
        priority: Priority,
    ) -> Result<bool, BusError> {
        let (message_type, frame) = wire::payload_frame(self.config.wire_format, packet)?;
        self.dispatch(message_type, device_id, timestamp, &frame, priority)
            .await
    }

    /// Encodes `params` with the schema of `message_type`, wraps it for
    /// broadcast, and submits it to the transport.
    ///
    /// Returns whether the transport accepted the packet.
    ///
    /// # Errors
    ///
    /// [`BusError::Schema`] or [`BusError::Encode`] before anything is sent;
    /// [`BusError::Transport`] if the transport fails or times out.
    pub async fn send_command(
        &self,
        message_type: MessageType,
        params: &NamedParameters,
        priority: Priority,
    ) -> Result<bool, BusError> {
        let schema = self.schemas.lookup(message_type)?;
        let packet = encode_packet(&schema, params, BROADCAST_ADDR, self.config.wire_format)?;
        debug!(
            "{}: sending {} ({} bytes) with priority {}",
            self.name,
            schema.name(),
            packet.len(),
            priority
        );
        self.send_packet(packet, priority).await
    }

    /// Submits an already wrapped packet to the transport.
    ///
    /// # Errors
    ///
    /// [`BusError::Transport`] if the transport fails or times out.
    pub async fn send_packet(&self, packet: Vec<u8>, priority: Priority) -> Result<bool, BusError> {
        Ok(self.bounded(self.transport.send(packet, priority)).await?)
    }

    /// Runs a plugin-built command.
    ///
    /// # Errors
    ///
    /// Same as [`Multiplexer::send_command`].
    pub async fn execute(&self, command: Command, priority: Priority) -> Result<bool, BusError> {
        match command {
            Command::Encode {
                message_type,
                params,
            } => self.send_command(message_type, &params, priority).await,
            Command::Packet(packet) => self.send_packet(packet, priority).await,
        }
    }

    /// Builds the command for an operator action through `plugin` and sends
    /// it with the plugin's priority.
    ///
    /// # Errors
    ///
    /// [`BusError::Plugin`] if the plugin refuses the action, otherwise the
    /// errors of [`Multiplexer::execute`].
    pub async fn upload(
        &self,
        plugin: &dyn Plugin,
        action: &str,
        names: &[String],
        values: &[String],
    ) -> Result<bool, BusError> {
        let command = plugin.build_command(action, names, values)?;
        self.execute(command, plugin.command_priority()).await
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        tokio::time::timeout(self.config.send_timeout, call)
            .await
            .map_err(|_| TransportError::Timeout(self.config.send_timeout))?
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("name", &self.name)
            .field("listeners", &self.listeners)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
