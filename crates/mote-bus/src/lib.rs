//! # mote-bus
//!
//! The typed publish/dispatch bus between the device link, plugins, and
//! network gateways.
//!
//! - **`listener`** – The [`Listener`] contract and the copy-on-write
//!   per-type listener registry.
//! - **`multiplexer`** – [`Multiplexer`]: decode + dispatch of inbound
//!   messages with acknowledgement, and the bounded outbound command path.
//! - **`transport`** – The async [`Transport`] contract towards the device.
//! - **`plugin`** – The [`Plugin`] contract and the generic
//!   [`MigMessagePlugin`].
//! - **`sink`** – [`RecordSink`], the hand-off of decoded records to storage.

pub mod listener;
pub mod multiplexer;
pub mod plugin;
pub mod sink;
pub mod transport;

pub use listener::{Delivery, Listener, ListenerRegistry};
pub use multiplexer::{BusError, Multiplexer, MultiplexerConfig};
pub use plugin::{Command, MigMessagePlugin, Plugin, PluginError};
pub use sink::RecordSink;
pub use transport::{Priority, Transport, TransportError, DEFAULT_PRIORITY};
