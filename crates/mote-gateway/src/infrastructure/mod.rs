//! Infrastructure layer: sockets, the device link, and record output.
//!
//! - **`sf_stream`** – Async handshake and packet framing over a byte stream.
//! - **`sf_server`** – Accept loop and the connection registry.
//! - **`sf_client`** – Per-client lifecycle and the relay listener.
//! - **`device_link`** – Priority-queued transport and the upstream link.
//! - **`record_sink`** – JSON-lines output of decoded records.

pub mod device_link;
pub mod record_sink;
pub mod sf_client;
pub mod sf_server;
pub mod sf_stream;

pub use device_link::{run_device_link, LinkTransport};
pub use record_sink::JsonLinesSink;
pub use sf_client::SfRelayListener;
pub use sf_server::SfServer;
pub use sf_stream::{SfReader, SfStreamError};
