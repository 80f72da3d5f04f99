//! # mote-gateway
//!
//! Serial-forwarder gateway for a mote network.
//!
//! ```text
//! base station (serial forwarder, TCP)
//!       ↕  device_link: LinkTransport + reader
//! Multiplexer (mote-bus)  ──▶  MIG plugins ──▶ JsonLinesSink
//!       ↕  SfRelayListener per client
//! SfServer  ◀──▶  TCP clients speaking the serial-forwarder protocol
//! ```
//!
//! - **`domain`** – Configuration and connection lifecycle types.
//! - **`infrastructure`** – Sockets, the device link, and record output.

pub mod domain;
pub mod infrastructure;
