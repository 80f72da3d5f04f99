//! # mote-core
//!
//! Shared library for the mote gateway containing the bit-level frame
//! accessors, the data-driven schema registry, the telemetry codec, and the
//! two active-message wire formats.
//!
//! This crate is used by both the bus and the gateway crates.
//! It has zero dependencies on sockets, async runtimes, or storage.
//!
//! # Architecture overview
//!
//! Field devices (motes) report telemetry as compact binary frames whose
//! layout differs per message type.  Instead of one hand-written parser per
//! message type, every layout is described declaratively once (a
//! [`FrameSchema`]) and a single codec interprets frames against it.
//!
//! - **`frame`** – A byte buffer with MSB-first bit accessors.
//!
//! - **`schema`** – Field layouts per message type, loaded from a TOML
//!   description at startup and frozen in a [`SchemaRegistry`].
//!
//! - **`codec`** – Turns a frame into an ordered [`DecodedMessage`] and named
//!   operator parameters back into a frame.
//!
//! - **`wire`** – The `legacy` (TinyOS 1.x) and `current` (TinyOS 2.x serial)
//!   active-message headers wrapped around encoded payloads.
//!
//! - **`sf`** – Packet framing of the serial-forwarder stream protocol.

pub mod codec;
pub mod frame;
pub mod schema;
pub mod sf;
pub mod wire;

pub use codec::{
    decode, encode, encode_packet, DecodeError, DecodedMessage, EncodeError, NamedParameters,
    Value,
};
pub use frame::{Frame, FrameError};
pub use schema::{
    Construction, ElementKind, FieldSchema, FieldType, FrameSchema, MessageType, Role,
    SchemaError, SchemaRegistry,
};
pub use wire::{ActiveMessage, WireError, WireFormat, BROADCAST_ADDR};

/// Identifier of a device (mote or base station) in a deployment.
pub type DeviceId = i32;
