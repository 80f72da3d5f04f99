//! Schema-driven telemetry codec.
//!
//! [`decode`] turns a payload [`Frame`](crate::Frame) into an ordered
//! [`DecodedMessage`] following the field layout of a
//! [`FrameSchema`](crate::FrameSchema).  [`encode`] goes the other way, from
//! operator-supplied [`NamedParameters`] to a payload frame, and
//! [`encode_packet`] additionally wraps the payload in its wire header.

mod decode;
mod encode;
mod params;
mod value;

use thiserror::Error;

use crate::frame::FrameError;
use crate::wire::{WireError, WireFormat};

pub use decode::decode;
pub use encode::{encode, encode_packet};
pub use params::NamedParameters;
pub use value::{DecodedMessage, Value};

/// Receipt time of the message, milliseconds since the Unix epoch.
pub const TIMESTAMP_KEY: &str = "timestamp";
/// Time the device produced the message, milliseconds since the Unix epoch.
pub const GENERATION_TIME_KEY: &str = "generation_time";
/// Id of the originating device.
pub const DEVICE_ID_KEY: &str = "device_id";
/// Merged device clock (seconds) used when no field carries the
/// `header-timestamp` role.
pub const HEADER_ATIME_KEY: &str = "header_atime";
/// Originating device used when no field carries the `header-origin` role.
pub const HEADER_ORIGIN_KEY: &str = "header_originatorid";

/// Errors that abort a whole decode.
///
/// Fields that lie past the end of a short frame are not errors; they are
/// simply absent from the record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// A strict-size schema received a frame of the wrong length.
    #[error("schema '{schema}' expects {expected} bytes, frame has {actual}")]
    SizeMismatch {
        schema: String,
        expected: usize,
        actual: usize,
    },

    /// The schema only supports encoding.
    #[error("schema '{0}' cannot be decoded")]
    NotDecodable(String),
}

/// Errors that reject a command before anything is sent.
#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    #[error("schema '{schema}': missing field '{field}'")]
    MissingField { schema: String, field: String },

    #[error("unparsable value '{value}' for field '{field}': {reason}")]
    UnparsableValue {
        field: String,
        value: String,
        reason: String,
    },

    /// The schema only supports decoding.
    #[error("schema '{0}' cannot be encoded")]
    NotEncodable(String),

    /// The caller asked for a wire format the device class does not speak.
    #[error("schema '{schema}' uses the {expected} wire format, {requested} was requested")]
    ProtocolMismatch {
        schema: String,
        expected: WireFormat,
        requested: WireFormat,
    },

    #[error("payload of {0} bytes exceeds the 255-byte limit")]
    PayloadTooLong(usize),

    #[error("{names} parameter names but {values} values")]
    ParameterCount { names: usize, values: usize },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Wire(#[from] WireError),
}
