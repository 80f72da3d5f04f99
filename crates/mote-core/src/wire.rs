//! Active-message wire formats.
//!
//! Encoded payloads travel inside one of two historical packet layouts:
//!
//! ```text
//! legacy  (TinyOS 1.x TOSMsg):  [addr:16][group:8][type:8][length:8][payload]
//! current (TinyOS 2.x serial):  [marker:8][dest:16][type:8][length:8][payload]
//! ```
//!
//! Multi-byte header fields are big-endian.  Both headers are five bytes long;
//! they differ in where the destination sits and in what the extra byte means
//! (a constant group id vs. the active-message marker `0x00`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::{Frame, FrameError};
use crate::schema::MessageType;

/// Destination address meaning broadcast / local injection.
pub const BROADCAST_ADDR: u16 = 0xFFFF;

/// Group id written into every legacy header.
pub const LEGACY_GROUP_ID: u8 = 0xFF;

/// First byte of every `current` packet: "this is an active message".
pub const ACTIVE_MESSAGE_MARKER: u8 = 0x00;

/// Header length in bytes, identical for both formats.
pub const HEADER_LEN: usize = 5;

/// Largest payload the 8-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Errors raised while wrapping or unwrapping packets.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("payload of {0} bytes exceeds the 255-byte limit")]
    PayloadTooLong(usize),

    #[error("packet of {0} bytes is shorter than the 5-byte header")]
    TooShort(usize),

    /// A `current` packet did not start with the active-message marker.
    #[error("unexpected packet marker 0x{0:02X}")]
    BadMarker(u8),

    #[error("header declares {declared} payload bytes but only {available} follow")]
    Truncated { declared: usize, available: usize },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Packet layout selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    Legacy,
    #[default]
    Current,
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::Legacy => f.write_str("legacy"),
            WireFormat::Current => f.write_str("current"),
        }
    }
}

/// Parsed header plus payload of one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMessage {
    pub destination: u16,
    /// Group id; only legacy packets carry one.
    pub group: Option<u8>,
    pub am_type: MessageType,
    pub payload: Vec<u8>,
}

struct Header {
    destination: u16,
    group: Option<u8>,
    am_type: MessageType,
    length: usize,
}

impl WireFormat {
    /// Bit offsets of (destination, type, length) inside the header.
    fn layout(self) -> (usize, usize, usize) {
        match self {
            WireFormat::Legacy => (0, 24, 32),
            WireFormat::Current => (8, 24, 32),
        }
    }

    fn write_header(self, frame: &mut Frame, destination: u16, am_type: MessageType, length: usize) -> Result<(), FrameError> {
        let (dest_at, type_at, len_at) = self.layout();
        match self {
            WireFormat::Legacy => frame.write(16, 8, u64::from(LEGACY_GROUP_ID))?,
            WireFormat::Current => frame.write(0, 8, u64::from(ACTIVE_MESSAGE_MARKER))?,
        }
        frame.write(dest_at, 16, u64::from(destination))?;
        frame.write(type_at, 8, u64::from(am_type))?;
        frame.write(len_at, 8, length as u64)
    }

    fn read_header(self, packet: &[u8]) -> Result<Header, WireError> {
        if packet.len() < HEADER_LEN {
            return Err(WireError::TooShort(packet.len()));
        }
        let frame = Frame::from_bytes(packet[..HEADER_LEN].to_vec());
        let (dest_at, type_at, len_at) = self.layout();

        let group = match self {
            WireFormat::Legacy => Some(frame.read(16, 8)? as u8),
            WireFormat::Current => {
                let marker = frame.read(0, 8)? as u8;
                if marker != ACTIVE_MESSAGE_MARKER {
                    return Err(WireError::BadMarker(marker));
                }
                None
            }
        };
        let header = Header {
            destination: frame.read(dest_at, 16)? as u16,
            group,
            am_type: frame.read(type_at, 8)? as MessageType,
            length: frame.read(len_at, 8)? as usize,
        };

        let available = packet.len() - HEADER_LEN;
        if header.length > available {
            return Err(WireError::Truncated {
                declared: header.length,
                available,
            });
        }
        Ok(header)
    }
}

/// Wraps `payload` in the header of `variant`.
///
/// # Errors
///
/// Returns [`WireError::PayloadTooLong`] for payloads over 255 bytes.
///
/// # Examples
///
/// ```rust
/// use mote_core::wire::{wrap, WireFormat, BROADCAST_ADDR};
///
/// let packet = wrap(WireFormat::Current, BROADCAST_ADDR, 0x88, &[1, 2]).unwrap();
/// assert_eq!(packet, vec![0x00, 0xFF, 0xFF, 0x88, 0x02, 1, 2]);
/// ```
pub fn wrap(variant: WireFormat, destination: u16, am_type: MessageType, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(WireError::PayloadTooLong(payload.len()));
    }
    let mut frame = Frame::new(HEADER_LEN + payload.len());
    variant.write_header(&mut frame, destination, am_type, payload.len())?;
    let mut packet = frame.into_bytes();
    packet[HEADER_LEN..].copy_from_slice(payload);
    Ok(packet)
}

/// Parses a packet of `variant` into its header fields and payload.
///
/// Bytes past the declared payload length are ignored.
///
/// # Errors
///
/// - [`WireError::TooShort`] if the header is incomplete.
/// - [`WireError::BadMarker`] if a `current` packet lacks the marker byte.
/// - [`WireError::Truncated`] if fewer payload bytes follow than declared.
pub fn unwrap(variant: WireFormat, packet: &[u8]) -> Result<ActiveMessage, WireError> {
    let header = variant.read_header(packet)?;
    Ok(ActiveMessage {
        destination: header.destination,
        group: header.group,
        am_type: header.am_type,
        payload: packet[HEADER_LEN..HEADER_LEN + header.length].to_vec(),
    })
}

/// Parses the header and returns the message type together with a frame whose
/// window is the payload, without copying it out of the packet.
///
/// # Errors
///
/// Same as [`unwrap`].
pub fn payload_frame(variant: WireFormat, packet: Vec<u8>) -> Result<(MessageType, Frame), WireError> {
    let header = variant.read_header(&packet)?;
    let frame = Frame::with_offset(packet, HEADER_LEN, header.length)?;
    Ok((header.am_type, frame))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_legacy_layout() {
        let packet = wrap(WireFormat::Legacy, 0x1234, 0x88, &[0xAB]).unwrap();
        assert_eq!(packet, vec![0x12, 0x34, LEGACY_GROUP_ID, 0x88, 0x01, 0xAB]);
    }

    #[test]
    fn test_wrap_current_layout_has_marker_prefix() {
        let packet = wrap(WireFormat::Current, BROADCAST_ADDR, 0x0A, &[0x01, 0x02]).unwrap();
        assert_eq!(packet, vec![0x00, 0xFF, 0xFF, 0x0A, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn test_wrap_rejects_oversized_payload() {
        let payload = vec![0u8; 256];
        assert_eq!(
            wrap(WireFormat::Current, 1, 1, &payload),
            Err(WireError::PayloadTooLong(256))
        );
    }

    #[test]
    fn test_unwrap_reads_back_header_fields() {
        // Arrange
        let packet = wrap(WireFormat::Legacy, 7, 0x21, &[9, 8, 7]).unwrap();

        // Act
        let msg = unwrap(WireFormat::Legacy, &packet).unwrap();

        // Assert
        assert_eq!(msg.destination, 7);
        assert_eq!(msg.group, Some(LEGACY_GROUP_ID));
        assert_eq!(msg.am_type, 0x21);
        assert_eq!(msg.payload, vec![9, 8, 7]);
    }

    #[test]
    fn test_unwrap_current_rejects_missing_marker() {
        let packet = vec![0x01, 0xFF, 0xFF, 0x0A, 0x00];
        assert_eq!(unwrap(WireFormat::Current, &packet), Err(WireError::BadMarker(0x01)));
    }

    #[test]
    fn test_unwrap_rejects_truncated_payload() {
        let packet = vec![0x00, 0xFF, 0xFF, 0x0A, 0x04, 0x01];
        assert_eq!(
            unwrap(WireFormat::Current, &packet),
            Err(WireError::Truncated {
                declared: 4,
                available: 1
            })
        );
    }

    #[test]
    fn test_unwrap_rejects_short_header() {
        assert_eq!(unwrap(WireFormat::Legacy, &[0, 1]), Err(WireError::TooShort(2)));
    }

    #[test]
    fn test_unwrap_ignores_trailing_bytes() {
        let packet = vec![0x00, 0x00, 0x01, 0x0A, 0x01, 0x55, 0xEE, 0xEE];
        let msg = unwrap(WireFormat::Current, &packet).unwrap();
        assert_eq!(msg.payload, vec![0x55]);
    }

    #[test]
    fn test_payload_frame_windows_the_packet() {
        let packet = wrap(WireFormat::Current, 3, 0x0B, &[0x00, 0x01, 0x00, 0x64]).unwrap();

        let (am_type, frame) = payload_frame(WireFormat::Current, packet.clone()).unwrap();

        assert_eq!(am_type, 0x0B);
        assert_eq!(frame.read(16, 16), Ok(100));
        assert_eq!(frame.buffer(), packet.as_slice());
    }
}
