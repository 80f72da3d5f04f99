//! Serial-forwarder stream framing.
//!
//! After connecting, each side sends the two-byte handshake `"U "` and reads
//! the partner's; the partner's first byte must be `'U'`.  Packets then flow
//! as
//!
//! ```text
//! [len:8][bytes:len]
//! ```
//!
//! so a single packet carries at most 255 bytes.  These are the pure framing
//! helpers; the async stream reader and writer live in the gateway crate.

use thiserror::Error;

/// Handshake sent by both sides on connect.
pub const HANDSHAKE: [u8; 2] = *b"U ";

/// Largest packet the length prefix can describe.
pub const MAX_PACKET_LEN: usize = u8::MAX as usize;

/// Errors raised by the framing helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SfError {
    /// Not enough bytes buffered yet for a complete packet.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("packet of {0} bytes exceeds the 255-byte limit")]
    PacketTooLong(usize),

    /// The partner's handshake did not start with `'U'`.
    #[error("handshake rejected: partner sent {0:02X?}")]
    BadHandshake([u8; 2]),
}

/// Checks the two handshake bytes received from the partner.
///
/// # Errors
///
/// Returns [`SfError::BadHandshake`] if the first byte is not `'U'`.
pub fn check_handshake(partner: [u8; 2]) -> Result<(), SfError> {
    if partner[0] == HANDSHAKE[0] {
        Ok(())
    } else {
        Err(SfError::BadHandshake(partner))
    }
}

/// Prefixes `packet` with its length byte.
///
/// # Errors
///
/// Returns [`SfError::PacketTooLong`] for packets over 255 bytes.
pub fn encode_packet(packet: &[u8]) -> Result<Vec<u8>, SfError> {
    if packet.len() > MAX_PACKET_LEN {
        return Err(SfError::PacketTooLong(packet.len()));
    }
    let mut out = Vec::with_capacity(packet.len() + 1);
    out.push(packet.len() as u8);
    out.extend_from_slice(packet);
    Ok(out)
}

/// Decodes one length-prefixed packet from the front of `buf`.
///
/// Returns the packet bytes and the number of bytes consumed so the caller
/// can advance its buffer.
///
/// # Errors
///
/// Returns [`SfError::InsufficientData`] while the packet is incomplete; the
/// caller should read more bytes and retry.
pub fn decode_packet(buf: &[u8]) -> Result<(Vec<u8>, usize), SfError> {
    let Some(&len) = buf.first() else {
        return Err(SfError::InsufficientData {
            needed: 1,
            available: 0,
        });
    };
    let total = 1 + usize::from(len);
    if buf.len() < total {
        return Err(SfError::InsufficientData {
            needed: total,
            available: buf.len(),
        });
    }
    Ok((buf[1..total].to_vec(), total))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
