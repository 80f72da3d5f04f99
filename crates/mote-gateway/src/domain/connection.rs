//! Lifecycle of a gateway client connection.

use std::fmt;
use std::net::SocketAddr;

use uuid::Uuid;

/// Where a client connection is in its lifecycle.
///
/// ```text
/// Connecting ──handshake──▶ Open ──listener registered──▶ Streaming
///      │                     │                              │
///      └─────────────────────┴──────────────────────────────┴──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// TCP accepted, handshake not finished.
    Connecting,
    /// Handshake done, relay listener not yet attached to the sources.
    Open,
    /// Forwarding in both directions.
    Streaming,
    Closed,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open) | (Open, Streaming) | (Connecting | Open | Streaming, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Snapshot of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: Uuid,
    /// 1-based, in accept order.
    pub ordinal: u64,
    pub peer: SocketAddr,
    pub state: ConnectionState,
}

impl ConnectionInfo {
    /// Log prefix, e.g. `sf client #3 (127.0.0.1:50412)`.
    pub fn label(&self) -> String {
        format!("sf client #{} ({})", self.ordinal, self.peer)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
