//! Outbound transport contract.
//!
//! The transport carries wrapped packets and acknowledgements towards the
//! device.  Implementations queue by priority; the bus bounds every call with
//! its send timeout and performs no retries of its own.

use std::time::Duration;

use async_trait::async_trait;
use mote_core::DeviceId;
use thiserror::Error;

/// Scheduling priority; lower values are serviced first.
pub type Priority = u8;

/// Priority of acknowledgements and commands when nothing else is configured.
pub const DEFAULT_PRIORITY: Priority = 10;

/// Errors surfaced by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport did not accept the packet within the bus's send timeout.
    #[error("transport did not respond within {0:?}")]
    Timeout(Duration),

    /// The link towards the device is down or has been shut down.
    #[error("transport closed")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink for outbound packets and acknowledgements.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submits a wrapped packet; returns whether it was accepted.
    async fn send(&self, packet: Vec<u8>, priority: Priority) -> Result<bool, TransportError>;

    /// Acknowledges the message received at `timestamp` from `device_id`.
    async fn acknowledge(
        &self,
        device_id: Option<DeviceId>,
        timestamp: i64,
        priority: Priority,
    ) -> Result<(), TransportError>;
}
