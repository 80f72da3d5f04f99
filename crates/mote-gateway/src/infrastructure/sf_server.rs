//! Serial-forwarder server: accept loop, bus sources, and the registry of
//! live client connections.
//!
//! Each accepted client runs in its own Tokio task (see
//! [`super::sf_client`]).  The server keeps:
//!
//! - the [`Multiplexer`] sources every client listens on; the first one also
//!   receives the packets clients send,
//! - a map of live connections keyed by id, each holding the relay listener
//!   registered on the sources and the connection's shutdown signal.
//!
//! Lock order is always `sources` before `connections`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use mote_bus::{Listener, Multiplexer};
use mote_core::wire;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{ConnectionInfo, ConnectionState, SfServerConfig};
use crate::infrastructure::sf_client::handle_client;

const ACCEPT_POLL: Duration = Duration::from_millis(200);

struct ConnectionHandle {
    info: ConnectionInfo,
    listener: Arc<dyn Listener>,
    shutdown: watch::Sender<bool>,
}

pub struct SfServer {
    config: SfServerConfig,
    sources: RwLock<Vec<Arc<Multiplexer>>>,
    connections: Mutex<HashMap<Uuid, ConnectionHandle>>,
    next_ordinal: AtomicU64,
    closing: AtomicBool,
}

impl SfServer {
    pub fn new(config: SfServerConfig) -> Self {
        Self {
            config,
            sources: RwLock::new(Vec::new()),
            connections: Mutex::new(HashMap::new()),
            next_ordinal: AtomicU64::new(0),
            closing: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SfServerConfig {
        &self.config
    }

    /// Adds a bus source and subscribes every live connection to it.
    pub fn add_source(&self, source: Arc<Multiplexer>) {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        let connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in connections.values() {
            source.register_listener(self.config.message_type, Arc::clone(&handle.listener));
        }
        info!(
            "sf server: added source {} ({} live connections subscribed)",
            source.name(),
            connections.len()
        );
        sources.push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Binds `config.bind_addr` and serves until `running` is cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .with_context(|| format!("failed to bind serial forwarder on {}", self.config.bind_addr))?;
        self.serve(listener, running).await
    }

    /// Accepts clients on `listener` until `running` is cleared, then shuts
    /// every live connection down.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        let local_addr = listener.local_addr().context("listener has no local address")?;
        info!(
            "serial forwarder listening on {local_addr} for message type 0x{:02X}",
            self.config.message_type
        );

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    info!("new sf client from {peer_addr}");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("sf client {peer_addr}: could not disable Nagle: {e}");
                    }
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        handle_client(server, stream, peer_addr).await;
                    });
                }
                Ok(Err(e)) => error!("accept error: {e}"),
                Err(_) => {}
            }
        }

        self.shutdown_all();
        Ok(())
    }

    /// Live connections ordered by accept order.
    pub fn active_connections(&self) -> Vec<ConnectionInfo> {
        let connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        let mut infos: Vec<ConnectionInfo> = connections.values().map(|h| h.info.clone()).collect();
        infos.sort_by_key(|info| info.ordinal);
        infos
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Closes one connection.  Returns `false` if it is not live.
    pub fn shutdown(&self, id: Uuid) -> bool {
        self.detach(id).is_some()
    }

    /// Closes every live connection and refuses any that finish their
    /// handshake afterwards.
    pub fn shutdown_all(&self) {
        {
            // Set under the connections lock so no attach can slip in after.
            let _connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
            self.closing.store(true, Ordering::Release);
        }
        let ids: Vec<Uuid> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        for id in ids {
            self.detach(id);
        }
    }

    pub(crate) fn next_ordinal(&self) -> u64 {
        self.next_ordinal.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Registers an open connection: its listener goes onto every source and
    /// the connection enters `Streaming`.  `None` once [`Self::shutdown_all`]
    /// has run; nothing is registered then.
    pub(crate) fn attach(
        &self,
        mut info: ConnectionInfo,
        listener: Arc<dyn Listener>,
        shutdown: watch::Sender<bool>,
    ) -> Option<ConnectionInfo> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closing() {
            return None;
        }
        for source in sources.iter() {
            source.register_listener(self.config.message_type, Arc::clone(&listener));
        }
        info.state = ConnectionState::Streaming;
        connections.insert(
            info.id,
            ConnectionHandle {
                info: info.clone(),
                listener,
                shutdown,
            },
        );
        Some(info)
    }

    /// Removes a connection, deregisters its listener from every source, and
    /// signals its tasks to stop.  Only the first call for an id has effect.
    pub(crate) fn detach(&self, id: Uuid) -> Option<ConnectionInfo> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        let handle = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)?;
        for source in sources.iter() {
            source.deregister_listener(self.config.message_type, &handle.listener);
        }
        // Receivers may already be gone when the session ended on its own.
        let _ = handle.shutdown.send(true);

        let mut info = handle.info;
        info.state = ConnectionState::Closed;
        debug!("{}: detached from {} sources", info.label(), sources.len());
        Some(info)
    }

    /// Forwards a packet received from a client to the first source.
    ///
    /// Packets that do not parse as the configured wire format are skipped.
    pub(crate) async fn relay_to_device(&self, packet: Vec<u8>, label: &str) {
        if let Err(e) = wire::unwrap(self.config.wire_format, &packet) {
            warn!(
                "{label}: skipping packet that is not a {} message: {e}",
                self.config.wire_format
            );
            return;
        }

        let source = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned();
        let Some(source) = source else {
            warn!("{label}: no source to relay to; dropping {} bytes", packet.len());
            return;
        };

        let len = packet.len();
        match source.send_packet(packet, self.config.relay_priority).await {
            Ok(true) => debug!("{label}: relayed {len} bytes to {}", source.name()),
            Ok(false) => warn!("{label}: {} refused a {len}-byte packet", source.name()),
            Err(e) => warn!("{label}: relay to {} failed: {e}", source.name()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
