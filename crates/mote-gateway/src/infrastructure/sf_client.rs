//! One serial-forwarder client connection.
//!
//! Lifecycle: handshake (`Connecting` → `Open`), relay listener attached to
//! every bus source (`Streaming`), then two duties until either side stops:
//!
//! - **inbound**: packets from the client go to the first source with the
//!   relay priority,
//! - **outbound**: messages of the subscribed type, pushed by
//!   [`SfRelayListener`] into a bounded channel, are written to the client by
//!   a writer task.
//!
//! Teardown detaches the connection from the server exactly once.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use mote_bus::{Delivery, Listener};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{ConnectionInfo, ConnectionState};
use crate::infrastructure::sf_server::SfServer;
use crate::infrastructure::sf_stream::{self, SfReader};

/// Bus listener that queues every delivered packet for one client.
///
/// Never blocks the dispatching task: a full or closed queue is reported as
/// a failed delivery.
pub struct SfRelayListener {
    label: String,
    tx: mpsc::Sender<Vec<u8>>,
}

impl SfRelayListener {
    pub fn new(label: impl Into<String>, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            label: label.into(),
            tx,
        }
    }
}

impl Listener for SfRelayListener {
    fn on_message(&self, delivery: &Delivery<'_>) -> bool {
        match self.tx.try_send(delivery.raw.to_vec()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "{}: outbound queue full; dropping message with timestamp {}",
                    self.label, delivery.timestamp
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("{}: connection closing; message not forwarded", self.label);
                false
            }
        }
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Entry point of the per-client task spawned by the accept loop.
pub(crate) async fn handle_client(server: Arc<SfServer>, stream: TcpStream, peer_addr: SocketAddr) {
    let info = ConnectionInfo {
        id: Uuid::new_v4(),
        ordinal: server.next_ordinal(),
        peer: peer_addr,
        state: ConnectionState::Connecting,
    };
    let label = info.label();

    match run_client(&server, stream, info).await {
        Ok(()) => info!("{label}: {}", ConnectionState::Closed),
        Err(e) => warn!("{label}: {} with error: {e:#}", ConnectionState::Closed),
    }
}

async fn run_client(server: &Arc<SfServer>, mut stream: TcpStream, mut info: ConnectionInfo) -> anyhow::Result<()> {
    let label = info.label();
    let config = server.config();

    sf_stream::handshake(&mut stream, config.handshake_timeout)
        .await
        .with_context(|| format!("{label}: handshake failed"))?;
    info.state = ConnectionState::Open;
    debug!("{label}: {}", info.state);

    let (tx, rx) = mpsc::channel(config.outbound_buffer);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener: Arc<dyn Listener> = Arc::new(SfRelayListener::new(label.clone(), tx));
    let id = info.id;
    let Some(info) = server.attach(info, listener, shutdown_tx) else {
        info!("{label}: server is shutting down; refusing connection");
        return Ok(());
    };
    info!(
        "{label}: {} message type 0x{:02X}",
        info.state,
        config.message_type
    );

    let (read_half, write_half) = stream.into_split();
    let mut writer = tokio::spawn(write_outbound(write_half, rx, shutdown_rx.clone(), label.clone()));
    let mut writer_done = false;

    let result = relay_inbound(server, read_half, shutdown_rx, &mut writer, &mut writer_done, &label).await;

    server.detach(id);
    if !writer_done {
        let _ = writer.await;
    }
    result
}

async fn relay_inbound(
    server: &SfServer,
    read_half: OwnedReadHalf,
    mut shutdown_rx: watch::Receiver<bool>,
    writer: &mut JoinHandle<()>,
    writer_done: &mut bool,
    label: &str,
) -> anyhow::Result<()> {
    let mut reader = SfReader::new(read_half);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("{label}: shutdown requested");
                return Ok(());
            }
            _ = &mut *writer => {
                *writer_done = true;
                debug!("{label}: writer stopped");
                return Ok(());
            }
            packet = reader.read_packet() => {
                match packet.with_context(|| format!("{label}: read failed"))? {
                    Some(packet) => tokio::select! {
                        _ = shutdown_rx.changed() => {
                            debug!("{label}: shutdown requested during relay");
                            return Ok(());
                        }
                        _ = server.relay_to_device(packet, label) => {}
                    },
                    None => {
                        debug!("{label}: peer closed the connection");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn write_outbound(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
    label: String,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            next = rx.recv() => match next {
                Some(packet) => {
                    if let Err(e) = sf_stream::write_packet(&mut write_half, &packet).await {
                        warn!("{label}: write failed: {e}");
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = write_half.shutdown().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SfServerConfig;
    use async_trait::async_trait;
    use mote_bus::{Multiplexer, MultiplexerConfig, Priority, Transport, TransportError};
    use mote_core::{wire, DecodedMessage, DeviceId, SchemaRegistry, WireFormat};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout};

    // ── Test doubles ──────────────────────────────────────────────────────────

    /// Accepts a send and then holds it far longer than any test runs.
    #[derive(Default)]
    struct StallingTransport {
        started: AtomicBool,
    }

    #[async_trait]
    impl Transport for StallingTransport {
        async fn send(&self, _packet: Vec<u8>, _priority: Priority) -> Result<bool, TransportError> {
            self.started.store(true, Ordering::SeqCst);
            sleep(Duration::from_secs(30)).await;
            Ok(true)
        }

        async fn acknowledge(&self, _: Option<DeviceId>, _: i64, _: Priority) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn server(transport: Arc<StallingTransport>) -> Arc<SfServer> {
        let server = Arc::new(SfServer::new(SfServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            message_type: 0x22,
            wire_format: WireFormat::Current,
            relay_priority: 20,
            outbound_buffer: 4,
            handshake_timeout: Duration::from_secs(1),
        }));
        server.add_source(Arc::new(Multiplexer::new(
            "stalling",
            Arc::new(SchemaRegistry::new()),
            transport,
            MultiplexerConfig {
                wire_format: WireFormat::Current,
                send_timeout: Duration::from_secs(60),
            },
        )));
        server
    }

    async fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (accepted, peer) = listener.accept().await.unwrap();
        (client, accepted, peer)
    }

    fn delivery<'a>(raw: &'a [u8], record: &'a DecodedMessage) -> Delivery<'a> {
        Delivery {
            message_type: 0x22,
            device_id: Some(7),
            timestamp: 1_000,
            raw,
            record,
        }
    }

    #[tokio::test]
    async fn test_relay_listener_queues_raw_packet() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(2);
        let listener = SfRelayListener::new("client", tx);
        let record = DecodedMessage::new();

        // Act
        let ok = listener.on_message(&delivery(&[1, 2, 3], &record));

        // Assert
        assert!(ok);
        assert_eq!(rx.recv().await, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_relay_listener_fails_when_queue_full() {
        let (tx, _rx) = mpsc::channel(1);
        let listener = SfRelayListener::new("client", tx);
        let record = DecodedMessage::new();

        assert!(listener.on_message(&delivery(&[1], &record)));
        assert!(!listener.on_message(&delivery(&[2], &record)));
    }

    #[test]
    fn test_relay_listener_fails_when_connection_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let listener = SfRelayListener::new("client", tx);

        assert!(!listener.on_message(&delivery(&[1], &DecodedMessage::new())));
    }

    #[test]
    fn test_relay_listener_is_named_after_connection() {
        let (tx, _rx) = mpsc::channel(1);
        let listener = SfRelayListener::new("sf client #1 (127.0.0.1:1)", tx);
        assert_eq!(listener.name(), "sf client #1 (127.0.0.1:1)");
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_a_stalled_relay() {
        // Arrange
        let transport = Arc::new(StallingTransport::default());
        let server = server(Arc::clone(&transport));
        let (mut client, accepted, _) = socket_pair().await;
        let packet = wire::wrap(WireFormat::Current, 5, 0x21, &[1, 2]).unwrap();
        sf_stream::write_packet(&mut client, &packet).await.unwrap();
        let (read_half, _write_half) = accepted.into_split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut writer = tokio::spawn(std::future::pending::<()>());
        let mut writer_done = false;

        // Act
        let relay = relay_inbound(&server, read_half, shutdown_rx, &mut writer, &mut writer_done, "test");
        let stop = async {
            while !transport.started.load(Ordering::SeqCst) {
                sleep(Duration::from_millis(5)).await;
            }
            shutdown_tx.send(true).unwrap();
        };
        let (result, ()) = timeout(Duration::from_secs(1), async { tokio::join!(relay, stop) })
            .await
            .expect("relay kept running after shutdown");

        // Assert
        assert!(result.is_ok());
        assert!(!writer_done);
        writer.abort();
    }

    #[tokio::test]
    async fn test_client_is_refused_once_server_is_closing() {
        // Arrange
        let server = server(Arc::default());
        server.shutdown_all();
        let (mut client, accepted, peer) = socket_pair().await;

        // Act
        let handler = tokio::spawn(handle_client(Arc::clone(&server), accepted, peer));
        sf_stream::handshake(&mut client, Duration::from_secs(1)).await.unwrap();
        let mut reader = SfReader::new(client);
        let end = timeout(Duration::from_secs(1), reader.read_packet()).await.unwrap();

        // Assert
        assert!(matches!(end, Ok(None) | Err(_)));
        timeout(Duration::from_secs(1), handler).await.unwrap().unwrap();
        assert_eq!(server.connection_count(), 0);
    }
}
