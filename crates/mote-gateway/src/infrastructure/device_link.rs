//! Upstream link to the base station's serial forwarder.
//!
//! [`LinkTransport`] is the bus [`Transport`]: outbound packets wait in a
//! bounded priority queue (lower priority value first, FIFO within a
//! priority) until [`run_device_link`] writes them to the connected device.
//! The link also reads the device's packets and dispatches them on the bus,
//! reconnecting after every failure until shutdown.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use mote_bus::{Multiplexer, Priority, Transport, TransportError};
use mote_core::wire::{self, BROADCAST_ADDR};
use mote_core::{DeviceId, MessageType, WireFormat};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::domain::DeviceLinkConfig;
use crate::infrastructure::sf_stream::{self, SfReader};

const RUNNING_POLL: Duration = Duration::from_millis(200);

// ── Priority queue ────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
struct Queued {
    priority: Priority,
    seq: u64,
    packet: Vec<u8>,
}

impl Ord for Queued {
    // BinaryHeap pops the greatest element: lowest priority value, then
    // lowest sequence number.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct SendQueue {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

/// Bounded, priority-ordered outbound queue towards the device.
pub struct LinkTransport {
    name: String,
    wire_format: WireFormat,
    ack_type: Option<MessageType>,
    capacity: usize,
    queue: Mutex<SendQueue>,
    space: Notify,
    ready: Notify,
    closed: AtomicBool,
    acks: AtomicU64,
}

impl LinkTransport {
    pub fn new(config: &DeviceLinkConfig) -> Self {
        Self {
            name: config.name.clone(),
            wire_format: config.wire_format,
            ack_type: config.ack_type,
            capacity: config.queue_capacity.max(1),
            queue: Mutex::new(SendQueue::default()),
            space: Notify::new(),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
            acks: AtomicU64::new(0),
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).heap.len()
    }

    /// Acknowledgements requested so far.
    pub fn acknowledged(&self) -> u64 {
        self.acks.load(Ordering::Relaxed)
    }

    /// Rejects further sends and wakes every waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.space.notify_waiters();
        self.ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn try_push(&self, packet: Vec<u8>, priority: Priority) -> Result<(), Vec<u8>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.heap.len() >= self.capacity {
            return Err(packet);
        }
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Queued { priority, seq, packet });
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Option<Vec<u8>> {
        let popped = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .heap
            .pop();
        popped.map(|queued| {
            self.space.notify_one();
            queued.packet
        })
    }

    /// Waits for the next packet to write.  `None` once closed and drained.
    ///
    /// Cancel safe: a packet is only taken when the future completes.
    pub async fn next_packet(&self) -> Option<Vec<u8>> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(packet) = self.try_pop() {
                return Some(packet);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Transport for LinkTransport {
    /// Queues `packet`, waiting while the queue is full.
    async fn send(&self, packet: Vec<u8>, priority: Priority) -> Result<bool, TransportError> {
        let mut packet = packet;
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            match self.try_push(packet, priority) {
                Ok(()) => {
                    trace!("{}: queued packet with priority {priority}", self.name);
                    return Ok(true);
                }
                Err(rejected) => packet = rejected,
            }
            notified.await;
        }
    }

    /// Counts the acknowledgement and, with an ack type configured, queues an
    /// ack packet carrying the big-endian timestamp to the device.
    async fn acknowledge(
        &self,
        device_id: Option<DeviceId>,
        timestamp: i64,
        priority: Priority,
    ) -> Result<(), TransportError> {
        self.acks.fetch_add(1, Ordering::Relaxed);
        let Some(ack_type) = self.ack_type else {
            trace!("{}: acknowledged {timestamp} from device {device_id:?}", self.name);
            return Ok(());
        };

        let destination = device_id
            .and_then(|id| u16::try_from(id).ok())
            .unwrap_or(BROADCAST_ADDR);
        let packet = wire::wrap(self.wire_format, destination, ack_type, &timestamp.to_be_bytes())
            .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        self.send(packet, priority).await.map(|_| ())
    }
}

// ── Link loop ─────────────────────────────────────────────────────────────────

/// Keeps the device connection up until `running` is cleared, then closes
/// the transport.
pub async fn run_device_link(
    config: DeviceLinkConfig,
    bus: Arc<Multiplexer>,
    transport: Arc<LinkTransport>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) && !transport.is_closed() {
        match connect_and_stream(&config, &bus, &transport, &running).await {
            Ok(()) => info!("{}: link to {} closed", config.name, config.address),
            Err(e) => warn!("{}: link to {} failed: {e:#}", config.name, config.address),
        }
        if !running.load(Ordering::Relaxed) {
            break;
        }
        debug!("{}: reconnecting in {:?}", config.name, config.reconnect_interval);
        sleep(config.reconnect_interval).await;
    }
    transport.close();
    info!("{}: device link stopped", config.name);
}

async fn connect_and_stream(
    config: &DeviceLinkConfig,
    bus: &Multiplexer,
    transport: &Arc<LinkTransport>,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(&config.address)
        .await
        .with_context(|| format!("failed to connect to {}", config.address))?;
    sf_stream::handshake(&mut stream, config.handshake_timeout)
        .await
        .context("device handshake failed")?;
    info!("{}: connected to {}", config.name, config.address);

    let (read_half, write_half) = stream.into_split();
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut writer = tokio::spawn(drain_to_device(
        write_half,
        Arc::clone(transport),
        stop_rx,
        config.name.clone(),
    ));

    let mut writer_done = false;
    let result = read_from_device(config, bus, read_half, &mut writer, &mut writer_done, running).await;

    let _ = stop_tx.send(true);
    if !writer_done {
        if let Ok(Err(e)) = writer.await {
            warn!("{}: writer ended with error: {e:#}", config.name);
        }
    }
    result
}

/// Dispatches device packets until the device closes or `running` is
/// cleared.  The queue is drained by [`drain_to_device`] on its own task, so
/// an acknowledgement waiting here for queue space is always released.
async fn read_from_device(
    config: &DeviceLinkConfig,
    bus: &Multiplexer,
    read_half: OwnedReadHalf,
    writer: &mut JoinHandle<anyhow::Result<()>>,
    writer_done: &mut bool,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let mut reader = SfReader::new(read_half);
    while running.load(Ordering::Relaxed) {
        tokio::select! {
            packet = reader.read_packet() => {
                match packet.context("read from device failed")? {
                    Some(packet) => forward_to_bus(config, bus, packet).await,
                    None => return Ok(()),
                }
            }
            joined = &mut *writer => {
                *writer_done = true;
                debug!("{}: writer stopped", config.name);
                return joined.context("device writer task failed")?;
            }
            _ = sleep(RUNNING_POLL) => {}
        }
    }
    Ok(())
}

/// Writes queued packets to the device until told to stop or the transport
/// closes.  Packets still queued stay for the next connection.
async fn drain_to_device(
    mut write_half: OwnedWriteHalf,
    transport: Arc<LinkTransport>,
    mut stop_rx: watch::Receiver<bool>,
    name: String,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            next = transport.next_packet() => match next {
                Some(packet) => sf_stream::write_packet(&mut write_half, &packet)
                    .await
                    .context("write to device failed")?,
                None => {
                    debug!("{name}: transport closed");
                    break;
                }
            },
        }
    }
    let _ = write_half.shutdown().await;
    Ok(())
}

async fn forward_to_bus(config: &DeviceLinkConfig, bus: &Multiplexer, packet: Vec<u8>) {
    let timestamp = unix_millis();
    match bus
        .dispatch_packet(config.device_id, timestamp, packet, config.priority)
        .await
    {
        Ok(true) => trace!("{}: message {timestamp} acknowledged", config.name),
        Ok(false) => debug!("{}: message {timestamp} not acknowledged", config.name),
        Err(e) => warn!("{}: dropping device packet: {e}", config.name),
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
