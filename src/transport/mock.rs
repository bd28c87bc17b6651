// Mock Transport - In-memory network for tests
//
// Every transport registered on a `MockNetwork` gets a packet inbox and a
// stream inbox. Packets to unknown or shut-down endpoints vanish silently,
// like UDP; dials to them fail. Streams are tokio duplex pipes.

use crate::transport::{BoxStream, IncomingStream, Packet, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

const INBOX_DEPTH: usize = 1024;
const DUPLEX_BUFFER: usize = 64 * 1024;

#[derive(Clone)]
struct Endpoint {
    packets: mpsc::Sender<Packet>,
    streams: mpsc::Sender<IncomingStream>,
}

/// Shared in-memory network
#[derive(Clone)]
pub struct MockNetwork {
    endpoints: Arc<Mutex<HashMap<SocketAddr, Endpoint>>>,
    next_port: Arc<AtomicU16>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self {
            endpoints: Arc::new(Mutex::new(HashMap::new())),
            next_port: Arc::new(AtomicU16::new(7946)),
        }
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a transport at the next free loopback port
    pub fn new_transport(&self) -> Arc<MockTransport> {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        self.transport_at(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    /// Attach a transport at `addr`, replacing any previous one there
    pub fn transport_at(&self, addr: SocketAddr) -> Arc<MockTransport> {
        let (packet_tx, packet_rx) = mpsc::channel(INBOX_DEPTH);
        let (stream_tx, stream_rx) = mpsc::channel(INBOX_DEPTH);

        self.endpoints.lock().insert(
            addr,
            Endpoint {
                packets: packet_tx,
                streams: stream_tx,
            },
        );

        Arc::new(MockTransport {
            addr,
            network: self.clone(),
            packet_rx: Mutex::new(Some(packet_rx)),
            stream_rx: Mutex::new(Some(stream_rx)),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Number of reachable endpoints
    pub fn len(&self) -> usize {
        self.endpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn endpoint(&self, addr: &SocketAddr) -> Option<Endpoint> {
        self.endpoints.lock().get(addr).cloned()
    }

    fn remove(&self, addr: &SocketAddr) {
        self.endpoints.lock().remove(addr);
    }
}

/// One endpoint on a `MockNetwork`
pub struct MockTransport {
    addr: SocketAddr,
    network: MockNetwork,
    packet_rx: Mutex<Option<mpsc::Receiver<Packet>>>,
    stream_rx: Mutex<Option<mpsc::Receiver<IncomingStream>>>,
    shutdown: AtomicBool,
}

impl MockTransport {
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<(), TransportError> {
        if self.is_shutdown() {
            return Err(TransportError::Shutdown);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn advertise_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn write_to(&self, buf: &[u8], addr: SocketAddr) -> Result<Instant, TransportError> {
        self.ensure_running()?;
        let now = Instant::now();

        let Some(endpoint) = self.network.endpoint(&addr) else {
            debug!(to = %addr, "mock packet dropped, no endpoint");
            return Ok(now);
        };

        let packet = Packet {
            buf: buf.to_vec(),
            from: self.addr,
            timestamp: now,
        };
        if endpoint.packets.try_send(packet).is_err() {
            debug!(to = %addr, "mock packet dropped, inbox full");
        }

        Ok(now)
    }

    async fn dial(&self, addr: SocketAddr, _timeout: Duration) -> Result<BoxStream, TransportError> {
        self.ensure_running()?;

        let endpoint = self
            .network
            .endpoint(&addr)
            .ok_or_else(|| TransportError::ConnectionFailed(format!("no route to {}", addr)))?;

        let (local, remote) = tokio::io::duplex(DUPLEX_BUFFER);
        endpoint
            .streams
            .send(IncomingStream {
                stream: Box::new(remote),
                remote: self.addr,
            })
            .await
            .map_err(|_| TransportError::ConnectionFailed(format!("{} is closed", addr)))?;

        Ok(Box::new(local))
    }

    fn packet_rx(&self) -> Option<mpsc::Receiver<Packet>> {
        self.packet_rx.lock().take()
    }

    fn stream_rx(&self) -> Option<mpsc::Receiver<IncomingStream>> {
        self.stream_rx.lock().take()
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.network.remove(&self.addr);
        }
        Ok(())
    }
}
