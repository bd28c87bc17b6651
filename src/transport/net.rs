// Network Transport Implementation
// UDP for probes and gossip, TCP for push/pull and reliable sends

use crate::transport::{
    BoxStream, IncomingStream, Packet, Transport, TransportError, TransportState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

// ============================================================================
// NET TRANSPORT CONFIG
// ============================================================================

/// Configuration for the UDP + TCP transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetTransportConfig {
    /// Address to bind both sockets to (port 0 picks one)
    pub bind_addr: SocketAddr,
    /// Address advertised to peers; defaults to the bound address
    pub advertise_addr: Option<SocketAddr>,
    /// Largest datagram we read
    pub udp_buffer_size: usize,
    /// Inbound packet/stream queue depth
    pub queue_depth: usize,
    /// Enable TCP_NODELAY
    pub nodelay: bool,
}

impl Default for NetTransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7946)),
            advertise_addr: None,
            udp_buffer_size: 65536,
            queue_depth: 1024,
            nodelay: true,
        }
    }
}

impl NetTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_advertise_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.advertise_addr = addr;
        self
    }

    pub fn with_udp_buffer_size(mut self, size: usize) -> Self {
        self.udp_buffer_size = size;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

// ============================================================================
// NET TRANSPORT
// ============================================================================

/// Transport over real sockets
pub struct NetTransport {
    config: NetTransportConfig,
    state: Mutex<TransportState>,
    local_addr: SocketAddr,
    advertise_addr: SocketAddr,
    udp: Arc<UdpSocket>,
    packet_rx: Mutex<Option<mpsc::Receiver<Packet>>>,
    stream_rx: Mutex<Option<mpsc::Receiver<IncomingStream>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NetTransport {
    /// Bind UDP and TCP on the same port and start the listener tasks
    pub async fn bind(config: NetTransportConfig) -> Result<Arc<Self>, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let local_addr = listener.local_addr()?;

        // Reuse the TCP port so both halves share one advertised address
        let udp = UdpSocket::bind(local_addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let udp = Arc::new(udp);

        let advertise_addr = match config.advertise_addr {
            Some(addr) => addr,
            None if local_addr.ip().is_unspecified() => {
                return Err(TransportError::InvalidAddress(format!(
                    "bound to {} with no advertise address",
                    local_addr
                )));
            }
            None => local_addr,
        };

        let (packet_tx, packet_rx) = mpsc::channel(config.queue_depth);
        let (stream_tx, stream_rx) = mpsc::channel(config.queue_depth);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let udp_task = tokio::spawn(udp_listen(
            udp.clone(),
            config.udp_buffer_size,
            packet_tx,
            shutdown_rx.clone(),
        ));
        let tcp_task = tokio::spawn(tcp_listen(listener, config.nodelay, stream_tx, shutdown_rx));

        debug!(%local_addr, %advertise_addr, "net transport listening");

        Ok(Arc::new(Self {
            config,
            state: Mutex::new(TransportState::Running),
            local_addr,
            advertise_addr,
            udp,
            packet_rx: Mutex::new(Some(packet_rx)),
            stream_rx: Mutex::new(Some(stream_rx)),
            shutdown_tx,
            tasks: Mutex::new(vec![udp_task, tcp_task]),
        }))
    }

    /// Address the sockets are actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    pub fn config(&self) -> &NetTransportConfig {
        &self.config
    }

    /// Move to `target` if the lifecycle allows it
    fn transition(&self, target: TransportState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(target) {
            return false;
        }
        *state = target;
        true
    }

    fn ensure_running(&self) -> Result<(), TransportError> {
        if !self.state.lock().is_running() {
            return Err(TransportError::Shutdown);
        }
        Ok(())
    }
}

async fn udp_listen(
    socket: Arc<UdpSocket>,
    buffer_size: usize,
    packets: mpsc::Sender<Packet>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((0, _)) => continue,
                Ok((n, from)) => {
                    let packet = Packet {
                        buf: buf[..n].to_vec(),
                        from,
                        timestamp: Instant::now(),
                    };
                    if packets.try_send(packet).is_err() {
                        warn!(%from, "packet inbox full, dropping packet");
                    }
                }
                Err(e) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    warn!(error = %e, "udp receive failed");
                }
            },
        }
    }
}

async fn tcp_listen(
    listener: TcpListener,
    nodelay: bool,
    streams: mpsc::Sender<IncomingStream>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = listener.accept() => match result {
                Ok((stream, remote)) => {
                    stream.set_nodelay(nodelay).ok();
                    let incoming = IncomingStream {
                        stream: Box::new(stream),
                        remote,
                    };
                    if streams.send(incoming).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "tcp accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
        }
    }
}

#[async_trait]
impl Transport for NetTransport {
    fn advertise_addr(&self) -> SocketAddr {
        self.advertise_addr
    }

    async fn write_to(&self, buf: &[u8], addr: SocketAddr) -> Result<Instant, TransportError> {
        self.ensure_running()?;
        self.udp
            .send_to(buf, addr)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(Instant::now())
    }

    async fn dial(&self, addr: SocketAddr, dial_timeout: Duration) -> Result<BoxStream, TransportError> {
        self.ensure_running()?;
        let stream = timeout(dial_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        stream.set_nodelay(self.config.nodelay).ok();
        Ok(Box::new(stream))
    }

    fn packet_rx(&self) -> Option<mpsc::Receiver<Packet>> {
        self.packet_rx.lock().take()
    }

    fn stream_rx(&self) -> Option<mpsc::Receiver<IncomingStream>> {
        self.stream_rx.lock().take()
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if !self.transition(TransportState::Stopping) {
            return Ok(());
        }

        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.transition(TransportState::Stopped);
        debug!(local_addr = %self.local_addr, "net transport stopped");
        Ok(())
    }
}
