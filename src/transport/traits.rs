// Transport Traits and Core Types
// Defines the abstract Transport trait the membership engine talks through

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;

// ============================================================================
// STREAMS AND PACKETS
// ============================================================================

/// Any bidirectional byte stream a transport can hand out
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxStream = Box<dyn AsyncStream>;

/// One inbound datagram
#[derive(Debug, Clone)]
pub struct Packet {
    pub buf: Vec<u8>,
    pub from: SocketAddr,
    /// Arrival time, used for RTT measurement
    pub timestamp: Instant,
}

/// An accepted reliable stream
pub struct IncomingStream {
    pub stream: BoxStream,
    pub remote: SocketAddr,
}

impl std::fmt::Debug for IncomingStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingStream")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TRANSPORT STATE
// ============================================================================

/// Lifecycle of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Running,
    Stopping,
}

impl TransportState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: TransportState) -> bool {
        matches!(
            (self, target),
            (Self::Stopped, Self::Running)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Receiver already taken")]
    ReceiverTaken,

    #[error("Transport is shut down")]
    Shutdown,

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// Packet and stream transport used by the membership engine
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address other members should use to reach us
    fn advertise_addr(&self) -> SocketAddr;

    /// Best-effort datagram send; returns the send timestamp
    async fn write_to(&self, buf: &[u8], addr: SocketAddr) -> Result<Instant, TransportError>;

    /// Open a reliable stream to `addr`
    async fn dial(&self, addr: SocketAddr, timeout: Duration) -> Result<BoxStream, TransportError>;

    /// Inbound packets. Can be taken once.
    fn packet_rx(&self) -> Option<mpsc::Receiver<Packet>>;

    /// Inbound streams. Can be taken once.
    fn stream_rx(&self) -> Option<mpsc::Receiver<IncomingStream>>;

    /// Stop sending and receiving. Idempotent.
    async fn shutdown(&self) -> Result<(), TransportError>;
}
