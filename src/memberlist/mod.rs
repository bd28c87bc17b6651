// Memberlist module - WHO IS UP, WHO IS DOWN
// SWIM failure detection, gossip dissemination and push/pull anti-entropy

mod engine;
mod gossip;
mod handlers;
mod probe;
mod scheduler;
mod state;

pub use engine::{Memberlist, MAX_PUSH_PULL_REQUESTS, META_MAX_SIZE};
pub use scheduler::{random_stagger, Scheduler, SchedulerState};

use crate::config::ConfigError;
use crate::health::HealthError;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;
use thiserror::Error;

/// Memberlist errors
#[derive(Error, Debug)]
pub enum MemberlistError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Health error: {0}")]
    Health(#[from] HealthError),

    #[error("Failed to join any seed: {0}")]
    JoinFailed(String),

    #[error("Timed out waiting for leave broadcast")]
    LeaveTimeout,

    #[error("Timed out waiting for update broadcast")]
    UpdateTimeout,

    #[error("Memberlist is shut down")]
    Shutdown,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Node metadata of {size} bytes exceeds limit of {max}")]
    MetaTooLarge { size: usize, max: usize },

    #[error("Merge rejected: {0}")]
    MergeRejected(String),

    #[error("Incompatible version: {0}")]
    IncompatibleVersion(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Operation timed out")]
    Timeout,
}
