// Config module - HOW FAST, HOW OFTEN
// Serializable engine configuration with LAN, WAN and local profiles

mod memberlist;

pub use memberlist::{MemberlistConfig, MAX_AWARENESS_MULTIPLIER, MIN_UDP_BUFFER_SIZE};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
