// Health module - HOW SURE ARE WE
// Local health scoring and per-node suspicion timers

mod awareness;
mod suspicion;

pub use awareness::Awareness;
pub use suspicion::{remaining_suspicion_time, Suspicion, TimeoutFn};

use thiserror::Error;

/// Health-tracking errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
