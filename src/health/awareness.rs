// Awareness - Self-assessed health of the local node
//
// A clamped score that grows when our own probes look unreliable (missed
// nacks, refutations) and shrinks on successful probes. Probe intervals are
// multiplied by `score + 1`, so a degraded node slows down before it starts
// accusing healthy peers.

use crate::health::HealthError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Lock-free health score in `[0, max - 1]`
#[derive(Debug)]
pub struct Awareness {
    max: usize,
    score: AtomicUsize,
}

impl Awareness {
    /// Create a tracker whose score saturates at `max - 1`
    pub fn new(max: usize) -> Result<Self, HealthError> {
        if max == 0 {
            return Err(HealthError::InvalidArgument(
                "awareness max must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            max,
            score: AtomicUsize::new(0),
        })
    }

    /// Upper bound (exclusive) of the score
    pub fn max(&self) -> usize {
        self.max
    }

    /// Add `delta` to the score, clamped to `[0, max - 1]`.
    /// Returns true if the stored score changed.
    pub fn apply_delta(&self, delta: isize) -> bool {
        let ceiling = (self.max - 1) as isize;
        let mut current = self.score.load(Ordering::Acquire);

        loop {
            let next = (current as isize).saturating_add(delta).clamp(0, ceiling) as usize;
            if next == current {
                return false;
            }

            match self.score.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!(score = next, delta, "health score changed");
                    return true;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Current score; zero is healthiest
    pub fn score(&self) -> usize {
        self.score.load(Ordering::Acquire)
    }

    /// Scale `timeout` by `score + 1`, saturating on overflow
    pub fn scale_timeout(&self, timeout: Duration) -> Duration {
        let factor = u32::try_from(self.score())
            .ok()
            .and_then(|score| score.checked_add(1))
            .unwrap_or(u32::MAX);
        timeout.saturating_mul(factor)
    }
}
