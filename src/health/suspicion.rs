// Suspicion - Accelerating timer that declares a suspect node dead
//
// The timer starts at `max` and is driven towards `min` as independent
// peers confirm the suspicion. The node that raised the suspicion is
// pre-seeded as a confirmer so our own gossip echoing back doesn't count.
// The timeout callback runs at most once, never after `dispose`.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Callback receiving the number of confirmations seen when the timer fired
pub type TimeoutFn = Box<dyn FnOnce(usize) + Send + 'static>;

/// Time left before a suspect is declared dead, given `n` of `k` wanted
/// confirmations and `elapsed` time since the suspicion started.
/// Saturates at zero when the deadline has already passed.
pub fn remaining_suspicion_time(
    n: usize,
    k: usize,
    elapsed: Duration,
    min: Duration,
    max: Duration,
) -> Duration {
    if k == 0 {
        return min.saturating_sub(elapsed);
    }

    let frac = ((n + 1) as f64).ln() / ((k + 1) as f64).ln();
    let raw = max.as_secs_f64() - frac * (max.as_secs_f64() - min.as_secs_f64());
    let mut timeout = Duration::from_millis((raw * 1000.0).floor().max(0.0) as u64);
    if n >= k || timeout < min {
        timeout = min;
    }

    timeout.saturating_sub(elapsed)
}

struct SuspicionState {
    confirmations: HashSet<String>,
    n: usize,
    timer: Option<JoinHandle<()>>,
    callback: Option<TimeoutFn>,
    disposed: bool,
}

struct Inner {
    k: usize,
    min: Duration,
    max: Duration,
    start: Instant,
    state: Mutex<SuspicionState>,
}

impl Inner {
    fn fire(&self) {
        let (callback, n) = {
            let mut state = self.state.lock();
            state.timer = None;
            (state.callback.take(), state.n)
        };

        if let Some(callback) = callback {
            callback(n);
        }
    }

    fn arm(self: &Arc<Self>, after: Duration) -> JoinHandle<()> {
        let inner = self.clone();
        tokio::spawn(async move {
            if !after.is_zero() {
                tokio::time::sleep(after).await;
            }
            inner.fire();
        })
    }
}

/// Per-suspect timer. Dropping it disposes the timer.
pub struct Suspicion {
    inner: Arc<Inner>,
}

impl Suspicion {
    /// Start a suspicion timer. `from` is excluded from confirmations. With
    /// `k == 0` the timer runs for `min` and cannot be shortened.
    pub fn new(
        from: &str,
        k: usize,
        min: Duration,
        max: Duration,
        on_timeout: impl FnOnce(usize) + Send + 'static,
    ) -> Self {
        let mut confirmations = HashSet::new();
        confirmations.insert(from.to_string());

        let inner = Arc::new(Inner {
            k,
            min,
            max,
            start: Instant::now(),
            state: Mutex::new(SuspicionState {
                confirmations,
                n: 0,
                timer: None,
                callback: Some(Box::new(on_timeout)),
                disposed: false,
            }),
        });

        let initial = if k < 1 { min } else { max };
        let timer = inner.arm(initial);
        inner.state.lock().timer = Some(timer);

        Self { inner }
    }

    /// Record that `from` also suspects the node. Returns true only for new
    /// information that moved the timer.
    pub fn confirm(&self, from: &str) -> bool {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        if state.disposed || state.callback.is_none() {
            return false;
        }
        if state.n >= inner.k {
            return false;
        }
        if !state.confirmations.insert(from.to_string()) {
            return false;
        }

        state.n += 1;
        let remaining = remaining_suspicion_time(
            state.n,
            inner.k,
            inner.start.elapsed(),
            inner.min,
            inner.max,
        );

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        // A zero delay still fires on a fresh task, not on the caller's stack
        state.timer = Some(inner.arm(remaining));

        true
    }

    /// Confirmations accepted so far
    pub fn confirmations(&self) -> usize {
        self.inner.state.lock().n
    }

    /// Number of confirmations that drive the timer to its minimum
    pub fn target(&self) -> usize {
        self.inner.k
    }

    /// Cancel the timer; the callback will not run afterwards. Idempotent.
    pub fn dispose(&self) {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.callback = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }
}

impl Drop for Suspicion {
    fn drop(&mut self) {
        self.dispose();
    }
}
