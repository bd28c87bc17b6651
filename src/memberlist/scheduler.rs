// Scheduler - Owns every background task of a memberlist
//
// Tasks are started and stopped as a unit. Periodic tasks run their ticks
// back to back on one task, so a slow tick delays the next one instead of
// overlapping it.

use crate::memberlist::MemberlistError;
use parking_lot::Mutex;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

/// Lifecycle of the background tasks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

pub struct Scheduler {
    state: Mutex<SchedulerState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(SchedulerState::Created),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Created -> Running
    pub fn start(&self) -> Result<(), MemberlistError> {
        let mut state = self.state.lock();
        if *state != SchedulerState::Created {
            return Err(MemberlistError::InvalidState(format!(
                "cannot start scheduler that is {}",
                *state
            )));
        }
        *state = SchedulerState::Running;
        Ok(())
    }

    /// Receiver that flips to `true` when shutdown begins
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Run `task` until it finishes or the scheduler shuts down.
    /// Returns false if the scheduler is not running.
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = self.state.lock();
        if *state != SchedulerState::Running {
            return false;
        }
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(tokio::spawn(task));
        true
    }

    /// Run `tick` repeatedly, waiting `next_interval()` before each tick.
    /// The first wait is preceded by `stagger` so peers don't tick in sync.
    pub fn spawn_periodic<I, F, Fut>(
        &self,
        name: &'static str,
        stagger: Duration,
        mut next_interval: I,
        mut tick: F,
    ) -> bool
    where
        I: FnMut() -> Duration + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.subscribe();
        self.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(stagger) => {}
                _ = shutdown.changed() => return,
            }

            loop {
                let wait = next_interval();
                tokio::select! {
                    _ = tokio::time::sleep(wait) => tick().await,
                    _ = shutdown.changed() => break,
                }
            }
            trace!(task = name, "periodic task stopped");
        })
    }

    /// Signal shutdown and stop every task. Returns false if the scheduler
    /// was already shutting down or stopped.
    pub async fn shutdown(&self) -> bool {
        {
            let mut state = self.state.lock();
            match *state {
                SchedulerState::Running => *state = SchedulerState::ShuttingDown,
                SchedulerState::Created => {
                    *state = SchedulerState::Stopped;
                    return true;
                }
                SchedulerState::ShuttingDown | SchedulerState::Stopped => return false,
            }
        }

        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        *self.state.lock() = SchedulerState::Stopped;
        true
    }
}

/// Random delay in `[0, interval)`
pub fn random_stagger(interval: Duration) -> Duration {
    let millis = interval.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}
