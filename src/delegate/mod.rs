// Delegate module - WHO WE TELL
// User hooks for metadata, messages, state merges and membership events

mod channel;
mod traits;

pub use channel::{ChannelEventDelegate, NodeEvent, NodeEventKind};
pub use traits::{
    AliveDelegate, ConflictDelegate, Delegate, EventDelegate, MergeDelegate, PingDelegate,
};

use std::sync::Arc;

/// Optional delegates handed to the engine at creation
#[derive(Clone, Default)]
pub struct Delegates {
    pub delegate: Option<Arc<dyn Delegate>>,
    pub events: Option<Arc<dyn EventDelegate>>,
    pub ping: Option<Arc<dyn PingDelegate>>,
    pub alive: Option<Arc<dyn AliveDelegate>>,
    pub merge: Option<Arc<dyn MergeDelegate>>,
    pub conflict: Option<Arc<dyn ConflictDelegate>>,
}

impl Delegates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventDelegate>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_ping(mut self, ping: Arc<dyn PingDelegate>) -> Self {
        self.ping = Some(ping);
        self
    }

    pub fn with_alive(mut self, alive: Arc<dyn AliveDelegate>) -> Self {
        self.alive = Some(alive);
        self
    }

    pub fn with_merge(mut self, merge: Arc<dyn MergeDelegate>) -> Self {
        self.merge = Some(merge);
        self
    }

    pub fn with_conflict(mut self, conflict: Arc<dyn ConflictDelegate>) -> Self {
        self.conflict = Some(conflict);
        self
    }
}

impl std::fmt::Debug for Delegates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegates")
            .field("delegate", &self.delegate.is_some())
            .field("events", &self.events.is_some())
            .field("ping", &self.ping.is_some())
            .field("alive", &self.alive.is_some())
            .field("merge", &self.merge.is_some())
            .field("conflict", &self.conflict.is_some())
            .finish()
    }
}
