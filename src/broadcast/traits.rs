// Broadcast Traits - What the gossip queue carries
//
// A broadcast is an encoded message plus hooks the queue uses to coalesce
// superseded updates and to signal when a message will never be sent again.

use parking_lot::Mutex;
use std::any::Any;
use tokio::sync::oneshot;

/// Something that can be gossiped to the cluster through the broadcast queue
pub trait Broadcast: Send + Sync + 'static {
    /// Whether queuing `self` makes the older `other` pointless to send
    fn invalidates(&self, other: &dyn Broadcast) -> bool;

    /// Encoded payload
    fn message(&self) -> &[u8];

    /// Called once when the message leaves the queue for good: transmit
    /// limit reached, invalidated, replaced, pruned or reset
    fn finished(&self);

    /// Dedup name; at most one queued broadcast per name
    fn name(&self) -> Option<&str> {
        None
    }

    /// Intrinsically unique messages skip the invalidation scan
    fn is_unique(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}

/// Membership update about one node (alive, suspect or dead).
/// A newer update about the same node invalidates an older one.
pub struct MemberlistBroadcast {
    node: String,
    msg: Vec<u8>,
    notify: Mutex<Option<oneshot::Sender<()>>>,
}

impl MemberlistBroadcast {
    pub fn new(node: &str, msg: Vec<u8>) -> Self {
        Self {
            node: node.to_string(),
            msg,
            notify: Mutex::new(None),
        }
    }

    /// Signal `notify` once the broadcast is finished
    pub fn with_notify(mut self, notify: oneshot::Sender<()>) -> Self {
        self.notify = Mutex::new(Some(notify));
        self
    }

    /// Node this update is about
    pub fn node(&self) -> &str {
        &self.node
    }
}

impl Broadcast for MemberlistBroadcast {
    fn invalidates(&self, other: &dyn Broadcast) -> bool {
        other
            .as_any()
            .downcast_ref::<MemberlistBroadcast>()
            .map(|other| other.node == self.node)
            .unwrap_or(false)
    }

    fn message(&self) -> &[u8] {
        &self.msg
    }

    fn finished(&self) {
        if let Some(notify) = self.notify.lock().take() {
            let _ = notify.send(());
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
