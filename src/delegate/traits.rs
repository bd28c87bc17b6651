// Delegate Traits - Hooks user code plugs into the membership engine
//
// All hooks are called from engine tasks, never while the node table is
// locked. They must be cheap and must not block.

use crate::state::Node;
use std::time::Duration;

/// Application data carried alongside membership
pub trait Delegate: Send + Sync {
    /// Metadata advertised in our Alive messages, at most `limit` bytes
    fn node_meta(&self, _limit: usize) -> Vec<u8> {
        Vec::new()
    }

    /// A user message arrived
    fn notify_msg(&self, _msg: &[u8]) {}

    /// Extra user broadcasts to piggy-back, each costing `overhead` bytes
    /// on top of its length, `limit` bytes in total
    fn get_broadcasts(&self, _overhead: usize, _limit: usize) -> Vec<Vec<u8>> {
        Vec::new()
    }

    /// Opaque state sent during push/pull
    fn local_state(&self, _join: bool) -> Vec<u8> {
        Vec::new()
    }

    /// Remote opaque state received during push/pull
    fn merge_remote_state(&self, _buf: &[u8], _join: bool) {}
}

/// Membership change notifications. Called sequentially.
pub trait EventDelegate: Send + Sync {
    fn notify_join(&self, node: &Node);
    fn notify_leave(&self, node: &Node);
    fn notify_update(&self, node: &Node);
}

/// Probe round-trip hooks
pub trait PingDelegate: Send + Sync {
    /// Payload attached to acks we send
    fn ack_payload(&self) -> Vec<u8>;

    /// A probe to `node` completed after `rtt` with the peer's ack payload
    fn notify_ping_complete(&self, node: &Node, rtt: Duration, payload: &[u8]);
}

/// Veto a peer before it is added or updated
pub trait AliveDelegate: Send + Sync {
    fn notify_alive(&self, peer: &Node) -> Result<(), String>;
}

/// Veto a remote state snapshot before it is merged
pub trait MergeDelegate: Send + Sync {
    fn notify_merge(&self, peers: &[Node]) -> Result<(), String>;
}

/// Told when two nodes claim the same name from different addresses
pub trait ConflictDelegate: Send + Sync {
    fn notify_conflict(&self, existing: &Node, other: &Node);
}
