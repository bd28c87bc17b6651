// Broadcast Queue Tests
// Ordering, byte budgets, retransmit limits and coalescing

use meshlist::broadcast::{Broadcast, MemberlistBroadcast, TransmitLimitedQueue};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

fn queue(nodes: usize, mult: u32) -> TransmitLimitedQueue {
    TransmitLimitedQueue::new(mult, Arc::new(move || nodes))
}

/// Named user broadcast that counts how often it was finished
struct Named {
    name: String,
    msg: Vec<u8>,
    finished: Arc<AtomicUsize>,
}

impl Named {
    fn new(name: &str, msg: &[u8], finished: &Arc<AtomicUsize>) -> Self {
        Self {
            name: name.to_string(),
            msg: msg.to_vec(),
            finished: finished.clone(),
        }
    }
}

impl Broadcast for Named {
    fn invalidates(&self, _other: &dyn Broadcast) -> bool {
        false
    }

    fn message(&self) -> &[u8] {
        &self.msg
    }

    fn finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Broadcast that claims to invalidate everything but is marked unique
struct Unique(Vec<u8>);

impl Broadcast for Unique {
    fn invalidates(&self, _other: &dyn Broadcast) -> bool {
        true
    }

    fn message(&self) -> &[u8] {
        &self.0
    }

    fn finished(&self) {}

    fn is_unique(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Panicky;

impl Broadcast for Panicky {
    fn invalidates(&self, _other: &dyn Broadcast) -> bool {
        false
    }

    fn message(&self) -> &[u8] {
        b"boom"
    }

    fn finished(&self) {
        panic!("finished hook failure");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// ORDERING AND BUDGET
// ============================================================================

#[test]
fn test_newest_first_within_same_length() {
    let q = queue(10, 3);
    q.queue_broadcast(MemberlistBroadcast::new("a", b"aa".to_vec()));
    q.queue_broadcast(MemberlistBroadcast::new("b", b"bb".to_vec()));
    q.queue_broadcast(MemberlistBroadcast::new("c", b"cc".to_vec()));

    let sent = q.get_broadcasts(0, 100);
    assert_eq!(sent, vec![b"cc".to_vec(), b"bb".to_vec(), b"aa".to_vec()]);
}

#[test]
fn test_byte_limit_skips_what_does_not_fit() {
    let q = queue(10, 3);
    q.queue_broadcast(MemberlistBroadcast::new("big", vec![0; 10]));
    q.queue_broadcast(MemberlistBroadcast::new("small", vec![1; 2]));

    // 2 + overhead 3 fits in 6, the 10-byte message does not
    let sent = q.get_broadcasts(3, 6);
    assert_eq!(sent, vec![vec![1; 2]]);
    assert_eq!(q.num_queued(), 2);
}

#[test]
fn test_empty_queue_and_tiny_budget() {
    let q = queue(10, 3);
    assert!(q.get_broadcasts(2, 100).is_empty());

    q.queue_broadcast(MemberlistBroadcast::new("a", vec![1]));
    assert!(q.get_broadcasts(5, 5).is_empty());
}

// ============================================================================
// RETRANSMIT LIMITS
// ============================================================================

#[test]
fn test_retransmit_limit_tracks_cluster_size() {
    let nodes = Arc::new(AtomicUsize::new(1));
    let counter = nodes.clone();
    let q = TransmitLimitedQueue::new(3, Arc::new(move || counter.load(Ordering::SeqCst)));

    assert_eq!(q.retransmit_limit(), 1);
    nodes.store(99, Ordering::SeqCst);
    assert_eq!(q.retransmit_limit(), 6);
}

#[test]
fn test_message_dropped_after_limit() {
    // 10 nodes, mult 1: ceil(log10(11)) = 2 transmissions
    let q = queue(10, 1);
    let (tx, mut rx) = oneshot::channel();
    q.queue_broadcast(MemberlistBroadcast::new("a", vec![7]).with_notify(tx));

    assert_eq!(q.get_broadcasts(0, 100).len(), 1);
    assert!(rx.try_recv().is_err());
    assert_eq!(q.get_broadcasts(0, 100).len(), 1);
    assert!(rx.try_recv().is_ok());

    assert!(q.get_broadcasts(0, 100).is_empty());
    assert_eq!(q.num_queued(), 0);
}

#[test]
fn test_sent_messages_yield_to_fresh_ones() {
    let q = queue(10, 3);
    q.queue_broadcast(MemberlistBroadcast::new("old", vec![0; 4]));
    q.get_broadcasts(0, 100);
    q.queue_broadcast(MemberlistBroadcast::new("new", vec![1; 1]));

    let sent = q.get_broadcasts(0, 100);
    assert_eq!(sent, vec![vec![1; 1], vec![0; 4]]);
}

// ============================================================================
// COALESCING
// ============================================================================

#[test]
fn test_invalidated_broadcast_is_finished() {
    let q = queue(10, 3);
    let (tx, mut rx) = oneshot::channel();
    q.queue_broadcast(MemberlistBroadcast::new("a", vec![1]).with_notify(tx));
    q.queue_broadcast(MemberlistBroadcast::new("b", vec![2]));
    q.queue_broadcast(MemberlistBroadcast::new("a", vec![3]));

    assert!(rx.try_recv().is_ok());
    assert_eq!(q.num_queued(), 2);
}

#[test]
fn test_named_broadcast_replaces_previous() {
    let q = queue(10, 3);
    let finished = Arc::new(AtomicUsize::new(0));

    q.queue_broadcast(Named::new("key", b"v1", &finished));
    q.queue_broadcast(Named::new("other", b"x", &finished));
    q.queue_broadcast(Named::new("key", b"v2", &finished));

    assert_eq!(q.num_queued(), 2);
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    let sent = q.get_broadcasts(0, 100);
    assert!(sent.contains(&b"v2".to_vec()));
    assert!(!sent.contains(&b"v1".to_vec()));
}

#[test]
fn test_unique_broadcasts_never_invalidate() {
    let q = queue(10, 3);
    q.queue_broadcast(MemberlistBroadcast::new("a", vec![1]));
    q.queue_broadcast(Unique(vec![2]));
    q.queue_broadcast(Unique(vec![3]));

    assert_eq!(q.num_queued(), 3);
}

// ============================================================================
// PRUNE AND RESET
// ============================================================================

#[test]
fn test_prune_keeps_newest() {
    let q = queue(10, 3);
    let finished = Arc::new(AtomicUsize::new(0));
    for i in 0..5 {
        q.queue_broadcast(Named::new(&format!("n{}", i), &[i as u8], &finished));
    }

    q.prune(2);
    assert_eq!(q.num_queued(), 2);
    assert_eq!(finished.load(Ordering::SeqCst), 3);

    let mut sent = q.get_broadcasts(0, 100);
    sent.sort();
    assert_eq!(sent, vec![vec![3], vec![4]]);

    q.prune(10);
    assert_eq!(q.num_queued(), 2);
}

#[test]
fn test_reset_finishes_everything() {
    let q = queue(10, 3);
    let finished = Arc::new(AtomicUsize::new(0));
    q.queue_broadcast(Named::new("a", b"1", &finished));
    q.queue_broadcast(Named::new("b", b"2", &finished));

    q.reset();
    assert_eq!(q.num_queued(), 0);
    assert_eq!(finished.load(Ordering::SeqCst), 2);
}

#[test]
fn test_panicking_hook_does_not_poison_queue() {
    let q = queue(10, 3);
    q.queue_broadcast(Panicky);
    q.reset();

    q.queue_broadcast(MemberlistBroadcast::new("a", vec![1]));
    assert_eq!(q.num_queued(), 1);
}
