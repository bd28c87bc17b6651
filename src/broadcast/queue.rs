// Transmit-Limited Queue - Bounded retransmission of gossip messages
//
// Holds pending broadcasts ordered by (transmits asc, length desc, id desc):
// unsent messages first, large ones packed first, newest state first.
// Each message is retransmitted at most `retransmit_limit` times, a limit
// that grows with log10 of the cluster size.

use crate::broadcast::Broadcast;
use crate::state::scaling::retransmit_limit;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Supplies the current cluster size estimate
pub type NumNodesFn = Arc<dyn Fn() -> usize + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    transmits: usize,
    len: Reverse<usize>,
    id: Reverse<u64>,
}

struct LimitedBroadcast {
    transmits: usize,
    msg_len: usize,
    id: u64,
    name: Option<String>,
    broadcast: Box<dyn Broadcast>,
}

impl LimitedBroadcast {
    fn key(&self) -> QueueKey {
        QueueKey {
            transmits: self.transmits,
            len: Reverse(self.msg_len),
            id: Reverse(self.id),
        }
    }
}

#[derive(Default)]
struct QueueState {
    items: BTreeMap<QueueKey, LimitedBroadcast>,
    named: HashMap<String, QueueKey>,
    id_gen: u64,
}

impl QueueState {
    fn insert(&mut self, item: LimitedBroadcast) {
        let key = item.key();
        if let Some(name) = &item.name {
            self.named.insert(name.clone(), key);
        }
        self.items.insert(key, item);
    }

    fn remove(&mut self, key: &QueueKey) -> Option<LimitedBroadcast> {
        let item = self.items.remove(key)?;
        if let Some(name) = &item.name {
            self.named.remove(name);
        }
        Some(item)
    }
}

/// Broadcast queue with per-message retransmit limits
pub struct TransmitLimitedQueue {
    num_nodes: NumNodesFn,
    retransmit_mult: u32,
    state: Mutex<QueueState>,
}

impl TransmitLimitedQueue {
    pub fn new(retransmit_mult: u32, num_nodes: NumNodesFn) -> Self {
        Self {
            num_nodes,
            retransmit_mult,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Transmissions allowed per message at the current cluster size.
    /// A cluster of one still sends each message once.
    pub fn retransmit_limit(&self) -> usize {
        let n = (self.num_nodes)();
        if n <= 1 {
            return 1;
        }
        retransmit_limit(self.retransmit_mult, n)
    }

    /// Enqueue a broadcast with a transmit count of zero. Replaces a queued
    /// broadcast of the same name, or drops queued broadcasts it invalidates.
    pub fn queue_broadcast<B: Broadcast>(&self, broadcast: B) {
        self.queue_boxed(Box::new(broadcast));
    }

    pub fn queue_boxed(&self, broadcast: Box<dyn Broadcast>) {
        let mut finished = Vec::new();

        {
            let mut state = self.state.lock();
            if state.items.is_empty() {
                state.id_gen = 0;
            }
            state.id_gen = state.id_gen.wrapping_add(1);
            let id = state.id_gen;

            let name = broadcast.name().map(str::to_string);
            if let Some(name) = &name {
                if let Some(key) = state.named.get(name).copied() {
                    if let Some(old) = state.remove(&key) {
                        finished.push(old.broadcast);
                    }
                }
            } else if !broadcast.is_unique() {
                let stale: Vec<QueueKey> = state
                    .items
                    .iter()
                    .filter(|(_, item)| {
                        item.name.is_none()
                            && !item.broadcast.is_unique()
                            && broadcast.invalidates(item.broadcast.as_ref())
                    })
                    .map(|(key, _)| *key)
                    .collect();

                for key in stale {
                    if let Some(old) = state.remove(&key) {
                        finished.push(old.broadcast);
                    }
                }
            }

            let msg_len = broadcast.message().len();
            state.insert(LimitedBroadcast {
                transmits: 0,
                msg_len,
                id,
                name,
                broadcast,
            });
        }

        finish_all(finished);
    }

    /// Take up to `limit` bytes of broadcasts, counting `overhead` bytes
    /// per message. Messages that reach the retransmit limit are finished.
    pub fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
        let transmit_limit = self.retransmit_limit();
        let mut to_send = Vec::new();
        let mut finished = Vec::new();

        {
            let mut state = self.state.lock();
            if state.items.is_empty() {
                return to_send;
            }

            let keys: Vec<QueueKey> = state.items.keys().copied().collect();
            let mut reinsert = Vec::new();
            let mut bytes_used = 0usize;

            for key in keys {
                let free = limit.saturating_sub(bytes_used);
                if free <= overhead {
                    break;
                }

                let fits = state
                    .items
                    .get(&key)
                    .map(|item| overhead + item.msg_len <= free)
                    .unwrap_or(false);
                if !fits {
                    continue;
                }

                let Some(mut item) = state.remove(&key) else {
                    continue;
                };
                bytes_used += overhead + item.msg_len;
                to_send.push(item.broadcast.message().to_vec());

                if item.transmits + 1 >= transmit_limit {
                    finished.push(item.broadcast);
                } else {
                    item.transmits += 1;
                    reinsert.push(item);
                }
            }

            for item in reinsert {
                state.insert(item);
            }
        }

        finish_all(finished);
        to_send
    }

    /// Number of queued broadcasts
    pub fn num_queued(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Finish and drop every queued broadcast
    pub fn reset(&self) {
        let finished: Vec<Box<dyn Broadcast>> = {
            let mut state = self.state.lock();
            state.named.clear();
            state.id_gen = 0;
            std::mem::take(&mut state.items)
                .into_values()
                .map(|item| item.broadcast)
                .collect()
        };

        finish_all(finished);
    }

    /// Keep only the `max_retain` newest broadcasts
    pub fn prune(&self, max_retain: usize) {
        let finished: Vec<Box<dyn Broadcast>> = {
            let mut state = self.state.lock();
            let excess = state.items.len().saturating_sub(max_retain);
            if excess == 0 {
                return;
            }

            let mut oldest: Vec<(u64, QueueKey)> = state
                .items
                .iter()
                .map(|(key, item)| (item.id, *key))
                .collect();
            oldest.sort_unstable_by_key(|(id, _)| *id);

            oldest
                .into_iter()
                .take(excess)
                .filter_map(|(_, key)| state.remove(&key))
                .map(|item| item.broadcast)
                .collect()
        };

        finish_all(finished);
    }
}

/// Run `finished` hooks outside the queue lock; a panicking hook is logged
fn finish_all(broadcasts: Vec<Box<dyn Broadcast>>) {
    for broadcast in broadcasts {
        if catch_unwind(AssertUnwindSafe(|| broadcast.finished())).is_err() {
            warn!("broadcast finished hook panicked");
        }
    }
}
