// Ack Records - Correlate probe replies with outstanding sequence numbers
//
// Every outstanding probe registers a record keyed by its sequence number.
// Acks complete and remove the record; nacks are delivered but leave it in
// place; an expiry task removes the record when its timeout passes so the
// map never grows without bound.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Reply delivered to a waiting prober
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckEvent {
    /// The target answered, carrying the ping delegate's payload
    Ack { payload: Vec<u8>, timestamp: Instant },
    /// An indirect helper could not reach the target
    Nack,
}

/// Result of waiting on an ack record
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    Acked { payload: Vec<u8>, timestamp: Instant },
    /// The deadline passed before any ack arrived
    TimedOut,
    /// The record expired or the registry was cleared
    Closed,
}

impl AckOutcome {
    pub fn is_acked(&self) -> bool {
        matches!(self, Self::Acked { .. })
    }
}

struct AckRecord {
    generation: u64,
    tx: mpsc::UnboundedSender<AckEvent>,
    expiry: JoinHandle<()>,
}

type RecordMap = Arc<Mutex<HashMap<u32, AckRecord>>>;

/// Map of outstanding sequence numbers to their completion channels
#[derive(Clone, Default)]
pub struct AckRegistry {
    records: RecordMap,
    generation: Arc<AtomicU64>,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record for `seq_no` that expires after `timeout`.
    /// A stale record for the same (wrapped) sequence number is replaced.
    pub fn register(&self, seq_no: u32, timeout: Duration) -> AckWaiter {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        // Insert while holding the lock so the expiry task, which needs the
        // same lock, always finds the record it was spawned for
        let mut records = self.records.lock();
        let map = self.records.clone();
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut records = map.lock();
            if records.get(&seq_no).map(|r| r.generation) == Some(generation) {
                records.remove(&seq_no);
            }
        });

        let record = AckRecord {
            generation,
            tx,
            expiry,
        };
        if let Some(old) = records.insert(seq_no, record) {
            old.expiry.abort();
        }
        drop(records);

        AckWaiter {
            seq_no,
            rx,
            nacks: 0,
        }
    }

    /// Complete the record for `seq_no`. Returns false if nothing was waiting.
    pub fn invoke_ack(&self, seq_no: u32, payload: Vec<u8>, timestamp: Instant) -> bool {
        let Some(record) = self.records.lock().remove(&seq_no) else {
            return false;
        };
        record.expiry.abort();
        record.tx.send(AckEvent::Ack { payload, timestamp }).is_ok()
    }

    /// Deliver a nack for `seq_no` without completing the record
    pub fn invoke_nack(&self, seq_no: u32) -> bool {
        let records = self.records.lock();
        match records.get(&seq_no) {
            Some(record) => record.tx.send(AckEvent::Nack).is_ok(),
            None => false,
        }
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record; all waiters observe `Closed`
    pub fn clear(&self) {
        let drained: Vec<AckRecord> = self.records.lock().drain().map(|(_, r)| r).collect();
        for record in drained {
            record.expiry.abort();
        }
    }
}

/// Receiving half of an ack record
pub struct AckWaiter {
    seq_no: u32,
    rx: mpsc::UnboundedReceiver<AckEvent>,
    nacks: usize,
}

impl AckWaiter {
    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    /// Nacks seen so far
    pub fn nacks(&self) -> usize {
        self.nacks
    }

    /// Wait for an ack until `deadline`, counting nacks along the way
    pub async fn wait_until(&mut self, deadline: Instant) -> AckOutcome {
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => return AckOutcome::TimedOut,
                Ok(None) => return AckOutcome::Closed,
                Ok(Some(AckEvent::Nack)) => self.nacks += 1,
                Ok(Some(AckEvent::Ack { payload, timestamp })) => {
                    return AckOutcome::Acked { payload, timestamp };
                }
            }
        }
    }
}
