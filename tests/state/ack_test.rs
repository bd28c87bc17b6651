// Ack Registry Tests
// Sequence number correlation for direct and indirect probes

use meshlist::state::{AckOutcome, AckRegistry};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_ack_carries_payload_and_timestamp() {
    let registry = AckRegistry::new();
    let mut waiter = registry.register(42, Duration::from_secs(1));
    assert_eq!(waiter.seq_no(), 42);

    let at = Instant::now();
    assert!(registry.invoke_ack(42, b"payload".to_vec(), at));

    match waiter.wait_until(Instant::now() + Duration::from_millis(100)).await {
        AckOutcome::Acked { payload, timestamp } => {
            assert_eq!(payload, b"payload".to_vec());
            assert_eq!(timestamp, at);
        }
        other => panic!("expected ack, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_unknown_seq_is_ignored() {
    let registry = AckRegistry::new();
    assert!(!registry.invoke_ack(9, Vec::new(), Instant::now()));
    assert!(!registry.invoke_nack(9));
}

#[tokio::test(start_paused = true)]
async fn test_nacks_counted_until_deadline() {
    let registry = AckRegistry::new();
    let mut waiter = registry.register(1, Duration::from_secs(5));

    assert!(registry.invoke_nack(1));
    assert!(registry.invoke_nack(1));
    // Nacks leave the record in place
    assert_eq!(registry.len(), 1);

    let outcome = waiter.wait_until(Instant::now() + Duration::from_millis(500)).await;
    assert_eq!(outcome, AckOutcome::TimedOut);
    assert_eq!(waiter.nacks(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ack_after_nacks_still_completes() {
    let registry = AckRegistry::new();
    let mut waiter = registry.register(3, Duration::from_secs(5));

    registry.invoke_nack(3);
    registry.invoke_ack(3, Vec::new(), Instant::now());

    let outcome = waiter.wait_until(Instant::now() + Duration::from_secs(1)).await;
    assert!(outcome.is_acked());
    assert_eq!(waiter.nacks(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_clear_closes_waiters() {
    let registry = AckRegistry::new();
    let mut waiter = registry.register(5, Duration::from_secs(5));

    registry.clear();
    assert!(registry.is_empty());

    let outcome = waiter.wait_until(Instant::now() + Duration::from_secs(1)).await;
    assert_eq!(outcome, AckOutcome::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_timeout_records_always_expire() {
    let registry = AckRegistry::new();
    let waiters: Vec<_> = (0..2000).map(|i| registry.register(i, Duration::ZERO)).collect();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.len(), 0);
    drop(waiters);
}
