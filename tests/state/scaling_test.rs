// Scaling Tests
// Timeout, retransmit and node selection math

use meshlist::state::scaling::{k_random_nodes, move_dead_nodes, random_offset};
use meshlist::state::{
    push_pull_scale, retransmit_limit, suspicion_timeout, NodeState, NodeStateType,
    ProtocolVersions,
};
use std::net::SocketAddr;
use std::time::Duration;

fn node(name: &str, state: NodeStateType) -> NodeState {
    let addr: SocketAddr = "127.0.0.1:7946".parse().unwrap();
    NodeState::new(name, addr, Vec::new(), 1, state, ProtocolVersions::default())
}

// ============================================================================
// TIMING
// ============================================================================

#[test]
fn test_suspicion_timeout_grows_with_log_n() {
    let interval = Duration::from_secs(1);
    let cases = [
        (5, 1000),
        (10, 1000),
        (50, 1698),
        (100, 2000),
        (500, 2698),
        (1000, 3000),
    ];

    for (n, expected_ms) in cases {
        let timeout = suspicion_timeout(1, n, interval);
        assert_eq!(timeout, Duration::from_millis(expected_ms), "n={}", n);
    }
}

#[test]
fn test_suspicion_timeout_scales_with_mult() {
    let timeout = suspicion_timeout(4, 10, Duration::from_millis(500));
    assert_eq!(timeout, Duration::from_secs(2));
}

#[test]
fn test_retransmit_limit() {
    assert_eq!(retransmit_limit(3, 0), 0);
    assert_eq!(retransmit_limit(3, 1), 3);
    assert_eq!(retransmit_limit(3, 99), 6);
}

#[test]
fn test_push_pull_scale() {
    let interval = Duration::from_secs(1);
    let cases = [
        (1, 1000),
        (32, 1000),
        (33, 2000),
        (64, 2000),
        (65, 3000),
        (128, 3000),
        (129, 4000),
    ];

    for (n, expected_ms) in cases {
        assert_eq!(
            push_pull_scale(interval, n),
            Duration::from_millis(expected_ms),
            "n={}",
            n
        );
    }
}

// ============================================================================
// NODE SELECTION
// ============================================================================

#[test]
fn test_random_offset_in_range() {
    assert_eq!(random_offset(0), 0);
    for _ in 0..100 {
        assert!(random_offset(5) < 5);
    }
}

#[tokio::test(start_paused = true)]
async fn test_move_dead_nodes() {
    let mut nodes = vec![
        node("alive1", NodeStateType::Alive),
        node("old-dead", NodeStateType::Dead),
        node("suspect", NodeStateType::Suspect),
        node("old-left", NodeStateType::Left),
        node("alive2", NodeStateType::Alive),
    ];

    tokio::time::advance(Duration::from_secs(30)).await;
    nodes.push(node("fresh-dead", NodeStateType::Dead));

    let idx = move_dead_nodes(&mut nodes, Duration::from_secs(20), "none");
    assert_eq!(idx, 4);

    let live: Vec<&str> = nodes[..idx].iter().map(|s| s.name()).collect();
    assert!(live.contains(&"alive1"));
    assert!(live.contains(&"alive2"));
    assert!(live.contains(&"suspect"));
    assert!(live.contains(&"fresh-dead"));
}

#[test]
fn test_k_random_nodes_excludes_and_dedups() {
    let nodes: Vec<NodeState> = (0..90)
        .map(|i| {
            let state = match i % 3 {
                0 => NodeStateType::Alive,
                1 => NodeStateType::Suspect,
                _ => NodeStateType::Dead,
            };
            node(&format!("test{}", i), state)
        })
        .collect();

    for _ in 0..100 {
        let picked = k_random_nodes(3, &nodes, |n| {
            n.name() == "test0" || n.state() != NodeStateType::Alive
        });

        assert!(picked.len() <= 3);
        for (i, a) in picked.iter().enumerate() {
            assert_ne!(a.name(), "test0");
            assert_eq!(a.state(), NodeStateType::Alive);
            for b in &picked[i + 1..] {
                assert_ne!(a.name(), b.name());
            }
        }
    }
}

#[test]
fn test_k_random_nodes_small_pool() {
    let nodes = vec![node("a", NodeStateType::Alive), node("b", NodeStateType::Alive)];
    let picked = k_random_nodes(5, &nodes, |_| false);
    assert_eq!(picked.len(), 2);

    let none = k_random_nodes(3, &[], |_| false);
    assert!(none.is_empty());
}
