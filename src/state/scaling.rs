// Scaling Math - How timeouts and fan-out grow with the cluster
//
// Pure helpers shared by the probe, gossip and push/pull loops:
// - Suspicion timeouts that grow with log10(n)
// - Retransmit limits for the broadcast queue
// - Push/pull interval backoff for large clusters
// - Random node selection helpers for probing and gossip

use crate::state::node::NodeState;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

/// Cluster size below which the push/pull interval is not scaled.
/// The 33rd node doubles the interval, the 65th triples it.
pub const PUSH_PULL_SCALE_THRESHOLD: usize = 32;

// ============================================================================
// TIMING
// ============================================================================

/// Computes the timeout used when a node is suspected
pub fn suspicion_timeout(suspicion_mult: u32, n: usize, interval: Duration) -> Duration {
    let node_scale = (n.max(1) as f64).log10().max(1.0);
    let timeout_ms = suspicion_mult as f64 * node_scale * interval.as_millis() as f64;
    Duration::from_millis(timeout_ms as u64)
}

/// Computes how many times a broadcast is retransmitted
pub fn retransmit_limit(retransmit_mult: u32, n: usize) -> usize {
    let node_scale = ((n + 1) as f64).log10().ceil() as usize;
    retransmit_mult as usize * node_scale
}

/// Scales the push/pull interval so full-state syncs don't saturate
/// the network as the cluster grows
pub fn push_pull_scale(interval: Duration, n: usize) -> Duration {
    if n <= PUSH_PULL_SCALE_THRESHOLD {
        return interval;
    }

    let multiplier =
        ((n as f64).log2() - (PUSH_PULL_SCALE_THRESHOLD as f64).log2()).ceil() + 1.0;
    interval.mul_f64(multiplier)
}

// ============================================================================
// NODE SELECTION
// ============================================================================

/// Random offset in `[0, n)`, or 0 when `n == 0`
pub fn random_offset(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..n)
}

/// Shuffle the probe order in place
pub fn shuffle_nodes(nodes: &mut [NodeState]) {
    nodes.shuffle(&mut rand::thread_rng());
}

/// Moves Dead and Left nodes whose last state change is older than
/// `gossip_to_the_dead_time` to the end of the slice and returns the index
/// of the first moved node. Entries named `keep` are never moved.
pub fn move_dead_nodes(
    nodes: &mut [NodeState],
    gossip_to_the_dead_time: Duration,
    keep: &str,
) -> usize {
    let n = nodes.len();
    let mut num_dead = 0;
    let mut i = 0;

    while i < n - num_dead {
        let node = &nodes[i];
        let reapable = node.dead_or_left()
            && node.name() != keep
            && node.state_change().elapsed() > gossip_to_the_dead_time;

        if !reapable {
            i += 1;
            continue;
        }

        nodes.swap(i, n - num_dead - 1);
        num_dead += 1;
    }

    n - num_dead
}

/// Select up to `k` distinct random nodes, skipping any for which `exclude`
/// returns true. Fewer than `k` may come back.
pub fn k_random_nodes<'a, F>(k: usize, nodes: &'a [NodeState], exclude: F) -> Vec<&'a NodeState>
where
    F: Fn(&NodeState) -> bool,
{
    let n = nodes.len();
    let mut selected: Vec<&NodeState> = Vec::with_capacity(k);

    // Probe up to 3*n times; with small n the search should be exhaustive
    for _ in 0..3 * n {
        if selected.len() >= k {
            break;
        }

        let candidate = &nodes[random_offset(n)];
        if exclude(candidate) {
            continue;
        }
        if selected.iter().any(|s| s.name() == candidate.name()) {
            continue;
        }
        selected.push(candidate);
    }

    selected
}
