// Memberlist Configuration - Timing and sizing knobs for one member
//
// Three profiles: LAN (the default), WAN with slower timers and more
// tolerance, and local loopback with aggressive timers for tests.

use crate::config::ConfigError;
use crate::protocol::COMPOUND_HEADER_OVERHEAD;
use crate::state::{PROTOCOL_VERSION_MAX, PROTOCOL_VERSION_MIN};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Smallest UDP budget that still fits a compound header and a message
pub const MIN_UDP_BUFFER_SIZE: usize = 64;

/// Largest awareness multiplier; probe timers are scaled by up to this much
pub const MAX_AWARENESS_MULTIPLIER: usize = 64;

/// Configuration for a memberlist instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberlistConfig {
    /// Unique name of this node in the cluster
    pub name: String,
    /// Address the transport binds to
    pub bind_addr: SocketAddr,
    /// Address advertised to peers, if different from the bind address
    pub advertise_addr: Option<SocketAddr>,
    /// Dial and stream IO timeout for push/pull and reliable sends
    pub tcp_timeout_ms: u64,
    /// Helpers asked to probe a target that missed a direct ping
    pub indirect_checks: usize,
    /// Multiplier for how many times a broadcast is retransmitted
    pub retransmit_mult: u32,
    /// Multiplier for the suspicion timeout
    pub suspicion_mult: u32,
    /// Upper bound of the suspicion timeout as a multiple of the minimum
    pub suspicion_max_timeout_mult: u32,
    /// Anti-entropy interval (0 disables push/pull)
    pub push_pull_interval_ms: u64,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Skip the TCP fallback when a UDP probe fails
    pub disable_tcp_pings: bool,
    /// Upper bound of the health multiplier applied to probe timing
    pub awareness_max_multiplier: usize,
    /// Gossip interval (0 disables gossip)
    pub gossip_interval_ms: u64,
    /// Peers gossiped to per interval
    pub gossip_nodes: usize,
    /// Keep gossiping to dead nodes this long so they can refute
    pub gossip_to_the_dead_time_ms: u64,
    /// A dead node's name can be claimed by a new address after this long
    /// (0 never reclaims dead names; left names are always reclaimable)
    pub dead_node_reclaim_time_ms: u64,
    /// Depth of the inbound state-change queue
    pub handoff_queue_depth: usize,
    /// Byte budget of one UDP packet
    pub udp_buffer_size: usize,
    /// Prune the broadcast queue to this many entries each gossip tick
    /// (0 keeps everything)
    pub broadcast_queue_limit: usize,
    pub protocol_version: u8,
    pub delegate_protocol_version: u8,
    pub delegate_protocol_min: u8,
    pub delegate_protocol_max: u8,
}

impl Default for MemberlistConfig {
    fn default() -> Self {
        Self::default_lan()
    }
}

impl MemberlistConfig {
    pub fn new(name: &str) -> Self {
        Self::default().with_name(name)
    }

    /// Tuned for a local area network
    pub fn default_lan() -> Self {
        Self {
            name: String::new(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7946)),
            advertise_addr: None,
            tcp_timeout_ms: 10_000,
            indirect_checks: 3,
            retransmit_mult: 4,
            suspicion_mult: 4,
            suspicion_max_timeout_mult: 6,
            push_pull_interval_ms: 30_000,
            probe_interval_ms: 1_000,
            probe_timeout_ms: 500,
            disable_tcp_pings: false,
            awareness_max_multiplier: 8,
            gossip_interval_ms: 200,
            gossip_nodes: 3,
            gossip_to_the_dead_time_ms: 30_000,
            dead_node_reclaim_time_ms: 0,
            handoff_queue_depth: 1024,
            udp_buffer_size: 1400,
            broadcast_queue_limit: 0,
            protocol_version: PROTOCOL_VERSION_MAX,
            delegate_protocol_version: 0,
            delegate_protocol_min: 0,
            delegate_protocol_max: 0,
        }
    }

    /// Tuned for higher latency links between data centers
    pub fn default_wan() -> Self {
        Self {
            tcp_timeout_ms: 30_000,
            suspicion_mult: 6,
            push_pull_interval_ms: 60_000,
            probe_timeout_ms: 3_000,
            probe_interval_ms: 5_000,
            gossip_nodes: 4,
            gossip_interval_ms: 500,
            gossip_to_the_dead_time_ms: 60_000,
            ..Self::default_lan()
        }
    }

    /// Tuned for loopback clusters and tests
    pub fn default_local() -> Self {
        Self {
            tcp_timeout_ms: 1_000,
            indirect_checks: 1,
            retransmit_mult: 2,
            suspicion_mult: 3,
            push_pull_interval_ms: 15_000,
            probe_timeout_ms: 200,
            probe_interval_ms: 1_000,
            gossip_interval_ms: 100,
            gossip_to_the_dead_time_ms: 15_000,
            ..Self::default_lan()
        }
    }

    // ========================================================================
    // BUILDERS
    // ========================================================================

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_advertise_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.advertise_addr = addr;
        self
    }

    pub fn with_tcp_timeout(mut self, timeout: Duration) -> Self {
        self.tcp_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_indirect_checks(mut self, checks: usize) -> Self {
        self.indirect_checks = checks;
        self
    }

    pub fn with_retransmit_mult(mut self, mult: u32) -> Self {
        self.retransmit_mult = mult;
        self
    }

    pub fn with_suspicion_mult(mut self, mult: u32) -> Self {
        self.suspicion_mult = mult;
        self
    }

    pub fn with_suspicion_max_timeout_mult(mut self, mult: u32) -> Self {
        self.suspicion_max_timeout_mult = mult;
        self
    }

    pub fn with_push_pull_interval(mut self, interval: Duration) -> Self {
        self.push_pull_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_disable_tcp_pings(mut self, disable: bool) -> Self {
        self.disable_tcp_pings = disable;
        self
    }

    pub fn with_awareness_max_multiplier(mut self, max: usize) -> Self {
        self.awareness_max_multiplier = max;
        self
    }

    pub fn with_gossip_interval(mut self, interval: Duration) -> Self {
        self.gossip_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_gossip_nodes(mut self, nodes: usize) -> Self {
        self.gossip_nodes = nodes;
        self
    }

    pub fn with_gossip_to_the_dead_time(mut self, time: Duration) -> Self {
        self.gossip_to_the_dead_time_ms = time.as_millis() as u64;
        self
    }

    pub fn with_dead_node_reclaim_time(mut self, time: Duration) -> Self {
        self.dead_node_reclaim_time_ms = time.as_millis() as u64;
        self
    }

    pub fn with_handoff_queue_depth(mut self, depth: usize) -> Self {
        self.handoff_queue_depth = depth;
        self
    }

    pub fn with_udp_buffer_size(mut self, size: usize) -> Self {
        self.udp_buffer_size = size;
        self
    }

    pub fn with_broadcast_queue_limit(mut self, limit: usize) -> Self {
        self.broadcast_queue_limit = limit;
        self
    }

    pub fn with_protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_delegate_protocol(mut self, version: u8, min: u8, max: u8) -> Self {
        self.delegate_protocol_version = version;
        self.delegate_protocol_min = min;
        self.delegate_protocol_max = max;
        self
    }

    // ========================================================================
    // DURATIONS
    // ========================================================================

    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_timeout_ms)
    }

    pub fn push_pull_interval(&self) -> Duration {
        Duration::from_millis(self.push_pull_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn gossip_to_the_dead_time(&self) -> Duration {
        Duration::from_millis(self.gossip_to_the_dead_time_ms)
    }

    pub fn dead_node_reclaim_time(&self) -> Duration {
        Duration::from_millis(self.dead_node_reclaim_time_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("name cannot be empty".to_string()));
        }
        if self.probe_interval_ms == 0 {
            return Err(ConfigError::Invalid("probe_interval cannot be 0".to_string()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe_timeout cannot be 0".to_string()));
        }
        if self.probe_timeout_ms > self.probe_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "probe_timeout ({}ms) exceeds probe_interval ({}ms)",
                self.probe_timeout_ms, self.probe_interval_ms
            )));
        }
        if self.gossip_nodes > 0 && self.gossip_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "gossip_interval cannot be 0 while gossip_nodes is set".to_string(),
            ));
        }
        if self.awareness_max_multiplier == 0
            || self.awareness_max_multiplier > MAX_AWARENESS_MULTIPLIER
        {
            return Err(ConfigError::Invalid(format!(
                "awareness_max_multiplier must be in 1..={}",
                MAX_AWARENESS_MULTIPLIER
            )));
        }
        if self.handoff_queue_depth == 0 {
            return Err(ConfigError::Invalid("handoff_queue_depth cannot be 0".to_string()));
        }
        if !(PROTOCOL_VERSION_MIN..=PROTOCOL_VERSION_MAX).contains(&self.protocol_version) {
            return Err(ConfigError::Invalid(format!(
                "protocol_version {} outside supported range {}..={}",
                self.protocol_version, PROTOCOL_VERSION_MIN, PROTOCOL_VERSION_MAX
            )));
        }
        if self.delegate_protocol_min > self.delegate_protocol_max
            || !(self.delegate_protocol_min..=self.delegate_protocol_max)
                .contains(&self.delegate_protocol_version)
        {
            return Err(ConfigError::Invalid(
                "delegate_protocol_version outside delegate_protocol_min..=max".to_string(),
            ));
        }
        if self.udp_buffer_size < MIN_UDP_BUFFER_SIZE.max(COMPOUND_HEADER_OVERHEAD + 1) {
            return Err(ConfigError::Invalid(format!(
                "udp_buffer_size must be at least {}",
                MIN_UDP_BUFFER_SIZE
            )));
        }
        Ok(())
    }
}
