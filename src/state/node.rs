// Node State - Our view of every member of the cluster
//
// `NodeState` is the mutable entry owned by the node table; `Node` is the
// immutable snapshot handed to delegates and callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use tokio::time::Instant;

/// Lowest membership protocol version we can speak
pub const PROTOCOL_VERSION_MIN: u8 = 1;

/// Highest membership protocol version we can speak
pub const PROTOCOL_VERSION_MAX: u8 = 5;

/// First protocol version that understands nack replies to indirect pings
pub const NACK_PROTOCOL_VERSION: u8 = 4;

/// Liveness state of a member
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStateType {
    Alive,
    Suspect,
    Dead,
    Left,
}

impl NodeStateType {
    /// Short lowercase label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Suspect => "suspect",
            Self::Dead => "dead",
            Self::Left => "left",
        }
    }
}

impl fmt::Display for NodeStateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol and delegate version ranges advertised by a node:
/// `[pmin, pmax, pcur, dmin, dmax, dcur]`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersions(pub [u8; 6]);

impl Default for ProtocolVersions {
    fn default() -> Self {
        Self([
            PROTOCOL_VERSION_MIN,
            PROTOCOL_VERSION_MAX,
            PROTOCOL_VERSION_MAX,
            0,
            0,
            0,
        ])
    }
}

impl ProtocolVersions {
    pub fn new(pcur: u8, dmin: u8, dmax: u8, dcur: u8) -> Self {
        Self([PROTOCOL_VERSION_MIN, PROTOCOL_VERSION_MAX, pcur, dmin, dmax, dcur])
    }

    pub fn pmin(&self) -> u8 {
        self.0[0]
    }

    pub fn pmax(&self) -> u8 {
        self.0[1]
    }

    pub fn pcur(&self) -> u8 {
        self.0[2]
    }

    pub fn dmin(&self) -> u8 {
        self.0[3]
    }

    pub fn dmax(&self) -> u8 {
        self.0[4]
    }

    pub fn dcur(&self) -> u8 {
        self.0[5]
    }

    /// Whether this node replies with a nack when an indirect probe fails
    pub fn supports_nack(&self) -> bool {
        self.pmax() >= NACK_PROTOCOL_VERSION
    }
}

// ============================================================================
// NODE SNAPSHOT
// ============================================================================

/// Immutable copy of a member, safe to hand to user code
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub addr: SocketAddr,
    pub meta: Vec<u8>,
    pub state: NodeStateType,
    pub vsn: ProtocolVersions,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.addr)
    }
}

// ============================================================================
// NODE STATE
// ============================================================================

/// Table entry tracking the last known incarnation and state of a member
#[derive(Clone, Debug)]
pub struct NodeState {
    name: String,
    addr: SocketAddr,
    meta: Vec<u8>,
    incarnation: u32,
    state: NodeStateType,
    state_change: Instant,
    vsn: ProtocolVersions,
}

impl NodeState {
    pub fn new(
        name: &str,
        addr: SocketAddr,
        meta: Vec<u8>,
        incarnation: u32,
        state: NodeStateType,
        vsn: ProtocolVersions,
    ) -> Self {
        Self {
            name: name.to_string(),
            addr,
            meta,
            incarnation,
            state,
            state_change: Instant::now(),
            vsn,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn meta(&self) -> &[u8] {
        &self.meta
    }

    pub fn incarnation(&self) -> u32 {
        self.incarnation
    }

    pub fn state(&self) -> NodeStateType {
        self.state
    }

    pub fn state_change(&self) -> Instant {
        self.state_change
    }

    pub fn vsn(&self) -> ProtocolVersions {
        self.vsn
    }

    /// True for Dead and Left
    pub fn dead_or_left(&self) -> bool {
        matches!(self.state, NodeStateType::Dead | NodeStateType::Left)
    }

    /// Move to a new state, stamping the transition time
    pub fn set_state(&mut self, state: NodeStateType) {
        self.state = state;
        self.state_change = Instant::now();
    }

    pub fn set_incarnation(&mut self, incarnation: u32) {
        self.incarnation = incarnation;
    }

    pub fn set_meta(&mut self, meta: Vec<u8>) {
        self.meta = meta;
    }

    pub fn set_addr(&mut self, addr: SocketAddr) {
        self.addr = addr;
    }

    pub fn set_vsn(&mut self, vsn: ProtocolVersions) {
        self.vsn = vsn;
    }

    /// Take an immutable snapshot for delegates
    pub fn to_node(&self) -> Node {
        Node {
            name: self.name.clone(),
            addr: self.addr,
            meta: self.meta.clone(),
            state: self.state,
            vsn: self.vsn,
        }
    }
}
