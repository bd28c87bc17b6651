// State module - WHO IS IN THE CLUSTER
// Node table entries, ack correlation, and the scaling math behind timeouts

mod ack;
mod node;
pub mod scaling;

pub use ack::{AckEvent, AckOutcome, AckRegistry, AckWaiter};
pub use node::{
    Node, NodeState, NodeStateType, ProtocolVersions, NACK_PROTOCOL_VERSION,
    PROTOCOL_VERSION_MAX, PROTOCOL_VERSION_MIN,
};
pub use scaling::{push_pull_scale, retransmit_limit, suspicion_timeout};
