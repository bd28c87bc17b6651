// Wire Messages - Everything two members say to each other
//
// Packets carry one encoded `Message`, or a `Compound` bundling several
// already-encoded messages so probes can piggy-back gossip. Streams carry
// the same encoding inside length-prefixed frames.

use crate::protocol::ProtocolError;
use crate::state::{NodeState, NodeStateType, ProtocolVersions};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Direct liveness probe
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub seq_no: u32,
    /// Name of the node we think we are pinging
    pub node: String,
    pub source_addr: Option<SocketAddr>,
    pub source_node: String,
}

/// Ask a helper to probe `target` on our behalf
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectPing {
    pub seq_no: u32,
    pub target: SocketAddr,
    pub node: String,
    /// Reply with a nack if the relayed probe fails
    pub nack: bool,
    pub source_addr: Option<SocketAddr>,
    pub source_node: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub seq_no: u32,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nack {
    pub seq_no: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspect {
    pub incarnation: u32,
    pub node: String,
    pub from: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alive {
    pub incarnation: u32,
    pub node: String,
    pub addr: SocketAddr,
    pub meta: Vec<u8>,
    pub vsn: ProtocolVersions,
}

/// Death notice. `from == node` means the node left voluntarily.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dead {
    pub incarnation: u32,
    pub node: String,
    pub from: String,
}

/// One entry of a push/pull state snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNodeState {
    pub name: String,
    pub addr: SocketAddr,
    pub meta: Vec<u8>,
    pub incarnation: u32,
    pub state: NodeStateType,
    pub vsn: ProtocolVersions,
}

impl From<&NodeState> for PushNodeState {
    fn from(state: &NodeState) -> Self {
        Self {
            name: state.name().to_string(),
            addr: state.addr(),
            meta: state.meta().to_vec(),
            incarnation: state.incarnation(),
            state: state.state(),
            vsn: state.vsn(),
        }
    }
}

/// Full state exchange used for anti-entropy and joins
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPull {
    pub join: bool,
    pub nodes: Vec<PushNodeState>,
    pub user_state: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Every message on the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Ping(Ping),
    IndirectPing(IndirectPing),
    Ack(Ack),
    Nack(Nack),
    Suspect(Suspect),
    Alive(Alive),
    Dead(Dead),
    PushPull(PushPull),
    Compound(Vec<Vec<u8>>),
    User(Vec<u8>),
    Error(ErrorResponse),
}

impl Message {
    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Ping(_) => "ping",
            Message::IndirectPing(_) => "indirect-ping",
            Message::Ack(_) => "ack",
            Message::Nack(_) => "nack",
            Message::Suspect(_) => "suspect",
            Message::Alive(_) => "alive",
            Message::Dead(_) => "dead",
            Message::PushPull(_) => "push-pull",
            Message::Compound(_) => "compound",
            Message::User(_) => "user",
            Message::Error(_) => "error",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        postcard::to_allocvec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.is_empty() {
            return Err(ProtocolError::Decode("empty message".to_string()));
        }
        postcard::from_bytes(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

macro_rules! impl_from_payload {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Message {
                fn from(msg: $variant) -> Self {
                    Message::$variant(msg)
                }
            }
        )*
    };
}

impl_from_payload!(Ping, IndirectPing, Ack, Nack, Suspect, Alive, Dead, PushPull);
