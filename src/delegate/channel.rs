// Channel Event Delegate - Membership events as a stream

use crate::delegate::EventDelegate;
use crate::state::Node;
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeEventKind {
    Join,
    Leave,
    Update,
}

impl fmt::Display for NodeEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join => write!(f, "join"),
            Self::Leave => write!(f, "leave"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// A membership change and the node snapshot it concerns
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub node: Node,
}

/// Forwards every event into an unbounded channel
pub struct ChannelEventDelegate {
    tx: mpsc::UnboundedSender<NodeEvent>,
}

impl ChannelEventDelegate {
    pub fn new(tx: mpsc::UnboundedSender<NodeEvent>) -> Self {
        Self { tx }
    }

    /// Delegate plus the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, kind: NodeEventKind, node: &Node) {
        let event = NodeEvent {
            kind,
            node: node.clone(),
        };
        if self.tx.send(event).is_err() {
            debug!(node = %node.name, %kind, "event receiver dropped");
        }
    }
}

impl EventDelegate for ChannelEventDelegate {
    fn notify_join(&self, node: &Node) {
        self.send(NodeEventKind::Join, node);
    }

    fn notify_leave(&self, node: &Node) {
        self.send(NodeEventKind::Leave, node);
    }

    fn notify_update(&self, node: &Node) {
        self.send(NodeEventKind::Update, node);
    }
}
