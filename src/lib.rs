// meshlist - Gossip membership for service meshes
//
// Every member probes a random peer each interval, asks others to
// double-check when a probe fails, and spreads what it learns by
// piggy-backing on the packets it sends anyway. Periodic full-state
// exchanges repair anything gossip missed.

//! SWIM-style cluster membership and failure detection.
//!
//! Start a [`Memberlist`] on a [`Transport`], [`join`](Memberlist::join)
//! one or more seeds, and observe membership through
//! [`members`](Memberlist::members) or an [`EventDelegate`].

pub mod broadcast;
pub mod config;
pub mod delegate;
pub mod health;
pub mod memberlist;
pub mod protocol;
pub mod state;
pub mod transport;

pub use config::MemberlistConfig;
pub use delegate::{ChannelEventDelegate, Delegates, EventDelegate, NodeEvent, NodeEventKind};
pub use memberlist::{Memberlist, MemberlistError};
pub use state::{Node, NodeStateType};
pub use transport::{MockNetwork, NetTransport, NetTransportConfig, Transport};
