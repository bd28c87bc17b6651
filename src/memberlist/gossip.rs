// Dissemination - Gossip ticks, push/pull anti-entropy and packet sends
//
// Gossip spreads queued broadcasts to a few random peers each tick.
// Push/pull swaps full state with one peer over a stream so anything
// gossip missed still converges. Every outgoing packet tops itself up
// with pending broadcasts before it leaves.

use crate::memberlist::{Memberlist, MemberlistError};
use crate::protocol::{
    make_compound_messages, pack_packet, read_frame, write_frame, Message, ProtocolError,
    PushNodeState, PushPull, COMPOUND_HEADER_OVERHEAD, COMPOUND_OVERHEAD, USER_MSG_OVERHEAD,
};
use crate::state::scaling::k_random_nodes;
use crate::state::{Node, NodeStateType};
use std::net::SocketAddr;
use tracing::{debug, warn};

impl Memberlist {
    // ========================================================================
    // GOSSIP
    // ========================================================================

    /// Send pending broadcasts to `gossip_nodes` random peers. Dead peers
    /// are included for a while so they learn about their own death.
    pub(crate) async fn gossip(&self) {
        if self.config.broadcast_queue_limit > 0 {
            self.broadcasts.prune(self.config.broadcast_queue_limit);
        }

        let targets: Vec<(String, SocketAddr)> = {
            let table = self.nodes.lock();
            let gossip_to_the_dead = self.config.gossip_to_the_dead_time();
            k_random_nodes(self.config.gossip_nodes, &table.nodes, |node| {
                if node.name() == self.config.name {
                    return true;
                }
                match node.state() {
                    NodeStateType::Alive | NodeStateType::Suspect => false,
                    NodeStateType::Dead => node.state_change().elapsed() > gossip_to_the_dead,
                    NodeStateType::Left => true,
                }
            })
            .into_iter()
            .map(|node| (node.name().to_string(), node.addr()))
            .collect()
        };

        let bytes_avail = self
            .config
            .udp_buffer_size
            .saturating_sub(COMPOUND_HEADER_OVERHEAD);

        for (name, addr) in targets {
            let msgs = self.get_broadcasts(COMPOUND_OVERHEAD, bytes_avail);
            if msgs.is_empty() {
                return;
            }

            let packets = match pack_packet(msgs) {
                Ok(packets) => packets,
                Err(e) => {
                    warn!(error = %e, "failed to pack gossip");
                    return;
                }
            };
            for packet in packets {
                if let Err(e) = self.raw_send(addr, &packet).await {
                    debug!(node = %name, %addr, error = %e, "failed to gossip");
                }
            }
        }
    }

    /// Membership broadcasts first, then whatever room is left goes to
    /// the delegate's own broadcasts wrapped as user messages
    pub(crate) fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
        let mut msgs = self.broadcasts.get_broadcasts(overhead, limit);

        let Some(delegate) = &self.delegates.delegate else {
            return msgs;
        };

        let used: usize = msgs.iter().map(|msg| msg.len() + overhead).sum();
        let avail = limit.saturating_sub(used);
        if avail <= overhead + USER_MSG_OVERHEAD {
            return msgs;
        }

        for user in delegate.get_broadcasts(overhead + USER_MSG_OVERHEAD, avail) {
            match Message::User(user).encode() {
                Ok(buf) => msgs.push(buf),
                Err(e) => warn!(error = %e, "failed to encode delegate broadcast"),
            }
        }
        msgs
    }

    // ========================================================================
    // PUSH / PULL
    // ========================================================================

    /// Full state exchange with one random live peer
    pub(crate) async fn push_pull(&self) {
        let target = {
            let table = self.nodes.lock();
            k_random_nodes(1, &table.nodes, |node| {
                node.name() == self.config.name || node.state() != NodeStateType::Alive
            })
            .first()
            .map(|node| (node.name().to_string(), node.addr()))
        };
        let Some((name, addr)) = target else {
            return;
        };

        if let Err(e) = self.push_pull_node(addr, false).await {
            warn!(node = %name, %addr, error = %e, "push/pull failed");
        }
    }

    pub(crate) async fn push_pull_node(
        &self,
        addr: SocketAddr,
        join: bool,
    ) -> Result<(), MemberlistError> {
        let remote = self.send_and_receive_state(addr, join).await?;
        self.merge_remote_state(join, &remote.nodes, &remote.user_state)
    }

    async fn send_and_receive_state(
        &self,
        addr: SocketAddr,
        join: bool,
    ) -> Result<PushPull, MemberlistError> {
        let tcp_timeout = self.config.tcp_timeout();
        let mut stream = self.transport.dial(addr, tcp_timeout).await?;

        let request = Message::PushPull(self.local_state(join));
        let exchange = async {
            write_frame(&mut stream, &request).await?;
            read_frame(&mut stream).await
        };
        let response = tokio::time::timeout(tcp_timeout, exchange)
            .await
            .map_err(|_| MemberlistError::Timeout)??;

        match response {
            Message::PushPull(remote) => Ok(remote),
            Message::Error(e) => Err(MemberlistError::Remote(e.error)),
            other => Err(ProtocolError::Unexpected(other.kind()).into()),
        }
    }

    /// Snapshot of every node we know, dead ones included, plus the
    /// delegate's state
    pub(crate) fn local_state(&self, join: bool) -> PushPull {
        let nodes = self
            .nodes
            .lock()
            .nodes
            .iter()
            .map(PushNodeState::from)
            .collect();
        let user_state = self
            .delegates
            .delegate
            .as_ref()
            .map(|delegate| delegate.local_state(join))
            .unwrap_or_default();

        PushPull {
            join,
            nodes,
            user_state,
        }
    }

    pub(crate) fn merge_remote_state(
        &self,
        join: bool,
        remote: &[PushNodeState],
        user_state: &[u8],
    ) -> Result<(), MemberlistError> {
        self.verify_protocol(remote)?;

        if join {
            if let Some(merge) = &self.delegates.merge {
                let peers: Vec<Node> = remote
                    .iter()
                    .map(|entry| Node {
                        name: entry.name.clone(),
                        addr: entry.addr,
                        meta: entry.meta.clone(),
                        state: entry.state,
                        vsn: entry.vsn,
                    })
                    .collect();
                merge
                    .notify_merge(&peers)
                    .map_err(MemberlistError::MergeRejected)?;
            }
        }

        self.merge_state(remote);

        if !user_state.is_empty() {
            if let Some(delegate) = &self.delegates.delegate {
                delegate.merge_remote_state(user_state, join);
            }
        }
        Ok(())
    }

    // ========================================================================
    // SENDING
    // ========================================================================

    pub(crate) async fn encode_and_send_msg(
        &self,
        addr: SocketAddr,
        msg: Message,
    ) -> Result<(), MemberlistError> {
        let buf = msg.encode()?;
        self.send_msg(addr, buf).await
    }

    /// Send an encoded message, piggy-backing broadcasts that still fit
    pub(crate) async fn send_msg(&self, addr: SocketAddr, msg: Vec<u8>) -> Result<(), MemberlistError> {
        let bytes_avail = self
            .config
            .udp_buffer_size
            .saturating_sub(msg.len() + COMPOUND_HEADER_OVERHEAD + COMPOUND_OVERHEAD);

        let extra = self.get_broadcasts(COMPOUND_OVERHEAD, bytes_avail);
        if extra.is_empty() {
            return self.raw_send(addr, &msg).await;
        }

        let mut msgs = Vec::with_capacity(extra.len() + 1);
        msgs.push(msg);
        msgs.extend(extra);
        for packet in make_compound_messages(msgs)? {
            self.raw_send(addr, &packet).await?;
        }
        Ok(())
    }

    pub(crate) async fn raw_send(&self, addr: SocketAddr, buf: &[u8]) -> Result<(), MemberlistError> {
        self.transport.write_to(buf, addr).await?;
        Ok(())
    }
}
