// Failure Detection - Direct, indirect and stream probes
//
// One probe per tick, round robin over a shuffled node list:
// 1. UDP ping, wait probe_timeout for an ack
// 2. ask indirect_checks helpers to ping on our behalf, and in parallel
//    try a ping over a stream, until the probe interval runs out
// 3. still nothing: suspect the node
// The awareness score moves with each outcome so an overloaded member
// slows its own probing down.

use crate::memberlist::{Memberlist, MemberlistError};
use crate::protocol::{
    make_compound_messages, read_frame, write_frame, Ack, IndirectPing, Message, Nack, Ping,
    ProtocolError, Suspect,
};
use crate::state::scaling::k_random_nodes;
use crate::state::{AckOutcome, NodeState, NodeStateType};
use crate::transport::TransportError;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

impl Memberlist {
    /// Probe the next eligible node in the round robin
    pub(crate) async fn probe(&self) {
        let target = {
            let mut table = self.nodes.lock();
            let mut num_check = 0;
            loop {
                if num_check >= table.len() {
                    return;
                }

                // End of the list: reap the long-dead and reshuffle
                if table.probe_index >= table.len() {
                    let reaped = table
                        .reap_and_shuffle(self.config.gossip_to_the_dead_time(), &self.config.name);
                    if !reaped.is_empty() {
                        debug!(count = reaped.len(), "reaped dead nodes");
                    }
                    self.num_nodes.store(table.len(), Ordering::Relaxed);
                    table.probe_index = 0;
                    num_check += 1;
                    continue;
                }

                let idx = table.probe_index;
                table.probe_index += 1;
                num_check += 1;

                let candidate = &table.nodes[idx];
                if candidate.name() == self.config.name || candidate.dead_or_left() {
                    continue;
                }
                break candidate.clone();
            }
        };

        self.probe_node(target).await;
    }

    async fn probe_node(&self, target: NodeState) {
        let probe_interval = self.awareness.scale_timeout(self.config.probe_interval());
        let seq_no = self.next_seq_no();
        let ping = Ping {
            seq_no,
            node: target.name().to_string(),
            source_addr: Some(self.advertise_addr),
            source_node: self.config.name.clone(),
        };
        let mut waiter = self.acks.register(seq_no, probe_interval);

        let sent = Instant::now();
        let deadline = sent + probe_interval;

        match self.send_probe(&target, &ping).await {
            Ok(()) => match waiter.wait_until(sent + self.config.probe_timeout()).await {
                AckOutcome::Acked { payload, timestamp } => {
                    if let Some(ping_delegate) = &self.delegates.ping {
                        let rtt = timestamp.saturating_duration_since(sent);
                        ping_delegate.notify_ping_complete(&target.to_node(), rtt, &payload);
                    }
                    self.awareness.apply_delta(-1);
                    return;
                }
                AckOutcome::Closed if !self.scheduler.is_running() => return,
                _ => {}
            },
            Err(MemberlistError::Transport(TransportError::Shutdown)) => return,
            Err(e) => {
                warn!(node = %target.name(), error = %e, "failed to send ping");
            }
        }

        // Direct probe failed, bring in helpers
        let helpers: Vec<(SocketAddr, bool)> = {
            let table = self.nodes.lock();
            k_random_nodes(self.config.indirect_checks, &table.nodes, |node| {
                node.name() == self.config.name
                    || node.name() == target.name()
                    || node.state() != NodeStateType::Alive
            })
            .into_iter()
            .map(|node| (node.addr(), node.vsn().supports_nack()))
            .collect()
        };

        let mut expected_nacks: usize = 0;
        for (helper, nack) in &helpers {
            if *nack {
                expected_nacks += 1;
            }
            let ind = IndirectPing {
                seq_no,
                target: target.addr(),
                node: target.name().to_string(),
                nack: *nack,
                source_addr: Some(self.advertise_addr),
                source_node: self.config.name.clone(),
            };
            if let Err(e) = self.encode_and_send_msg(*helper, Message::IndirectPing(ind)).await {
                debug!(%helper, error = %e, "failed to send indirect ping");
            }
        }

        let use_stream = !self.config.disable_tcp_pings && target.vsn().pmax() >= 3;
        let fallback = async {
            if !use_stream {
                return false;
            }
            match self.ping_over_stream(target.addr(), &ping, deadline).await {
                Ok(contacted) => contacted,
                Err(e) => {
                    debug!(node = %target.name(), error = %e, "stream ping failed");
                    false
                }
            }
        };
        let (outcome, contacted) = tokio::join!(waiter.wait_until(deadline), fallback);

        if outcome.is_acked() {
            self.awareness.apply_delta(-1);
            return;
        }
        if contacted {
            warn!(
                node = %target.name(),
                "reached node over a stream but not over UDP, network may be misconfigured"
            );
            self.awareness.apply_delta(-1);
            return;
        }

        // Missing nacks point at us rather than the target
        let nacks = waiter.nacks();
        let delta = if expected_nacks > 0 {
            expected_nacks.saturating_sub(nacks) as isize
        } else {
            1
        };
        self.awareness.apply_delta(delta);

        info!(node = %target.name(), nacks, "suspect node has failed, no acks received");
        self.suspect_node(Suspect {
            incarnation: target.incarnation(),
            node: target.name().to_string(),
            from: self.config.name.clone(),
        });
    }

    /// Alive targets get a plain ping with gossip piggy-backed; anyone
    /// else also gets told they're suspected so they can refute
    async fn send_probe(&self, target: &NodeState, ping: &Ping) -> Result<(), MemberlistError> {
        if target.state() == NodeStateType::Alive {
            return self
                .encode_and_send_msg(target.addr(), Message::Ping(ping.clone()))
                .await;
        }

        let suspect = Suspect {
            incarnation: target.incarnation(),
            node: target.name().to_string(),
            from: self.config.name.clone(),
        };
        let parts = vec![
            Message::Ping(ping.clone()).encode()?,
            Message::Suspect(suspect).encode()?,
        ];
        for packet in make_compound_messages(parts)? {
            self.raw_send(target.addr(), &packet).await?;
        }
        Ok(())
    }

    /// Ping over a reliable stream. `Ok(true)` means the node answered.
    pub(crate) async fn ping_over_stream(
        &self,
        addr: SocketAddr,
        ping: &Ping,
        deadline: Instant,
    ) -> Result<bool, MemberlistError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut stream = self.transport.dial(addr, remaining).await?;

        let exchange = async {
            write_frame(&mut stream, &Message::Ping(ping.clone())).await?;
            read_frame(&mut stream).await
        };
        let reply = tokio::time::timeout_at(deadline, exchange)
            .await
            .map_err(|_| MemberlistError::Timeout)??;

        match reply {
            Message::Ack(ack) if ack.seq_no == ping.seq_no => Ok(true),
            Message::Ack(ack) => {
                warn!(
                    expected = ping.seq_no,
                    got = ack.seq_no,
                    "mismatched sequence number on stream ping"
                );
                Ok(false)
            }
            other => Err(ProtocolError::Unexpected(other.kind()).into()),
        }
    }

    /// Ping `ind.target` for a peer that could not reach it, and report
    /// back with an ack or, if asked for, a nack
    pub(crate) async fn relay_indirect_ping(self: Arc<Self>, ind: IndirectPing, from: SocketAddr) {
        let seq_no = self.next_seq_no();
        let ping = Ping {
            seq_no,
            node: ind.node.clone(),
            source_addr: Some(self.advertise_addr),
            source_node: self.config.name.clone(),
        };
        let probe_timeout = self.config.probe_timeout();
        let mut waiter = self.acks.register(seq_no, probe_timeout);
        let reply_to = ind.source_addr.unwrap_or(from);

        if let Err(e) = self.encode_and_send_msg(ind.target, Message::Ping(ping)).await {
            debug!(addr = %ind.target, error = %e, "failed to relay ping");
        }

        let outcome = waiter.wait_until(Instant::now() + probe_timeout).await;
        let reply = if outcome.is_acked() {
            Message::Ack(Ack {
                seq_no: ind.seq_no,
                payload: Vec::new(),
            })
        } else if ind.nack {
            Message::Nack(Nack { seq_no: ind.seq_no })
        } else {
            return;
        };

        if let Err(e) = self.encode_and_send_msg(reply_to, reply).await {
            debug!(%reply_to, error = %e, "failed to answer indirect ping");
        }
    }
}
