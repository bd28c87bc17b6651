// Network Handlers - Inbound packets, streams, state changes and events
//
// Packets are handled inline except for relayed pings, which wait on
// their own scheduler task, as do inbound streams. Membership messages are handed to a single state task
// through a bounded queue; when it is full they are dropped and gossip
// retries them.

use crate::delegate::{NodeEvent, NodeEventKind};
use crate::memberlist::state::StateCommand;
use crate::memberlist::{Memberlist, MemberlistError, MAX_PUSH_PULL_REQUESTS};
use crate::protocol::{read_frame, write_frame, Ack, ErrorResponse, Message, Ping, PushPull};
use crate::transport::{BoxStream, IncomingStream, Packet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Holds one inbound push/pull slot until dropped
struct PushPullSlot<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> PushPullSlot<'a> {
    /// Returns None when every slot is taken
    fn acquire(counter: &'a AtomicUsize) -> Option<Self> {
        let slot = Self { counter };
        if counter.fetch_add(1, Ordering::AcqRel) >= MAX_PUSH_PULL_REQUESTS {
            return None;
        }
        Some(slot)
    }
}

impl Drop for PushPullSlot<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Memberlist {
    // ========================================================================
    // PACKETS
    // ========================================================================

    pub(crate) async fn packet_listen(
        self: Arc<Self>,
        mut packets: mpsc::Receiver<Packet>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                packet = packets.recv() => match packet {
                    Some(packet) => self.handle_packet(packet).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        trace!("packet listener stopped");
    }

    async fn handle_packet(self: &Arc<Self>, packet: Packet) {
        let msg = match Message::decode(&packet.buf) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(from = %packet.from, error = %e, "failed to decode packet");
                return;
            }
        };

        let Message::Compound(parts) = msg else {
            self.handle_message(msg, packet.from, packet.timestamp).await;
            return;
        };

        for part in parts {
            match Message::decode(&part) {
                Ok(Message::Compound(_)) => {
                    warn!(from = %packet.from, "nested compound message dropped");
                }
                Ok(msg) => self.handle_message(msg, packet.from, packet.timestamp).await,
                Err(e) => {
                    warn!(from = %packet.from, error = %e, "failed to decode compound part");
                }
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, msg: Message, from: SocketAddr, timestamp: Instant) {
        match msg {
            Message::Ping(ping) => self.handle_ping(ping, from).await,
            Message::IndirectPing(ind) => {
                self.scheduler
                    .spawn(self.clone().relay_indirect_ping(ind, from));
            }
            Message::Ack(ack) => {
                if !self.acks.invoke_ack(ack.seq_no, ack.payload, timestamp) {
                    trace!(seq_no = ack.seq_no, %from, "ack for unknown sequence number");
                }
            }
            Message::Nack(nack) => {
                self.acks.invoke_nack(nack.seq_no);
            }
            Message::Alive(alive) => self.hand_off(StateCommand::Alive(alive), from),
            Message::Suspect(suspect) => self.hand_off(StateCommand::Suspect(suspect), from),
            Message::Dead(dead) => self.hand_off(StateCommand::Dead(dead), from),
            Message::User(buf) => {
                if let Some(delegate) = &self.delegates.delegate {
                    delegate.notify_msg(&buf);
                }
            }
            other => {
                warn!(kind = other.kind(), %from, "unexpected message over UDP");
            }
        }
    }

    async fn handle_ping(&self, ping: Ping, from: SocketAddr) {
        // A ping meant for a previous owner of this address
        if !ping.node.is_empty() && ping.node != self.config.name {
            warn!(
                expected = %self.config.name,
                got = %ping.node,
                %from,
                "ping for unexpected node"
            );
            return;
        }

        let ack = Ack {
            seq_no: ping.seq_no,
            payload: self.ack_payload(),
        };
        let reply_to = ping.source_addr.unwrap_or(from);
        if let Err(e) = self.encode_and_send_msg(reply_to, Message::Ack(ack)).await {
            debug!(%reply_to, error = %e, "failed to send ack");
        }
    }

    fn ack_payload(&self) -> Vec<u8> {
        self.delegates
            .ping
            .as_ref()
            .map(|ping| ping.ack_payload())
            .unwrap_or_default()
    }

    fn hand_off(&self, command: StateCommand, from: SocketAddr) {
        match self.state_tx.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                warn!(%from, ?command, "handoff queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    // ========================================================================
    // STREAMS
    // ========================================================================

    pub(crate) async fn stream_listen(
        self: Arc<Self>,
        mut streams: mpsc::Receiver<IncomingStream>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                incoming = streams.recv() => match incoming {
                    Some(incoming) => {
                        self.scheduler.spawn(self.clone().handle_stream(incoming));
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        trace!("stream listener stopped");
    }

    async fn handle_stream(self: Arc<Self>, incoming: IncomingStream) {
        let IncomingStream { mut stream, remote } = incoming;
        let tcp_timeout = self.config.tcp_timeout();

        let msg = match tokio::time::timeout(tcp_timeout, read_frame(&mut stream)).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => {
                debug!(%remote, error = %e, "failed to read stream");
                return;
            }
            Err(_) => {
                debug!(%remote, "timed out reading stream");
                return;
            }
        };

        let result = match msg {
            Message::User(buf) => {
                if let Some(delegate) = &self.delegates.delegate {
                    delegate.notify_msg(&buf);
                }
                Ok(())
            }
            Message::Ping(ping) => {
                if !ping.node.is_empty() && ping.node != self.config.name {
                    warn!(got = %ping.node, %remote, "stream ping for unexpected node");
                    return;
                }
                let ack = Ack {
                    seq_no: ping.seq_no,
                    payload: self.ack_payload(),
                };
                self.reply(&mut stream, Message::Ack(ack)).await
            }
            Message::PushPull(remote_state) => {
                self.serve_push_pull(&mut stream, remote, remote_state).await
            }
            other => {
                warn!(kind = other.kind(), %remote, "unexpected message over stream");
                let error = ErrorResponse {
                    error: format!("unexpected message: {}", other.kind()),
                };
                self.reply(&mut stream, Message::Error(error)).await
            }
        };

        if let Err(e) = result {
            debug!(%remote, error = %e, "stream exchange failed");
        }
    }

    /// Answer with our state first, then merge theirs
    async fn serve_push_pull(
        &self,
        stream: &mut BoxStream,
        remote: SocketAddr,
        remote_state: PushPull,
    ) -> Result<(), MemberlistError> {
        let Some(_slot) = PushPullSlot::acquire(&self.push_pull_req) else {
            warn!(%remote, "too many pending push/pull requests");
            let error = ErrorResponse {
                error: "too many pending push/pull requests".to_string(),
            };
            return self.reply(stream, Message::Error(error)).await;
        };

        let local = self.local_state(remote_state.join);
        self.reply(stream, Message::PushPull(local)).await?;

        self.merge_remote_state(
            remote_state.join,
            &remote_state.nodes,
            &remote_state.user_state,
        )
    }

    async fn reply(&self, stream: &mut BoxStream, msg: Message) -> Result<(), MemberlistError> {
        tokio::time::timeout(self.config.tcp_timeout(), write_frame(stream, &msg))
            .await
            .map_err(|_| MemberlistError::Timeout)??;
        Ok(())
    }

    // ========================================================================
    // STATE AND EVENTS
    // ========================================================================

    pub(crate) async fn state_listen(
        self: Arc<Self>,
        mut commands: mpsc::Receiver<StateCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.apply_command(command),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        trace!("state listener stopped");
    }

    pub(crate) async fn event_listen(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<NodeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.dispatch_event(event),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        trace!("event listener stopped");
    }

    fn dispatch_event(&self, event: NodeEvent) {
        let Some(events) = &self.delegates.events else {
            return;
        };
        match event.kind {
            NodeEventKind::Join => events.notify_join(&event.node),
            NodeEventKind::Leave => events.notify_leave(&event.node),
            NodeEventKind::Update => events.notify_update(&event.node),
        }
    }
}
