// Memberlist Engine - One member of a gossip cluster
//
// Owns the node table, the broadcast queue, ack records and the background
// tasks, and exposes the public surface: join, leave, members, send
// helpers and shutdown. Probe, gossip, state transitions and network
// handlers live in sibling modules as further `impl Memberlist` blocks.

use crate::broadcast::{MemberlistBroadcast, TransmitLimitedQueue};
use crate::config::MemberlistConfig;
use crate::delegate::{Delegates, NodeEvent, NodeEventKind};
use crate::health::Awareness;
use crate::memberlist::scheduler::{random_stagger, Scheduler};
use crate::memberlist::state::{NodeTable, StateCommand};
use crate::memberlist::MemberlistError;
use crate::protocol::{write_frame, Alive, Dead, Message};
use crate::state::{push_pull_scale, AckRegistry, Node, ProtocolVersions};
use crate::transport::{IncomingStream, Packet, Transport, TransportError};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Largest metadata a node may advertise
pub const META_MAX_SIZE: usize = 512;

/// Concurrent inbound push/pull exchanges we serve
pub const MAX_PUSH_PULL_REQUESTS: usize = 128;

/// A running cluster member
pub struct Memberlist {
    pub(crate) config: MemberlistConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) delegates: Delegates,
    pub(crate) advertise_addr: SocketAddr,

    pub(crate) seq_no: AtomicU32,
    pub(crate) incarnation: AtomicU32,
    pub(crate) num_nodes: Arc<AtomicUsize>,
    pub(crate) push_pull_req: AtomicUsize,
    pub(crate) leaving: AtomicBool,

    pub(crate) nodes: Mutex<NodeTable>,
    pub(crate) awareness: Awareness,
    pub(crate) broadcasts: TransmitLimitedQueue,
    pub(crate) acks: AckRegistry,
    pub(crate) scheduler: Scheduler,

    pub(crate) state_tx: mpsc::Sender<StateCommand>,
    pub(crate) event_tx: mpsc::UnboundedSender<NodeEvent>,
}

impl Memberlist {
    /// Validate `config`, announce ourselves as alive and start the probe,
    /// gossip and push/pull loops on `transport`
    pub async fn create(
        config: MemberlistConfig,
        transport: Arc<dyn Transport>,
        delegates: Delegates,
    ) -> Result<Arc<Self>, MemberlistError> {
        config.validate()?;
        let awareness = Awareness::new(config.awareness_max_multiplier)?;

        let packet_rx = transport.packet_rx().ok_or(TransportError::ReceiverTaken)?;
        let stream_rx = transport.stream_rx().ok_or(TransportError::ReceiverTaken)?;
        let advertise_addr = config
            .advertise_addr
            .unwrap_or_else(|| transport.advertise_addr());

        let num_nodes = Arc::new(AtomicUsize::new(0));
        let queue_nodes = num_nodes.clone();
        let broadcasts = TransmitLimitedQueue::new(
            config.retransmit_mult,
            Arc::new(move || queue_nodes.load(Ordering::Relaxed)),
        );

        let (state_tx, state_rx) = mpsc::channel(config.handoff_queue_depth);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let memberlist = Arc::new(Self {
            config,
            transport,
            delegates,
            advertise_addr,
            seq_no: AtomicU32::new(0),
            incarnation: AtomicU32::new(0),
            num_nodes,
            push_pull_req: AtomicUsize::new(0),
            leaving: AtomicBool::new(false),
            nodes: Mutex::new(NodeTable::default()),
            awareness,
            broadcasts,
            acks: AckRegistry::new(),
            scheduler: Scheduler::new(),
            state_tx,
            event_tx,
        });

        memberlist.set_alive()?;
        memberlist.schedule(packet_rx, stream_rx, state_rx, event_rx)?;

        info!(
            node = %memberlist.config.name,
            addr = %memberlist.advertise_addr,
            "memberlist started"
        );
        Ok(memberlist)
    }

    fn set_alive(&self) -> Result<(), MemberlistError> {
        let alive = Alive {
            incarnation: self.next_incarnation(),
            node: self.config.name.clone(),
            addr: self.advertise_addr,
            meta: self.node_meta()?,
            vsn: self.local_vsn(),
        };
        self.alive_node(alive, None, true);
        Ok(())
    }

    fn schedule(
        self: &Arc<Self>,
        packet_rx: mpsc::Receiver<Packet>,
        stream_rx: mpsc::Receiver<IncomingStream>,
        state_rx: mpsc::Receiver<StateCommand>,
        event_rx: mpsc::UnboundedReceiver<NodeEvent>,
    ) -> Result<(), MemberlistError> {
        self.scheduler.start()?;

        let shutdown = self.scheduler.subscribe();
        self.scheduler
            .spawn(self.clone().packet_listen(packet_rx, shutdown.clone()));
        self.scheduler
            .spawn(self.clone().stream_listen(stream_rx, shutdown.clone()));
        self.scheduler
            .spawn(self.clone().state_listen(state_rx, shutdown.clone()));
        self.scheduler.spawn(self.clone().event_listen(event_rx, shutdown));

        // A degraded node backs off its own probing
        let probe_interval = self.config.probe_interval();
        let pacing = self.clone();
        let memberlist = self.clone();
        self.scheduler.spawn_periodic(
            "probe",
            random_stagger(probe_interval),
            move || pacing.awareness.scale_timeout(probe_interval),
            move || {
                let memberlist = memberlist.clone();
                async move { memberlist.probe().await }
            },
        );

        let push_pull_interval = self.config.push_pull_interval();
        if !push_pull_interval.is_zero() {
            let sizing = self.clone();
            let memberlist = self.clone();
            self.scheduler.spawn_periodic(
                "push-pull",
                random_stagger(push_pull_interval),
                move || push_pull_scale(push_pull_interval, sizing.est_num_nodes()),
                move || {
                    let memberlist = memberlist.clone();
                    async move { memberlist.push_pull().await }
                },
            );
        }

        let gossip_interval = self.config.gossip_interval();
        if !gossip_interval.is_zero() && self.config.gossip_nodes > 0 {
            let memberlist = self.clone();
            self.scheduler.spawn_periodic(
                "gossip",
                random_stagger(gossip_interval),
                move || gossip_interval,
                move || {
                    let memberlist = memberlist.clone();
                    async move { memberlist.gossip().await }
                },
            );
        }

        Ok(())
    }

    // ========================================================================
    // PUBLIC API
    // ========================================================================

    /// Push/pull with each seed. Returns how many seeds were reached; fails
    /// only if none were.
    pub async fn join(&self, seeds: &[SocketAddr]) -> Result<usize, MemberlistError> {
        self.ensure_running()?;

        let mut joined = 0;
        let mut errors = Vec::new();
        for seed in seeds {
            match self.push_pull_node(*seed, true).await {
                Ok(()) => joined += 1,
                Err(e) => {
                    debug!(%seed, error = %e, "failed to join");
                    errors.push(format!("{}: {}", seed, e));
                }
            }
        }

        if joined == 0 && !seeds.is_empty() {
            return Err(MemberlistError::JoinFailed(errors.join("; ")));
        }
        Ok(joined)
    }

    /// Announce that we are leaving and wait for the announcement to go out.
    /// A zero `timeout` waits indefinitely. The instance keeps running until
    /// `shutdown`.
    pub async fn leave(&self, timeout: Duration) -> Result<(), MemberlistError> {
        self.ensure_running()?;
        if self.leaving.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let incarnation = self
            .nodes
            .lock()
            .get(&self.config.name)
            .map(|state| state.incarnation());
        let Some(incarnation) = incarnation else {
            warn!("leave but we're not in the node map");
            return Ok(());
        };

        // node == from marks a voluntary departure
        let dead = Dead {
            incarnation,
            node: self.config.name.clone(),
            from: self.config.name.clone(),
        };
        let (notify_tx, notify_rx) = oneshot::channel();
        self.dead_node(dead, Some(notify_tx));

        if self.any_alive() {
            wait_for_broadcast(notify_rx, timeout)
                .await
                .map_err(|_| MemberlistError::LeaveTimeout)?;
        }
        info!(node = %self.config.name, "left the cluster");
        Ok(())
    }

    /// Re-read delegate metadata and broadcast it with a new incarnation
    pub async fn update_node(&self, timeout: Duration) -> Result<(), MemberlistError> {
        self.ensure_running()?;

        let alive = Alive {
            incarnation: self.next_incarnation(),
            node: self.config.name.clone(),
            addr: self.advertise_addr,
            meta: self.node_meta()?,
            vsn: self.local_vsn(),
        };
        let (notify_tx, notify_rx) = oneshot::channel();
        self.alive_node(alive, Some(notify_tx), true);

        if self.any_alive() {
            wait_for_broadcast(notify_rx, timeout)
                .await
                .map_err(|_| MemberlistError::UpdateTimeout)?;
        }
        Ok(())
    }

    /// Stop all background work and close the transport. Pending probes
    /// observe a closed ack record. Idempotent.
    pub async fn shutdown(&self) -> Result<(), MemberlistError> {
        if !self.scheduler.shutdown().await {
            return Ok(());
        }

        if let Err(e) = self.transport.shutdown().await {
            warn!(error = %e, "failed to shut down transport");
        }
        self.acks.clear();
        self.nodes.lock().timers.clear();

        info!(node = %self.config.name, "memberlist shut down");
        Ok(())
    }

    /// Members not known to be dead or gone
    pub fn members(&self) -> Vec<Node> {
        self.nodes
            .lock()
            .nodes
            .iter()
            .filter(|state| !state.dead_or_left())
            .map(|state| state.to_node())
            .collect()
    }

    pub fn num_members(&self) -> usize {
        self.nodes
            .lock()
            .nodes
            .iter()
            .filter(|state| !state.dead_or_left())
            .count()
    }

    /// Our own entry
    pub fn local_node(&self) -> Option<Node> {
        self.nodes
            .lock()
            .get(&self.config.name)
            .map(|state| state.to_node())
    }

    /// Current awareness score; 0 is healthy
    pub fn health_score(&self) -> usize {
        self.awareness.score()
    }

    /// Size of the node table, dead entries included until reaped
    pub fn est_num_nodes(&self) -> usize {
        self.num_nodes.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &MemberlistConfig {
        &self.config
    }

    pub fn advertise_addr(&self) -> SocketAddr {
        self.advertise_addr
    }

    /// Membership broadcasts waiting to be gossiped
    pub fn num_queued_broadcasts(&self) -> usize {
        self.broadcasts.num_queued()
    }

    /// Send a user message in a single packet, without piggy-backing
    pub async fn send_to(&self, addr: SocketAddr, msg: &[u8]) -> Result<(), MemberlistError> {
        let buf = Message::User(msg.to_vec()).encode()?;
        self.raw_send(addr, &buf).await
    }

    /// Send a user message over UDP with gossip piggy-backed
    pub async fn send_best_effort(&self, node: &Node, msg: &[u8]) -> Result<(), MemberlistError> {
        let buf = Message::User(msg.to_vec()).encode()?;
        self.send_msg(node.addr, buf).await
    }

    /// Send a user message over a reliable stream
    pub async fn send_reliable(&self, node: &Node, msg: &[u8]) -> Result<(), MemberlistError> {
        let tcp_timeout = self.config.tcp_timeout();
        let mut stream = self.transport.dial(node.addr, tcp_timeout).await?;
        tokio::time::timeout(
            tcp_timeout,
            write_frame(&mut stream, &Message::User(msg.to_vec())),
        )
        .await
        .map_err(|_| MemberlistError::Timeout)??;
        Ok(())
    }

    // ========================================================================
    // INTERNAL HELPERS
    // ========================================================================

    pub(crate) fn ensure_running(&self) -> Result<(), MemberlistError> {
        if !self.scheduler.is_running() {
            return Err(MemberlistError::Shutdown);
        }
        Ok(())
    }

    pub(crate) fn next_seq_no(&self) -> u32 {
        self.seq_no.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub(crate) fn next_incarnation(&self) -> u32 {
        self.incarnation.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Jump the incarnation forward by `offset`
    pub(crate) fn skip_incarnation(&self, offset: u32) -> u32 {
        self.incarnation
            .fetch_add(offset, Ordering::AcqRel)
            .wrapping_add(offset)
    }

    pub(crate) fn has_left(&self) -> bool {
        self.leaving.load(Ordering::Acquire)
    }

    pub(crate) fn local_vsn(&self) -> ProtocolVersions {
        ProtocolVersions::new(
            self.config.protocol_version,
            self.config.delegate_protocol_min,
            self.config.delegate_protocol_max,
            self.config.delegate_protocol_version,
        )
    }

    fn node_meta(&self) -> Result<Vec<u8>, MemberlistError> {
        let Some(delegate) = &self.delegates.delegate else {
            return Ok(Vec::new());
        };

        let meta = delegate.node_meta(META_MAX_SIZE);
        if meta.len() > META_MAX_SIZE {
            return Err(MemberlistError::MetaTooLarge {
                size: meta.len(),
                max: META_MAX_SIZE,
            });
        }
        Ok(meta)
    }

    /// Whether any other member is still reachable
    pub(crate) fn any_alive(&self) -> bool {
        self.nodes
            .lock()
            .nodes
            .iter()
            .any(|state| !state.dead_or_left() && state.name() != self.config.name)
    }

    /// Encode `msg` and queue it for gossip, superseding older news about
    /// the same node
    pub(crate) fn encode_and_broadcast(
        &self,
        node: &str,
        msg: Message,
        notify: Option<oneshot::Sender<()>>,
    ) {
        let buf = match msg.encode() {
            Ok(buf) => buf,
            Err(e) => {
                warn!(node, kind = msg.kind(), error = %e, "failed to encode broadcast");
                return;
            }
        };

        let broadcast = MemberlistBroadcast::new(node, buf);
        let broadcast = match notify {
            Some(notify) => broadcast.with_notify(notify),
            None => broadcast,
        };
        self.broadcasts.queue_broadcast(broadcast);
    }

    /// Hand a membership event to the event task
    pub(crate) fn emit(&self, kind: NodeEventKind, node: Node) {
        let _ = self.event_tx.send(NodeEvent { kind, node });
    }
}

/// Wait for a broadcast's notify; zero waits forever. A dropped sender
/// means the broadcast was superseded, which also counts as done.
async fn wait_for_broadcast(
    notify: oneshot::Receiver<()>,
    timeout: Duration,
) -> Result<(), tokio::time::error::Elapsed> {
    if timeout.is_zero() {
        let _ = notify.await;
        return Ok(());
    }
    tokio::time::timeout(timeout, notify).await.map(|_| ())
}
