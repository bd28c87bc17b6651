// State Transitions - Alive, Suspect, Dead and Left
//
// Every change to the node table goes through here. Rules:
// - a higher incarnation always wins for the same node
// - reports that we are suspect or dead are refuted by bumping our own
//   incarnation past the accusation
// - a suspicion timer only kills the exact suspicion it was created for
// User delegates are never called with the table locked.

use crate::delegate::NodeEventKind;
use crate::health::Suspicion;
use crate::memberlist::{Memberlist, MemberlistError};
use crate::protocol::{Alive, Dead, Message, PushNodeState, Suspect};
use crate::state::scaling::{move_dead_nodes, random_offset, shuffle_nodes};
use crate::state::{suspicion_timeout, Node, NodeState, NodeStateType};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Work for the single state consumer task
#[derive(Debug)]
pub enum StateCommand {
    Alive(Alive),
    Suspect(Suspect),
    Dead(Dead),
    /// A suspicion timer fired
    SuspicionExpired {
        node: String,
        incarnation: u32,
        state_change: Instant,
        confirmations: usize,
    },
}

// ============================================================================
// NODE TABLE
// ============================================================================

/// Probe-ordered node list with a name index and live suspicion timers
#[derive(Default)]
pub struct NodeTable {
    pub nodes: Vec<NodeState>,
    index: HashMap<String, usize>,
    pub timers: HashMap<String, Suspicion>,
    pub probe_index: usize,
}

impl NodeTable {
    pub fn get(&self, name: &str) -> Option<&NodeState> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut NodeState> {
        let i = *self.index.get(name)?;
        self.nodes.get_mut(i)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert at a random position so new nodes don't all land at the end
    /// of everyone's probe order
    pub fn insert_random(&mut self, state: NodeState) {
        let n = self.nodes.len();
        let offset = random_offset(n);
        self.index.insert(state.name().to_string(), n);
        self.nodes.push(state);

        if offset != n {
            self.nodes.swap(offset, n);
            self.index.insert(self.nodes[offset].name().to_string(), offset);
            self.index.insert(self.nodes[n].name().to_string(), n);
        }
    }

    /// Drop Dead and Left nodes older than `gossip_to_the_dead_time`
    /// (never `local`), then shuffle the rest. Returns the reaped names.
    pub fn reap_and_shuffle(&mut self, gossip_to_the_dead_time: Duration, local: &str) -> Vec<String> {
        let dead_idx = move_dead_nodes(&mut self.nodes, gossip_to_the_dead_time, local);
        let reaped: Vec<String> = self
            .nodes
            .drain(dead_idx..)
            .map(|state| state.name().to_string())
            .collect();
        for name in &reaped {
            self.timers.remove(name);
        }

        shuffle_nodes(&mut self.nodes);
        self.reindex();
        reaped
    }

    fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, state)| (state.name().to_string(), i))
            .collect();
    }
}

// ============================================================================
// TRANSITIONS
// ============================================================================

impl Memberlist {
    pub(crate) fn apply_command(&self, command: StateCommand) {
        match command {
            StateCommand::Alive(alive) => self.alive_node(alive, None, false),
            StateCommand::Suspect(suspect) => self.suspect_node(suspect),
            StateCommand::Dead(dead) => self.dead_node(dead, None),
            StateCommand::SuspicionExpired {
                node,
                incarnation,
                state_change,
                confirmations,
            } => self.suspicion_expired(node, incarnation, state_change, confirmations),
        }
    }

    /// Apply an Alive message. `bootstrap` is set when we announce
    /// ourselves, so our own Alive is applied rather than refuted.
    pub(crate) fn alive_node(
        &self,
        alive: Alive,
        notify: Option<oneshot::Sender<()>>,
        bootstrap: bool,
    ) {
        let is_local = alive.node == self.config.name;

        // An Alive about us queued behind a leave must not rejoin us
        if is_local && self.has_left() {
            return;
        }

        let vsn = alive.vsn;
        if vsn.pmin() == 0 || vsn.pmax() == 0 || vsn.pmin() > vsn.pmax() {
            warn!(
                node = %alive.node,
                addr = %alive.addr,
                pmin = vsn.pmin(),
                pmax = vsn.pmax(),
                "ignoring alive message with invalid protocol versions"
            );
            return;
        }

        let claimed = Node {
            name: alive.node.clone(),
            addr: alive.addr,
            meta: alive.meta.clone(),
            state: NodeStateType::Alive,
            vsn,
        };

        if let Some(delegate) = &self.delegates.alive {
            if let Err(reason) = delegate.notify_alive(&claimed) {
                warn!(node = %alive.node, %reason, "ignoring alive message");
                return;
            }
        }

        let conflict = {
            let mut table = self.nodes.lock();
            self.apply_alive(&mut table, alive, notify, bootstrap)
        };

        if let Some(existing) = conflict {
            if let Some(delegate) = &self.delegates.conflict {
                delegate.notify_conflict(&existing, &claimed);
            }
        }
    }

    /// Table half of `alive_node`. Returns the existing entry when the
    /// message conflicts with a live node of the same name.
    fn apply_alive(
        &self,
        table: &mut NodeTable,
        alive: Alive,
        notify: Option<oneshot::Sender<()>>,
        bootstrap: bool,
    ) -> Option<Node> {
        let is_local = alive.node == self.config.name;
        let mut updates_node = false;

        if table.get(&alive.node).is_none() {
            // Starts out Dead so the transition below reports a join
            let state = NodeState::new(
                &alive.node,
                alive.addr,
                alive.meta.clone(),
                0,
                NodeStateType::Dead,
                alive.vsn,
            );
            table.insert_random(state);
            self.num_nodes.store(table.len(), Ordering::Relaxed);
        } else if let Some(state) = table.get(&alive.node).filter(|s| s.addr() != alive.addr) {
            let reclaim = self.config.dead_node_reclaim_time();
            let can_reclaim = !reclaim.is_zero() && state.state_change().elapsed() > reclaim;

            if state.state() == NodeStateType::Left
                || (state.state() == NodeStateType::Dead && can_reclaim)
            {
                info!(
                    node = %alive.node,
                    old = %state.addr(),
                    new = %alive.addr,
                    "updating address for left or failed node"
                );
                updates_node = true;
            } else {
                error!(
                    node = %alive.node,
                    mine = %state.addr(),
                    theirs = %alive.addr,
                    state = %state.state(),
                    "conflicting address for node"
                );
                return Some(state.to_node());
            }
        }

        let Some(current) = table.get(&alive.node) else {
            return None;
        };
        if alive.incarnation <= current.incarnation() && !is_local && !updates_node {
            return None;
        }
        if alive.incarnation < current.incarnation() && is_local {
            return None;
        }

        table.timers.remove(&alive.node);

        let local_vsn = self.local_vsn();
        let state = table.get_mut(&alive.node)?;
        let old_state = state.state();
        let old_meta = state.meta().to_vec();

        if !bootstrap && is_local {
            // Our own echo at the same incarnation is harmless; anything
            // else claims a different version of us and must be refuted
            if alive.incarnation == state.incarnation()
                && alive.meta == state.meta()
                && alive.vsn == local_vsn
            {
                return None;
            }
            self.refute(state, alive.incarnation);
            warn!(
                incarnation = alive.incarnation,
                "refuting an alive message about ourselves"
            );
        } else {
            self.encode_and_broadcast(&alive.node, Message::Alive(alive.clone()), notify);

            state.set_vsn(alive.vsn);
            state.set_incarnation(alive.incarnation);
            state.set_meta(alive.meta);
            state.set_addr(alive.addr);
            if state.state() != NodeStateType::Alive {
                state.set_state(NodeStateType::Alive);
                debug!(node = %state.name(), from = %old_state, "node is alive");
            }
        }

        if matches!(old_state, NodeStateType::Dead | NodeStateType::Left) {
            self.emit(NodeEventKind::Join, state.to_node());
        } else if old_meta != state.meta() {
            self.emit(NodeEventKind::Update, state.to_node());
        }

        None
    }

    /// Apply a Suspect message, or a failed probe of our own
    pub(crate) fn suspect_node(&self, suspect: Suspect) {
        let mut table = self.nodes.lock();
        let Some(current) = table.get(&suspect.node) else {
            return;
        };
        if suspect.incarnation < current.incarnation() {
            return;
        }

        // An existing timer only needs the confirmation; new information
        // is re-gossiped so other members can confirm independently
        if let Some(timer) = table.timers.get(&suspect.node) {
            if timer.confirm(&suspect.from) {
                self.encode_and_broadcast(&suspect.node, Message::Suspect(suspect.clone()), None);
            }
            return;
        }

        let n = self.est_num_nodes();
        let Some(state) = table.get_mut(&suspect.node) else {
            return;
        };
        if state.state() != NodeStateType::Alive {
            return;
        }

        if state.name() == self.config.name {
            self.refute(state, suspect.incarnation);
            warn!(from = %suspect.from, "refuting a suspect message");
            return;
        }

        self.encode_and_broadcast(&suspect.node, Message::Suspect(suspect.clone()), None);
        state.set_incarnation(suspect.incarnation);
        state.set_state(NodeStateType::Suspect);
        let state_change = state.state_change();

        // Aim for the nominal timeout two probe intervals early; with too
        // few peers to confirm, expect no confirmations at all
        let mut k = (self.config.suspicion_mult as usize).saturating_sub(2);
        if n.saturating_sub(2) < k {
            k = 0;
        }
        let min = suspicion_timeout(self.config.suspicion_mult, n, self.config.probe_interval());
        let max = min * self.config.suspicion_max_timeout_mult;

        let tx = self.state_tx.clone();
        let node = suspect.node.clone();
        let incarnation = suspect.incarnation;
        let timer = Suspicion::new(&suspect.from, k, min, max, move |confirmations| {
            tokio::spawn(async move {
                let expired = StateCommand::SuspicionExpired {
                    node,
                    incarnation,
                    state_change,
                    confirmations,
                };
                let _ = tx.send(expired).await;
            });
        });

        info!(
            node = %suspect.node,
            from = %suspect.from,
            timeout = ?max,
            confirmations_wanted = k,
            "suspecting node"
        );
        table.timers.insert(suspect.node, timer);
    }

    /// Declare a node dead if its suspicion is still the one that expired
    pub(crate) fn suspicion_expired(
        &self,
        node: String,
        incarnation: u32,
        state_change: Instant,
        confirmations: usize,
    ) {
        let still_suspect = self
            .nodes
            .lock()
            .get(&node)
            .map(|state| {
                state.state() == NodeStateType::Suspect
                    && state.incarnation() == incarnation
                    && state.state_change() == state_change
            })
            .unwrap_or(false);

        if !still_suspect {
            debug!(%node, "stale suspicion timer ignored");
            return;
        }

        info!(
            %node,
            confirmations,
            "marking node as failed, suspect timeout reached"
        );
        let dead = Dead {
            incarnation,
            node,
            from: self.config.name.clone(),
        };
        self.dead_node(dead, None);
    }

    /// Apply a Dead message. `notify` fires once our own leave broadcast
    /// has gone out.
    pub(crate) fn dead_node(&self, dead: Dead, notify: Option<oneshot::Sender<()>>) {
        let mut table = self.nodes.lock();
        let Some(current) = table.get(&dead.node) else {
            return;
        };
        if dead.incarnation < current.incarnation() {
            return;
        }

        table.timers.remove(&dead.node);

        let Some(state) = table.get_mut(&dead.node) else {
            return;
        };
        if state.dead_or_left() {
            return;
        }

        if state.name() == self.config.name {
            if !self.has_left() {
                self.refute(state, dead.incarnation);
                warn!(from = %dead.from, "refuting a dead message");
                return;
            }
            self.encode_and_broadcast(&dead.node, Message::Dead(dead.clone()), notify);
        } else {
            self.encode_and_broadcast(&dead.node, Message::Dead(dead.clone()), None);
        }

        state.set_incarnation(dead.incarnation);
        if dead.node == dead.from {
            state.set_state(NodeStateType::Left);
        } else {
            state.set_state(NodeStateType::Dead);
        }

        info!(node = %dead.node, from = %dead.from, state = %state.state(), "node is gone");
        self.emit(NodeEventKind::Leave, state.to_node());
    }

    /// Out-incarnate an accusation about ourselves and gossip the result
    pub(crate) fn refute(&self, me: &mut NodeState, accused_incarnation: u32) {
        let mut incarnation = self.next_incarnation();
        if accused_incarnation >= incarnation {
            incarnation = self.skip_incarnation(accused_incarnation - incarnation + 1);
        }
        me.set_incarnation(incarnation);

        // Being accused is a hint that we are the slow one
        self.awareness.apply_delta(1);

        let alive = Alive {
            incarnation,
            node: me.name().to_string(),
            addr: me.addr(),
            meta: me.meta().to_vec(),
            vsn: self.local_vsn(),
        };
        self.encode_and_broadcast(me.name(), Message::Alive(alive), None);
    }

    /// Fold a remote push/pull snapshot into our table
    pub(crate) fn merge_state(&self, remote: &[PushNodeState]) {
        for entry in remote {
            match entry.state {
                NodeStateType::Alive => {
                    let alive = Alive {
                        incarnation: entry.incarnation,
                        node: entry.name.clone(),
                        addr: entry.addr,
                        meta: entry.meta.clone(),
                        vsn: entry.vsn,
                    };
                    self.clear_suspicion(&alive);
                    self.alive_node(alive, None, false);
                }
                NodeStateType::Left => self.dead_node(
                    Dead {
                        incarnation: entry.incarnation,
                        node: entry.name.clone(),
                        from: entry.name.clone(),
                    },
                    None,
                ),
                // Remote deaths only make us suspicious; our own probes
                // get to confirm them
                NodeStateType::Dead | NodeStateType::Suspect => self.suspect_node(Suspect {
                    incarnation: entry.incarnation,
                    node: entry.name.clone(),
                    from: self.config.name.clone(),
                }),
            }
        }
    }

    /// A peer that still sees `alive` as Alive at the incarnation we
    /// suspect it at outranks our suspicion
    fn clear_suspicion(&self, alive: &Alive) {
        if alive.node == self.config.name {
            return;
        }

        let mut table = self.nodes.lock();
        let Some(state) = table.get_mut(&alive.node) else {
            return;
        };
        if state.state() != NodeStateType::Suspect
            || state.incarnation() != alive.incarnation
            || state.addr() != alive.addr
        {
            return;
        }

        state.set_state(NodeStateType::Alive);
        table.timers.remove(&alive.node);
        debug!(node = %alive.node, "suspicion cleared by remote state");
        self.encode_and_broadcast(&alive.node, Message::Alive(alive.clone()), None);
    }

    /// Check that every alive node, local and remote, speaks a protocol
    /// and delegate version inside the range all of them understand
    pub(crate) fn verify_protocol(&self, remote: &[PushNodeState]) -> Result<(), MemberlistError> {
        let table = self.nodes.lock();

        let mut max_pmin = 0u8;
        let mut min_pmax = u8::MAX;
        let mut max_dmin = 0u8;
        let mut min_dmax = u8::MAX;

        let remote_vsns = remote
            .iter()
            .filter(|entry| entry.state == NodeStateType::Alive)
            .map(|entry| entry.vsn);
        let local_vsns = table
            .nodes
            .iter()
            .filter(|state| state.state() == NodeStateType::Alive)
            .map(|state| state.vsn());

        let alive: Vec<_> = remote_vsns.chain(local_vsns).collect();
        for vsn in &alive {
            max_pmin = max_pmin.max(vsn.pmin());
            min_pmax = min_pmax.min(vsn.pmax());
            max_dmin = max_dmin.max(vsn.dmin());
            min_dmax = min_dmax.min(vsn.dmax());
        }

        let everyone = remote
            .iter()
            .map(|entry| (entry.name.as_str(), entry.vsn))
            .chain(table.nodes.iter().map(|state| (state.name(), state.vsn())));
        for (name, vsn) in everyone {
            if vsn.pcur() < max_pmin || vsn.pcur() > min_pmax {
                return Err(MemberlistError::IncompatibleVersion(format!(
                    "node '{}' protocol version {} not in range [{}, {}]",
                    name,
                    vsn.pcur(),
                    max_pmin,
                    min_pmax
                )));
            }
            if vsn.dcur() < max_dmin || vsn.dcur() > min_dmax {
                return Err(MemberlistError::IncompatibleVersion(format!(
                    "node '{}' delegate protocol version {} not in range [{}, {}]",
                    name,
                    vsn.dcur(),
                    max_dmin,
                    min_dmax
                )));
            }
        }

        Ok(())
    }
}
