// Cluster Tests
// Several members on an in-memory network: join, failure detection,
// graceful leave, metadata updates and user messages

use meshlist::delegate::{ChannelEventDelegate, Delegate, Delegates, NodeEvent, NodeEventKind};
use meshlist::state::suspicion_timeout;
use meshlist::transport::{MockNetwork, Transport};
use meshlist::{Memberlist, MemberlistConfig, MemberlistError, NodeStateType};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

// ============================================================================
// HELPERS
// ============================================================================

#[derive(Default)]
struct RecordingDelegate {
    meta: Mutex<Vec<u8>>,
    msgs: Mutex<Vec<Vec<u8>>>,
}

impl Delegate for RecordingDelegate {
    fn node_meta(&self, _limit: usize) -> Vec<u8> {
        self.meta.lock().clone()
    }

    fn notify_msg(&self, msg: &[u8]) {
        self.msgs.lock().push(msg.to_vec());
    }
}

struct TestNode {
    memberlist: Arc<Memberlist>,
    events: mpsc::UnboundedReceiver<NodeEvent>,
    delegate: Arc<RecordingDelegate>,
}

impl TestNode {
    fn addr(&self) -> SocketAddr {
        self.memberlist.advertise_addr()
    }
}

async fn start(network: &MockNetwork, name: &str) -> TestNode {
    let transport = network.new_transport();
    let (events, rx) = ChannelEventDelegate::channel();
    let delegate = Arc::new(RecordingDelegate::default());
    let delegates = Delegates::new()
        .with_events(Arc::new(events))
        .with_delegate(delegate.clone());

    let config = MemberlistConfig::default_local().with_name(name);
    let memberlist = Memberlist::create(config, transport, delegates)
        .await
        .unwrap();

    TestNode {
        memberlist,
        events: rx,
        delegate,
    }
}

/// Poll `check` every 10ms for up to 30s of virtual time
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..3000 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Next event of `kind` about `name`, skipping others
async fn wait_event(node: &mut TestNode, kind: NodeEventKind, name: &str) -> NodeEvent {
    let found = tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(event) = node.events.recv().await {
            if event.kind == kind && event.node.name == name {
                return Some(event);
            }
        }
        None
    })
    .await;

    match found {
        Ok(Some(event)) => event,
        _ => panic!("no {} event for {}", kind, name),
    }
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_single_node_knows_itself() {
    let network = MockNetwork::new();
    let mut a = start(&network, "a").await;

    assert_eq!(a.memberlist.num_members(), 1);
    let local = a.memberlist.local_node().unwrap();
    assert_eq!(local.name, "a");
    assert_eq!(local.state, NodeStateType::Alive);
    assert_eq!(a.memberlist.health_score(), 0);

    wait_event(&mut a, NodeEventKind::Join, "a").await;
    a.memberlist.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_receivers_can_only_be_taken_once() {
    let network = MockNetwork::new();
    let transport = network.new_transport();
    transport.packet_rx();

    let result = Memberlist::create(
        MemberlistConfig::default_local().with_name("a"),
        transport,
        Delegates::new(),
    )
    .await;
    assert!(matches!(result, Err(MemberlistError::Transport(_))));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_rejected() {
    let network = MockNetwork::new();
    let result = Memberlist::create(
        MemberlistConfig::default_local(),
        network.new_transport(),
        Delegates::new(),
    )
    .await;
    assert!(matches!(result, Err(MemberlistError::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_idempotent_and_final() {
    let network = MockNetwork::new();
    let a = start(&network, "a").await;

    a.memberlist.shutdown().await.unwrap();
    a.memberlist.shutdown().await.unwrap();

    let seed: SocketAddr = "127.0.0.1:1".parse().unwrap();
    assert!(matches!(
        a.memberlist.join(&[seed]).await,
        Err(MemberlistError::Shutdown)
    ));
    assert!(matches!(
        a.memberlist.leave(Duration::from_secs(1)).await,
        Err(MemberlistError::Shutdown)
    ));
}

// ============================================================================
// JOIN
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_nodes_join() {
    let network = MockNetwork::new();
    let a = start(&network, "a").await;
    let mut b = start(&network, "b").await;

    let joined = b.memberlist.join(&[a.addr()]).await.unwrap();
    assert_eq!(joined, 1);
    assert_eq!(b.memberlist.num_members(), 2);
    assert!(eventually(|| a.memberlist.num_members() == 2).await);

    let event = wait_event(&mut b, NodeEventKind::Join, "a").await;
    assert_eq!(event.node.addr, a.addr());

    a.memberlist.shutdown().await.unwrap();
    b.memberlist.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_join_unreachable_seed_fails() {
    let network = MockNetwork::new();
    let a = start(&network, "a").await;
    let nowhere: SocketAddr = "10.9.9.9:7946".parse().unwrap();

    assert!(matches!(
        a.memberlist.join(&[nowhere]).await,
        Err(MemberlistError::JoinFailed(_))
    ));

    // One good seed is enough
    let b = start(&network, "b").await;
    assert_eq!(a.memberlist.join(&[nowhere, b.addr()]).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_membership_spreads_through_gossip() {
    let network = MockNetwork::new();
    let a = start(&network, "a").await;
    let b = start(&network, "b").await;
    let c = start(&network, "c").await;

    b.memberlist.join(&[a.addr()]).await.unwrap();
    c.memberlist.join(&[a.addr()]).await.unwrap();

    // b never talked to c directly
    assert!(eventually(|| b.memberlist.num_members() == 3).await);
    assert!(eventually(|| c.memberlist.num_members() == 3).await);

    let mut names: Vec<String> = b.memberlist.members().into_iter().map(|n| n.name).collect();
    names.sort();
    assert_eq!(names, vec!["a", "b", "c"]);
}

// ============================================================================
// FAILURE AND LEAVE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_node_is_declared_dead() {
    let network = MockNetwork::new();
    let a = start(&network, "a").await;
    let mut b = start(&network, "b").await;
    b.memberlist.join(&[a.addr()]).await.unwrap();

    a.memberlist.shutdown().await.unwrap();
    let failed_at = Instant::now();

    let event = wait_event(&mut b, NodeEventKind::Leave, "a").await;
    assert_eq!(event.node.state, NodeStateType::Dead);
    assert_eq!(b.memberlist.num_members(), 1);

    // Next probe, its failure, then at most the unconfirmed suspicion timeout
    let config = b.memberlist.config();
    let interval = config.probe_interval();
    let suspicion = suspicion_timeout(config.suspicion_mult, 2, interval)
        * config.suspicion_max_timeout_mult;
    let bound = interval + suspicion + interval;
    let took = failed_at.elapsed();
    assert!(took <= bound, "declared dead after {:?}, bound {:?}", took, bound);
    // Failed probes with nobody to blame but ourselves
    assert!(b.memberlist.health_score() > 0);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_leave() {
    let network = MockNetwork::new();
    let a = start(&network, "a").await;
    let mut b = start(&network, "b").await;
    b.memberlist.join(&[a.addr()]).await.unwrap();
    assert!(eventually(|| a.memberlist.num_members() == 2).await);

    a.memberlist.leave(Duration::from_secs(5)).await.unwrap();
    // A second leave is a no-op
    a.memberlist.leave(Duration::from_secs(5)).await.unwrap();

    let event = wait_event(&mut b, NodeEventKind::Leave, "a").await;
    assert_eq!(event.node.state, NodeStateType::Left);
    assert_eq!(b.memberlist.num_members(), 1);

    a.memberlist.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_leave_alone_returns_immediately() {
    let network = MockNetwork::new();
    let a = start(&network, "a").await;

    a.memberlist.leave(Duration::from_millis(1)).await.unwrap();
    assert_eq!(a.memberlist.num_members(), 0);
}

// ============================================================================
// METADATA AND MESSAGES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_update_node_spreads_metadata() {
    let network = MockNetwork::new();
    let a = start(&network, "a").await;
    let mut b = start(&network, "b").await;
    b.memberlist.join(&[a.addr()]).await.unwrap();

    *a.delegate.meta.lock() = b"role=db".to_vec();
    a.memberlist.update_node(Duration::from_secs(5)).await.unwrap();

    let event = wait_event(&mut b, NodeEventKind::Update, "a").await;
    assert_eq!(event.node.meta, b"role=db".to_vec());
    assert_eq!(a.memberlist.local_node().unwrap().meta, b"role=db".to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_oversized_metadata_rejected() {
    let network = MockNetwork::new();
    let a = start(&network, "a").await;

    *a.delegate.meta.lock() = vec![0; meshlist::memberlist::META_MAX_SIZE + 1];
    assert!(matches!(
        a.memberlist.update_node(Duration::from_secs(1)).await,
        Err(MemberlistError::MetaTooLarge { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_user_messages_delivered() {
    let network = MockNetwork::new();
    let a = start(&network, "a").await;
    let b = start(&network, "b").await;
    b.memberlist.join(&[a.addr()]).await.unwrap();

    let target = b
        .memberlist
        .members()
        .into_iter()
        .find(|n| n.name == "a")
        .unwrap();

    b.memberlist.send_reliable(&target, b"reliable").await.unwrap();
    b.memberlist.send_best_effort(&target, b"best-effort").await.unwrap();
    b.memberlist.send_to(a.addr(), b"raw").await.unwrap();

    assert!(eventually(|| a.delegate.msgs.lock().len() == 3).await);
    let msgs = a.delegate.msgs.lock().clone();
    let expected: [&[u8]; 3] = [b"reliable", b"best-effort", b"raw"];
    for msg in expected {
        assert!(msgs.iter().any(|m| m.as_slice() == msg));
    }
}
