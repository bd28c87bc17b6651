// Config Tests
// Profiles, builders and validation

use meshlist::config::{
    ConfigError, MemberlistConfig, MAX_AWARENESS_MULTIPLIER, MIN_UDP_BUFFER_SIZE,
};
use std::time::Duration;

#[test]
fn test_profiles_differ_where_expected() {
    let lan = MemberlistConfig::default_lan();
    let wan = MemberlistConfig::default_wan();
    let local = MemberlistConfig::default_local();

    assert!(wan.probe_interval() > lan.probe_interval());
    assert!(wan.suspicion_mult > lan.suspicion_mult);
    assert!(local.probe_timeout() < lan.probe_timeout());
    assert_eq!(lan.udp_buffer_size, wan.udp_buffer_size);
}

#[test]
fn test_builders_set_fields() {
    let config = MemberlistConfig::new("node-1")
        .with_probe_interval(Duration::from_millis(250))
        .with_probe_timeout(Duration::from_millis(100))
        .with_gossip_nodes(5)
        .with_dead_node_reclaim_time(Duration::from_secs(10))
        .with_delegate_protocol(2, 1, 3);

    assert_eq!(config.name, "node-1");
    assert_eq!(config.probe_interval(), Duration::from_millis(250));
    assert_eq!(config.probe_timeout(), Duration::from_millis(100));
    assert_eq!(config.gossip_nodes, 5);
    assert_eq!(config.dead_node_reclaim_time(), Duration::from_secs(10));
    assert!(config.validate().is_ok());
}

#[test]
fn test_every_profile_validates_once_named() {
    for config in [
        MemberlistConfig::default_lan(),
        MemberlistConfig::default_wan(),
        MemberlistConfig::default_local(),
    ] {
        assert!(config.with_name("n").validate().is_ok());
    }
}

#[test]
fn test_invalid_configs_rejected() {
    let base = MemberlistConfig::new("n");
    let invalid = [
        base.clone().with_name(""),
        base.clone().with_probe_interval(Duration::ZERO),
        base.clone()
            .with_probe_interval(Duration::from_millis(100))
            .with_probe_timeout(Duration::from_millis(200)),
        base.clone().with_gossip_interval(Duration::ZERO),
        base.clone().with_probe_timeout(Duration::ZERO),
        base.clone().with_awareness_max_multiplier(0),
        base.clone().with_awareness_max_multiplier(MAX_AWARENESS_MULTIPLIER + 1),
        base.clone().with_handoff_queue_depth(0),
        base.clone().with_protocol_version(0),
        base.clone().with_protocol_version(99),
        base.clone().with_delegate_protocol(5, 1, 3),
        base.clone().with_udp_buffer_size(MIN_UDP_BUFFER_SIZE - 1),
    ];

    for (i, config) in invalid.iter().enumerate() {
        assert!(
            matches!(config.validate(), Err(ConfigError::Invalid(_))),
            "case {} should be rejected",
            i
        );
    }
}

#[test]
fn test_gossip_can_be_disabled() {
    let config = MemberlistConfig::new("n")
        .with_gossip_interval(Duration::ZERO)
        .with_gossip_nodes(0)
        .with_push_pull_interval(Duration::ZERO);
    assert!(config.validate().is_ok());
}
