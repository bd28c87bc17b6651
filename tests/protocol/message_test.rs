// Protocol Tests
// Message encoding, compound packing and stream framing

use meshlist::protocol::{
    make_compound_messages, pack_packet, read_frame, write_frame, Alive, Dead, IndirectPing,
    Message, Ping, ProtocolError, PushNodeState, PushPull, Suspect, COMPOUND_HEADER_OVERHEAD,
    COMPOUND_OVERHEAD, MAX_COMPOUND_PARTS, MAX_FRAME_SIZE, USER_MSG_OVERHEAD,
};
use meshlist::state::{NodeStateType, ProtocolVersions};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 1], port))
}

fn alive(name: &str) -> Alive {
    Alive {
        incarnation: 7,
        node: name.to_string(),
        addr: addr(7946),
        meta: b"role=web".to_vec(),
        vsn: ProtocolVersions::default(),
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

#[test]
fn test_membership_messages_survive_encoding() {
    let msgs: Vec<Message> = vec![
        alive("web-1").into(),
        Suspect {
            incarnation: 3,
            node: "web-2".to_string(),
            from: "web-1".to_string(),
        }
        .into(),
        Dead {
            incarnation: 4,
            node: "web-3".to_string(),
            from: "web-3".to_string(),
        }
        .into(),
        IndirectPing {
            seq_no: 11,
            target: addr(8000),
            node: "web-2".to_string(),
            nack: true,
            source_addr: None,
            source_node: "web-1".to_string(),
        }
        .into(),
    ];

    for msg in msgs {
        let buf = msg.encode().unwrap();
        assert_eq!(Message::decode(&buf).unwrap(), msg, "kind {}", msg.kind());
    }
}

#[test]
fn test_truncated_message_fails() {
    let buf = Message::Alive(alive("web-1")).encode().unwrap();
    let err = Message::decode(&buf[..buf.len() / 2]).unwrap_err();
    assert!(matches!(err, ProtocolError::Decode(_)));
}

#[test]
fn test_user_wrapper_fits_overhead() {
    let payload = vec![0xab; 1000];
    let buf = Message::User(payload.clone()).encode().unwrap();
    assert!(buf.len() <= payload.len() + USER_MSG_OVERHEAD);
}

// ============================================================================
// COMPOUND
// ============================================================================

#[test]
fn test_compound_respects_declared_overheads() {
    let parts: Vec<Vec<u8>> = (0..20)
        .map(|i| Message::Alive(alive(&format!("node-{}", i))).encode().unwrap())
        .collect();
    let budget: usize =
        COMPOUND_HEADER_OVERHEAD + parts.iter().map(|p| p.len() + COMPOUND_OVERHEAD).sum::<usize>();

    let packed = make_compound_messages(parts.clone()).unwrap();
    assert_eq!(packed.len(), 1);
    assert!(packed[0].len() <= budget);

    match Message::decode(&packed[0]).unwrap() {
        Message::Compound(decoded) => assert_eq!(decoded, parts),
        other => panic!("expected compound, got {}", other.kind()),
    }
}

#[test]
fn test_compound_splits_beyond_part_limit() {
    let parts = vec![vec![1u8, 2, 3]; MAX_COMPOUND_PARTS * 2 + 1];
    let packed = make_compound_messages(parts).unwrap();
    assert_eq!(packed.len(), 3);
}

#[test]
fn test_pack_packet_single_message_is_not_wrapped() {
    let ping = Message::Ping(Ping {
        seq_no: 1,
        node: "web-2".to_string(),
        source_addr: Some(addr(1)),
        source_node: "web-1".to_string(),
    })
    .encode()
    .unwrap();

    let packed = pack_packet(vec![ping.clone()]).unwrap();
    assert_eq!(packed, vec![ping.clone()]);

    let packed = pack_packet(vec![ping.clone(), ping]).unwrap();
    assert_eq!(packed.len(), 1);
    assert!(matches!(
        Message::decode(&packed[0]).unwrap(),
        Message::Compound(_)
    ));
}

// ============================================================================
// STREAM FRAMING
// ============================================================================

#[tokio::test]
async fn test_push_pull_over_stream() {
    let (mut client, mut server) = tokio::io::duplex(64 * 1024);
    let request = Message::PushPull(PushPull {
        join: true,
        nodes: vec![PushNodeState {
            name: "web-1".to_string(),
            addr: addr(7946),
            meta: Vec::new(),
            incarnation: 2,
            state: NodeStateType::Suspect,
            vsn: ProtocolVersions::default(),
        }],
        user_state: b"state".to_vec(),
    });

    write_frame(&mut client, &request).await.unwrap();
    write_frame(&mut client, &Message::User(b"next".to_vec()))
        .await
        .unwrap();

    assert_eq!(read_frame(&mut server).await.unwrap(), request);
    assert_eq!(
        read_frame(&mut server).await.unwrap(),
        Message::User(b"next".to_vec())
    );
}

#[tokio::test]
async fn test_oversized_frame_rejected() {
    let (mut client, mut server) = tokio::io::duplex(64);
    let len = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
    client.write_all(&len).await.unwrap();

    let err = read_frame(&mut server).await.unwrap_err();
    assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
}

#[tokio::test]
async fn test_closed_stream_is_io_error() {
    let (client, mut server) = tokio::io::duplex(64);
    drop(client);

    let err = read_frame(&mut server).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Io(_)));
}
