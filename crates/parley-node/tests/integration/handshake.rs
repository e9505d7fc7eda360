//! Handshake between real nodes and against a scripted peer.

use std::time::Duration;

use parley_node::CONNECTION_CREATED;
use parley_protocol::MessageType;

use crate::harness::{ScriptedPeer, TestNodeBuilder};

/// A dials B; both end up with one session naming the other.
#[tokio::test]
async fn test_two_nodes_establish() {
    let a = TestNodeBuilder::new("alice").build().await.unwrap();
    let b = TestNodeBuilder::new("bob").build().await.unwrap();

    assert_eq!(a.node.start_conn(&b.addr_string()).await, CONNECTION_CREATED);
    a.wait_sessions(1, Duration::from_secs(5)).await.unwrap();
    b.wait_sessions(1, Duration::from_secs(5)).await.unwrap();

    let on_a = a.node.sessions().await;
    assert_eq!(on_a[0].peer.id(), "id-bob");
    assert_eq!(on_a[0].peer.name(), "bob");
    assert_eq!(on_a[0].peer.ip(), "127.0.0.1");

    let on_b = b.node.sessions().await;
    assert_eq!(on_b[0].peer.id(), "id-alice");
    assert_eq!(on_b[0].peer.name(), "alice");

    a.shutdown().await;
    b.shutdown().await;
}

/// The accepting node opens with BEGIN_CONVERSATION_REQUEST carrying name and id.
#[tokio::test]
async fn test_node_opens_with_begin_request() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let mut peer = ScriptedPeer::connect("carol", node.addr).await.unwrap();

    let opening = peer.recv().await;
    assert_eq!(opening.kind(), MessageType::BeginConversationRequest);
    assert_eq!(opening.content(), node.identity.handshake_content());
    assert_eq!(opening.sender().id(), "id-bob");

    let content = peer.identity.handshake_content();
    peer.send(&node.identity, MessageType::BeginConversationResponse, &content)
        .await;
    node.wait_sessions(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(node.node.sessions().await[0].peer.id(), "id-carol");

    node.shutdown().await;
}

/// A peer that never answers is dropped after the handshake deadline.
#[tokio::test]
async fn test_silent_peer_times_out() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let mut peer = ScriptedPeer::connect("mute", node.addr).await.unwrap();

    assert_eq!(peer.recv().await.kind(), MessageType::BeginConversationRequest);
    // Handshake deadline is 2s in the harness; the node then closes.
    let after = peer.recv_within(Duration::from_secs(5)).await;
    assert!(matches!(after, Some(Err(_))), "expected close, got {after:?}");
    assert!(node.node.sessions().await.is_empty());

    node.shutdown().await;
}

/// Garbage handshake content aborts that connection only.
#[tokio::test]
async fn test_malformed_handshake_does_not_affect_node() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let mut bad = ScriptedPeer::connect("bad", node.addr).await.unwrap();
    bad.recv().await;
    bad.send(&node.identity, MessageType::BeginConversationResponse, "no delimiter")
        .await;
    assert!(matches!(
        bad.recv_within(Duration::from_secs(5)).await,
        Some(Err(_))
    ));

    let mut good = ScriptedPeer::connect("carol", node.addr).await.unwrap();
    good.handshake(&node.identity).await;
    node.wait_sessions(1, Duration::from_secs(5)).await.unwrap();

    node.shutdown().await;
}
