//! Conversation end and node shutdown.

use std::time::Duration;

use parley_node::node::FAREWELL;
use parley_node::transport::TransportError;
use parley_protocol::MessageType;

use crate::harness::{ScriptedPeer, TestNodeBuilder};

/// END from the peer removes the session and the node sends nothing more.
#[tokio::test]
async fn test_peer_end_removes_session_silently() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let mut peer = ScriptedPeer::connect("carol", node.addr).await.unwrap();
    peer.handshake(&node.identity).await;
    assert_eq!(peer.recv().await.kind(), MessageType::HistoryRequest);
    peer.send(&node.identity, MessageType::HistoryResponse, "").await;
    node.wait_sessions(1, Duration::from_secs(5)).await.unwrap();

    peer.send(&node.identity, MessageType::EndConversationRequest, "done")
        .await;
    node.wait_sessions(0, Duration::from_secs(5)).await.unwrap();

    let next = peer.recv_within(Duration::from_secs(2)).await;
    assert!(
        matches!(next, Some(Err(TransportError::Closed))),
        "expected a clean close, got {next:?}"
    );

    let log = node.store().read_history("id-carol").unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind(), MessageType::EndConversationRequest);

    node.shutdown().await;
}

/// A peer that drops the socket gets no farewell and its session goes away.
#[tokio::test]
async fn test_peer_disconnect_cleans_up() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let mut peer = ScriptedPeer::connect("carol", node.addr).await.unwrap();
    peer.handshake(&node.identity).await;
    peer.recv().await;
    peer.send(&node.identity, MessageType::HistoryResponse, "").await;
    node.wait_sessions(1, Duration::from_secs(5)).await.unwrap();

    drop(peer);
    node.wait_sessions(0, Duration::from_secs(5)).await.unwrap();
    assert!(node.store().read_history("id-carol").unwrap().is_empty());

    node.shutdown().await;
}

/// Stopping a node ends every conversation with a farewell.
#[tokio::test]
async fn test_stop_sends_farewell_to_live_peers() {
    let a = TestNodeBuilder::new("alice").build().await.unwrap();
    let b = TestNodeBuilder::new("bob").build().await.unwrap();
    a.node.start_conn(&b.addr_string()).await;
    a.wait_sessions(1, Duration::from_secs(5)).await.unwrap();
    b.wait_sessions(1, Duration::from_secs(5)).await.unwrap();

    let a_store_path = a.store().path().to_path_buf();
    let _dir = a.shutdown().await;
    assert!(a_store_path.exists());

    b.wait_sessions(0, Duration::from_secs(5)).await.unwrap();
    let log = b.store().read_history("id-alice").unwrap();
    let last = log.last().unwrap();
    assert_eq!(last.kind(), MessageType::EndConversationRequest);
    assert_eq!(last.content(), FAREWELL);

    b.shutdown().await;
}

/// After stop the node refuses new work and drops new connections.
#[tokio::test]
async fn test_stopped_node_closes_listener() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let addr = node.addr;
    node.node.stop().await.unwrap();
    assert!(!node.node.is_running());

    // The accept loop is gone; a dial either fails or is never served.
    if let Ok(mut peer) = ScriptedPeer::connect("late", addr).await {
        let got = peer.recv_within(Duration::from_millis(500)).await;
        assert!(!matches!(got, Some(Ok(_))), "stopped node answered: {got:?}");
    }
}
