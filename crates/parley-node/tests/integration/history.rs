//! History sync after the handshake.

use std::time::Duration;

use parley_node::node::FAREWELL;
use parley_protocol::messages::{decode_history, encode_history};
use parley_protocol::{Identity, Message, MessageType};

use crate::harness::{ScriptedPeer, TestNodeBuilder};

fn logged(sender: &Identity, receiver: &Identity, content: &str, at: &str) -> Message {
    Message::with_timestamp(
        sender.clone(),
        receiver.clone(),
        content,
        MessageType::TextMessageRequest,
        at,
    )
    .unwrap()
}

/// No stored history: the node asks for the peer's.
#[tokio::test]
async fn test_empty_store_sends_history_request() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let mut peer = ScriptedPeer::connect("carol", node.addr).await.unwrap();
    peer.handshake(&node.identity).await;

    let request = peer.recv().await;
    assert_eq!(request.kind(), MessageType::HistoryRequest);
    assert_eq!(request.content(), "");

    node.shutdown().await;
}

/// Two or more stored messages: the store is trusted, nothing is asked.
#[tokio::test]
async fn test_populated_store_skips_history_request() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let mut peer = ScriptedPeer::connect("carol", node.addr).await.unwrap();
    let log = vec![
        logged(&peer.identity, &node.identity, "hi", "2024-03-01 12:00:00"),
        logged(&node.identity, &peer.identity, "hey", "2024-03-01 12:00:10"),
    ];
    node.store()
        .overwrite_history(&peer.identity, &log)
        .unwrap();

    peer.handshake(&node.identity).await;
    assert!(
        peer.recv_within(Duration::from_millis(500)).await.is_none(),
        "node should stay silent after the handshake"
    );
    node.wait_sessions(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(node.node.sessions().await[0].history, log);

    node.shutdown().await;
}

/// The peer's log is merged into both the session cache and the store.
#[tokio::test]
async fn test_history_response_is_merged() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let mut peer = ScriptedPeer::connect("carol", node.addr).await.unwrap();
    let theirs = vec![
        logged(&node.identity, &peer.identity, "second", "2024-03-01 12:00:10"),
        logged(&peer.identity, &node.identity, "first", "2024-03-01 12:00:00"),
        logged(&peer.identity, &node.identity, "first", "2024-03-01 12:00:00"),
    ];

    peer.handshake(&node.identity).await;
    assert_eq!(peer.recv().await.kind(), MessageType::HistoryRequest);
    let payload = encode_history(&theirs).unwrap();
    peer.send(&node.identity, MessageType::HistoryResponse, &payload)
        .await;

    node.wait_stored("id-carol", 2, Duration::from_secs(5)).await.unwrap();
    let stored = node.store().read_history("id-carol").unwrap();
    assert_eq!(stored[0].content(), "first");
    assert_eq!(stored[1].content(), "second");
    assert_eq!(node.node.sessions().await[0].history, stored);

    node.shutdown().await;
}

/// A HISTORY_REQUEST during the dispatch loop is answered with the stored log.
#[tokio::test]
async fn test_history_request_answered_in_dispatch() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let mut peer = ScriptedPeer::connect("carol", node.addr).await.unwrap();
    peer.handshake(&node.identity).await;
    assert_eq!(peer.recv().await.kind(), MessageType::HistoryRequest);
    peer.send(&node.identity, MessageType::HistoryResponse, "").await;

    peer.send(&node.identity, MessageType::TextMessageRequest, "one").await;
    peer.send(&node.identity, MessageType::TextMessageRequest, "two").await;
    node.wait_stored("id-carol", 2, Duration::from_secs(5)).await.unwrap();

    peer.send(&node.identity, MessageType::HistoryRequest, "").await;
    let response = peer.recv().await;
    assert_eq!(response.kind(), MessageType::HistoryResponse);
    let served = decode_history(response.content()).unwrap();
    let contents: Vec<_> = served.iter().map(|m| m.content()).collect();
    assert_eq!(contents, vec!["one", "two"]);

    node.shutdown().await;
}

/// Two real nodes with existing logs reconnect without re-requesting.
#[tokio::test]
async fn test_reconnect_uses_stored_history() {
    let a = TestNodeBuilder::new("alice").build().await.unwrap();
    let b = TestNodeBuilder::new("bob").build().await.unwrap();
    a.node.start_conn(&b.addr_string()).await;
    a.wait_sessions(1, Duration::from_secs(5)).await.unwrap();
    b.wait_sessions(1, Duration::from_secs(5)).await.unwrap();
    a.node.send_text("id-bob", "one").await.unwrap();
    a.node.send_text("id-bob", "two").await.unwrap();
    b.wait_stored("id-alice", 2, Duration::from_secs(5)).await.unwrap();

    // Restart alice on the same data dir and dial again.
    let dir = a.shutdown().await;
    b.wait_sessions(0, Duration::from_secs(5)).await.unwrap();
    let a = TestNodeBuilder::new("alice").data_dir(dir).build().await.unwrap();
    a.node.start_conn(&b.addr_string()).await;
    a.wait_sessions(1, Duration::from_secs(5)).await.unwrap();
    b.wait_sessions(1, Duration::from_secs(5)).await.unwrap();

    let cached = &a.node.sessions().await[0].history;
    assert!(cached.len() >= 2);
    assert_eq!(cached[0].content(), "one");
    assert_eq!(cached[1].content(), "two");

    a.shutdown().await;
    b.shutdown().await;
}

/// A peer that never answers the sync request still gets a working session
/// once the sync deadline passes.
#[tokio::test]
async fn test_sync_timeout_falls_through_to_dispatch() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let mut peer = ScriptedPeer::connect("carol", node.addr).await.unwrap();
    peer.handshake(&node.identity).await;
    assert_eq!(peer.recv().await.kind(), MessageType::HistoryRequest);

    // Outlast history_sync_secs without answering.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(node.node.sessions().await.len(), 1);

    peer.send(&node.identity, MessageType::HistoryRequest, "").await;
    let response = peer.recv().await;
    assert_eq!(response.kind(), MessageType::HistoryResponse);
    assert!(decode_history(response.content()).unwrap().is_empty());

    node.shutdown().await;
}

/// Stopping the node while it waits for a HISTORY_RESPONSE ends the session
/// with a farewell.
#[tokio::test]
async fn test_stop_during_sync_ends_session() {
    let node = TestNodeBuilder::new("bob").build().await.unwrap();
    let mut peer = ScriptedPeer::connect("carol", node.addr).await.unwrap();
    peer.handshake(&node.identity).await;
    assert_eq!(peer.recv().await.kind(), MessageType::HistoryRequest);
    node.wait_sessions(1, Duration::from_secs(5)).await.unwrap();

    node.node.stop().await.unwrap();
    assert!(node.node.sessions().await.is_empty());

    let farewell = peer.recv().await;
    assert_eq!(farewell.kind(), MessageType::EndConversationRequest);
    assert_eq!(farewell.content(), FAREWELL);
    assert!(matches!(
        peer.recv_within(Duration::from_secs(5)).await,
        Some(Err(_))
    ));
}
