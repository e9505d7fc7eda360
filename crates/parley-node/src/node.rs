//! Peer node -- listener, connection handlers, and the driver surface.
//!
//! Every connection, accepted or dialled, runs the same handler task:
//!   1. Handshake (bounded, cancelled by shutdown)
//!   2. History sync (bounded; a timeout falls through to dispatch)
//!   3. Dispatch loop until END, a transport failure, or shutdown
//!   4. Teardown
//!
//! Shutdown is a broadcast observed at every blocking point.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use parley_protocol::{Identity, Message, MessageType, PeerIdentity};
use parley_storage::{ConversationStore, StorageError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::TimeoutSection;
use crate::handshake::perform_handshake;
use crate::history_sync::{serve_history, sync_history};
use crate::session::{LiveSession, SessionError, SessionId, SessionRegistry, SessionSnapshot};
use crate::transport::{split, FrameReader};

pub const CONNECTION_CREATED: &str = "Created Connection!";
pub const CONNECTION_FAILED: &str = "Failed Connection!";

/// Courtesy content of the END_CONVERSATION_REQUEST sent on teardown.
pub const FAREWELL: &str = "Bye bye now!";

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("node is stopped")]
    NotRunning,
    #[error("no live session with peer {0}")]
    UnknownPeer(String),
    #[error("session: {0}")]
    Session(#[from] SessionError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

/// How a session's dispatch loop ended.
#[derive(Debug)]
enum Ending {
    PeerEnded,
    Shutdown,
    Failed(SessionError),
}

enum Flow {
    Continue,
    PeerEnded,
}

struct NodeInner {
    local: Identity,
    store: Arc<ConversationStore>,
    registry: SessionRegistry,
    listen_addr: String,
    timeouts: TimeoutSection,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeInner {
    fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Subscribe to shutdown, or `None` if the node has already stopped.
    fn subscribe(&self) -> Option<broadcast::Receiver<()>> {
        let rx = self.shutdown_tx.subscribe();
        self.running.load(Ordering::SeqCst).then_some(rx)
    }
}

/// A running node. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct PeerNode {
    inner: Arc<NodeInner>,
}

impl PeerNode {
    pub fn new(
        local: Identity,
        store: Arc<ConversationStore>,
        listen_addr: impl Into<String>,
        timeouts: TimeoutSection,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(NodeInner {
                local,
                store,
                registry: SessionRegistry::new(),
                listen_addr: listen_addr.into(),
                timeouts,
                running: AtomicBool::new(true),
                shutdown_tx,
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn local(&self) -> &Identity {
        &self.inner.local
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.inner.store
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Bind the listener and spawn the accept loop. Returns the bound address.
    pub async fn start_listening(&self) -> Result<SocketAddr, NodeError> {
        let mut shutdown = self.inner.subscribe().ok_or(NodeError::NotRunning)?;
        let listener = TcpListener::bind(&self.inner.listen_addr)
            .await
            .map_err(|source| NodeError::Bind {
                addr: self.inner.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| NodeError::Bind {
            addr: self.inner.listen_addr.clone(),
            source,
        })?;
        tracing::info!(addr = %local_addr, node = %self.inner.local, "node: listening");

        let node = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            tracing::debug!(%remote, "node: accepted connection");
                            node.spawn_handler(stream, remote);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "node: accept failed");
                        }
                    },
                    _ = shutdown.recv() => {
                        tracing::info!("node: accept loop stopped");
                        break;
                    }
                }
            }
        });
        self.inner.track(handle);
        Ok(local_addr)
    }

    /// Dial `address` ("host:port") and run a session on the new connection.
    pub async fn start_conn(&self, address: &str) -> String {
        if !self.is_running() {
            return CONNECTION_FAILED.to_string();
        }
        match tokio::time::timeout(self.inner.timeouts.connect(), TcpStream::connect(address)).await
        {
            Ok(Ok(stream)) => {
                let remote = match stream.peer_addr() {
                    Ok(addr) => addr,
                    Err(e) => {
                        tracing::warn!(%address, error = %e, "node: connected socket has no peer address");
                        return CONNECTION_FAILED.to_string();
                    }
                };
                tracing::info!(%remote, "node: connection created");
                self.spawn_handler(stream, remote);
                CONNECTION_CREATED.to_string()
            }
            Ok(Err(e)) => {
                tracing::warn!(%address, error = %e, "node: connection failed");
                CONNECTION_FAILED.to_string()
            }
            Err(_) => {
                tracing::warn!(%address, "node: connection timed out");
                CONNECTION_FAILED.to_string()
            }
        }
    }

    /// Send a text message on the oldest live session with `peer_id`.
    pub async fn send_text(&self, peer_id: &str, content: &str) -> Result<Message, NodeError> {
        let session = self
            .inner
            .registry
            .find_by_peer(peer_id)
            .await
            .ok_or_else(|| NodeError::UnknownPeer(peer_id.to_string()))?;
        Ok(session
            .send(MessageType::TextMessageRequest, content)
            .await?)
    }

    pub async fn sessions(&self) -> Vec<SessionSnapshot> {
        self.inner.registry.snapshots().await
    }

    /// Clear the stored log for `peer_id` and the cache of any live session with it.
    pub async fn clear_history(&self, peer_id: &str) -> Result<(), NodeError> {
        self.inner.store.delete_history(peer_id)?;
        for (_, session) in self.inner.registry.list().await {
            if session.peer().id() == peer_id {
                session.clear_history();
            }
        }
        tracing::info!(peer = %peer_id, "node: history cleared");
        Ok(())
    }

    /// Stop accepting, end every session, wait for handlers, save the store.
    /// Calling it again is a no-op.
    pub async fn stop(&self) -> Result<(), NodeError> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("node: shutting down");
        let _ = self.inner.shutdown_tx.send(());

        let handles = std::mem::take(&mut *self.inner.handles());
        let grace = self.inner.timeouts.shutdown_grace();
        for handle in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "node: handler task failed"),
                Err(_) => {
                    tracing::debug!("node: handler did not finish in time, aborting");
                    abort.abort();
                }
            }
        }

        self.inner.store.save()?;
        tracing::info!(path = %self.inner.store.path().display(), "node: store saved, shutdown complete");
        Ok(())
    }

    fn spawn_handler(&self, stream: TcpStream, remote: SocketAddr) {
        let Some(shutdown) = self.inner.subscribe() else {
            tracing::debug!(%remote, "node: stopped, dropping connection");
            return;
        };
        let inner = self.inner.clone();
        let handle = tokio::spawn(handle_connection(inner, stream, remote, shutdown));
        self.inner.track(handle);
    }
}

/// Run `fut` with a deadline, abandoning it on shutdown.
async fn bounded<T>(
    phase: &'static str,
    limit: Duration,
    shutdown: &mut broadcast::Receiver<()>,
    fut: impl Future<Output = Result<T, SessionError>>,
) -> Result<T, SessionError> {
    tokio::select! {
        result = tokio::time::timeout(limit, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(SessionError::Timeout(phase)),
        },
        _ = shutdown.recv() => Err(SessionError::Shutdown),
    }
}

async fn handle_connection(
    inner: Arc<NodeInner>,
    stream: TcpStream,
    remote: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = split(stream);

    let handshake = perform_handshake(
        &mut reader,
        &mut writer,
        &inner.local,
        PeerIdentity::unresolved(remote),
    );
    let peer = match bounded("handshake", inner.timeouts.handshake(), &mut shutdown, handshake).await
    {
        Ok(peer) => peer,
        Err(e) => {
            tracing::warn!(%remote, error = %e, "node: handshake failed");
            writer.shutdown().await;
            return;
        }
    };

    let session = Arc::new(LiveSession::new(
        inner.local.clone(),
        peer,
        remote,
        writer,
        inner.store.clone(),
    ));
    let session_id = inner.registry.insert(session.clone()).await;

    let sync = sync_history(&session, &mut reader);
    let ending = match bounded("history sync", inner.timeouts.history_sync(), &mut shutdown, sync)
        .await
    {
        Ok(outcome) => {
            tracing::debug!(peer = %session.peer(), ?outcome, "node: history sync done");
            dispatch_loop(&session, &mut reader, &mut shutdown).await
        }
        Err(SessionError::Timeout(phase)) => {
            tracing::warn!(peer = %session.peer(), phase, "node: history sync timed out, continuing");
            dispatch_loop(&session, &mut reader, &mut shutdown).await
        }
        Err(SessionError::Shutdown) => Ending::Shutdown,
        Err(e) => Ending::Failed(e),
    };

    teardown(&inner, session_id, &session, &mut reader, ending).await;
}

async fn dispatch_loop(
    session: &LiveSession,
    reader: &mut FrameReader,
    shutdown: &mut broadcast::Receiver<()>,
) -> Ending {
    loop {
        let received = tokio::select! {
            received = session.receive(reader) => received,
            _ = shutdown.recv() => return Ending::Shutdown,
        };
        let message = match received {
            Ok(message) => message,
            Err(e) => return Ending::Failed(e),
        };
        match dispatch(session, &message).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::PeerEnded) => return Ending::PeerEnded,
            Err(e) => return Ending::Failed(e),
        }
    }
}

async fn dispatch(session: &LiveSession, message: &Message) -> Result<Flow, SessionError> {
    match message.kind() {
        MessageType::TextMessageRequest => on_text(session, message),
        MessageType::FriendRequest => on_friend_request(session, message),
        MessageType::EndFriends => on_end_friends(session, message),
        MessageType::ReadReceipt => on_read_receipt(session, message),
        MessageType::PulsecheckRequest => on_pulsecheck(session, message),
        MessageType::HistoryRequest => {
            serve_history(session).await?;
        }
        MessageType::EndConversationRequest => return Ok(Flow::PeerEnded),
        _ => on_bad_message(session, message),
    }
    Ok(Flow::Continue)
}

// ============================================================================
// Extension hooks -- log only
// ============================================================================

fn on_text(session: &LiveSession, message: &Message) {
    tracing::info!(peer = %session.peer(), content = message.content(), "message received");
}

fn on_friend_request(session: &LiveSession, _message: &Message) {
    tracing::info!(peer = %session.peer(), "friend request received");
}

fn on_end_friends(session: &LiveSession, _message: &Message) {
    tracing::info!(peer = %session.peer(), "end friends received");
}

fn on_read_receipt(session: &LiveSession, _message: &Message) {
    tracing::debug!(peer = %session.peer(), "read receipt received");
}

fn on_pulsecheck(session: &LiveSession, _message: &Message) {
    tracing::debug!(peer = %session.peer(), "pulsecheck received");
}

fn on_bad_message(session: &LiveSession, message: &Message) {
    tracing::warn!(peer = %session.peer(), kind = %message.kind(), "unexpected message type");
}

async fn teardown(
    inner: &NodeInner,
    session_id: SessionId,
    session: &LiveSession,
    reader: &mut FrameReader,
    ending: Ending,
) {
    match ending {
        Ending::PeerEnded => {
            tracing::info!(peer = %session.peer(), "node: peer ended conversation");
        }
        Ending::Shutdown | Ending::Failed(_) => {
            if let Ending::Failed(ref e) = ending {
                tracing::warn!(peer = %session.peer(), error = %e, "node: session failed");
            }
            if !reader.probe_closed(inner.timeouts.probe()).await {
                if let Err(e) = session
                    .send(MessageType::EndConversationRequest, FAREWELL)
                    .await
                {
                    tracing::debug!(peer = %session.peer(), error = %e, "node: farewell not sent");
                }
            }
        }
    }
    session.close().await;
    inner.registry.remove(session_id).await;
}
