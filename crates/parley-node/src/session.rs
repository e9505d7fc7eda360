//! Live sessions and the session registry.
//!
//! A `LiveSession` is one established conversation: the resolved peer, the
//! shared write half, and the in-memory history cache. The read half is
//! owned by the handler task and passed in where needed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use parley_protocol::{merge_histories, Identity, Message, MessageType, ProtocolError};
use parley_storage::{ConversationStore, StorageError};
use tokio::sync::RwLock;

use crate::transport::{FrameReader, FrameWriter, TransportError};

pub type SessionId = u64;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("node shutting down")]
    Shutdown,
}

pub struct LiveSession {
    local: Identity,
    peer: Identity,
    remote_addr: SocketAddr,
    writer: tokio::sync::Mutex<FrameWriter>,
    history: Mutex<Vec<Message>>,
    store: Arc<ConversationStore>,
}

impl LiveSession {
    pub fn new(
        local: Identity,
        peer: Identity,
        remote_addr: SocketAddr,
        writer: FrameWriter,
        store: Arc<ConversationStore>,
    ) -> Self {
        Self {
            local,
            peer,
            remote_addr,
            writer: tokio::sync::Mutex::new(writer),
            history: Mutex::new(Vec::new()),
            store,
        }
    }

    pub fn local(&self) -> &Identity {
        &self.local
    }

    pub fn peer(&self) -> &Identity {
        &self.peer
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    fn cache(&self) -> MutexGuard<'_, Vec<Message>> {
        // Cache is plain data; a poisoned lock still holds a usable Vec.
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Build a message to the peer, write it, then record it.
    pub async fn send(&self, kind: MessageType, content: &str) -> Result<Message, SessionError> {
        let message = Message::new(self.local.clone(), self.peer.clone(), content, kind);
        self.writer.lock().await.write_message(&message).await?;
        self.record(&message, false)?;
        Ok(message)
    }

    /// Read one message from the peer and record it.
    pub async fn receive(&self, reader: &mut FrameReader) -> Result<Message, SessionError> {
        let message = reader.read_message().await?;
        self.record(&message, true)?;
        Ok(message)
    }

    fn record(&self, message: &Message, received: bool) -> Result<(), SessionError> {
        if !message.kind().is_logged() {
            return Ok(());
        }
        self.cache().push(message.clone());
        self.store.write_message(message, received)?;
        Ok(())
    }

    pub fn history(&self) -> Vec<Message> {
        self.cache().clone()
    }

    /// Replace the cache wholesale. Empty input is a no-op.
    pub fn overwrite_history(&self, history: Vec<Message>) {
        if history.is_empty() {
            return;
        }
        *self.cache() = history;
    }

    /// Merge `incoming` into the cache and return the merged size.
    pub fn merge_history(&self, incoming: &[Message]) -> usize {
        let mut cache = self.cache();
        if !incoming.is_empty() {
            *cache = merge_histories(&cache, incoming);
        }
        cache.len()
    }

    pub fn clear_history(&self) {
        self.cache().clear();
    }

    /// Close our side of the connection.
    pub async fn close(&self) {
        self.writer.lock().await.shutdown().await;
    }
}

/// Point-in-time view of a session for the driver.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub peer: Identity,
    pub remote_addr: SocketAddr,
    pub history: Vec<Message>,
}

/// Thread-safe registry of established sessions.
///
/// Keyed by a per-connection id so two connections to the same peer do not
/// replace each other.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<SessionId, Arc<LiveSession>>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<LiveSession>) -> SessionId {
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = session.peer().to_string();
        let registry_size = {
            let mut registry = self.inner.write().await;
            registry.insert(session_id, session);
            registry.len()
        };
        tracing::info!(session_id, %peer, registry_size, "registry: session added");
        session_id
    }

    pub async fn remove(&self, session_id: SessionId) -> Option<Arc<LiveSession>> {
        let mut registry = self.inner.write().await;
        let removed = registry.remove(&session_id);
        if let Some(ref session) = removed {
            tracing::info!(
                session_id,
                peer = %session.peer(),
                registry_size = registry.len(),
                "registry: session removed"
            );
        }
        removed
    }

    pub async fn get(&self, session_id: SessionId) -> Option<Arc<LiveSession>> {
        self.inner.read().await.get(&session_id).cloned()
    }

    /// Oldest live session with `peer_id`.
    pub async fn find_by_peer(&self, peer_id: &str) -> Option<Arc<LiveSession>> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.peer().id() == peer_id)
            .min_by_key(|(id, _)| **id)
            .map(|(_, s)| s.clone())
    }

    pub async fn list(&self) -> Vec<(SessionId, Arc<LiveSession>)> {
        let mut sessions: Vec<_> = self
            .inner
            .read()
            .await
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();
        sessions.sort_by_key(|(id, _)| *id);
        sessions
    }

    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.list()
            .await
            .into_iter()
            .map(|(session_id, s)| SessionSnapshot {
                session_id,
                peer: s.peer().clone(),
                remote_addr: s.remote_addr(),
                history: s.history(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
