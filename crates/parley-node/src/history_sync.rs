//! History sync -- one-shot reconciliation right after the handshake.
//!
//! A stored log with more than one message is trusted as-is. Otherwise we
//! ask the peer with HISTORY_REQUEST and merge whatever comes back. If the
//! peer asks first we serve our log and stop without waiting for theirs.

use parley_protocol::messages::{decode_history, encode_history};
use parley_protocol::{MessageType, ProtocolError};
use parley_storage::StorageError;

use crate::session::{LiveSession, SessionError};
use crate::transport::{FrameReader, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Cache adopted from the store; nothing sent.
    FromStore(usize),
    /// Peer's log merged; value is the merged cache size.
    Merged(usize),
    /// Peer answered with an empty log.
    PeerEmpty,
    /// Peer asked first; we sent it this many messages.
    ServedPeer(usize),
}

/// Reconcile the session cache and store with the peer.
///
/// Unbounded on its own; the caller applies the deadline and shutdown.
pub async fn sync_history(
    session: &LiveSession,
    reader: &mut FrameReader,
) -> Result<SyncOutcome, SessionError> {
    let peer_id = session.peer().id().to_string();
    let stored = session.store().read_history(&peer_id)?;
    if stored.len() > 1 {
        let n = stored.len();
        session.overwrite_history(stored);
        tracing::debug!(peer = %peer_id, messages = n, "sync: history loaded from store");
        return Ok(SyncOutcome::FromStore(n));
    }

    session.send(MessageType::HistoryRequest, "").await?;

    loop {
        let message = session.receive(reader).await?;
        match message.kind() {
            MessageType::HistoryResponse => {
                let incoming = decode_history(message.content())?;
                if incoming.is_empty() {
                    tracing::debug!(peer = %peer_id, "sync: peer has no history");
                    return Ok(SyncOutcome::PeerEmpty);
                }
                let merged = session.merge_history(&incoming);
                match session.store().merge_history(session.peer(), &incoming) {
                    Ok(()) => {}
                    Err(StorageError::Protocol(e)) => {
                        tracing::warn!(
                            peer = %peer_id,
                            error = %e,
                            "sync: stored log is malformed, left unmerged"
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
                tracing::info!(
                    peer = %peer_id,
                    received = incoming.len(),
                    merged,
                    "sync: history merged"
                );
                return Ok(SyncOutcome::Merged(merged));
            }
            MessageType::HistoryRequest => {
                let n = serve_history(session).await?;
                return Ok(SyncOutcome::ServedPeer(n));
            }
            other => {
                tracing::debug!(peer = %peer_id, kind = %other, "sync: discarding message");
            }
        }
    }
}

/// Answer a HISTORY_REQUEST with our stored log. Returns the message count,
/// or 0 when the log is too large for one frame and nothing was sent.
pub async fn serve_history(session: &LiveSession) -> Result<usize, SessionError> {
    let log = session.store().read_history(session.peer().id())?;
    let content = encode_history(&log)?;
    match session.send(MessageType::HistoryResponse, &content).await {
        Ok(_) => {}
        Err(SessionError::Transport(TransportError::Protocol(
            e @ ProtocolError::MessageTooLarge { .. },
        ))) => {
            tracing::warn!(
                peer = %session.peer(),
                messages = log.len(),
                error = %e,
                "sync: history too large to serve, skipped"
            );
            return Ok(0);
        }
        Err(e) => return Err(e),
    }
    tracing::debug!(peer = %session.peer(), messages = log.len(), "sync: served history");
    Ok(log.len())
}
