//! Conversation handshake -- exchange name and id over a fresh socket.
//!
//! Both sides open with BEGIN_CONVERSATION_REQUEST. Whichever BEGIN type
//! arrives first settles the peer's identity:
//!   RESPONSE -- the peer answered our request
//!   REQUEST  -- simultaneous open; answer it with our own RESPONSE
//!
//! Handshake messages are addressed to the unresolved placeholder and are
//! never recorded.

use parley_protocol::identity::parse_handshake_content;
use parley_protocol::{Identity, Message, MessageType, PeerIdentity};

use crate::session::SessionError;
use crate::transport::{FrameReader, FrameWriter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    AwaitPeerInfo,
    Established(Identity),
}

/// Run the handshake to completion and return the peer's resolved identity.
///
/// Unbounded on its own; the caller applies the deadline and shutdown.
pub async fn perform_handshake(
    reader: &mut FrameReader,
    writer: &mut FrameWriter,
    local: &Identity,
    peer: PeerIdentity,
) -> Result<Identity, SessionError> {
    let placeholder = peer.placeholder();
    let mut state = HandshakeState::Init;

    loop {
        state = match state {
            HandshakeState::Init => {
                let request = Message::new(
                    local.clone(),
                    placeholder.clone(),
                    local.handshake_content(),
                    MessageType::BeginConversationRequest,
                );
                writer.write_message(&request).await?;
                HandshakeState::AwaitPeerInfo
            }
            HandshakeState::AwaitPeerInfo => {
                let message = reader.read_message().await?;
                match message.kind() {
                    MessageType::BeginConversationResponse => {
                        let (name, id) = parse_handshake_content(message.content())?;
                        HandshakeState::Established(peer.clone().resolve(name, id)?)
                    }
                    MessageType::BeginConversationRequest => {
                        let (name, id) = parse_handshake_content(message.content())?;
                        let resolved = peer.clone().resolve(name, id)?;
                        let response = Message::new(
                            local.clone(),
                            resolved.clone(),
                            local.handshake_content(),
                            MessageType::BeginConversationResponse,
                        );
                        writer.write_message(&response).await?;
                        HandshakeState::Established(resolved)
                    }
                    other => {
                        tracing::debug!(
                            peer = %placeholder.id(),
                            kind = %other,
                            "handshake: discarding message before peer info"
                        );
                        HandshakeState::AwaitPeerInfo
                    }
                }
            }
            HandshakeState::Established(resolved) => {
                tracing::info!(peer = %resolved, addr = %placeholder.id(), "handshake: established");
                return Ok(resolved);
            }
        };
    }
}
