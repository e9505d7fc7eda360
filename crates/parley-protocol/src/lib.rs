//! Parley Protocol -- wire types, message codec, history merge.
//!
//! TCP between peers. One connection per conversation.
//! 4-byte big-endian length prefix + serde JSON.

pub mod codec;
pub mod identity;
pub mod merge;
pub mod messages;

pub use codec::MessageCodec;
pub use identity::{Identity, PeerIdentity};
pub use merge::merge_histories;
pub use messages::{Message, MessageType};

/// Joins the four identity fields in their wire string form.
pub const IDENTITY_DELIMITER: &str = "_*!*ID*!*DELIM*!*_";

/// Joins name and id in BEGIN_CONVERSATION_* content.
pub const HANDSHAKE_DELIMITER: &str = "_*!*BEGINDELIM*!*_";

/// Message timestamp format, second resolution.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Maximum frame payload: 16 MB (history responses carry whole logs).
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("invalid handshake content: {0:?}")]
    InvalidHandshake(String),
    #[error("invalid timestamp {value:?}: {source}")]
    InvalidTimestamp {
        value: String,
        source: chrono::ParseError,
    },
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
