//! Wire message type and the fixed message-type taxonomy.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::{ProtocolError, TIMESTAMP_FORMAT};

/// Every message type a peer may send. Anything else fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    BeginConversationRequest,
    BeginConversationResponse,
    EndConversationRequest,
    EndConversationResponse,
    TextMessageRequest,
    TextMessageResponse,
    FriendRequest,
    FriendResponse,
    EndFriends,
    HistoryRequest,
    HistoryResponse,
    ReadReceipt,
    PulsecheckRequest,
    PulsecheckResponse,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::BeginConversationRequest => "BEGIN_CONVERSATION_REQUEST",
            MessageType::BeginConversationResponse => "BEGIN_CONVERSATION_RESPONSE",
            MessageType::EndConversationRequest => "END_CONVERSATION_REQUEST",
            MessageType::EndConversationResponse => "END_CONVERSATION_RESPONSE",
            MessageType::TextMessageRequest => "TEXT_MESSAGE_REQUEST",
            MessageType::TextMessageResponse => "TEXT_MESSAGE_RESPONSE",
            MessageType::FriendRequest => "FRIEND_REQUEST",
            MessageType::FriendResponse => "FRIEND_RESPONSE",
            MessageType::EndFriends => "END_FRIENDS",
            MessageType::HistoryRequest => "HISTORY_REQUEST",
            MessageType::HistoryResponse => "HISTORY_RESPONSE",
            MessageType::ReadReceipt => "READ_RECEIPT",
            MessageType::PulsecheckRequest => "PULSECHECK_REQUEST",
            MessageType::PulsecheckResponse => "PULSECHECK_RESPONSE",
            MessageType::Error => "ERROR",
        }
    }

    /// Whether messages of this type belong in a conversation log.
    ///
    /// Handshake and history-sync traffic is connection plumbing: logging a
    /// HISTORY_RESPONSE would embed the whole log inside itself.
    pub fn is_logged(&self) -> bool {
        !matches!(
            self,
            MessageType::BeginConversationRequest
                | MessageType::BeginConversationResponse
                | MessageType::HistoryRequest
                | MessageType::HistoryResponse
                | MessageType::Error
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable message. The timestamp is validated on construction, so a
/// `Message` value always carries a parseable time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    sender: Identity,
    receiver: Identity,
    content: String,
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(rename = "datetime", with = "timestamp")]
    timestamp: NaiveDateTime,
}

impl Message {
    /// New message stamped with the current local time (second resolution).
    pub fn new(
        sender: Identity,
        receiver: Identity,
        content: impl Into<String>,
        kind: MessageType,
    ) -> Self {
        let now = chrono::Local::now().naive_local();
        let timestamp = now.with_nanosecond(0).unwrap_or(now);
        Self {
            sender,
            receiver,
            content: content.into(),
            kind,
            timestamp,
        }
    }

    /// Message with an explicit "YYYY-MM-DD HH:MM:SS" timestamp.
    pub fn with_timestamp(
        sender: Identity,
        receiver: Identity,
        content: impl Into<String>,
        kind: MessageType,
        datetime: &str,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            sender,
            receiver,
            content: content.into(),
            kind,
            timestamp: parse_timestamp(datetime)?,
        })
    }

    pub fn sender(&self) -> &Identity {
        &self.sender
    }

    pub fn receiver(&self) -> &Identity {
        &self.receiver
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn datetime(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Composite key used for deduplication during merge.
    pub fn dedup_key(&self) -> String {
        let mut key = self.sender.to_wire_string();
        key.push_str(&self.receiver.to_wire_string());
        key.push_str(&self.content);
        key.push_str(self.kind.as_str());
        key.push_str(&self.datetime());
        key
    }

    /// JSON text of this message, as stored in logs and sent on the wire.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, ProtocolError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|source| {
        ProtocolError::InvalidTimestamp {
            value: value.to_string(),
            source,
        }
    })
}

/// Pack a history into HISTORY_RESPONSE content: a JSON array of serialized messages.
pub fn encode_history(history: &[Message]) -> Result<String, ProtocolError> {
    let entries = history
        .iter()
        .map(Message::to_json)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(serde_json::to_string(&entries)?)
}

/// Unpack HISTORY_RESPONSE content. Empty content is an empty history.
pub fn decode_history(content: &str) -> Result<Vec<Message>, ProtocolError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<String> = serde_json::from_str(content)?;
    entries.iter().map(|e| Message::from_json(e)).collect()
}

/// Serialize/deserialize NaiveDateTime as "YYYY-MM-DD HH:MM:SS".
mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    use crate::TIMESTAMP_FORMAT;

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}
