//! Parley Storage -- per-peer conversation logs in one JSON document.
//!
//! One store per node, keyed by the host's id. All access goes through a
//! single mutex; contention is low (one writer per live session).
//!
//! Document layout:
//! `{"host": "<identity>", "histories": {"<peer id>": {name, id, ip, port, receiver, message_history}}}`
//! where every `message_history` element is the JSON text of one message.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use parley_protocol::{merge_histories, Identity, Message, ProtocolError};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sender mismatch: message from {sender} written as outgoing by host {host}")]
    SenderMismatch { sender: String, host: String },
    #[error("no history entry for peer {0}")]
    EntryNotFound(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// When the store is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Save after every mutation.
    #[default]
    EveryWrite,
    /// Save only when explicitly asked (node shutdown).
    OnShutdown,
}

/// Result of [`ConversationStore::write_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// First message with this peer: a new entry was created.
    Created,
    /// Appended to an existing entry.
    Appended,
}

/// Stored conversation with one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub name: String,
    pub id: String,
    pub ip: String,
    pub port: u16,
    /// Wire-form identity snapshot taken when the entry was created.
    pub receiver: String,
    pub message_history: Vec<String>,
}

impl HistoryEntry {
    fn new(peer: &Identity, message_history: Vec<String>) -> Self {
        Self {
            name: peer.name().to_string(),
            id: peer.id().to_string(),
            ip: peer.ip().to_string(),
            port: peer.port(),
            receiver: peer.to_wire_string(),
            message_history,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Table {
    host: String,
    histories: BTreeMap<String, HistoryEntry>,
}

impl Table {
    fn empty(host: &Identity) -> Self {
        Self {
            host: host.to_wire_string(),
            histories: BTreeMap::new(),
        }
    }
}

/// Durable mapping peer id → conversation log.
pub struct ConversationStore {
    host: Identity,
    path: PathBuf,
    durability: Durability,
    table: Mutex<Table>,
}

impl ConversationStore {
    /// Open the store for `host` under `data_dir`, loading any prior state.
    pub fn open(data_dir: &Path, host: Identity, durability: Durability) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(format!("{}_table.json", host.id()));
        let store = Self {
            table: Mutex::new(Table::empty(&host)),
            host,
            path,
            durability,
        };
        store.load()?;
        Ok(store)
    }

    pub fn host(&self) -> &Identity {
        &self.host
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self) -> Result<MutexGuard<'_, Table>> {
        self.table.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Record a sent (`received == false`) or received message under the
    /// counterpart's id.
    pub fn write_message(&self, message: &Message, received: bool) -> Result<WriteOutcome> {
        let counterpart = if message.sender() == &self.host {
            message.receiver()
        } else if received {
            message.sender()
        } else {
            return Err(StorageError::SenderMismatch {
                sender: message.sender().id().to_string(),
                host: self.host.id().to_string(),
            });
        };
        let serialized = message.to_json()?;

        let mut table = self.table()?;
        let outcome = match table.histories.get_mut(counterpart.id()) {
            Some(entry) => {
                entry.message_history.push(serialized);
                WriteOutcome::Appended
            }
            None => {
                table.histories.insert(
                    counterpart.id().to_string(),
                    HistoryEntry::new(counterpart, vec![serialized]),
                );
                tracing::debug!(peer = counterpart.id(), "store: new history entry");
                WriteOutcome::Created
            }
        };
        self.persist_after_write(&table)?;
        Ok(outcome)
    }

    /// Deserialized log for `peer_id`; empty if absent or malformed.
    pub fn read_history(&self, peer_id: &str) -> Result<Vec<Message>> {
        let table = self.table()?;
        Ok(Self::parse_log(&table, peer_id))
    }

    fn parse_log(table: &Table, peer_id: &str) -> Vec<Message> {
        match Self::parse_log_strict(table, peer_id) {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(peer = peer_id, error = %e, "store: malformed history entry");
                Vec::new()
            }
        }
    }

    /// Deserialized log for `peer_id`, failing on the first malformed line.
    fn parse_log_strict(table: &Table, peer_id: &str) -> Result<Vec<Message>> {
        let Some(entry) = table.histories.get(peer_id) else {
            return Ok(Vec::new());
        };
        Ok(entry
            .message_history
            .iter()
            .map(|m| Message::from_json(m))
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Replace a peer's log wholesale. No-op when `history` is empty.
    pub fn overwrite_history(&self, peer: &Identity, history: &[Message]) -> Result<()> {
        if history.is_empty() {
            return Ok(());
        }
        let serialized = history
            .iter()
            .map(Message::to_json)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut table = self.table()?;
        Self::replace_log(&mut table, peer, serialized);
        self.persist_after_write(&table)
    }

    /// Merge `history` into a peer's log (dedup + time order), then overwrite.
    /// A malformed stored log is left untouched and reported as an error.
    pub fn merge_history(&self, peer: &Identity, history: &[Message]) -> Result<()> {
        if history.is_empty() {
            return Ok(());
        }
        let mut table = self.table()?;
        let current = Self::parse_log_strict(&table, peer.id())?;
        let merged = merge_histories(&current, history);
        let serialized = merged
            .iter()
            .map(Message::to_json)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::replace_log(&mut table, peer, serialized);
        tracing::debug!(
            peer = peer.id(),
            incoming = history.len(),
            merged = merged.len(),
            "store: history merged"
        );
        self.persist_after_write(&table)
    }

    fn replace_log(table: &mut Table, peer: &Identity, serialized: Vec<String>) {
        match table.histories.get_mut(peer.id()) {
            Some(entry) => entry.message_history = serialized,
            None => {
                table
                    .histories
                    .insert(peer.id().to_string(), HistoryEntry::new(peer, serialized));
            }
        }
    }

    /// Clear a peer's log, keeping the entry.
    pub fn delete_history(&self, peer_id: &str) -> Result<()> {
        let mut table = self.table()?;
        let entry = table
            .histories
            .get_mut(peer_id)
            .ok_or_else(|| StorageError::EntryNotFound(peer_id.to_string()))?;
        entry.message_history.clear();
        self.persist_after_write(&table)
    }

    /// Remove a peer's entry entirely. Returns whether anything was removed.
    pub fn delete_receiver_entry(&self, peer_id: &str) -> Result<bool> {
        let mut table = self.table()?;
        let removed = table.histories.remove(peer_id).is_some();
        if removed {
            self.persist_after_write(&table)?;
        }
        Ok(removed)
    }

    /// Metadata snapshot for a peer, if an entry exists.
    pub fn entry(&self, peer_id: &str) -> Result<Option<HistoryEntry>> {
        Ok(self.table()?.histories.get(peer_id).cloned())
    }

    /// Ids of all peers with an entry.
    pub fn peers(&self) -> Result<Vec<String>> {
        Ok(self.table()?.histories.keys().cloned().collect())
    }

    /// Write the whole store to disk.
    pub fn save(&self) -> Result<()> {
        let table = self.table()?;
        self.persist(&table)
    }

    /// Replace in-memory state with the document on disk. A missing or
    /// corrupt document leaves an empty store. Returns whether prior state
    /// was found.
    pub fn load(&self) -> Result<bool> {
        let loaded = std::fs::read_to_string(&self.path)
            .map_err(StorageError::from)
            .and_then(|raw| Ok(serde_json::from_str::<Table>(&raw)?));

        let mut table = self.table()?;
        match loaded {
            Ok(mut doc) => {
                doc.host = self.host.to_wire_string();
                tracing::info!(
                    path = %self.path.display(),
                    peers = doc.histories.len(),
                    "store: loaded"
                );
                *table = doc;
                Ok(true)
            }
            Err(e) => {
                tracing::info!(
                    path = %self.path.display(),
                    reason = %e,
                    "store: no prior state, starting empty"
                );
                *table = Table::empty(&self.host);
                Ok(false)
            }
        }
    }

    fn persist_after_write(&self, table: &Table) -> Result<()> {
        match self.durability {
            Durability::EveryWrite => self.persist(table),
            Durability::OnShutdown => Ok(()),
        }
    }

    fn persist(&self, table: &Table) -> Result<()> {
        let json = serde_json::to_vec(table)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
