//! History merge: deduplicate two message sequences and order them by time.
//!
//! Used both by the conversation store and by live sessions, so that every
//! copy of a conversation converges on the same canonical sequence.

use std::collections::HashSet;

use crate::messages::Message;

/// Merge `current` and `incoming` into one canonical history.
///
/// First occurrence of each dedup key wins (so `current` takes precedence),
/// and the stable sort keeps concatenation order for equal timestamps.
pub fn merge_histories(current: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut seen = HashSet::with_capacity(current.len() + incoming.len());
    let mut merged: Vec<Message> = current
        .iter()
        .chain(incoming)
        .filter(|m| seen.insert(m.dedup_key()))
        .cloned()
        .collect();
    merged.sort_by_key(|m| m.timestamp());
    merged
}
