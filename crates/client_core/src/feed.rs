use std::collections::HashMap;

use shared::domain::MessageId;

use crate::types::DisplayMessage;

/// Ordered, duplicate-free view of one room's messages.
///
/// Messages are kept sorted by `(timestamp, message_id)`; each id appears
/// at most once.
#[derive(Debug, Default, Clone)]
pub struct MessageFeed {
    messages: Vec<DisplayMessage>,
}

impl MessageFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[DisplayMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, message_id: MessageId) -> bool {
        self.messages.iter().any(|m| m.message_id == message_id)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn replace_with_snapshot(&mut self, snapshot: Vec<DisplayMessage>) {
        let mut by_id: HashMap<MessageId, DisplayMessage> = HashMap::with_capacity(snapshot.len());
        for message in snapshot {
            by_id.insert(message.message_id, message);
        }
        self.messages = by_id.into_values().collect();
        self.messages.sort_by(order);
    }

    /// Adds a message unless its id is already present. Returns whether the
    /// feed changed.
    pub fn apply_insert(&mut self, message: DisplayMessage) -> bool {
        if self.contains(message.message_id) {
            return false;
        }
        // Pushed messages are usually the newest, so search from the back.
        let position = self
            .messages
            .iter()
            .rposition(|existing| order(existing, &message).is_le())
            .map_or(0, |idx| idx + 1);
        self.messages.insert(position, message);
        true
    }

    /// Merges a fresh bulk read into the feed.
    ///
    /// Snapshot entries replace stale projections of the same id. Ids that
    /// are displayed but missing from the snapshot stay put, so a snapshot
    /// taken just before a pushed insert never removes that insert.
    pub fn reconcile(&mut self, snapshot: Vec<DisplayMessage>) -> bool {
        let mut merged: HashMap<MessageId, DisplayMessage> = self
            .messages
            .iter()
            .map(|message| (message.message_id, message.clone()))
            .collect();
        for message in snapshot {
            merged.insert(message.message_id, message);
        }

        let mut next: Vec<DisplayMessage> = merged.into_values().collect();
        next.sort_by(order);
        let changed = next != self.messages;
        self.messages = next;
        changed
    }
}

fn order(a: &DisplayMessage, b: &DisplayMessage) -> std::cmp::Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.message_id.cmp(&b.message_id))
}

#[cfg(test)]
#[path = "tests/feed_tests.rs"]
mod tests;
