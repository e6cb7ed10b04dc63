use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, UserId},
    protocol::StoredMessage,
};

/// How the displayed content relates to what was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentState {
    /// Stored unencrypted and shown as-is.
    Plain,
    /// Stored encrypted and successfully opened with the room key.
    Decrypted,
    /// Stored encrypted but the key did not open it; content is the raw ciphertext.
    Undecryptable,
    /// Stored encrypted and the viewer has no key; content is the raw ciphertext.
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub message_id: MessageId,
    pub content: String,
    pub sender_id: UserId,
    pub sender_display_name: String,
    pub timestamp: DateTime<Utc>,
    pub was_encrypted: bool,
    pub is_own: bool,
    pub content_state: ContentState,
}

/// Known sender names, keyed by user id.
#[derive(Debug, Clone, Default)]
pub struct SenderDirectory {
    names: HashMap<UserId, String>,
}

impl SenderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the stored name changed.
    pub fn insert(&mut self, user_id: UserId, username: impl Into<String>) -> bool {
        let username = username.into();
        if username.is_empty() || self.names.get(&user_id) == Some(&username) {
            return false;
        }
        self.names.insert(user_id, username);
        true
    }

    pub fn get(&self, user_id: UserId) -> Option<&str> {
        self.names.get(&user_id).map(String::as_str)
    }

    pub fn record(&mut self, message: &StoredMessage) -> bool {
        match message.sender_username.as_deref() {
            Some(username) => self.insert(message.sender_id, username),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
