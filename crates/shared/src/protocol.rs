use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MessageId, RoomId, UserId};

/// A chat room. `encryption_key` is only present for rooms created with
/// encryption enabled and is never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

impl Room {
    pub fn is_encrypted(&self) -> bool {
        self.encryption_key
            .as_deref()
            .is_some_and(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRoom {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

/// A persisted message. `content` holds ciphertext when `encrypted` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    pub content: String,
    pub encrypted: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for a message; id and timestamp are assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    pub content: String,
    pub encrypted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageInserted { message: StoredMessage },
    RoomCreated { room: Room },
    RoomDeleted { room_id: RoomId },
}

impl ServerEvent {
    /// Room the event is scoped to, used to filter per-room subscriptions.
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::MessageInserted { message } => message.room_id,
            Self::RoomCreated { room } => room.room_id,
            Self::RoomDeleted { room_id } => *room_id,
        }
    }
}
