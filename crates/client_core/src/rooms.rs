use std::sync::Arc;

use shared::{
    domain::RoomId,
    protocol::{NewRoom, Room},
};
use thiserror::Error;
use tracing::info;

use crate::{backend::ChatStore, keys::generate_room_key};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room name must not be empty")]
    EmptyName,
    #[error("room request failed: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Lists, creates and deletes rooms.
pub struct RoomDirectory {
    store: Arc<dyn ChatStore>,
}

impl RoomDirectory {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Rooms, newest first.
    pub async fn list_rooms(&self) -> Result<Vec<Room>, RoomError> {
        let mut rooms = self.store.list_rooms().await?;
        rooms.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.room_id.cmp(&a.room_id))
        });
        Ok(rooms)
    }

    /// Creates a room. An encrypted room gets a freshly generated key that is
    /// stored on the room record.
    pub async fn create_room(&self, name: &str, encrypted: bool) -> Result<Room, RoomError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RoomError::EmptyName);
        }
        let encryption_key =
            encrypted.then(|| generate_room_key().expose_secret().to_string());
        let room = self
            .store
            .create_room(NewRoom {
                name: name.to_string(),
                encryption_key,
            })
            .await?;
        info!(room_id = room.room_id.0, encrypted, "room created");
        Ok(room)
    }

    pub async fn delete_room(&self, room_id: RoomId) -> Result<(), RoomError> {
        self.store.delete_room(room_id).await?;
        info!(room_id = room_id.0, "room deleted");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/rooms_tests.rs"]
mod tests;
