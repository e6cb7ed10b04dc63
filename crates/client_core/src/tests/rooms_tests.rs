use super::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use shared::protocol::{NewMessage, StoredMessage};
use tokio::sync::Mutex;

#[derive(Default)]
struct RecordingStore {
    rooms: Mutex<Vec<Room>>,
    created: Mutex<Vec<NewRoom>>,
    deleted: Mutex<Vec<RoomId>>,
}

#[async_trait]
impl ChatStore for RecordingStore {
    async fn list_rooms(&self) -> Result<Vec<Room>> {
        Ok(self.rooms.lock().await.clone())
    }

    async fn create_room(&self, room: NewRoom) -> Result<Room> {
        self.created.lock().await.push(room.clone());
        Ok(Room {
            room_id: RoomId(1),
            name: room.name,
            created_at: Utc::now(),
            encryption_key: room.encryption_key,
        })
    }

    async fn delete_room(&self, room_id: RoomId) -> Result<()> {
        if room_id.0 < 0 {
            return Err(anyhow!("room not found"));
        }
        self.deleted.lock().await.push(room_id);
        Ok(())
    }

    async fn list_messages(&self, _room_id: RoomId) -> Result<Vec<StoredMessage>> {
        Ok(Vec::new())
    }

    async fn insert_message(&self, _message: NewMessage) -> Result<StoredMessage> {
        Err(anyhow!("not used"))
    }
}

#[tokio::test]
async fn lists_rooms_newest_first() {
    let store = Arc::new(RecordingStore::default());
    let now = Utc::now();
    *store.rooms.lock().await = vec![
        Room {
            room_id: RoomId(1),
            name: "old".into(),
            created_at: now - Duration::minutes(5),
            encryption_key: None,
        },
        Room {
            room_id: RoomId(2),
            name: "new".into(),
            created_at: now,
            encryption_key: None,
        },
    ];

    let rooms = RoomDirectory::new(store).list_rooms().await.expect("rooms");
    let names: Vec<_> = rooms.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["new", "old"]);
}

#[tokio::test]
async fn encrypted_room_gets_a_generated_key() {
    let store = Arc::new(RecordingStore::default());
    let directory = RoomDirectory::new(store.clone());

    let secret = directory.create_room("  vault ", true).await.expect("create");
    let plain = directory.create_room("lobby", false).await.expect("create");

    assert_eq!(secret.name, "vault");
    assert!(secret.is_encrypted());
    assert!(!plain.is_encrypted());

    let created = store.created.lock().await;
    assert_eq!(created.len(), 2);
    assert!(created[0]
        .encryption_key
        .as_deref()
        .is_some_and(|key| key.len() >= 43));
}

#[tokio::test]
async fn blank_room_name_is_rejected_locally() {
    let store = Arc::new(RecordingStore::default());
    let directory = RoomDirectory::new(store.clone());

    let err = directory.create_room("   ", true).await.expect_err("blank");
    assert!(matches!(err, RoomError::EmptyName));
    assert!(store.created.lock().await.is_empty());
}

#[tokio::test]
async fn delete_surfaces_backend_errors() {
    let store = Arc::new(RecordingStore::default());
    let directory = RoomDirectory::new(store.clone());

    directory.delete_room(RoomId(4)).await.expect("delete");
    let err = directory.delete_room(RoomId(-1)).await.expect_err("missing");
    assert!(matches!(err, RoomError::Backend(_)));
    assert_eq!(*store.deleted.lock().await, vec![RoomId(4)]);
}
