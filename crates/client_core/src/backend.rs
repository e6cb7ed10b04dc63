use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::RoomId,
    protocol::{NewMessage, NewRoom, Room, Session, StoredMessage},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_session(&self) -> Option<Session>;
    /// Observes sign-in and sign-out. `None` means signed out.
    fn watch_session(&self) -> watch::Receiver<Option<Session>>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<Room>>;
    async fn create_room(&self, room: NewRoom) -> Result<Room>;
    async fn delete_room(&self, room_id: RoomId) -> Result<()>;
    /// All messages of a room, oldest first.
    async fn list_messages(&self, room_id: RoomId) -> Result<Vec<StoredMessage>>;
    async fn insert_message(&self, message: NewMessage) -> Result<StoredMessage>;
}

#[async_trait]
pub trait LiveNotifier: Send + Sync {
    async fn subscribe(&self, room_id: RoomId) -> Result<Subscription>;
}

/// Stream of messages inserted into one room.
///
/// Dropping the subscription stops the forwarding task behind it, if any.
pub struct Subscription {
    room_id: RoomId,
    receiver: mpsc::Receiver<StoredMessage>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        room_id: RoomId,
        receiver: mpsc::Receiver<StoredMessage>,
        forwarder: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            room_id,
            receiver,
            forwarder,
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub async fn recv(&mut self) -> Option<StoredMessage> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

pub struct MissingLiveNotifier;

#[async_trait]
impl LiveNotifier for MissingLiveNotifier {
    async fn subscribe(&self, room_id: RoomId) -> Result<Subscription> {
        Err(anyhow!(
            "live notifications unavailable for room {}",
            room_id.0
        ))
    }
}

pub struct MissingAuthProvider {
    session: watch::Sender<Option<Session>>,
}

impl Default for MissingAuthProvider {
    fn default() -> Self {
        let (session, _) = watch::channel(None);
        Self { session }
    }
}

#[async_trait]
impl AuthProvider for MissingAuthProvider {
    async fn current_session(&self) -> Option<Session> {
        None
    }

    fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }
}
