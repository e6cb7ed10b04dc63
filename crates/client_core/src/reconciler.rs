use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError,
    },
    time::Duration,
};

use shared::protocol::{NewMessage, Room, Session, StoredMessage};
use thiserror::Error;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    backend::{AuthProvider, ChatStore, LiveNotifier, Subscription},
    cipher::{CipherEngine, CipherError},
    config::ClientSettings,
    feed::MessageFeed,
    keys::room_key,
    normalizer::{normalize, NormalizeContext},
    types::{DisplayMessage, SenderDirectory},
};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Uninitialized,
    Loading,
    Live,
    Closed,
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
    StateChanged(FeedState),
    MessagesUpdated(Vec<DisplayMessage>),
    Error(String),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("no signed-in session")]
    NotSignedIn,
    #[error("feed is closed")]
    Closed,
    #[error("no room entered")]
    NoRoom,
    #[error("backend request failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("message is empty")]
    Empty,
    #[error("no room entered")]
    NoRoom,
    #[error("this room has no encryption key")]
    EncryptionUnavailable,
    #[error("failed to encrypt message: {source}")]
    Encryption { draft: String, source: CipherError },
    #[error("failed to send message: {source}")]
    Backend {
        draft: String,
        source: anyhow::Error,
    },
}

impl SendError {
    /// The unsent text to hand back to the composer, when there is one.
    pub fn draft(&self) -> Option<&str> {
        match self {
            Self::Encryption { draft, .. } | Self::Backend { draft, .. } => Some(draft),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedOptions {
    pub reconcile_interval: Duration,
    pub event_capacity: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl From<&ClientSettings> for FeedOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            reconcile_interval: settings.reconcile_interval,
            event_capacity: settings.event_capacity,
        }
    }
}

/// Live, reconciled view of the messages in one room at a time.
///
/// Entering a room loads its history, subscribes to inserts, and starts a
/// periodic re-read that heals missed pushes. Entering another room or
/// closing the feed cancels all of that first. Every mutation from a
/// background task is checked against the room generation it was started
/// for, so a late event from a previous room is dropped.
pub struct LiveFeed {
    shared: Arc<FeedShared>,
}

struct FeedShared {
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn ChatStore>,
    notifier: Arc<dyn LiveNotifier>,
    options: FeedOptions,
    inner: Mutex<FeedInner>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    refreshing: AtomicBool,
    events: broadcast::Sender<FeedEvent>,
}

struct FeedInner {
    state: FeedState,
    generation: u64,
    active: Option<ActiveRoom>,
    feed: MessageFeed,
    directory: SenderDirectory,
    encrypt_outgoing: bool,
}

struct ActiveRoom {
    room: Room,
    session: Session,
    engine: Option<Arc<CipherEngine>>,
}

impl FeedInner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state != FeedState::Closed
    }

    fn normalize_all(&mut self, rows: &[StoredMessage]) -> Vec<DisplayMessage> {
        let Some(active) = &self.active else {
            return Vec::new();
        };
        for row in rows {
            self.directory.record(row);
        }
        let ctx = NormalizeContext {
            current_user_id: active.session.user_id,
            directory: &self.directory,
        };
        rows.iter()
            .filter(|row| row.room_id == active.room.room_id)
            .map(|row| normalize(row, &ctx, active.engine.as_deref()))
            .collect()
    }
}

impl LiveFeed {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn ChatStore>,
        notifier: Arc<dyn LiveNotifier>,
        options: FeedOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            shared: Arc::new(FeedShared {
                auth,
                store,
                notifier,
                options,
                inner: Mutex::new(FeedInner {
                    state: FeedState::Uninitialized,
                    generation: 0,
                    active: None,
                    feed: MessageFeed::new(),
                    directory: SenderDirectory::new(),
                    encrypt_outgoing: false,
                }),
                tasks: std::sync::Mutex::new(Vec::new()),
                refreshing: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FeedEvent> {
        self.shared.events.subscribe()
    }

    pub async fn state(&self) -> FeedState {
        self.shared.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> Vec<DisplayMessage> {
        self.shared.inner.lock().await.feed.messages().to_vec()
    }

    pub async fn current_room(&self) -> Option<Room> {
        let guard = self.shared.inner.lock().await;
        guard.active.as_ref().map(|active| active.room.clone())
    }

    pub async fn encryption_enabled(&self) -> bool {
        self.shared.inner.lock().await.encrypt_outgoing
    }

    /// Switches the feed to `room`.
    ///
    /// The insert subscription is opened before the history read, so a row
    /// written in between is buffered and merged once the feed is live.
    /// A failed history read or subscription is reported as a
    /// [`FeedEvent::Error`] and the feed still goes live; the reconcile tick
    /// retries the read.
    pub async fn enter_room(&self, room: Room) -> Result<(), FeedError> {
        let session = self
            .shared
            .auth
            .current_session()
            .await
            .ok_or(FeedError::NotSignedIn)?;

        let room_id = room.room_id;
        let generation = {
            let mut guard = self.shared.inner.lock().await;
            if guard.state == FeedState::Closed {
                return Err(FeedError::Closed);
            }
            guard.generation += 1;
            // Tasks are registered under this lock after a generation check.
            self.shared.abort_tasks();
            guard.feed.clear();
            guard.directory = SenderDirectory::new();
            guard
                .directory
                .insert(session.user_id, session.username.clone());

            let engine = room_key(&room).map(|key| Arc::new(CipherEngine::new(&key)));
            guard.encrypt_outgoing = engine.is_some();
            info!(
                room_id = room_id.0,
                encrypted = engine.is_some(),
                "entering room"
            );
            guard.active = Some(ActiveRoom {
                room,
                session,
                engine,
            });
            self.shared.set_state(&mut guard, FeedState::Loading);
            let _ = self.shared.events.send(FeedEvent::MessagesUpdated(Vec::new()));
            guard.generation
        };

        let subscription = match self.shared.notifier.subscribe(room_id).await {
            Ok(subscription) => Some(subscription),
            Err(err) => {
                warn!(room_id = room_id.0, %err, "live subscription failed; relying on reconcile");
                self.shared.report(format!(
                    "failed to subscribe to room {}: {err}",
                    room_id.0
                ));
                None
            }
        };

        match self.shared.store.list_messages(room_id).await {
            Ok(rows) => {
                let mut guard = self.shared.inner.lock().await;
                if !guard.is_current(generation) {
                    return Ok(());
                }
                let snapshot = guard.normalize_all(&rows);
                guard.feed.replace_with_snapshot(snapshot);
                let _ = self
                    .shared
                    .events
                    .send(FeedEvent::MessagesUpdated(guard.feed.messages().to_vec()));
            }
            Err(err) => {
                warn!(room_id = room_id.0, %err, "initial message read failed");
                self.shared
                    .report(format!("failed to load messages for room {}: {err}", room_id.0));
            }
        }

        let mut guard = self.shared.inner.lock().await;
        if !guard.is_current(generation) {
            return Ok(());
        }
        {
            let mut tasks = self.shared.lock_tasks();
            if let Some(subscription) = subscription {
                tasks.push(spawn_push_task(
                    Arc::clone(&self.shared),
                    generation,
                    subscription,
                ));
            }
            tasks.push(spawn_reconcile_task(Arc::clone(&self.shared), generation));
            tasks.push(spawn_session_task(
                Arc::clone(&self.shared),
                generation,
                self.shared.auth.watch_session(),
            ));
        }
        self.shared.set_state(&mut guard, FeedState::Live);
        Ok(())
    }

    /// Re-reads the current room and merges the result. Returns whether the
    /// displayed messages changed; an overlapping refresh is skipped.
    pub async fn refresh_now(&self) -> Result<bool, FeedError> {
        let generation = {
            let guard = self.shared.inner.lock().await;
            if guard.state == FeedState::Closed {
                return Err(FeedError::Closed);
            }
            if guard.active.is_none() {
                return Err(FeedError::NoRoom);
            }
            guard.generation
        };
        self.shared.reconcile(generation).await
    }

    /// Turns encryption of outgoing messages on or off for the current room.
    pub async fn set_encryption(&self, enabled: bool) -> Result<(), SendError> {
        let mut guard = self.shared.inner.lock().await;
        let Some(active) = guard.active.as_ref() else {
            return Err(SendError::NoRoom);
        };
        if enabled && active.engine.is_none() {
            let _ = self.shared.events.send(FeedEvent::Error(
                "cannot enable encryption: this room has no encryption key".to_string(),
            ));
            return Err(SendError::EncryptionUnavailable);
        }
        guard.encrypt_outgoing = enabled;
        Ok(())
    }

    /// Sends `text` to the current room.
    ///
    /// On failure the error carries the unsent text. On success the stored
    /// record is merged right away; its push echo is then a no-op.
    pub async fn send_message(&self, text: &str) -> Result<StoredMessage, SendError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SendError::Empty);
        }

        let (generation, room_id, session, engine) = {
            let guard = self.shared.inner.lock().await;
            let Some(active) = guard.active.as_ref() else {
                return Err(SendError::NoRoom);
            };
            let engine = active
                .engine
                .clone()
                .filter(|_| guard.encrypt_outgoing);
            (
                guard.generation,
                active.room.room_id,
                active.session.clone(),
                engine,
            )
        };

        let (content, encrypted) = match engine {
            Some(engine) => {
                let sealed = engine.encrypt(trimmed).map_err(|source| {
                    self.shared.report(format!("failed to encrypt message: {source}"));
                    SendError::Encryption {
                        draft: text.to_string(),
                        source,
                    }
                })?;
                (sealed, true)
            }
            None => (trimmed.to_string(), false),
        };

        let request = NewMessage {
            room_id,
            sender_id: session.user_id,
            sender_username: Some(session.username),
            content,
            encrypted,
        };
        let stored = match self.shared.store.insert_message(request).await {
            Ok(stored) => stored,
            Err(source) => {
                warn!(room_id = room_id.0, %source, "message send failed");
                self.shared
                    .report(format!("failed to send message: {source}"));
                return Err(SendError::Backend {
                    draft: text.to_string(),
                    source,
                });
            }
        };

        debug!(
            room_id = room_id.0,
            message_id = stored.message_id.0,
            encrypted,
            "message sent"
        );
        self.shared.apply_push(generation, &stored).await;
        Ok(stored)
    }

    /// Tears the feed down. No further events are normalized afterwards.
    pub async fn close(&self) {
        let mut guard = self.shared.inner.lock().await;
        self.shared.close_locked(&mut guard);
        self.shared.abort_tasks();
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.shared.abort_tasks();
    }
}

impl FeedShared {
    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort_tasks(&self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }

    fn set_state(&self, inner: &mut FeedInner, state: FeedState) {
        if inner.state != state {
            inner.state = state;
            let _ = self.events.send(FeedEvent::StateChanged(state));
        }
    }

    fn report(&self, message: String) {
        let _ = self.events.send(FeedEvent::Error(message));
    }

    fn close_locked(&self, inner: &mut FeedInner) {
        if inner.state == FeedState::Closed {
            return;
        }
        inner.generation += 1;
        inner.active = None;
        inner.encrypt_outgoing = false;
        self.set_state(inner, FeedState::Closed);
        info!("live feed closed");
    }

    async fn apply_push(&self, generation: u64, message: &StoredMessage) {
        let mut guard = self.inner.lock().await;
        if !guard.is_current(generation) {
            debug!(
                message_id = message.message_id.0,
                "dropping message for a room that is no longer active"
            );
            return;
        }
        let Some(display) = guard.normalize_all(std::slice::from_ref(message)).pop() else {
            debug!(
                message_id = message.message_id.0,
                room_id = message.room_id.0,
                "ignoring message for another room"
            );
            return;
        };
        if guard.feed.apply_insert(display) {
            let _ = self
                .events
                .send(FeedEvent::MessagesUpdated(guard.feed.messages().to_vec()));
        }
    }

    async fn reconcile(&self, generation: u64) -> Result<bool, FeedError> {
        let Some(_refresh) = RefreshGuard::acquire(&self.refreshing) else {
            debug!("refresh already in progress; skipping");
            return Ok(false);
        };
        let room_id = {
            let guard = self.inner.lock().await;
            if !guard.is_current(generation) {
                return Ok(false);
            }
            guard
                .active
                .as_ref()
                .map(|active| active.room.room_id)
                .ok_or(FeedError::NoRoom)?
        };

        let result = self.store.list_messages(room_id).await;

        let mut guard = self.inner.lock().await;
        if !guard.is_current(generation) {
            return Ok(false);
        }
        match result {
            Ok(rows) => {
                let snapshot = guard.normalize_all(&rows);
                let changed = guard.feed.reconcile(snapshot);
                if changed {
                    debug!(room_id = room_id.0, "reconcile picked up changes");
                    let _ = self
                        .events
                        .send(FeedEvent::MessagesUpdated(guard.feed.messages().to_vec()));
                }
                Ok(changed)
            }
            Err(err) => {
                warn!(room_id = room_id.0, %err, "reconcile read failed");
                self.report(format!(
                    "failed to refresh messages for room {}: {err}",
                    room_id.0
                ));
                Err(FeedError::Backend(err.to_string()))
            }
        }
    }
}

/// Marks a refresh as in flight until dropped.
struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn spawn_push_task(
    shared: Arc<FeedShared>,
    generation: u64,
    mut subscription: Subscription,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let room_id = subscription.room_id();
        while let Some(message) = subscription.recv().await {
            shared.apply_push(generation, &message).await;
        }
        let still_current = shared.inner.lock().await.is_current(generation);
        if still_current {
            warn!(room_id = room_id.0, "live subscription ended; relying on reconcile");
            shared.report(format!("live updates for room {} stopped", room_id.0));
        }
    })
}

fn spawn_reconcile_task(shared: Arc<FeedShared>, generation: u64) -> JoinHandle<()> {
    let period = shared.options.reconcile_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately and the room was just read.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !shared.inner.lock().await.is_current(generation) {
                break;
            }
            // Failures are already reported; the next tick retries.
            let _ = shared.reconcile(generation).await;
        }
    })
}

fn spawn_session_task(
    shared: Arc<FeedShared>,
    generation: u64,
    mut session: watch::Receiver<Option<Session>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if session.changed().await.is_err() {
                return;
            }
            if session.borrow_and_update().is_none() {
                let mut guard = shared.inner.lock().await;
                if guard.is_current(generation) {
                    info!("session ended; closing live feed");
                    shared.close_locked(&mut guard);
                    shared.abort_tasks();
                }
                return;
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
