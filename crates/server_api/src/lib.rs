use shared::{
    domain::{RoomId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{NewMessage, NewRoom, Room, ServerEvent, Session, StoredMessage},
};
use storage::Storage;
use tracing::{info, warn};

const MAX_USERNAME_CHARS: usize = 64;
const MAX_ROOM_NAME_CHARS: usize = 100;
const MAX_CONTENT_BYTES: usize = 16 * 1024;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn login(ctx: &ApiContext, username: &str) -> Result<Session, ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::validation("username must not be empty"));
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(ApiError::validation("username is too long"));
    }
    let user_id = ctx.storage.create_user(username).await.map_err(internal)?;
    info!(user_id = user_id.0, "user logged in");
    Ok(Session {
        user_id,
        username: username.to_string(),
    })
}

pub async fn list_rooms(ctx: &ApiContext) -> Result<Vec<Room>, ApiError> {
    ctx.storage.list_rooms().await.map_err(internal)
}

pub async fn create_room(ctx: &ApiContext, request: NewRoom) -> Result<ServerEvent, ApiError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("room name must not be empty"));
    }
    if name.chars().count() > MAX_ROOM_NAME_CHARS {
        return Err(ApiError::validation("room name is too long"));
    }
    let encryption_key = request
        .encryption_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty());

    let room = ctx
        .storage
        .create_room(name, encryption_key)
        .await
        .map_err(internal)?;
    Ok(ServerEvent::RoomCreated { room })
}

pub async fn delete_room(ctx: &ApiContext, room_id: RoomId) -> Result<ServerEvent, ApiError> {
    let deleted = ctx.storage.delete_room(room_id).await.map_err(internal)?;
    if !deleted {
        return Err(ApiError::not_found("room not found"));
    }
    info!(room_id = room_id.0, "room deleted");
    Ok(ServerEvent::RoomDeleted { room_id })
}

pub async fn list_messages(
    ctx: &ApiContext,
    room_id: RoomId,
) -> Result<Vec<StoredMessage>, ApiError> {
    ensure_room_exists(ctx, room_id).await?;
    ctx.storage
        .list_room_messages(room_id)
        .await
        .map_err(internal)
}

/// Persists a message exactly as the client shaped it. Content is opaque here;
/// the backend never inspects or decrypts it.
pub async fn send_message(
    ctx: &ApiContext,
    mut message: NewMessage,
) -> Result<ServerEvent, ApiError> {
    if message.content.trim().is_empty() {
        return Err(ApiError::validation("message content must not be empty"));
    }
    if message.content.len() > MAX_CONTENT_BYTES {
        return Err(ApiError::validation(format!(
            "message content exceeds {MAX_CONTENT_BYTES} bytes"
        )));
    }
    ensure_room_exists(ctx, message.room_id).await?;

    let known_username = ctx
        .storage
        .username_for_user(message.sender_id)
        .await
        .map_err(internal)?;
    let Some(known_username) = known_username else {
        warn!(sender_id = message.sender_id.0, "message from unknown user rejected");
        return Err(ApiError::new(ErrorCode::Unauthorized, "unknown sender"));
    };
    if message
        .sender_username
        .as_deref()
        .map_or(true, |name| name.trim().is_empty())
    {
        message.sender_username = Some(known_username);
    }

    let stored = ctx
        .storage
        .insert_message(&message)
        .await
        .map_err(internal)?;
    Ok(ServerEvent::MessageInserted { message: stored })
}

async fn ensure_room_exists(ctx: &ApiContext, room_id: RoomId) -> Result<Room, ApiError> {
    ctx.storage
        .get_room(room_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("room not found"))
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::internal(err.to_string())
}
