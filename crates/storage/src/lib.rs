use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::info;

use shared::{
    domain::{MessageId, RoomId, UserId},
    protocol::{NewMessage, Room, StoredMessage},
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn username_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn create_room(&self, name: &str, encryption_key: Option<&str>) -> Result<Room> {
        let created_at = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO rooms (name, encryption_key, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(encryption_key)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        let room_id = RoomId(rec.get::<i64, _>(0));
        info!(room_id = room_id.0, encrypted = encryption_key.is_some(), "room created");
        Ok(Room {
            room_id,
            name: name.to_string(),
            created_at,
            encryption_key: encryption_key.map(str::to_string),
        })
    }

    pub async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>> {
        let row = sqlx::query("SELECT id, name, created_at, encryption_key FROM rooms WHERE id = ?")
            .bind(room_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(room_from_row))
    }

    /// Rooms ordered newest first.
    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, encryption_key
             FROM rooms
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(room_from_row).collect())
    }

    /// Deletes a room together with all of its messages. Returns `false` when
    /// the room did not exist.
    pub async fn delete_room(&self, room_id: RoomId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE room_id = ?")
            .bind(room_id.0)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM rooms WHERE id = ?")
            .bind(room_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    pub async fn insert_message(&self, message: &NewMessage) -> Result<StoredMessage> {
        let created_at = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO messages (room_id, sender_user_id, sender_username, content, encrypted, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(message.room_id.0)
        .bind(message.sender_id.0)
        .bind(message.sender_username.as_deref())
        .bind(&message.content)
        .bind(message.encrypted)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(StoredMessage {
            message_id: MessageId(rec.get::<i64, _>(0)),
            room_id: message.room_id,
            sender_id: message.sender_id,
            sender_username: message.sender_username.clone(),
            content: message.content.clone(),
            encrypted: message.encrypted,
            created_at,
        })
    }

    /// Every message of a room, oldest first.
    pub async fn list_room_messages(&self, room_id: RoomId) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, room_id, sender_user_id, sender_username, content, encrypted, created_at
             FROM messages
             WHERE room_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(room_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StoredMessage {
                message_id: MessageId(r.get::<i64, _>(0)),
                room_id: RoomId(r.get::<i64, _>(1)),
                sender_id: UserId(r.get::<i64, _>(2)),
                sender_username: r.get::<Option<String>, _>(3),
                content: r.get::<String, _>(4),
                encrypted: r.get::<bool, _>(5),
                created_at: r.get::<DateTime<Utc>, _>(6),
            })
            .collect())
    }
}

fn room_from_row(r: &SqliteRow) -> Room {
    Room {
        room_id: RoomId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        created_at: r.get::<DateTime<Utc>, _>(2),
        encryption_key: r.get::<Option<String>, _>(3),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
