use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use shared::{
    domain::RoomId,
    error::ApiError,
    protocol::{LoginRequest, NewMessage, NewRoom, Room, Session, StoredMessage},
};
use tokio::sync::watch;
use tracing::info;
use url::Url;

use crate::backend::{AuthProvider, ChatStore};

/// REST client for the chat backend. Also tracks the signed-in session.
pub struct HttpBackend {
    http: Client,
    server_url: String,
    session: watch::Sender<Option<Session>>,
}

impl HttpBackend {
    pub fn new(server_url: &str) -> Result<Self> {
        let parsed = Url::parse(server_url)
            .with_context(|| format!("invalid server url: {server_url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("server_url must start with http:// or https://"));
        }
        let (session, _) = watch::channel(None);
        Ok(Self {
            http: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn login(&self, username: &str) -> Result<Session> {
        let res = self
            .http
            .post(format!("{}/login", self.server_url))
            .json(&LoginRequest {
                username: username.to_string(),
            })
            .send()
            .await?;
        let session: Session = check(res).await?.json().await?;
        info!(user_id = session.user_id.0, "logged in");
        self.session.send_replace(Some(session.clone()));
        Ok(session)
    }

    pub fn logout(&self) {
        if self.session.send_replace(None).is_some() {
            info!("logged out");
        }
    }
}

/// Passes successful responses through and turns error envelopes into
/// errors that carry the backend's message.
async fn check(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(anyhow!(api_error).context(format!("request failed with {status}"))),
        Err(_) => Err(anyhow!("request failed with {status}: {body}")),
    }
}

#[async_trait]
impl AuthProvider for HttpBackend {
    async fn current_session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }
}

#[async_trait]
impl ChatStore for HttpBackend {
    async fn list_rooms(&self) -> Result<Vec<Room>> {
        let res = self
            .http
            .get(format!("{}/rooms", self.server_url))
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    async fn create_room(&self, room: NewRoom) -> Result<Room> {
        let res = self
            .http
            .post(format!("{}/rooms", self.server_url))
            .json(&room)
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    async fn delete_room(&self, room_id: RoomId) -> Result<()> {
        let res = self
            .http
            .delete(format!("{}/rooms/{}", self.server_url, room_id.0))
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    async fn list_messages(&self, room_id: RoomId) -> Result<Vec<StoredMessage>> {
        let res = self
            .http
            .get(format!("{}/rooms/{}/messages", self.server_url, room_id.0))
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<StoredMessage> {
        let res = self
            .http
            .post(format!("{}/messages", self.server_url))
            .json(&message)
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
