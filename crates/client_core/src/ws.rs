use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use shared::{domain::RoomId, protocol::ServerEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::{LiveNotifier, Subscription};

const SUBSCRIPTION_BUFFER: usize = 256;

/// Opens one room-scoped websocket per subscription.
pub struct WsNotifier {
    base: Url,
}

impl WsNotifier {
    pub fn new(server_url: &str) -> Result<Self> {
        Ok(Self {
            base: ws_base_url(server_url)?,
        })
    }

    pub(crate) fn room_url(&self, room_id: RoomId) -> Url {
        let mut url = self.base.clone();
        url.set_path("/ws");
        url.query_pairs_mut()
            .clear()
            .append_pair("room_id", &room_id.0.to_string());
        url
    }
}

pub(crate) fn ws_base_url(server_url: &str) -> Result<Url> {
    let mut url =
        Url::parse(server_url).with_context(|| format!("invalid server url: {server_url}"))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => return Err(anyhow!("server_url must start with http:// or https://")),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot derive websocket url from {server_url}"))?;
    Ok(url)
}

#[async_trait]
impl LiveNotifier for WsNotifier {
    async fn subscribe(&self, room_id: RoomId) -> Result<Subscription> {
        let ws_url = self.room_url(room_id);
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (_, mut ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        info!(room_id = room_id.0, "live subscription opened");

        let forwarder = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(ServerEvent::MessageInserted { message }) => {
                            if message.room_id != room_id {
                                continue;
                            }
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Ok(other) => {
                            debug!(room_id = other.room_id().0, "ignoring non-message event");
                        }
                        Err(err) => warn!(%err, "invalid server event"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(room_id = room_id.0, %err, "websocket receive failed");
                        break;
                    }
                }
            }
            debug!(room_id = room_id.0, "live subscription closed");
        });

        Ok(Subscription::new(room_id, rx, Some(forwarder)))
    }
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
