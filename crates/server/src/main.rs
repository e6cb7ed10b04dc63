use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    create_room, delete_room, list_messages, list_rooms, login, send_message, ApiContext,
};
use shared::{
    domain::RoomId,
    error::{ApiError, ErrorCode},
    protocol::{LoginRequest, NewMessage, NewRoom, Room, ServerEvent, Session, StoredMessage},
};
use storage::Storage;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    events: broadcast::Sender<ServerEvent>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    room_id: Option<i64>,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let (events, _) = broadcast::channel(settings.event_capacity);

    let state = AppState {
        api: ApiContext { storage },
        events,
    };
    let app = build_router(Arc::new(state)).layer(RequestBodyLimitLayer::new(
        settings.max_body_bytes,
    ));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(http_login))
        .route("/rooms", get(http_list_rooms).post(http_create_room))
        .route("/rooms/:room_id", delete(http_delete_room))
        .route("/rooms/:room_id/messages", get(http_list_messages))
        .route("/messages", post(http_send_message))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(error: ApiError) -> (StatusCode, Json<ApiError>) {
    if matches!(error.code, ErrorCode::Internal) {
        error!(message = %error.message, "request failed");
    }
    (status_for(error.code), Json(error))
}

fn publish(state: &AppState, event: &ServerEvent) {
    // No receivers is fine: nobody is subscribed yet.
    if state.events.send(event.clone()).is_err() {
        debug!(room_id = event.room_id().0, "event published without subscribers");
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            warn!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<Session>> {
    let session = login(&state.api, &req.username).await.map_err(reject)?;
    Ok(Json(session))
}

async fn http_list_rooms(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Room>>> {
    let rooms = list_rooms(&state.api).await.map_err(reject)?;
    Ok(Json(rooms))
}

async fn http_create_room(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewRoom>,
) -> ApiResult<(StatusCode, Json<Room>)> {
    let event = create_room(&state.api, req).await.map_err(reject)?;
    publish(&state, &event);
    let ServerEvent::RoomCreated { room } = event else {
        return Err(reject(ApiError::internal("unexpected room creation result")));
    };
    Ok((StatusCode::CREATED, Json(room)))
}

async fn http_delete_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let event = delete_room(&state.api, RoomId(room_id))
        .await
        .map_err(reject)?;
    publish(&state, &event);
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_messages(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<i64>,
) -> ApiResult<Json<Vec<StoredMessage>>> {
    let messages = list_messages(&state.api, RoomId(room_id))
        .await
        .map_err(reject)?;
    Ok(Json(messages))
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewMessage>,
) -> ApiResult<(StatusCode, Json<StoredMessage>)> {
    let event = send_message(&state.api, req).await.map_err(reject)?;
    publish(&state, &event);
    let ServerEvent::MessageInserted { message } = event else {
        return Err(reject(ApiError::internal("unexpected message insert result")));
    };
    Ok((StatusCode::CREATED, Json(message)))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket, q.room_id.map(RoomId)))
}

/// Forwards backend events to one socket. A socket opened with a `room_id`
/// only ever sees that room's events.
async fn ws_connection(
    state: Arc<AppState>,
    socket: axum::extract::ws::WebSocket,
    room_filter: Option<RoomId>,
) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();
    info!(room_id = room_filter.map(|r| r.0), "websocket subscriber connected");

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events_rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket subscriber lagged; dropping events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if room_filter.is_some_and(|room_id| event.room_id() != room_id) {
                continue;
            }
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
    debug!(room_id = room_filter.map(|r| r.0), "websocket subscriber disconnected");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
