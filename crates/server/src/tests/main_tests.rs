use super::*;
use axum::{body, body::Body, http::Request};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tower::ServiceExt;

async fn test_app() -> (Router, Arc<AppState>) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (events, _) = broadcast::channel(32);
    let state = Arc::new(AppState {
        api: ApiContext { storage },
        events,
    });
    (build_router(Arc::clone(&state)), state)
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn post_json(uri: &str, value: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .expect("request")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _state) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn login_create_room_send_and_list_messages() {
    let (app, _state) = test_app().await;

    let login_response = app
        .clone()
        .oneshot(post_json("/login", serde_json::json!({ "username": "alice" })))
        .await
        .expect("response");
    assert_eq!(login_response.status(), StatusCode::OK);
    let session: Session = json_body(login_response).await;

    let room_response = app
        .clone()
        .oneshot(post_json(
            "/rooms",
            serde_json::json!({ "name": "vault", "encryption_key": "k3y" }),
        ))
        .await
        .expect("response");
    assert_eq!(room_response.status(), StatusCode::CREATED);
    let room: Room = json_body(room_response).await;
    assert_eq!(room.encryption_key.as_deref(), Some("k3y"));

    let send_response = app
        .clone()
        .oneshot(post_json(
            "/messages",
            serde_json::json!({
                "room_id": room.room_id,
                "sender_id": session.user_id,
                "content": "Y2lwaGVydGV4dA==",
                "encrypted": true,
            }),
        ))
        .await
        .expect("response");
    assert_eq!(send_response.status(), StatusCode::CREATED);
    let stored: StoredMessage = json_body(send_response).await;
    assert!(stored.encrypted);
    assert_eq!(stored.sender_username.as_deref(), Some("alice"));

    let list_request = Request::get(format!("/rooms/{}/messages", room.room_id.0))
        .body(Body::empty())
        .expect("request");
    let list_response = app.clone().oneshot(list_request).await.expect("response");
    assert_eq!(list_response.status(), StatusCode::OK);
    let messages: Vec<StoredMessage> = json_body(list_response).await;
    assert_eq!(messages, vec![stored]);

    let rooms_request = Request::get("/rooms").body(Body::empty()).expect("request");
    let rooms: Vec<Room> = json_body(app.oneshot(rooms_request).await.expect("response")).await;
    assert_eq!(rooms.len(), 1);
}

#[tokio::test]
async fn error_codes_map_to_http_status() {
    let (app, _state) = test_app().await;

    let blank_room = app
        .clone()
        .oneshot(post_json("/rooms", serde_json::json!({ "name": "  " })))
        .await
        .expect("response");
    assert_eq!(blank_room.status(), StatusCode::BAD_REQUEST);
    let error: ApiError = json_body(blank_room).await;
    assert!(matches!(error.code, ErrorCode::Validation));

    let missing_room = Request::get("/rooms/77/messages")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(missing_room).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let delete_missing = Request::delete("/rooms/77")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(delete_missing).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sending_a_message_publishes_an_insert_event() {
    let (app, state) = test_app().await;
    let mut events = state.events.subscribe();
    let session = state
        .api
        .storage
        .create_user("bob")
        .await
        .expect("user");
    let room = state
        .api
        .storage
        .create_room("lobby", None)
        .await
        .expect("room");

    let response = app
        .oneshot(post_json(
            "/messages",
            serde_json::json!({
                "room_id": room.room_id,
                "sender_id": session,
                "sender_username": "bobby",
                "content": "hello",
                "encrypted": false,
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    let event = events.recv().await.expect("event");
    let ServerEvent::MessageInserted { message } = event else {
        panic!("expected message inserted event");
    };
    assert_eq!(message.content, "hello");
    assert_eq!(message.sender_username.as_deref(), Some("bobby"));
}

#[tokio::test]
async fn room_scoped_websocket_only_forwards_that_rooms_events() {
    let (app, state) = test_app().await;
    let user = state.api.storage.create_user("carol").await.expect("user");
    let watched = state
        .api
        .storage
        .create_room("watched", None)
        .await
        .expect("room");
    let other = state
        .api
        .storage
        .create_room("other", None)
        .await
        .expect("room");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws?room_id={}", watched.room_id.0))
        .await
        .expect("connect");

    // The subscription is registered once the upgrade completes; give the
    // server task a moment before publishing.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    for (room, content) in [(&other, "not for you"), (&watched, "for you")] {
        let event = send_message(
            &state.api,
            NewMessage {
                room_id: room.room_id,
                sender_id: user,
                sender_username: None,
                content: content.to_string(),
                encrypted: false,
            },
        )
        .await
        .expect("send");
        publish(&state, &event);
    }

    let frame = tokio::time::timeout(std::time::Duration::from_secs(2), socket.next())
        .await
        .expect("frame timeout")
        .expect("frame")
        .expect("websocket");
    let WsMessage::Text(text) = frame else {
        panic!("expected text frame");
    };
    let event: ServerEvent = serde_json::from_str(&text).expect("event json");
    let ServerEvent::MessageInserted { message } = event else {
        panic!("expected message inserted event");
    };
    assert_eq!(message.room_id, watched.room_id);
    assert_eq!(message.content, "for you");
}
