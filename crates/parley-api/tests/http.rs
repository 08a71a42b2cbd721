use std::collections::HashMap;

use axum::extract::{Multipart, Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use parley_api::{ApiClient, login};
use parley_sync::{PageSource, SideChannel};
use parley_types::api::{Cursor, FileUpload, PollDraft};
use parley_types::{MessageId, RoomKey};

const TOKEN: &str = "t-1";

type Reject = (StatusCode, &'static str);

fn authorized(headers: &HeaderMap) -> Result<(), Reject> {
    let expected = format!("Bearer {}", TOKEN);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err((StatusCode::UNAUTHORIZED, "missing token")),
    }
}

async fn login_handler(Json(body): Json<Value>) -> Result<Json<Value>, Reject> {
    if body["password"] != "hunter2" {
        return Err((StatusCode::UNAUTHORIZED, "bad credentials"));
    }
    Ok(Json(json!({
        "user_id": "u1",
        "username": body["username"],
        "token": TOKEN,
    })))
}

fn message_json(id: u64) -> Value {
    json!({
        "id": id,
        "author": { "user_id": "u2", "username": "bob" },
        "content": format!("m{}", id),
        "created_at": "2024-05-01T12:00:00Z",
    })
}

/// Ten messages of history, ids 1..=10, served newest-first by `before`.
async fn messages_handler(
    headers: HeaderMap,
    Path(room): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, Reject> {
    authorized(&headers)?;
    if room != "g:1:c:5" {
        return Err((StatusCode::NOT_FOUND, "no such room"));
    }
    let limit: u64 = query.get("limit").and_then(|l| l.parse().ok()).unwrap_or(50);
    let before: u64 = query.get("before").and_then(|b| b.parse().ok()).unwrap_or(11);
    let low = before.saturating_sub(limit).max(1);
    let ids: Vec<Value> = (low..before).map(message_json).collect();
    Ok(Json(json!({
        "messages": ids,
        "has_more": low > 1,
    })))
}

async fn upload_handler(headers: HeaderMap, mut form: Multipart) -> Result<Json<Value>, Reject> {
    authorized(&headers)?;
    let mut room = None;
    let mut file = None;
    while let Ok(Some(field)) = form.next_field().await {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("room") => room = field.text().await.ok(),
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let mime = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|_| (StatusCode::BAD_REQUEST, "bad body"))?;
                file = Some((name, mime, bytes.len()));
            }
            _ => {}
        }
    }
    let (Some(room), Some((name, mime, size))) = (room, file) else {
        return Err((StatusCode::BAD_REQUEST, "room and file required"));
    };
    Ok(Json(json!({
        "url": format!("/uploads/{}/{}", room, name),
        "size": size,
        "type": mime,
    })))
}

async fn poll_handler(
    headers: HeaderMap,
    Path(message_id): Path<u64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Reject> {
    authorized(&headers)?;
    if body["options"].as_array().map_or(0, Vec::len) < 2 {
        return Err((StatusCode::BAD_REQUEST, "need at least two options"));
    }
    Ok(Json(json!({ "id": format!("poll-{}", message_id) })))
}

async fn serve() -> String {
    let app = Router::new()
        .route("/auth/login", post(login_handler))
        .route("/rooms/{room}/messages", get(messages_handler))
        .route("/upload", post(upload_handler))
        .route("/messages/{id}/poll", post(poll_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{}", addr)
}

fn room() -> RoomKey {
    RoomKey::channel("1", "5")
}

#[tokio::test]
async fn login_yields_session() {
    let base = serve().await;
    let session = login(&base, "alice", "hunter2").await.unwrap();
    assert_eq!(session.identity.user_id, "u1");
    assert_eq!(session.identity.username, "alice");
    assert_eq!(session.token, TOKEN);

    let err = login(&base, "alice", "wrong").await.unwrap_err();
    assert!(format!("{:#}", err).contains("401"), "{:#}", err);
}

#[tokio::test]
async fn pages_walk_backwards_by_cursor() {
    let api = ApiClient::new(serve().await, TOKEN);

    let newest = api.fetch_page(&room(), None, 4).await.unwrap();
    let ids: Vec<u64> = newest.messages.iter().map(|m| m.id.0).collect();
    assert_eq!(ids, vec![7, 8, 9, 10]);
    assert!(newest.has_more);

    let older = api
        .fetch_page(&room(), Some(Cursor("3".into())), 4)
        .await
        .unwrap();
    let ids: Vec<u64> = older.messages.iter().map(|m| m.id.0).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(!older.has_more);
}

#[tokio::test]
async fn failures_carry_status_and_body() {
    let base = serve().await;
    let unauthorized = ApiClient::new(base.clone(), "nope");
    let err = unauthorized.fetch_page(&room(), None, 4).await.unwrap_err();
    let text = format!("{:#}", err);
    assert!(text.contains("401") && text.contains("missing token"), "{}", text);

    let api = ApiClient::new(base, TOKEN);
    let err = api
        .fetch_page(&RoomKey::channel("9", "9"), None, 4)
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("404"));
}

#[tokio::test]
async fn upload_returns_receipt() {
    let api = ApiClient::new(serve().await, TOKEN);
    let receipt = api
        .upload(
            &room(),
            FileUpload {
                name: "notes.txt".into(),
                mime: "text/plain".into(),
                bytes: b"hello world".to_vec(),
            },
        )
        .await
        .unwrap();
    assert_eq!(receipt.url, "/uploads/g:1:c:5/notes.txt");
    assert_eq!(receipt.size, 11);
    assert_eq!(receipt.mime, "text/plain");
}

#[tokio::test]
async fn poll_creation_round_trips() {
    let api = ApiClient::new(serve().await, TOKEN);
    let draft = |options: Vec<&str>| PollDraft {
        question: "Lunch?".into(),
        options: options.into_iter().map(String::from).collect(),
        allow_multiple: true,
        expires_hours: Some(2),
    };

    let id = api
        .create_poll(MessageId(42), draft(vec!["pizza", "sushi"]))
        .await
        .unwrap();
    assert_eq!(id, "poll-42");
    assert!(api.create_poll(MessageId(42), draft(vec!["pizza"])).await.is_err());
}
