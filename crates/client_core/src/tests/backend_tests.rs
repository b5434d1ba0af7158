use super::*;
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode, Uri},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    auth: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct ServerState {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

async fn handle(
    State(state): State<ServerState>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.requests.lock().await.push(Recorded {
        path: uri.path().to_string(),
        auth,
        body,
    });

    match uri.path() {
        "/api/chat/list" => (
            StatusCode::OK,
            Json(json!({
                "items": [{"topicId": "t1", "lastSeq": 3, "lastReadSeq": 1}],
                "updatedAt": "2024-01-01T00:00:00Z",
                "hasMore": false
            })),
        ),
        "/api/chat/sync/t1" => (
            StatusCode::OK,
            Json(json!({
                "items": [{
                    "chatId": "c2",
                    "seq": 2,
                    "senderId": "alice",
                    "content": {"type": "text", "text": "hi"},
                    "createdAt": "2024-01-01T00:00:02Z"
                }],
                "hasMore": true
            })),
        ),
        "/api/topic/info/t1" => (
            StatusCode::OK,
            Json(json!({"id": "t1", "name": "general", "lastSeq": 3})),
        ),
        "/api/topic/info/other" => (StatusCode::OK, Json(json!({"id": "t1"}))),
        "/api/chat/remove_messages/t1" => (StatusCode::OK, Json(json!({}))),
        "/api/profile/ghost" => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": "unauthorized", "error": "token expired"})),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"code": "not_found", "error": "no such route"})),
        ),
    }
}

async fn spawn_backend() -> Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = ServerState::default();
    let app = Router::new()
        .route("/api/*rest", post(handle))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/"), state))
}

#[tokio::test]
async fn chat_list_sends_cursor_and_bearer_token() {
    let (url, state) = spawn_backend().await.expect("spawn server");
    let backend = HttpBackend::new(url, Some("secret".into()));

    let page = backend
        .get_chat_list(Some("2023-12-31T00:00:00Z"), 50)
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].last_read_seq, 1);
    assert_eq!(page.updated_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    let requests = state.requests.lock().await;
    assert_eq!(requests[0].path, "/api/chat/list");
    assert_eq!(requests[0].auth.as_deref(), Some("Bearer secret"));
    assert_eq!(
        requests[0].body,
        json!({"updatedAt": "2023-12-31T00:00:00Z", "limit": 50})
    );
}

#[tokio::test]
async fn chat_logs_are_decoded() {
    let (url, state) = spawn_backend().await.expect("spawn server");
    let backend = HttpBackend::new(url, None);

    let page = backend
        .get_chat_logs_desc(&TopicId::from("t1"), 2, 20)
        .await
        .unwrap();

    assert!(page.has_more);
    assert_eq!(page.items[0].chat_id.as_deref(), Some("c2"));
    assert_eq!(page.items[0].content.text, "hi");
    let requests = state.requests.lock().await;
    assert_eq!(requests[0].auth, None);
    assert_eq!(requests[0].body, json!({"lastSeq": 2, "limit": 20}));
}

#[tokio::test]
async fn topic_lookup_checks_returned_id() {
    let (url, _state) = spawn_backend().await.expect("spawn server");
    let backend = HttpBackend::new(url, None);

    let topic = backend.get_topic(&TopicId::from("t1")).await.unwrap();
    assert_eq!(topic.name, "general");
    assert_eq!(topic.last_seq, 3);

    let err = backend.get_topic(&TopicId::from("other")).await.unwrap_err();
    assert!(err.to_string().contains("server returned topic t1"));
}

#[tokio::test]
async fn delete_posts_chat_ids() {
    let (url, state) = spawn_backend().await.expect("spawn server");
    let backend = HttpBackend::new(url, None);

    backend
        .delete_messages(&TopicId::from("t1"), &["c1".to_string(), "c2".to_string()])
        .await
        .unwrap();

    let requests = state.requests.lock().await;
    assert_eq!(requests[0].path, "/api/chat/remove_messages/t1");
    assert_eq!(requests[0].body, json!({"ids": ["c1", "c2"]}));
}

#[tokio::test]
async fn error_bodies_become_api_exceptions() {
    let (url, _state) = spawn_backend().await.expect("spawn server");
    let backend = HttpBackend::new(url, Some("stale".into()));

    let err = backend.get_user(&UserId::from("ghost")).await.unwrap_err();
    let api = err.downcast_ref::<ApiException>().expect("api exception");
    assert!(api.is_unauthorized());
    assert_eq!(api.status, 401);
    assert_eq!(api.message, "token expired");

    let err = backend
        .get_conversation(&TopicId::from("missing"))
        .await
        .unwrap_err();
    let api = err.downcast_ref::<ApiException>().expect("api exception");
    assert_eq!(api.code, ErrorCode::NotFound);
}
