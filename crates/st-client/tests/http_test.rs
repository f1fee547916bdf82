use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::json;
use st_client::{follow_task, ClientError, EventSource, StudioClient};
use st_core::config::ClientConfig;
use st_core::TaskOutcome;
use st_types::TaskId;

#[derive(Clone, Default)]
struct Seen {
    auth: Arc<Mutex<Vec<Option<String>>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
}

const EVENTS: &str = concat!(
    "data: {\"type\":\"heartbeat\"}\n",
    "data: {\"type\":\"content\",\"task_id\":\"9\",\"content\":\"hi\"}\n",
);

const TASK_STREAM: &str = concat!(
    "data: {\"type\":\"task_started\",\"model\":\"claude\"}\n",
    "data: {\"type\":\"content\",\"content\":\"replayed\"}\n",
    "data: {\"type\":\"done\",\"message_id\":5}\n",
);

async fn events(State(seen): State<Seen>, headers: HeaderMap) -> impl IntoResponse {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    seen.auth.lock().unwrap().push(auth);
    ([(header::CONTENT_TYPE, "text/event-stream")], EVENTS)
}

async fn task_stream() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/event-stream")], TASK_STREAM)
}

async fn cancel(State(seen): State<Seen>, Path(id): Path<String>) -> impl IntoResponse {
    if id == "boom" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "worker gone").into_response();
    }
    seen.cancelled.lock().unwrap().push(id);
    Json(json!({"ok": true})).into_response()
}

async fn status(Path(id): Path<String>) -> impl IntoResponse {
    Json(json!({
        "task_id": id,
        "project_id": 3,
        "task_type": "chat",
        "status": "running",
        "model": "gpt-4o",
        "has_content": true,
        "has_error": false,
    }))
}

/// Spin up a mock studio API on a random port, return the base URL.
async fn start_mock() -> (String, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route("/projects/{id}/events", get(events))
        .route("/tasks/{id}/stream", get(task_stream))
        .route("/tasks/{id}/cancel", post(cancel))
        .route("/tasks/{id}/status", get(status))
        .with_state(seen.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to ephemeral port");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}

fn client(base: &str, token: Option<&str>) -> StudioClient {
    let cfg = ClientConfig {
        api_url: format!("{base}/"),
        ..Default::default()
    };
    StudioClient::new(&cfg, token.map(str::to_string)).unwrap()
}

// ===========================================================================
// Event stream
// ===========================================================================

#[tokio::test]
async fn project_events_sends_bearer_and_streams_body() {
    let (base, seen) = start_mock().await;
    let source = client(&base, Some("sekrit")).project_events("12");
    assert_eq!(source.describe(), format!("{base}/projects/12/events"));

    let mut stream = source.connect().await.unwrap();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend(chunk.unwrap());
    }
    assert_eq!(String::from_utf8(body).unwrap(), EVENTS);
    assert_eq!(
        seen.auth.lock().unwrap().as_slice(),
        &[Some("Bearer sekrit".to_string())]
    );
}

#[tokio::test]
async fn no_token_sends_no_authorization() {
    let (base, seen) = start_mock().await;
    let source = client(&base, None).project_events("12");
    let _ = source.connect().await.unwrap();
    assert_eq!(seen.auth.lock().unwrap().as_slice(), &[None]);
}

#[tokio::test]
async fn missing_route_is_api_error() {
    let (base, _seen) = start_mock().await;
    let c = client(&format!("{base}/missing"), None);
    let err = c.open_project_events("12").await.err().expect("expected Err");
    assert!(matches!(err, ClientError::Api { status: 404, .. }));
}

#[tokio::test]
async fn unreachable_server_is_connect_error() {
    let c = client("http://127.0.0.1:1", None);
    let err = c.open_project_events("1").await.err().expect("expected Err");
    assert!(err.is_connect(), "got {err:?}");
}

// ===========================================================================
// Task endpoints
// ===========================================================================

#[tokio::test]
async fn cancel_posts_to_task() {
    let (base, seen) = start_mock().await;
    client(&base, None)
        .cancel_task(&TaskId::from("44"))
        .await
        .unwrap();
    assert_eq!(seen.cancelled.lock().unwrap().as_slice(), &["44".to_string()]);
}

#[tokio::test]
async fn cancel_failure_carries_status_and_body() {
    let (base, _seen) = start_mock().await;
    let err = client(&base, None)
        .cancel_task(&TaskId::from("boom"))
        .await
        .unwrap_err();
    match err {
        ClientError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "worker gone");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn task_status_parses() {
    let (base, _seen) = start_mock().await;
    let status = client(&base, None)
        .task_status(&TaskId::from("7"))
        .await
        .unwrap();
    assert_eq!(status.task_id.as_str(), "7");
    assert!(status.is_running());
    assert_eq!(status.model, "gpt-4o");
}

#[tokio::test]
async fn follow_task_replays_to_done() {
    let (base, _seen) = start_mock().await;
    let replay = follow_task(&client(&base, None), &TaskId::from("8"))
        .await
        .unwrap();
    assert_eq!(replay.outcome, Some(TaskOutcome::Finalized));
    assert_eq!(replay.messages.len(), 1);
    assert_eq!(replay.messages[0].content, "replayed");
    assert_eq!(replay.messages[0].id.to_string(), "5");
}
