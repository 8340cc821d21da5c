mod common;

use axum::http::StatusCode;
use common::{HttpState, client_config, record, start_http};
use serde_json::json;
use sprint_notify::{HttpNotificationApi, NotificationApi, NotifyError};
use std::sync::atomic::Ordering;

const UNUSED_SOCKET: &str = "ws://127.0.0.1:9";

fn api_for(base: String) -> HttpNotificationApi {
    HttpNotificationApi::new(&client_config(UNUSED_SOCKET.to_string(), base)).unwrap()
}

#[tokio::test]
async fn test_fetches_bare_array() {
    let state = HttpState::new(json!([
        record("a", false, "2024-05-01T12:00:00Z"),
        record("b", true, "2024-05-01T11:00:00Z"),
    ]));
    let base = start_http(state.clone()).await;

    let list = api_for(base).fetch_notifications().await.unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, "a");
    assert!(list[1].read);
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fetches_wrapped_list_with_cookies() {
    let state = HttpState::new(json!({
        "count": 1,
        "results": [record("a", false, "2024-05-01T12:00:00Z")]
    }));
    let base = start_http(state.clone()).await;

    let mut config = client_config(UNUSED_SOCKET.to_string(), base);
    config.credentials.cookies = Some("sessionid=abc".to_string());
    let api = HttpNotificationApi::new(&config).unwrap();

    let list = api.fetch_notifications().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(
        state.cookies.lock().unwrap().as_slice(),
        [Some("sessionid=abc".to_string())]
    );
}

#[tokio::test]
async fn test_retries_server_errors() {
    let mut state = HttpState::new(json!([record("a", false, "2024-05-01T12:00:00Z")]));
    state.failures = 2;
    let base = start_http(state.clone()).await;

    let list = api_for(base).fetch_notifications().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(state.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_gives_up_after_retries() {
    let mut state = HttpState::new(json!([]));
    state.failures = 10;
    let base = start_http(state.clone()).await;

    let result = api_for(base).fetch_notifications().await;
    assert!(matches!(result, Err(NotifyError::Http { status: 500, .. })));
    assert_eq!(state.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_does_not_retry_unauthorized() {
    let mut state = HttpState::new(json!({"detail": "Authentication credentials were not provided."}));
    state.status = StatusCode::UNAUTHORIZED;
    let base = start_http(state.clone()).await;

    let result = api_for(base).fetch_notifications().await;
    match result {
        Err(NotifyError::Http { status, body }) => {
            assert_eq!(status, 401);
            assert!(body.contains("Authentication credentials"));
        }
        other => panic!("expected 401, got {other:?}"),
    }
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejects_unexpected_body() {
    let state = HttpState::new(json!({"message": "maintenance"}));
    let base = start_http(state).await;

    let result = api_for(base).fetch_notifications().await;
    assert!(matches!(result, Err(NotifyError::Protocol(_))));
}
