mod common;

use common::{HttpState, MockSocketServer, WAIT, client_config, record, start_http};
use serde_json::json;
use sprint_notify::{Connection, HttpNotificationApi, NotificationSync, SyncNotice};
use std::sync::Arc;
use tokio::sync::broadcast;

async fn wait_notice(
    notices: &mut broadcast::Receiver<SyncNotice>,
    wanted: impl Fn(&SyncNotice) -> bool,
) -> SyncNotice {
    tokio::time::timeout(WAIT, async {
        loop {
            let notice = notices.recv().await.unwrap();
            if wanted(&notice) {
                return notice;
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_full_session() {
    let mut socket = MockSocketServer::start(5_000).await;
    let base = start_http(HttpState::new(json!([
        record("old", true, "2024-05-01T09:00:00Z"),
        record("mid", false, "2024-05-01T10:00:00Z"),
        record("new", false, "2024-05-01T11:00:00Z"),
    ])))
    .await;
    let config = client_config(socket.socket_url(), base);

    let mut connection = Connection::open(&config).unwrap();
    let api = Arc::new(HttpNotificationApi::new(&config).unwrap());
    let sync = NotificationSync::new(&mut connection, api, &config).unwrap();
    let mut notices = sync.subscribe_notices();

    sync.start(Some("u1")).await.unwrap();
    assert_eq!(sync.user_id().as_deref(), Some("u1"));

    let snapshot = sync.snapshot();
    let ids: Vec<&str> = snapshot
        .items
        .iter()
        .map(|v| v.notification.id.as_str())
        .collect();
    assert_eq!(ids, ["new", "mid", "old"]);
    assert_eq!(snapshot.unread, 2);

    assert_eq!(socket.next_frame().await, "40");
    assert_eq!(
        socket.next_frame().await,
        r#"42["join_notifications_for_user","u1"]"#
    );

    let push = json!(["user_notification", record("live", false, "2024-05-01T12:00:00Z")]);
    socket.send(format!("42{push}"));
    wait_notice(&mut notices, |n| matches!(n, SyncNotice::Pushed { id } if id == "live")).await;
    assert_eq!(sync.unread_count(), 3);
    assert_eq!(sync.snapshot().items[0].notification.id, "live");

    let op = sync.mark_read("mid").unwrap();
    assert_eq!(sync.unread_count(), 2);
    assert_eq!(socket.next_frame().await, r#"42["mark_read","mid"]"#);
    assert_eq!(
        wait_notice(&mut notices, |n| matches!(n, SyncNotice::ReadConfirmed { .. })).await,
        SyncNotice::ReadConfirmed { op }
    );

    sync.mark_all_read().unwrap();
    assert_eq!(sync.unread_count(), 0);
    assert_eq!(socket.next_frame().await, r#"42["mark_all_read","u1"]"#);

    sync.shutdown().await;
    assert_eq!(sync.snapshot().items.len(), 0);
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_session_survives_failed_seed() {
    let socket = MockSocketServer::start(5_000).await;
    let mut state = HttpState::new(json!([]));
    state.failures = 10;
    let base = start_http(state).await;
    let mut config = client_config(socket.socket_url(), base);
    config.fetch_retries = 0;

    let mut connection = Connection::open(&config).unwrap();
    let api = Arc::new(HttpNotificationApi::new(&config).unwrap());
    let sync = NotificationSync::new(&mut connection, api, &config).unwrap();
    let mut notices = sync.subscribe_notices();

    sync.start(Some("u1")).await.unwrap();
    assert!(matches!(
        wait_notice(&mut notices, |n| matches!(n, SyncNotice::SeedFailed { .. })).await,
        SyncNotice::SeedFailed { .. }
    ));
    assert_eq!(sync.snapshot().items.len(), 0);

    let push = json!(["user_notification", record("p1", false, "2024-05-01T12:00:00Z")]);
    socket.send(format!("42{push}"));
    wait_notice(&mut notices, |n| matches!(n, SyncNotice::Pushed { .. })).await;
    assert_eq!(sync.unread_count(), 1);

    // A second synchronizer cannot take the already consumed event stream.
    let api = Arc::new(HttpNotificationApi::new(&config).unwrap());
    assert!(NotificationSync::new(&mut connection, api, &config).is_err());
}
