//! In-process stand-ins for the notification service.

#![allow(dead_code)]

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use sprint_notify::{ClientConfig, ReconnectConfig};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn record(id: &str, read: bool, created_at: &str) -> Value {
    json!({
        "id": id,
        "type": "task_assigned",
        "title": format!("Task {id}"),
        "message": format!("You were assigned {id}"),
        "read": read,
        "created_at": created_at
    })
}

/// Instructions for the connection currently held by the socket server.
pub enum ServerCommand {
    Send(String),
    /// Drop the socket without a close handshake.
    Drop,
}

/// Minimal Socket.IO server: completes the open and namespace handshakes,
/// reports every client frame, and sends whatever the test asks for.
pub struct MockSocketServer {
    pub addr: SocketAddr,
    pub received: mpsc::UnboundedReceiver<String>,
    pub cookies: mpsc::UnboundedReceiver<Option<String>>,
    commands: mpsc::UnboundedSender<ServerCommand>,
    pub accepted: Arc<AtomicUsize>,
}

impl MockSocketServer {
    pub async fn start(ping_interval_ms: u64) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (cookie_tx, cookies) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let command_rx = Arc::new(Mutex::new(command_rx));
        let accepted = Arc::new(AtomicUsize::new(0));
        let accepted_count = accepted.clone();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let n = accepted_count.fetch_add(1, Ordering::SeqCst) + 1;
                let received_tx = received_tx.clone();
                let cookie_tx = cookie_tx.clone();
                let command_rx = command_rx.clone();

                tokio::spawn(async move {
                    let callback = move |req: &Request, resp: Response| {
                        let cookie = req
                            .headers()
                            .get("cookie")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let _ = cookie_tx.send(cookie);
                        Ok::<_, ErrorResponse>(resp)
                    };
                    let Ok(mut ws) = accept_hdr_async(tcp, callback).await else {
                        return;
                    };
                    let open = format!(
                        r#"0{{"sid":"sid-{n}","upgrades":[],"pingInterval":{ping_interval_ms},"pingTimeout":{ping_interval_ms},"maxPayload":1000000}}"#
                    );
                    if ws.send(Message::text(open)).await.is_err() {
                        return;
                    }

                    let mut commands = command_rx.lock().await;
                    loop {
                        tokio::select! {
                            frame = ws.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    let text = text.as_str().to_string();
                                    if text.starts_with("40") {
                                        let ack = format!(r#"40{{"sid":"ns-{n}"}}"#);
                                        if ws.send(Message::text(ack)).await.is_err() {
                                            return;
                                        }
                                    }
                                    let _ = received_tx.send(text);
                                }
                                Some(Ok(_)) => {}
                                _ => return,
                            },
                            command = commands.recv() => match command {
                                Some(ServerCommand::Send(frame)) => {
                                    if ws.send(Message::text(frame)).await.is_err() {
                                        return;
                                    }
                                }
                                Some(ServerCommand::Drop) | None => return,
                            },
                        }
                    }
                });
            }
        });

        Self {
            addr,
            received,
            cookies,
            commands,
            accepted,
        }
    }

    pub fn send(&self, frame: impl Into<String>) {
        let _ = self.commands.send(ServerCommand::Send(frame.into()));
    }

    pub fn drop_connection(&self) {
        let _ = self.commands.send(ServerCommand::Drop);
    }

    /// Next client frame that is not a heartbeat answer.
    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(WAIT, async {
            loop {
                let frame = self.received.recv().await.expect("server running");
                if frame != "3" {
                    return frame;
                }
            }
        })
        .await
        .expect("client frame in time")
    }

    /// Next client frame, heartbeat answers included.
    pub async fn next_raw_frame(&mut self) -> String {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .expect("client frame in time")
            .expect("server running")
    }

    pub fn socket_url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

/// Run the server side of the open and namespace handshakes on an accepted
/// socket, for tests that script the transport by hand.
pub async fn complete_handshake<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>, sid: &str)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let open = format!(
        r#"0{{"sid":"{sid}","upgrades":[],"pingInterval":5000,"pingTimeout":5000,"maxPayload":1000000}}"#
    );
    ws.send(Message::text(open)).await.unwrap();
    assert_eq!(next_text(ws).await, "40");
    ws.send(Message::text(format!(r#"40{{"sid":"ns-{sid}"}}"#)))
        .await
        .unwrap();
}

/// Next text frame from the client.
pub async fn next_text<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>) -> String
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("client frame in time")
}

#[derive(Clone)]
pub struct HttpState {
    pub body: Value,
    pub status: StatusCode,
    /// Number of leading requests answered with 500.
    pub failures: usize,
    pub hits: Arc<AtomicUsize>,
    pub cookies: Arc<std::sync::Mutex<Vec<Option<String>>>>,
}

impl HttpState {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            status: StatusCode::OK,
            failures: 0,
            hits: Arc::new(AtomicUsize::new(0)),
            cookies: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

async fn list_notifications(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    let cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.cookies.lock().unwrap().push(cookie);

    if hit < state.failures {
        return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(json!({"error": "boom"})));
    }
    (state.status, axum::Json(state.body.clone()))
}

/// Serve `GET /api/notifications/` and return the API base URL.
pub async fn start_http(state: HttpState) -> String {
    let app = Router::new()
        .route("/api/notifications/", get(list_notifications))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api")
}

pub fn client_config(socket_url: String, api_base_url: String) -> ClientConfig {
    ClientConfig {
        socket_url,
        api_base_url,
        request_timeout_secs: 5,
        fetch_retries: 2,
        reconnect: ReconnectConfig {
            max_reconnect_attempts: 5,
            base_reconnect_delay_ms: 50,
            max_reconnect_delay_ms: 200,
        },
        ..Default::default()
    }
}
