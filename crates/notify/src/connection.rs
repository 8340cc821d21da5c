//! Connection manager for the real-time notification channel.
//!
//! [`Connection`] owns exactly one Socket.IO session to the notification
//! service. A background task keeps it alive: it answers heartbeats, forwards
//! inbound events, writes outbound emits, and reconnects with exponential
//! backoff when the transport drops. Components that only need to emit get a
//! cloneable [`ChannelSender`]; the owner alone closes the connection.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request, header};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::{ClientConfig, Credentials, ReconnectConfig};
use crate::error::{NotifyError, Result};
use crate::protocol::{
    EnginePacket, Handshake, InboundEvent, OutboundEvent, SocketPacket, SocketPacketType,
};

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Observable state of the notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is in progress; emits queue until it resolves
    Connecting,
    /// Namespace connect acknowledged; emits are delivered
    Connected,
    /// Waiting before reconnect attempt number `attempt`
    Reconnecting { attempt: u32 },
    /// Shut down or out of reconnect attempts
    Closed,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

enum Command {
    Emit {
        event: OutboundEvent,
        receipt: oneshot::Sender<Result<()>>,
    },
    /// Subscribe to a user's topic; remembered and replayed after reconnects.
    Join {
        user_id: String,
        receipt: oneshot::Sender<Result<()>>,
    },
}

impl Command {
    fn reject(self, error: NotifyError) {
        let receipt = match self {
            Command::Emit { receipt, .. } | Command::Join { receipt, .. } => receipt,
        };
        let _ = receipt.send(Err(error));
    }
}

/// Resolves once an emit has been written to the socket, or has failed.
#[derive(Debug)]
pub struct DeliveryReceipt {
    rx: oneshot::Receiver<Result<()>>,
}

impl DeliveryReceipt {
    pub async fn wait(self) -> Result<()> {
        self.rx.await.unwrap_or(Err(NotifyError::ChannelClosed))
    }
}

/// Cloneable emit handle borrowed from a [`Connection`].
#[derive(Clone)]
pub struct ChannelSender {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ChannelSender {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Queue an event without waiting for it to be written.
    ///
    /// Fails immediately when the channel is closed or between reconnect
    /// attempts.
    pub fn emit(&self, event: OutboundEvent) -> Result<DeliveryReceipt> {
        match self.state() {
            ConnectionState::Closed => return Err(NotifyError::ChannelClosed),
            ConnectionState::Reconnecting { .. } => return Err(NotifyError::NotConnected),
            _ => {}
        }
        let (receipt, rx) = oneshot::channel();
        self.submit(Command::Emit { event, receipt })?;
        Ok(DeliveryReceipt { rx })
    }

    /// Subscribe to the per-user notification topic.
    ///
    /// The subscription is re-sent after every reconnect.
    pub fn join(&self, user_id: impl Into<String>) -> Result<DeliveryReceipt> {
        let (receipt, rx) = oneshot::channel();
        self.submit(Command::Join {
            user_id: user_id.into(),
            receipt,
        })?;
        Ok(DeliveryReceipt { rx })
    }

    /// Wait until the channel is ready, it closes, or `limit` elapses.
    pub async fn wait_ready(&self, limit: Duration) -> Result<()> {
        let mut state = self.state.clone();
        let outcome = tokio::time::timeout(
            limit,
            state.wait_for(|s| s.is_ready() || *s == ConnectionState::Closed),
        )
        .await;
        match outcome {
            Ok(Ok(current)) if current.is_ready() => Ok(()),
            Ok(_) => Err(NotifyError::ChannelClosed),
            Err(_) => Err(NotifyError::connection(format!(
                "channel not ready after {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                NotifyError::connection("outbound queue is full")
            }
            mpsc::error::TrySendError::Closed(_) => NotifyError::ChannelClosed,
        })
    }
}

/// Owned handle to the notification channel.
pub struct Connection {
    sender: ChannelSender,
    events: Option<mpsc::Receiver<InboundEvent>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Open the channel described by `config`.
    ///
    /// Returns as soon as the background task is spawned; use
    /// [`ChannelSender::wait_ready`] to wait for the session.
    pub fn open(config: &ClientConfig) -> Result<Self> {
        let endpoint = config.websocket_endpoint()?;
        // Fail on unusable credentials now rather than on every attempt.
        build_request(&endpoint, &config.credentials)?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        let task = ConnectionTask {
            endpoint,
            namespace: config.namespace.clone(),
            credentials: config.credentials.clone(),
            reconnect: config.reconnect,
            handshake_timeout: config.request_timeout(),
            commands: command_rx,
            events: event_tx,
            state: state_tx,
            cancel: cancel.clone(),
            joined_user: None,
        };
        let handle = tokio::spawn(task.run());

        Ok(Self {
            sender: ChannelSender {
                commands: command_tx,
                state: state_rx,
            },
            events: Some(event_rx),
            cancel,
            task: Some(handle),
        })
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.sender.state()
    }

    pub fn is_ready(&self) -> bool {
        self.sender.is_ready()
    }

    pub async fn wait_ready(&self, limit: Duration) -> Result<()> {
        self.sender.wait_ready(limit).await
    }

    /// Take the inbound event stream. There is a single consumer; later calls
    /// return `None`.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<InboundEvent>> {
        self.events.take()
    }

    /// Close the channel and wait for the background task to finish.
    pub async fn close(mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| NotifyError::other(format!("connection task failed: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn build_request(endpoint: &Url, credentials: &Credentials) -> Result<Request<()>> {
    let mut request = endpoint.as_str().into_client_request()?;
    let headers = request.headers_mut();

    if let Some(cookie) = credentials.cookie_header() {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| NotifyError::config(format!("invalid cookie header: {e}")))?;
        headers.insert(header::COOKIE, value);
    }
    if let Some(auth) = credentials.authorization_header() {
        let value = HeaderValue::from_str(&auth)
            .map_err(|e| NotifyError::config(format!("invalid bearer token: {e}")))?;
        headers.insert(header::AUTHORIZATION, value);
    }
    Ok(request)
}

/// Why a live session ended.
enum SessionEnd {
    Shutdown,
    Lost(String),
}

enum Flow {
    Continue,
    Lost(String),
}

struct ConnectionTask {
    endpoint: Url,
    namespace: String,
    credentials: Credentials,
    reconnect: ReconnectConfig,
    handshake_timeout: Duration,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<InboundEvent>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    joined_user: Option<String>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let cancel = self.cancel.clone();

        loop {
            if attempt > 0 {
                self.state.send_replace(ConnectionState::Connecting);
            }
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.establish() => result,
            };

            match outcome {
                Ok((stream, handshake)) => {
                    attempt = 0;
                    self.state.send_replace(ConnectionState::Connected);
                    info!(sid = %handshake.sid, namespace = %self.namespace, "Notification channel connected");

                    match self.session(stream, &handshake).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            warn!(%reason, "Notification channel lost");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Failed to connect notification channel");
                }
            }

            if attempt >= self.reconnect.max_reconnect_attempts {
                error!(
                    attempts = attempt,
                    "Max reconnect attempts reached for notification channel"
                );
                break;
            }
            attempt += 1;
            self.state
                .send_replace(ConnectionState::Reconnecting { attempt });

            let delay = self.reconnect.delay_for_attempt(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting notification channel");
            if !self.backoff(delay).await {
                break;
            }
        }

        self.state.send_replace(ConnectionState::Closed);
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            command.reject(NotifyError::ChannelClosed);
        }
        debug!("Notification channel task stopped");
    }

    /// Open the WebSocket and complete the Engine.IO and namespace handshakes.
    async fn establish(&mut self) -> Result<(WsStream, Handshake)> {
        let request = build_request(&self.endpoint, &self.credentials)?;
        info!(url = %self.endpoint, "Connecting to notification service");
        let (mut stream, _) = connect_async(request).await?;

        let handshake = tokio::time::timeout(self.handshake_timeout, self.handshake(&mut stream))
            .await
            .map_err(|_| NotifyError::connection("handshake timed out"))??;
        Ok((stream, handshake))
    }

    async fn handshake(&self, stream: &mut WsStream) -> Result<Handshake> {
        let handshake = loop {
            match next_engine_packet(stream).await? {
                EnginePacket::Open(handshake) => break handshake,
                other => trace!(?other, "Ignoring packet before open"),
            }
        };
        debug!(
            sid = %handshake.sid,
            ping_interval = handshake.ping_interval,
            ping_timeout = handshake.ping_timeout,
            "Engine.IO session opened"
        );

        let connect = SocketPacket::connect(&self.namespace, self.credentials.auth_payload());
        stream.send(Message::text(connect.to_frame())).await?;

        loop {
            match next_engine_packet(stream).await? {
                EnginePacket::Ping(data) => {
                    stream.send(Message::text(EnginePacket::Pong(data).encode())).await?;
                }
                EnginePacket::Message(body) => {
                    let packet = SocketPacket::decode(&body)?;
                    if packet.namespace != self.namespace {
                        continue;
                    }
                    match packet.kind {
                        SocketPacketType::Connect => return Ok(handshake),
                        SocketPacketType::ConnectError => {
                            let reason = packet
                                .data
                                .as_ref()
                                .and_then(|d| d.get("message"))
                                .and_then(|m| m.as_str())
                                .unwrap_or("connection refused");
                            return Err(NotifyError::connection(format!(
                                "namespace {} refused: {reason}",
                                self.namespace
                            )));
                        }
                        _ => trace!(kind = ?packet.kind, "Ignoring packet before namespace connect"),
                    }
                }
                EnginePacket::Close => {
                    return Err(NotifyError::connection("server closed during handshake"));
                }
                _ => {}
            }
        }
    }

    async fn session(&mut self, mut stream: WsStream, handshake: &Handshake) -> SessionEnd {
        if let Some(user_id) = self.joined_user.clone() {
            let join = OutboundEvent::JoinNotificationsForUser { user_id };
            if let Err(e) = self.write_event(&mut stream, &join).await {
                return SessionEnd::Lost(format!("failed to restore subscription: {e}"));
            }
            debug!("Restored user subscription after reconnect");
        }

        let cancel = self.cancel.clone();
        let liveness = handshake.liveness_window();
        let deadline = tokio::time::sleep(liveness);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let bye = SocketPacket::disconnect(&self.namespace);
                    let _ = stream.send(Message::text(bye.to_frame())).await;
                    let _ = stream.close(None).await;
                    return SessionEnd::Shutdown;
                }

                _ = &mut deadline => {
                    return SessionEnd::Lost(format!(
                        "no heartbeat within {}ms",
                        liveness.as_millis()
                    ));
                }

                Some(command) = self.commands.recv() => {
                    let (event, receipt) = match command {
                        Command::Emit { event, receipt } => (event, receipt),
                        Command::Join { user_id, receipt } => {
                            self.joined_user = Some(user_id.clone());
                            (OutboundEvent::JoinNotificationsForUser { user_id }, receipt)
                        }
                    };
                    match self.write_event(&mut stream, &event).await {
                        Ok(()) => {
                            let _ = receipt.send(Ok(()));
                        }
                        Err(e) => {
                            let reason = format!("failed to emit {}: {e}", event.name());
                            let _ = receipt.send(Err(e));
                            return SessionEnd::Lost(reason);
                        }
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            deadline.as_mut().reset(tokio::time::Instant::now() + liveness);
                            if let Flow::Lost(reason) = self.handle_frame(&mut stream, text.as_str()).await {
                                return SessionEnd::Lost(reason);
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            debug!("Ignoring binary frame");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return SessionEnd::Lost(format!("server closed the socket: {frame:?}"));
                        }
                        Some(Ok(_)) => {
                            deadline.as_mut().reset(tokio::time::Instant::now() + liveness);
                        }
                        Some(Err(e)) => {
                            return SessionEnd::Lost(format!("websocket error: {e}"));
                        }
                        None => {
                            return SessionEnd::Lost("websocket stream ended".to_string());
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, stream: &mut WsStream, text: &str) -> Flow {
        let packet = match EnginePacket::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "Failed to decode frame");
                return Flow::Continue;
            }
        };

        match packet {
            EnginePacket::Ping(data) => {
                trace!("Heartbeat ping");
                let pong = EnginePacket::Pong(data).encode();
                if let Err(e) = stream.send(Message::text(pong)).await {
                    return Flow::Lost(format!("failed to answer ping: {e}"));
                }
            }
            EnginePacket::Close => return Flow::Lost("server closed the session".to_string()),
            EnginePacket::Message(body) => return self.handle_message(&body).await,
            other => trace!(?other, "Ignoring Engine.IO packet"),
        }
        Flow::Continue
    }

    async fn handle_message(&mut self, body: &str) -> Flow {
        let packet = match SocketPacket::decode(body) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "Failed to decode Socket.IO packet");
                return Flow::Continue;
            }
        };
        if packet.namespace != self.namespace {
            trace!(namespace = %packet.namespace, "Ignoring packet for another namespace");
            return Flow::Continue;
        }

        match packet.kind {
            SocketPacketType::Event => match InboundEvent::from_packet(&packet) {
                Ok(Some(event)) => {
                    if self.events.send(event).await.is_err() {
                        debug!("Inbound event receiver dropped");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to decode event"),
            },
            SocketPacketType::Disconnect => {
                return Flow::Lost("server disconnected the namespace".to_string());
            }
            SocketPacketType::ConnectError => {
                return Flow::Lost(format!("connect error: {:?}", packet.data));
            }
            kind if kind.is_binary() => debug!("Ignoring binary Socket.IO packet"),
            kind => trace!(?kind, "Ignoring Socket.IO packet"),
        }
        Flow::Continue
    }

    async fn write_event(&self, stream: &mut WsStream, event: &OutboundEvent) -> Result<()> {
        let frame = event.to_packet(&self.namespace).to_frame();
        trace!(%frame, "Emitting");
        stream.send(Message::text(frame)).await?;
        Ok(())
    }

    /// Sleep before the next attempt. Emits arriving meanwhile fail fast.
    /// Returns `false` when shutdown was requested.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let cancel = self.cancel.clone();
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                Some(command) = self.commands.recv() => {
                    if let Command::Join { user_id, .. } = &command {
                        self.joined_user = Some(user_id.clone());
                    }
                    command.reject(NotifyError::NotConnected);
                }
            }
        }
    }
}

async fn next_engine_packet(stream: &mut WsStream) -> Result<EnginePacket> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return EnginePacket::decode(text.as_str()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(NotifyError::connection("socket closed during handshake"));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn detached_sender(state: ConnectionState) -> (ChannelSender, mpsc::Receiver<Command>) {
        let (commands, rx) = mpsc::channel(1);
        let (_state_tx, state_rx) = watch::channel(state);
        (
            ChannelSender {
                commands,
                state: state_rx,
            },
            rx,
        )
    }

    #[test]
    fn test_state_readiness() {
        assert!(ConnectionState::Connected.is_ready());
        assert!(!ConnectionState::Connecting.is_ready());
        assert!(!ConnectionState::Reconnecting { attempt: 2 }.is_ready());
        assert!(!ConnectionState::Closed.is_ready());
    }

    #[test]
    fn test_emit_fails_fast_when_not_connected() {
        let mark = OutboundEvent::MarkRead {
            notification_id: "n1".to_string(),
        };

        let (sender, _rx) = detached_sender(ConnectionState::Reconnecting { attempt: 1 });
        assert!(matches!(
            sender.emit(mark.clone()),
            Err(NotifyError::NotConnected)
        ));

        let (sender, _rx) = detached_sender(ConnectionState::Closed);
        assert!(matches!(sender.emit(mark), Err(NotifyError::ChannelClosed)));
    }

    #[test]
    fn test_emit_on_stopped_task_is_channel_closed() {
        let (sender, rx) = detached_sender(ConnectionState::Connected);
        drop(rx);
        let result = sender.emit(OutboundEvent::MarkAllRead {
            user_id: "u1".to_string(),
        });
        assert!(matches!(result, Err(NotifyError::ChannelClosed)));
    }

    #[test]
    fn test_emit_queue_full() {
        let (sender, _rx) = detached_sender(ConnectionState::Connected);
        let event = OutboundEvent::MarkAllRead {
            user_id: "u1".to_string(),
        };
        assert!(sender.emit(event.clone()).is_ok());
        assert!(matches!(
            sender.emit(event),
            Err(NotifyError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_receipt_resolves_closed_when_dropped() {
        let (sender, mut rx) = detached_sender(ConnectionState::Connected);
        let receipt = sender.join("u1").unwrap();
        let command = rx.recv().await.unwrap();
        drop(command);
        assert!(matches!(receipt.wait().await, Err(NotifyError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_wait_ready_reports_closed() {
        let (sender, _rx) = detached_sender(ConnectionState::Closed);
        assert!(matches!(
            sender.wait_ready(Duration::from_millis(50)).await,
            Err(NotifyError::ChannelClosed)
        ));
    }

    #[test]
    fn test_build_request_sets_credentials() {
        let endpoint = Url::parse("ws://localhost:5000/socket.io/?EIO=4&transport=websocket").unwrap();
        let credentials = Credentials {
            cookies: Some("session=abc; theme=dark".to_string()),
            bearer_token: Some("tok".to_string()),
        };
        let request = build_request(&endpoint, &credentials).unwrap();
        assert_eq!(request.headers()[header::COOKIE], "session=abc; theme=dark");
        assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer tok");

        let bad = Credentials {
            cookies: Some("session=a\nb".to_string()),
            bearer_token: None,
        };
        assert!(matches!(
            build_request(&endpoint, &bad),
            Err(NotifyError::Config(_))
        ));
    }
}
