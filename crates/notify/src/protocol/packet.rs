//! Engine.IO v4 / Socket.IO v5 framing over the WebSocket transport.
//!
//! Each WebSocket text frame carries exactly one Engine.IO packet. Engine.IO
//! `message` packets carry one Socket.IO packet:
//!
//! ```text
//! <type>[<attachments>-][<namespace>,][<ack id>][<json payload>]
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::{NotifyError, Result};

/// The default Socket.IO namespace.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Parameters announced by the server in the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// How long the link may stay silent before it is considered dead.
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// An Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Decode a single text frame.
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| NotifyError::protocol("empty Engine.IO frame"))?;
        let body = chars.as_str();
        let optional = |s: &str| (!s.is_empty()).then(|| s.to_string());

        match kind {
            '0' => serde_json::from_str(body)
                .map(EnginePacket::Open)
                .map_err(|e| NotifyError::protocol(format!("invalid open packet: {e}"))),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(optional(body))),
            '3' => Ok(EnginePacket::Pong(optional(body))),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(NotifyError::protocol(format!(
                "unknown Engine.IO packet type '{other}'"
            ))),
        }
    }

    /// Encode into a text frame. Only the packets a client sends are
    /// meaningful here; `Open` encodes to its bare type digit.
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data.as_deref().unwrap_or_default()),
            EnginePacket::Pong(data) => format!("3{}", data.as_deref().unwrap_or_default()),
            EnginePacket::Message(body) => format!("4{body}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl SocketPacketType {
    fn from_digit(c: char) -> Option<Self> {
        Some(match c {
            '0' => Self::Connect,
            '1' => Self::Disconnect,
            '2' => Self::Event,
            '3' => Self::Ack,
            '4' => Self::ConnectError,
            '5' => Self::BinaryEvent,
            '6' => Self::BinaryAck,
            _ => return None,
        })
    }

    fn digit(&self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
            Self::BinaryEvent => '5',
            Self::BinaryAck => '6',
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }
}

/// A Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub kind: SocketPacketType,
    pub namespace: String,
    pub ack_id: Option<u64>,
    pub data: Option<Value>,
}

impl SocketPacket {
    /// Namespace connect request, optionally carrying an auth payload.
    pub fn connect(namespace: &str, auth: Option<Value>) -> Self {
        Self {
            kind: SocketPacketType::Connect,
            namespace: namespace.to_string(),
            ack_id: None,
            data: auth,
        }
    }

    pub fn disconnect(namespace: &str) -> Self {
        Self {
            kind: SocketPacketType::Disconnect,
            namespace: namespace.to_string(),
            ack_id: None,
            data: None,
        }
    }

    /// Event packet `[name, ...args]`.
    pub fn event(namespace: &str, name: &str, args: Vec<Value>) -> Self {
        let mut payload = Vec::with_capacity(args.len() + 1);
        payload.push(Value::String(name.to_string()));
        payload.extend(args);
        Self {
            kind: SocketPacketType::Event,
            namespace: namespace.to_string(),
            ack_id: None,
            data: Some(Value::Array(payload)),
        }
    }

    /// Split an event payload into its name and arguments.
    pub fn event_parts(&self) -> Option<(&str, &[Value])> {
        if self.kind != SocketPacketType::Event {
            return None;
        }
        match self.data.as_ref()? {
            Value::Array(items) => {
                let (name, args) = items.split_first()?;
                Some((name.as_str()?, args))
            }
            _ => None,
        }
    }

    /// Decode the body of an Engine.IO message packet.
    pub fn decode(body: &str) -> Result<Self> {
        let mut chars = body.chars();
        let kind = chars
            .next()
            .and_then(SocketPacketType::from_digit)
            .ok_or_else(|| NotifyError::protocol(format!("invalid Socket.IO packet: {body:?}")))?;
        let mut rest = chars.as_str();

        if kind.is_binary() {
            // `<attachments>-` prefix
            let dash = rest
                .find('-')
                .ok_or_else(|| NotifyError::protocol("binary packet without attachment count"))?;
            rest = &rest[dash + 1..];
        }

        let mut namespace = DEFAULT_NAMESPACE.to_string();
        if rest.starts_with('/') {
            match rest.find(',') {
                Some(comma) => {
                    namespace = rest[..comma].to_string();
                    rest = &rest[comma + 1..];
                }
                None => {
                    namespace = rest.to_string();
                    rest = "";
                }
            }
        }

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            let id = rest[..digits]
                .parse()
                .map_err(|_| NotifyError::protocol("ack id out of range"))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest).map_err(|e| {
                NotifyError::protocol(format!("invalid Socket.IO payload: {e}"))
            })?)
        };

        Ok(Self {
            kind,
            namespace,
            ack_id,
            data,
        })
    }

    /// Encode into the body of an Engine.IO message packet.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.digit());
        if self.namespace != DEFAULT_NAMESPACE && !self.namespace.is_empty() {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.ack_id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Wrap into a complete WebSocket text frame.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}
