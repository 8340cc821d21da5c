//! Client configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::error::{NotifyError, Result};
use crate::protocol::DEFAULT_NAMESPACE;

/// Engine.IO protocol revision spoken by this client.
pub const ENGINE_IO_VERSION: &str = "4";

/// Configuration for a notification client session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Notification service socket endpoint (`http(s)://` or `ws(s)://`).
    /// When the path is empty the Socket.IO default `/socket.io/` is used.
    pub socket_url: String,
    /// Base URL of the REST API serving `GET /notifications/`.
    pub api_base_url: String,
    /// Socket.IO namespace.
    pub namespace: String,
    pub credentials: Credentials,
    pub reconnect: ReconnectConfig,
    /// Timeout for a single bulk-fetch request.
    pub request_timeout_secs: u64,
    /// Retries after the first failed bulk fetch.
    pub fetch_retries: u32,
    /// Maximum notifications kept in memory; oldest arrivals are pruned.
    pub max_entries: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_url: "http://localhost:5000".to_string(),
            api_base_url: "http://localhost:5000/api".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            credentials: Credentials::default(),
            reconnect: ReconnectConfig::default(),
            request_timeout_secs: 10,
            fetch_retries: 2,
            max_entries: 500,
        }
    }
}

impl ClientConfig {
    /// Check URLs and limits before any connection is attempted.
    pub fn validate(&self) -> Result<()> {
        self.websocket_endpoint()?;
        self.notifications_url()?;
        if !self.namespace.starts_with('/') {
            return Err(NotifyError::config(format!(
                "namespace must start with '/': {}",
                self.namespace
            )));
        }
        if self.max_entries == 0 {
            return Err(NotifyError::config("max_entries must be greater than 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(NotifyError::config(
                "request_timeout_secs must be greater than 0",
            ));
        }
        self.reconnect.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolve the WebSocket URL including the Engine.IO query parameters.
    pub fn websocket_endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.socket_url)
            .map_err(|e| NotifyError::config(format!("invalid socket_url: {e}")))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(NotifyError::config(format!(
                    "unsupported socket_url scheme: {other}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| NotifyError::config("cannot rewrite socket_url scheme"))?;

        if url.path().is_empty() || url.path() == "/" {
            url.set_path("/socket.io/");
        }
        url.query_pairs_mut()
            .append_pair("EIO", ENGINE_IO_VERSION)
            .append_pair("transport", "websocket");
        Ok(url)
    }

    /// Resolve `{api_base_url}/notifications/`.
    pub fn notifications_url(&self) -> Result<Url> {
        let mut base = Url::parse(&self.api_base_url)
            .map_err(|e| NotifyError::config(format!("invalid api_base_url: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(NotifyError::config(format!(
                "unsupported api_base_url scheme: {}",
                base.scheme()
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join("notifications/")
            .map_err(|e| NotifyError::config(format!("invalid notifications url: {e}")))
    }
}

/// Session credentials shared by the socket and the HTTP client.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Raw `Cookie` header value (`name=value; other=value`).
    pub cookies: Option<String>,
    /// Bearer token sent as `Authorization` and in the Socket.IO auth payload.
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("cookies", &self.cookies.as_ref().map(|_| "<redacted>"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Cookie header value, if any non-empty cookies are configured.
    pub fn cookie_header(&self) -> Option<String> {
        merge_cookie_headers(self.cookies.as_deref(), None)
    }

    /// Overlay `extra` cookies on top of the configured ones; same-name
    /// cookies from `extra` win.
    pub fn with_extra_cookies(mut self, extra: Option<&str>) -> Self {
        self.cookies = merge_cookie_headers(self.cookies.as_deref(), extra);
        self
    }

    pub fn authorization_header(&self) -> Option<String> {
        self.bearer_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| format!("Bearer {t}"))
    }

    /// Socket.IO connect payload.
    pub fn auth_payload(&self) -> Option<serde_json::Value> {
        self.bearer_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| serde_json::json!({ "token": t }))
    }
}

fn parse_cookie_header(input: &str) -> Vec<(String, String)> {
    input
        .split(';')
        .filter_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            let (name, value) = (name.trim(), value.trim());
            (!name.is_empty() && !value.is_empty()).then(|| (name.to_string(), value.to_string()))
        })
        .collect()
}

fn merge_cookie_headers(base: Option<&str>, extra: Option<&str>) -> Option<String> {
    let mut parts = base.map(parse_cookie_header).unwrap_or_default();
    let mut index_by_name: HashMap<String, usize> = parts
        .iter()
        .enumerate()
        .map(|(idx, (name, _))| (name.clone(), idx))
        .collect();

    for (name, value) in extra.map(parse_cookie_header).unwrap_or_default() {
        match index_by_name.get(&name) {
            Some(&idx) => parts[idx].1 = value,
            None => {
                index_by_name.insert(name.clone(), parts.len());
                parts.push((name, value));
            }
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(
        parts
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Reconnect policy for the notification channel.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before the channel gives up.
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            base_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30000,
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if self.base_reconnect_delay_ms == 0 {
            return Err(NotifyError::config(
                "base_reconnect_delay_ms must be greater than 0",
            ));
        }
        if self.max_reconnect_delay_ms < self.base_reconnect_delay_ms {
            return Err(NotifyError::config(
                "max_reconnect_delay_ms must not be below base_reconnect_delay_ms",
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based): doubles from the base
    /// delay and saturates at the maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_reconnect_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_reconnect_delay_ms);
        Duration::from_millis(delay)
    }
}
