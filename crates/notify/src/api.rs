//! HTTP collaborator for the one-time bulk fetch.

use async_trait::async_trait;
use reqwest::{Client, header};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{NotifyError, Result};
use crate::model::Notification;

/// Initial delay between bulk-fetch retries; doubles after each attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Keys under which some endpoints wrap the notification array.
const WRAPPER_KEYS: &[&str] = &["data", "notifications", "results"];

/// Source of the authenticated user's notification list.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>>;
}

/// `GET /notifications/` over reqwest.
pub struct HttpNotificationApi {
    client: Client,
    url: Url,
    cookie: Option<String>,
    authorization: Option<String>,
    retries: u32,
}

impl HttpNotificationApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.notifications_url()?,
            cookie: config.credentials.cookie_header(),
            authorization: config.credentials.authorization_header(),
            retries: config.fetch_retries,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn fetch_once(&self) -> Result<Vec<Notification>> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(header::ACCEPT, "application/json");
        if let Some(cookie) = &self.cookie {
            request = request.header(header::COOKIE, cookie);
        }
        if let Some(auth) = &self.authorization {
            request = request.header(header::AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        parse_notification_list(body)
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>> {
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 0;
        loop {
            match self.fetch_once().await {
                Ok(list) => {
                    debug!(count = list.len(), url = %self.url, "Fetched notifications");
                    return Ok(list);
                }
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, max = self.retries, "Bulk fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Accept a bare array or an object wrapping it under a well-known key.
pub fn parse_notification_list(body: Value) -> Result<Vec<Notification>> {
    let list = match body {
        Value::Array(_) => body,
        Value::Object(mut map) => WRAPPER_KEYS
            .iter()
            .find_map(|key| map.remove(*key).filter(Value::is_array))
            .ok_or_else(|| {
                NotifyError::protocol("response object does not contain a notification list")
            })?,
        other => {
            return Err(NotifyError::protocol(format!(
                "unexpected notification response: {other}"
            )));
        }
    };
    Ok(serde_json::from_value(list)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn record(id: &str) -> Value {
        json!({
            "id": id,
            "type": "comment",
            "title": "New comment",
            "message": "on T-1",
            "read": false,
            "created_at": "2024-05-01T12:00:00Z"
        })
    }

    #[rstest]
    #[case(json!([record("a"), record("b")]))]
    #[case(json!({"data": [record("a"), record("b")]}))]
    #[case(json!({"notifications": [record("a"), record("b")], "total": 2}))]
    #[case(json!({"success": true, "results": [record("a"), record("b")]}))]
    fn test_parse_accepted_shapes(#[case] body: Value) {
        let list = parse_notification_list(body).unwrap();
        let ids: Vec<&str> = list.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[rstest]
    #[case(json!({"data": {"id": "a"}}))]
    #[case(json!({"message": "ok"}))]
    #[case(json!("nope"))]
    #[case(json!(null))]
    fn test_parse_rejects_other_shapes(#[case] body: Value) {
        assert!(matches!(
            parse_notification_list(body),
            Err(NotifyError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_bad_record() {
        let body = json!([{"title": "missing id"}]);
        assert!(matches!(
            parse_notification_list(body),
            Err(NotifyError::Serialization(_))
        ));
    }

    #[test]
    fn test_new_resolves_url_and_credentials() {
        let mut config = ClientConfig::default();
        config.api_base_url = "https://board.example.com/api".to_string();
        config.credentials.cookies = Some("sid=1".to_string());
        let api = HttpNotificationApi::new(&config).unwrap();
        assert_eq!(api.url().as_str(), "https://board.example.com/api/notifications/");
        assert_eq!(api.cookie.as_deref(), Some("sid=1"));
        assert_eq!(api.authorization, None);
    }
}
