use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use sprint_notify::ClientConfig;
use std::path::{Path, PathBuf};

pub const ENV_SOCKET_URL: &str = "SBNOTIFY_SOCKET_URL";
pub const ENV_API_URL: &str = "SBNOTIFY_API_URL";
pub const ENV_COOKIE: &str = "SBNOTIFY_COOKIE";
pub const ENV_TOKEN: &str = "SBNOTIFY_TOKEN";

const MASK: &str = "***";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Colorize pretty output
    pub colored: bool,
    pub notify: ClientConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            colored: true,
            notify: ClientConfig::default(),
        }
    }
}

impl AppConfig {
    /// `<config dir>/sbnotify/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sbnotify").join("config.toml"))
    }

    /// Load the TOML file (defaults when absent), then apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.notify.validate()?;
        Ok(config)
    }

    fn from_file(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path(),
        };
        match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                tracing::debug!(path = %path.display(), "Loaded configuration");
                Ok(toml::from_str(&content)?)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_SOCKET_URL) {
            self.notify.socket_url = url;
        }
        if let Some(url) = get(ENV_API_URL) {
            self.notify.api_base_url = url;
        }
        if let Some(cookie) = get(ENV_COOKIE) {
            self.notify.credentials.cookies = Some(cookie);
        }
        if let Some(token) = get(ENV_TOKEN) {
            self.notify.credentials.bearer_token = Some(token);
        }
    }

    /// Merge `--cookie` over the configured cookies.
    pub fn with_cookie_override(mut self, cookie: Option<&str>) -> Self {
        if cookie.is_some() {
            self.notify.credentials = self.notify.credentials.with_extra_cookies(cookie);
        }
        self
    }

    /// Render as TOML with cookie values and the token masked.
    pub fn show(&self) -> Result<String> {
        let mut masked = self.clone();
        let credentials = &mut masked.notify.credentials;
        credentials.cookies = credentials.cookie_header().map(|header| mask_cookies(&header));
        if credentials.bearer_token.is_some() {
            credentials.bearer_token = Some(MASK.to_string());
        }
        toml::to_string_pretty(&masked).map_err(AppError::from)
    }
}

fn mask_cookies(header: &str) -> String {
    header
        .split("; ")
        .map(|pair| match pair.split_once('=') {
            Some((name, _)) => format!("{name}={MASK}"),
            None => MASK.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}
