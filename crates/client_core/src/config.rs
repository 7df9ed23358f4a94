use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use url::Url;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_SETTINGS_FILE: &str = "dispatch.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            base_backoff_ms: 0,
        }
    }

    /// Linear backoff; `attempt` is 1-based.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(attempt as u64))
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: String,
    pub dispatch_ws_path: String,
    pub fleet_ws_path: String,
    pub session_file: PathBuf,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            dispatch_ws_path: "/ws/chat/".into(),
            fleet_ws_path: "/ws/fleet/".into(),
            session_file: PathBuf::from("./data/session.json"),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientSettings {
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn api_base(&self) -> Result<Url> {
        let trimmed = self.api_url.trim_end_matches('/');
        Url::parse(&format!("{trimmed}/"))
            .with_context(|| format!("invalid api url: {}", self.api_url))
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.api_base()?;
        base.join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid endpoint path: {path}"))
    }

    pub fn dispatch_ws_url(&self, token: &str) -> Result<Url> {
        websocket_url(&self.api_url, &self.dispatch_ws_path, token)
    }

    pub fn fleet_ws_url(&self, token: &str) -> Result<Url> {
        websocket_url(&self.api_url, &self.fleet_ws_path, token)
    }
}

pub fn websocket_url(api_url: &str, path: &str, token: &str) -> Result<Url> {
    let ws_base = if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(anyhow!("api_url must start with http:// or https://"));
    };
    let ws_base = ws_base.trim_end_matches('/');
    let mut url = Url::parse(&format!("{ws_base}/{}", path.trim_start_matches('/')))
        .with_context(|| format!("invalid websocket url for path {path}"))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

pub fn load_settings() -> ClientSettings {
    let raw = fs::read_to_string(DEFAULT_SETTINGS_FILE).ok();
    let env: HashMap<String, String> = std::env::vars().collect();
    resolve_settings(raw.as_deref(), &env)
}

/// File values override defaults; environment overrides file.
pub fn resolve_settings(file_contents: Option<&str>, env: &HashMap<String, String>) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Some(raw) = file_contents {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) {
            if let Some(v) = file_cfg.get("api_url").and_then(toml::Value::as_str) {
                settings.api_url = v.to_string();
            }
            if let Some(v) = file_cfg.get("dispatch_ws_path").and_then(toml::Value::as_str) {
                settings.dispatch_ws_path = v.to_string();
            }
            if let Some(v) = file_cfg.get("fleet_ws_path").and_then(toml::Value::as_str) {
                settings.fleet_ws_path = v.to_string();
            }
            if let Some(v) = file_cfg.get("session_file").and_then(toml::Value::as_str) {
                settings.session_file = PathBuf::from(v);
            }
            if let Some(v) = file_cfg
                .get("reconnect_attempts")
                .and_then(toml::Value::as_integer)
            {
                settings.reconnect.max_attempts = v.max(0) as usize;
            }
            if let Some(v) = file_cfg
                .get("reconnect_backoff_ms")
                .and_then(toml::Value::as_integer)
            {
                settings.reconnect.base_backoff_ms = v.max(0) as u64;
            }
        }
    }

    if let Some(v) = env.get("DISPATCH_API_URL") {
        settings.api_url = v.clone();
    }
    if let Some(v) = env.get("APP__API_URL") {
        settings.api_url = v.clone();
    }

    if let Some(v) = env.get("DISPATCH_SESSION_FILE") {
        settings.session_file = PathBuf::from(v);
    }

    if let Some(parsed) = env
        .get("DISPATCH_RECONNECT_ATTEMPTS")
        .and_then(|v| v.parse::<usize>().ok())
    {
        settings.reconnect.max_attempts = parsed;
    }
    if let Some(parsed) = env
        .get("DISPATCH_RECONNECT_BACKOFF_MS")
        .and_then(|v| v.parse::<u64>().ok())
    {
        settings.reconnect.base_backoff_ms = parsed;
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
