use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use shared::domain::UserId;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend base url, `http(s)://host[:port]`.
    pub endpoint: String,
    pub device: String,
    pub token: Option<String>,
    pub user_id: UserId,
    /// Non-browser clients cannot carry same-origin cookies, so the token rides in the url.
    pub with_token_in_url: bool,
    pub reconnect_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub topic_ttl_secs: u64,
    pub recall_window_secs: u64,
    pub database_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000".into(),
            device: "rust-sdk".into(),
            token: None,
            user_id: UserId::default(),
            with_token_in_url: true,
            reconnect_interval_secs: 5,
            heartbeat_interval_secs: 30,
            request_timeout_secs: 15,
            topic_ttl_secs: 300,
            recall_window_secs: 120,
            database_url: None,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            user_id: UserId::new(user_id),
            ..Self::default()
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn topic_ttl(&self) -> Duration {
        Duration::from_secs(self.topic_ttl_secs)
    }

    pub fn recall_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.recall_window_secs as i64)
    }
}

/// Reads `path` when it exists, then applies `CHAT__*` environment overrides.
pub fn load_settings(path: impl AsRef<Path>) -> ClientConfig {
    let path = path.as_ref();
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<ClientConfig>(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %path.display(), "config: ignoring unparseable settings file: {err}");
                ClientConfig::default()
            }
        },
        Err(_) => ClientConfig::default(),
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_env_overrides(settings: &mut ClientConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CHAT__ENDPOINT") {
        settings.endpoint = v;
    }
    if let Some(v) = lookup("CHAT__DEVICE") {
        settings.device = v;
    }
    if let Some(v) = lookup("CHAT__TOKEN") {
        settings.token = Some(v);
    }
    if let Some(v) = lookup("CHAT__USER_ID") {
        settings.user_id = UserId::new(v);
    }
    if let Some(v) = lookup("CHAT__DATABASE_URL") {
        settings.database_url = Some(v);
    }
    if let Some(v) = lookup("CHAT__WITH_TOKEN_IN_URL") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.with_token_in_url = parsed;
        }
    }

    let numeric: [(&str, &mut u64); 5] = [
        ("CHAT__RECONNECT_INTERVAL_SECS", &mut settings.reconnect_interval_secs),
        ("CHAT__HEARTBEAT_INTERVAL_SECS", &mut settings.heartbeat_interval_secs),
        ("CHAT__REQUEST_TIMEOUT_SECS", &mut settings.request_timeout_secs),
        ("CHAT__TOPIC_TTL_SECS", &mut settings.topic_ttl_secs),
        ("CHAT__RECALL_WINDOW_SECS", &mut settings.recall_window_secs),
    ];
    for (key, slot) in numeric {
        if let Some(v) = lookup(key) {
            match v.parse::<u64>() {
                Ok(parsed) => *slot = parsed,
                Err(_) => warn!(key, value = %v, "config: ignoring non-numeric override"),
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
