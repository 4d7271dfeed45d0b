// ============================
// crates/sync-lib/src/config.rs
// ============================
//! Configuration management.
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the REST API, including the `/api` prefix
    pub api_base_url: String,
    /// URL of the live-update WebSocket endpoint
    pub socket_url: String,
    /// Base URL that relative media filenames are resolved against
    pub media_base_url: String,
    /// Directory holding the local key-value store
    pub data_dir: PathBuf,
    /// Log level
    pub log_level: String,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
    /// Capacity of the live event and command channels
    pub event_buffer: usize,
    /// Reconnect policy for the live channel
    pub reconnect: ReconnectSettings,
}

/// Reconnect policy for the live channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Attempts per outage before giving up; 0 retries forever
    pub max_attempts: u32,
    /// First backoff delay
    pub base_delay_ms: u64,
    /// Upper bound for the backoff delay
    pub max_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            socket_url: "ws://localhost:3000/ws".to_string(),
            media_base_url: "http://localhost:3000/uploads".to_string(),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            request_timeout_secs: 15,
            event_buffer: 64,
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectSettings {
    /// Exponential backoff for the given attempt (1-based), capped at `max_delay_ms`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

impl Settings {
    /// Load settings from defaults, `vaquerama.toml`, `vaquerama.json` and `VAQUERAMA_*` env vars
    pub fn load() -> Result<Self, SyncError> {
        Self::figment("vaquerama.toml").extract::<Self>()?.validated()
    }

    /// Load settings using an explicit config file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        Self::figment(path).extract::<Self>()?.validated()
    }

    fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Json::file("vaquerama.json"))
            .merge(Env::prefixed("VAQUERAMA_").split("__"))
    }

    fn validated(self) -> Result<Self, SyncError> {
        self.validate()?;
        Ok(self)
    }

    /// Check that the settings are usable
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.api_base_url.trim().is_empty() {
            return Err(SyncError::Config("api_base_url must not be empty".to_string()));
        }
        if !self.socket_url.starts_with("ws://") && !self.socket_url.starts_with("wss://") {
            return Err(SyncError::Config(format!(
                "socket_url must be a ws:// or wss:// URL, got {}",
                self.socket_url
            )));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(SyncError::Config(format!("Unknown log level {}", self.log_level)));
        }
        if self.event_buffer == 0 {
            return Err(SyncError::Config("event_buffer must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SyncError::Config("request_timeout_secs must be positive".to_string()));
        }
        if self.reconnect.base_delay_ms == 0 || self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(SyncError::Config("Invalid reconnect delays".to_string()));
        }
        Ok(())
    }

    /// HTTP request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolve a relative media filename for display
    pub fn media_url(&self, filename: &str) -> String {
        format!(
            "{}/{}",
            self.media_base_url.trim_end_matches('/'),
            filename.trim_start_matches('/')
        )
    }
}
