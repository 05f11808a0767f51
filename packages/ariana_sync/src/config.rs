use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::Backoff;
use crate::error::ConfigError;

// =============================================================================
// Client config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [reconnect]
//                    max_delay_ms = 30000
//
//   env var:         ARIANA_RECONNECT__MAX_DELAY_MS=30000   (double underscore = nesting)

/// Everything a client needs besides the token it was handed at runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Backend endpoint (lives under `[server]` in config.toml).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            token: None,
        }
    }
}

/// Reconnect schedule (lives under `[reconnect]` in config.toml).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Event-log window sizes (lives under `[events]` in config.toml).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u32,
    #[serde(default = "default_page_increment")]
    pub page_increment: u32,
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            page_increment: default_page_increment(),
            max_limit: default_max_limit(),
        }
    }
}

impl EventsConfig {
    /// Window after one more "load older" step, or `None` at the ceiling.
    pub fn next_limit(&self, current: u32) -> Option<u32> {
        if current >= self.max_limit {
            return None;
        }
        Some(current.saturating_add(self.page_increment).min(self.max_limit))
    }
}

fn default_ws_url() -> String {
    "wss://ariana.dev/ws".to_string()
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_limit() -> u32 {
    80
}

fn default_page_increment() -> u32 {
    100
}

fn default_max_limit() -> u32 {
    500
}

/// `~/.ariana`
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".ariana"))
        .ok_or(ConfigError::NoHomeDir)
}

/// Build a figment that layers: defaults → config.toml → ARIANA_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `ARIANA_SERVER__WS_URL=ws://localhost:3000/ws`  →  `server.ws_url`
///   `ARIANA_EVENTS__MAX_LIMIT=300`  →  `events.max_limit = 300`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(SyncConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("ARIANA_").split("__"))
}

impl SyncConfig {
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        Ok(load_config(config_dir).extract()?)
    }
}
