//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.carelink/config.json`) and environment.
//! Every section has defaults that match the stock backend deployment, so a missing file is fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::channel::ReconnectPolicy;

/// Top-level client config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend location.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session refresh behaviour.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Realtime channel settings.
    #[serde(default)]
    pub channel: ChannelConfig,
}

/// Backend base URL and REST prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Server root, e.g. "http://localhost:8080/". Overridden by CARELINK_SERVER_URL env.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Prefix for REST endpoints under the base URL (default "api/").
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

/// Refresh endpoint and the markers that identify an expired credential in a 401 body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Refresh endpoint relative to the base URL (not the API prefix).
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    /// Substrings of the 401 `message` that mean "expired" rather than "invalid".
    #[serde(default = "default_expiry_markers")]
    pub expiry_markers: Vec<String>,
}

/// Wire framing used on the channel endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelFraming {
    /// STOMP frames directly in WebSocket text messages (`{endpoint}/websocket`).
    #[default]
    Raw,
    /// STOMP frames wrapped in SockJS envelopes (`{endpoint}/{server}/{session}/websocket`).
    SockJs,
}

/// Realtime channel config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Channel endpoint relative to the base URL (default "ws").
    #[serde(default = "default_channel_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub framing: ChannelFraming,

    /// Per-user topic is `{topicPrefix}{userId}`.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Time allowed for the WebSocket upgrade plus STOMP CONNECTED (default 10000).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Reload the full received list after each reconnect so messages pushed while offline are not lost.
    #[serde(default = "default_true")]
    pub reload_on_reconnect: bool,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_base_url() -> String {
    "http://localhost:8080/".to_string()
}

fn default_api_prefix() -> String {
    "api/".to_string()
}

fn default_refresh_path() -> String {
    "refresh".to_string()
}

fn default_expiry_markers() -> Vec<String> {
    vec!["만료".to_string(), "expired".to_string()]
}

fn default_channel_endpoint() -> String {
    "ws".to_string()
}

fn default_topic_prefix() -> String {
    "/topic/chat/".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_prefix: default_api_prefix(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_path: default_refresh_path(),
            expiry_markers: default_expiry_markers(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_channel_endpoint(),
            framing: ChannelFraming::default(),
            topic_prefix: default_topic_prefix(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            reload_on_reconnect: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Join a base and a relative path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl ServerConfig {
    /// Absolute URL for a path directly under the server root (e.g. "refresh").
    pub fn server_url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Absolute URL for a REST endpoint under the API prefix (e.g. "messages/received/7").
    pub fn api_url(&self, path: &str) -> String {
        join_url(&join_url(&self.base_url, &self.api_prefix), path)
    }

    /// The base URL with its scheme switched to ws/wss.
    pub fn ws_base(&self) -> String {
        let base = self.base_url.trim();
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        }
    }
}

impl AuthConfig {
    /// True if a 401 message names an expired credential.
    pub fn is_expiry_message(&self, message: &str) -> bool {
        self.expiry_markers
            .iter()
            .filter(|m| !m.is_empty())
            .any(|m| message.contains(m.as_str()))
    }
}

/// Resolve the server base URL: env CARELINK_SERVER_URL overrides config.
pub fn resolve_server_url(config: &Config) -> String {
    std::env::var("CARELINK_SERVER_URL")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| config.server.base_url.trim().to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CARELINK_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".carelink").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default path). Missing file => default config.
/// Env overrides are applied to the result. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config.server.base_url = resolve_server_url(&config);
    Ok((config, path))
}
