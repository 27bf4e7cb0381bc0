//! Client configuration

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tavern_domain::DEFAULT_MESSAGE_CAPACITY;
use thiserror::Error;

use crate::infrastructure::websocket::shared::{
    HANDSHAKE_TIMEOUT_SECS, HEARTBEAT_INTERVAL_SECS, OUTBOUND_BUFFER, PROBE_TIMEOUT_MS,
};
use crate::infrastructure::websocket::{EndpointConfig, ReconnectPolicy};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Connection manager settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub endpoint: EndpointConfig,
    /// Ping interval while connected
    pub heartbeat_interval: Duration,
    /// Bound on the pre-flight connectivity probe
    pub probe_timeout: Duration,
    /// Bound on the real WebSocket handshake
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Frames `send()` may queue before reporting `QueueFull`
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            probe_timeout: Duration::from_millis(PROBE_TIMEOUT_MS),
            handshake_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            reconnect: ReconnectPolicy::default(),
            outbound_buffer: OUTBOUND_BUFFER,
        }
    }
}

/// Client configuration loaded from environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    /// Message log cap
    pub message_capacity: usize,
    /// Credential file; platform data dir when unset
    pub storage_path: Option<PathBuf>,
    /// Token that bypasses storage lookup
    pub token: Option<String>,
    /// Author name used for local echoes
    pub display_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            storage_path: None,
            token: None,
            display_name: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = ConnectionConfig::default();

        let heartbeat_secs: u64 = parse_var(&text, "TAVERN_HEARTBEAT_SECS")?
            .unwrap_or(HEARTBEAT_INTERVAL_SECS);
        if heartbeat_secs == 0 {
            return Err(invalid("TAVERN_HEARTBEAT_SECS", "0", "must be positive"));
        }
        let probe_ms: u64 =
            parse_var(&text, "TAVERN_PROBE_TIMEOUT_MS")?.unwrap_or(PROBE_TIMEOUT_MS);
        let message_capacity: usize =
            parse_var(&text, "TAVERN_MESSAGE_CAP")?.unwrap_or(DEFAULT_MESSAGE_CAPACITY);
        if message_capacity == 0 {
            return Err(invalid("TAVERN_MESSAGE_CAP", "0", "must be at least 1"));
        }

        Ok(Self {
            connection: ConnectionConfig {
                endpoint: EndpointConfig {
                    url_override: text("TAVERN_WS_URL"),
                    host_override: text("TAVERN_WS_HOST"),
                    secure: parse_flag(&text, "TAVERN_WS_SECURE")?.unwrap_or(false),
                    api_base_url: text("TAVERN_API_URL"),
                },
                heartbeat_interval: Duration::from_secs(heartbeat_secs),
                probe_timeout: Duration::from_millis(probe_ms),
                ..defaults
            },
            message_capacity,
            storage_path: text("TAVERN_STORAGE_PATH").map(PathBuf::from),
            token: text("TAVERN_TOKEN"),
            display_name: text("TAVERN_PLAYER_NAME"),
        })
    }
}

/// Load `.env.local` then `.env` from `dir`; existing variables are kept
pub fn load_dotenv(dir: &Path) {
    for filename in [".env.local", ".env"] {
        let path = dir.join(filename);
        if path.exists() {
            if let Err(e) = dotenvy::from_path(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load env file");
            }
        }
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_var<T>(
    text: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    text(var)
        .map(|raw| raw.parse::<T>().map_err(|e| invalid(var, &raw, e.to_string())))
        .transpose()
}

fn parse_flag(
    text: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<bool>, ConfigError> {
    text(var)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(var, &raw, "expected true/false")),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config(&[]).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.connection.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.connection.probe_timeout, Duration::from_millis(5_000));
        assert_eq!(config.message_capacity, 100);
        assert_eq!(config.connection.reconnect.max_attempts, 5);
    }

    #[test]
    fn reads_every_variable() {
        let config = config(&[
            ("TAVERN_WS_URL", "ws://127.0.0.1:9/ws/{session_id}"),
            ("TAVERN_WS_HOST", "game.example.com"),
            ("TAVERN_WS_SECURE", "true"),
            ("TAVERN_API_URL", "https://api.example.com"),
            ("TAVERN_HEARTBEAT_SECS", "10"),
            ("TAVERN_PROBE_TIMEOUT_MS", "250"),
            ("TAVERN_MESSAGE_CAP", "20"),
            ("TAVERN_STORAGE_PATH", "/tmp/tavern.json"),
            ("TAVERN_TOKEN", "abc"),
            ("TAVERN_PLAYER_NAME", "Mira"),
        ])
        .unwrap();

        let endpoint = &config.connection.endpoint;
        assert_eq!(endpoint.url_override.as_deref(), Some("ws://127.0.0.1:9/ws/{session_id}"));
        assert_eq!(endpoint.host_override.as_deref(), Some("game.example.com"));
        assert!(endpoint.secure);
        assert_eq!(endpoint.api_base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.connection.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.connection.probe_timeout, Duration::from_millis(250));
        assert_eq!(config.message_capacity, 20);
        assert_eq!(config.storage_path, Some(PathBuf::from("/tmp/tavern.json")));
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.display_name.as_deref(), Some("Mira"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config(&[("TAVERN_TOKEN", "   "), ("TAVERN_WS_URL", "")]).unwrap();
        assert_eq!(config.token, None);
        assert_eq!(config.connection.endpoint.url_override, None);
    }

    #[test]
    fn rejects_bad_numbers_and_flags() {
        assert!(matches!(
            config(&[("TAVERN_MESSAGE_CAP", "lots")]),
            Err(ConfigError::Invalid { var: "TAVERN_MESSAGE_CAP", .. })
        ));
        assert!(matches!(
            config(&[("TAVERN_MESSAGE_CAP", "0")]),
            Err(ConfigError::Invalid { var: "TAVERN_MESSAGE_CAP", .. })
        ));
        assert!(matches!(
            config(&[("TAVERN_HEARTBEAT_SECS", "0")]),
            Err(ConfigError::Invalid { var: "TAVERN_HEARTBEAT_SECS", .. })
        ));
        assert!(matches!(
            config(&[("TAVERN_WS_SECURE", "maybe")]),
            Err(ConfigError::Invalid { var: "TAVERN_WS_SECURE", .. })
        ));
    }

    #[test]
    fn dotenv_files_are_loaded_local_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env.local"), "TAVERN_CONFIG_TEST_VAR=local\n").unwrap();
        std::fs::write(dir.path().join(".env"), "TAVERN_CONFIG_TEST_VAR=shared\n").unwrap();

        load_dotenv(dir.path());
        assert_eq!(env::var("TAVERN_CONFIG_TEST_VAR").unwrap(), "local");
    }
}
