//! Server and client configuration.

use std::env;
use std::time::Duration;

/// Sync server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the WebSocket listener (e.g., "127.0.0.1:9090")
    pub bind_addr: String,
    /// Events buffered per session before a slow peer starts losing them
    pub outbox_capacity: usize,
    /// WebSocket ping interval in seconds (0 disables heartbeats)
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            outbox_capacity: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `BOXWIRE_BIND_ADDR`, `BOXWIRE_OUTBOX_CAPACITY`
    /// and `BOXWIRE_HEARTBEAT_SECS`. Unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: lookup("BOXWIRE_BIND_ADDR")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.bind_addr),
            outbox_capacity: parse_or(
                lookup("BOXWIRE_OUTBOX_CAPACITY"),
                defaults.outbox_capacity,
            )
            .max(1),
            heartbeat_interval_secs: parse_or(
                lookup("BOXWIRE_HEARTBEAT_SECS"),
                defaults.heartbeat_interval_secs,
            ),
        }
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0)
            .then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Sync client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket URL of the sync server (e.g., "ws://127.0.0.1:9090")
    pub server_url: String,
    /// Inbound events buffered before the reader task waits on the application
    pub event_buffer: usize,
    /// Connection attempts made by `reconnect()` before giving up
    pub reconnect_attempts: u32,
    /// Delay before the second attempt; doubles on every further attempt
    pub reconnect_base_delay: Duration,
    /// Minimum interval between outgoing cursor updates
    pub cursor_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            event_buffer: 256,
            reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(250),
            cursor_interval: Duration::from_millis(33),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Backoff before attempt number `attempt` (0-based). The first attempt is immediate.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.reconnect_base_delay.saturating_mul(1u32 << (attempt - 1).min(16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.outbox_capacity, 256);
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_server_config_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("BOXWIRE_BIND_ADDR", "0.0.0.0:8080"),
            ("BOXWIRE_OUTBOX_CAPACITY", "32"),
            ("BOXWIRE_HEARTBEAT_SECS", "0"),
        ]);
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.outbox_capacity, 32);
        assert_eq!(config.heartbeat_interval(), None);
    }

    #[test]
    fn test_server_config_ignores_garbage() {
        let config = ServerConfig::from_lookup(|k| match k {
            "BOXWIRE_OUTBOX_CAPACITY" => Some("lots".to_string()),
            "BOXWIRE_BIND_ADDR" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let config = ServerConfig::from_lookup(|k| {
            (k == "BOXWIRE_OUTBOX_CAPACITY").then(|| "0".to_string())
        });
        assert_eq!(config.outbox_capacity, 1);
    }

    #[test]
    fn test_client_backoff_doubles() {
        let config = ClientConfig::new("ws://example:1");
        assert_eq!(config.server_url, "ws://example:1");
        assert_eq!(config.backoff(0), Duration::ZERO);
        assert_eq!(config.backoff(1), Duration::from_millis(250));
        assert_eq!(config.backoff(2), Duration::from_millis(500));
        assert_eq!(config.backoff(3), Duration::from_millis(1000));
    }
}
