// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development.

use std::net::SocketAddr;
use std::time::Duration;

pub(crate) const DEFAULT_PORT: u16 = 8000;
pub(crate) const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
pub(crate) const DEFAULT_PONG_TIMEOUT_SECS: u64 = 75;
pub(crate) const DEFAULT_SESSION_GRACE_SECS: u64 = 120;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// How often the relay pings every session.
    pub ping_interval: Duration,
    /// How long a connection may stay silent before it is treated as closed.
    pub pong_timeout: Duration,
    /// Grace period before an empty session is evicted.
    pub session_grace: Duration,
    /// Log filter directive (e.g. `info`, `scrimlink_relay=debug`).
    pub log_filter: String,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `SCRIMLINK_HOST` | `0.0.0.0` |
    /// | `SCRIMLINK_PORT` | `8000` |
    /// | `SCRIMLINK_PING_INTERVAL_SECS` | `30` |
    /// | `SCRIMLINK_PONG_TIMEOUT_SECS` | `75` |
    /// | `SCRIMLINK_SESSION_GRACE_SECS` | `120` |
    /// | `SCRIMLINK_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("SCRIMLINK_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("SCRIMLINK_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let ping_interval =
            Duration::from_secs(parse_secs(&env, "SCRIMLINK_PING_INTERVAL_SECS", DEFAULT_PING_INTERVAL_SECS));
        let pong_timeout =
            Duration::from_secs(parse_secs(&env, "SCRIMLINK_PONG_TIMEOUT_SECS", DEFAULT_PONG_TIMEOUT_SECS));
        let session_grace =
            Duration::from_secs(parse_secs(&env, "SCRIMLINK_SESSION_GRACE_SECS", DEFAULT_SESSION_GRACE_SECS));

        let log_filter = env("SCRIMLINK_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, ping_interval, pong_timeout, session_grace, log_filter }
    }
}

fn parse_secs<F>(env: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    env(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default)
}
