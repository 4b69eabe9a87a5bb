//! Engine settings read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {message}")]
    Invalid {
        var: &'static str,
        value: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Postgres connection string; the in-memory store is used when absent.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub poll_interval: Duration,
    pub stall_timeout: Duration,
    pub memory_threshold_mb: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3003)),
            poll_interval: Duration::from_millis(250),
            stall_timeout: Duration::from_secs(600),
            memory_threshold_mb: 500,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset or empty variables fall
    /// back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                get("DATABASE_MAX_CONNECTIONS"),
                defaults.database_max_connections,
            )?,
            bind_addr: parse_or("ENGINE_BIND_ADDR", get("ENGINE_BIND_ADDR"), defaults.bind_addr)?,
            poll_interval: parse_positive("QUEUE_POLL_INTERVAL_MS", get("QUEUE_POLL_INTERVAL_MS"), 250)
                .map(Duration::from_millis)?,
            stall_timeout: parse_positive(
                "QUEUE_STALL_TIMEOUT_SECS",
                get("QUEUE_STALL_TIMEOUT_SECS"),
                defaults.stall_timeout.as_secs(),
            )
            .map(Duration::from_secs)?,
            memory_threshold_mb: parse_or(
                "HEALTH_MEMORY_THRESHOLD_MB",
                get("HEALTH_MEMORY_THRESHOLD_MB"),
                defaults.memory_threshold_mb,
            )?,
        })
    }

    pub fn memory_threshold_bytes(&self) -> u64 {
        self.memory_threshold_mb.saturating_mul(1024 * 1024)
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            message: e.to_string(),
            value: raw,
        }),
    }
}

/// Like [`parse_or`], but zero is rejected.
fn parse_positive(var: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match parse_or(var, value, default)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: "0".into(),
            message: "must be greater than zero".into(),
        }),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.bind_addr.port(), 3003);
        assert_eq!(config.memory_threshold_bytes(), 500 * 1024 * 1024);
    }

    #[test]
    fn overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/rigger"),
            ("ENGINE_BIND_ADDR", "127.0.0.1:8080"),
            ("QUEUE_POLL_INTERVAL_MS", "100"),
            ("QUEUE_STALL_TIMEOUT_SECS", " 30 "),
            ("HEALTH_MEMORY_THRESHOLD_MB", "256"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/rigger"));
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.stall_timeout, Duration::from_secs(30));
        assert_eq!(config.memory_threshold_mb, 256);
        assert_eq!(config.database_max_connections, 4);
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let config = EngineConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap();
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn invalid_number_is_reported() {
        let err = EngineConfig::from_lookup(lookup(&[("QUEUE_POLL_INTERVAL_MS", "fast")]))
            .unwrap_err();
        match err {
            ConfigError::Invalid { var, value, .. } => {
                assert_eq!(var, "QUEUE_POLL_INTERVAL_MS");
                assert_eq!(value, "fast");
            }
        }
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for var in ["QUEUE_POLL_INTERVAL_MS", "QUEUE_STALL_TIMEOUT_SECS"] {
            let err = EngineConfig::from_lookup(lookup(&[(var, "0")])).unwrap_err();
            match err {
                ConfigError::Invalid { var: got, message, .. } => {
                    assert_eq!(got, var);
                    assert!(message.contains("greater than zero"));
                }
            }
        }
    }
}
