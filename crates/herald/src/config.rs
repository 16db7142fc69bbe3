//! Broker configuration.

use crate::error::{HeraldError, HeraldResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Socket address to listen on
    pub listen_addr: String,

    /// HTTP path that accepts WebSocket upgrades
    pub ws_path: String,

    /// SQLite database file. `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,

    /// How long a new connection may take to answer the `authenticate` prompt
    pub auth_timeout: Duration,

    /// Per-task grace period when closing a connection
    pub close_grace: Duration,

    /// Per-poller grace period when a subscription manager stops them
    pub stop_timeout: Duration,

    /// Pause between poll cycles of one subscription
    pub poll_interval: Duration,

    /// Maximum messages per delivered batch
    pub batch_limit: usize,

    /// How long a poller waits for a confirmation before polling again
    pub redelivery_timeout: Duration,

    /// Pause between expiry sweeps
    pub sweep_interval: Duration,

    /// How long shutdown waits for open sessions to wind down
    pub shutdown_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8001".to_string(),
            ws_path: "/ws".to_string(),
            database_path: default_database_path(),
            auth_timeout: Duration::from_secs(30),
            close_grace: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            batch_limit: 10,
            redelivery_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// `~/.herald/herald.db`, if a home directory exists.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".herald").join("herald.db"))
}

impl BrokerConfig {
    /// Defaults overridden by `HERALD_*` environment variables.
    pub fn from_env() -> HeraldResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> HeraldResult<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup("HERALD_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(path) = lookup("HERALD_WS_PATH") {
            config.ws_path = path;
        }
        if let Some(db) = lookup("HERALD_DATABASE") {
            config.database_path = match db.as_str() {
                "" | ":memory:" => None,
                path => Some(PathBuf::from(path)),
            };
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HERALD_AUTH_TIMEOUT_SECS")? {
            config.auth_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "HERALD_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_var::<usize>(&lookup, "HERALD_BATCH_LIMIT")? {
            config.batch_limit = limit;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HERALD_REDELIVERY_TIMEOUT_SECS")? {
            config.redelivery_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HERALD_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> HeraldResult<()> {
        if self.batch_limit == 0 {
            return Err(HeraldError::Config("batch limit must be at least 1".into()));
        }
        if self.poll_interval.is_zero() || self.sweep_interval.is_zero() {
            return Err(HeraldError::Config(
                "poll and sweep intervals must be non-zero".into(),
            ));
        }
        if !self.ws_path.starts_with('/') {
            return Err(HeraldError::Config(format!(
                "websocket path '{}' must start with '/'",
                self.ws_path
            )));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> HeraldResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| HeraldError::Config(format!("{key}: cannot parse '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8001");
        assert_eq!(config.auth_timeout, Duration::from_secs(30));
        assert_eq!(config.close_grace, Duration::from_secs(5));
        assert_eq!(config.stop_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_env_overrides() {
        let config = BrokerConfig::from_lookup(lookup(&[
            ("HERALD_LISTEN_ADDR", "0.0.0.0:9000"),
            ("HERALD_DATABASE", ":memory:"),
            ("HERALD_POLL_INTERVAL_MS", "250"),
            ("HERALD_BATCH_LIMIT", "3"),
        ]))
        .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert!(config.database_path.is_none());
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.batch_limit, 3);
    }

    #[test]
    fn test_bad_values_are_rejected() {
        let err = BrokerConfig::from_lookup(lookup(&[("HERALD_AUTH_TIMEOUT_SECS", "soon")]));
        assert!(matches!(err, Err(HeraldError::Config(_))));

        let err = BrokerConfig::from_lookup(lookup(&[("HERALD_BATCH_LIMIT", "0")]));
        assert!(matches!(err, Err(HeraldError::Config(_))));
    }
}
