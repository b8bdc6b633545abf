//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use booking::LedgerConfig;
use messaging::{ConsumerConfig, RelayConfig};

/// Process configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` (default `0.0.0.0`) and `PORT` (default `8080`)
/// - `RUST_LOG` tracing filter (default `info`), `LOG_FORMAT=json` for JSON logs
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs in memory
/// - `DATABASE_MAX_CONNECTIONS` (default `10`)
/// - `RELAY_POLL_INTERVAL_MS`, `RELAY_BATCH_SIZE`, `RELAY_LEASE_MS`
/// - `CONSUMER_MAX_ATTEMPTS`, `HANDLER_TIMEOUT_MS`
/// - `RESERVE_TIMEOUT_MS`, `RESERVE_MAX_RETRIES`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub relay: RelayConfig,
    pub consumer: ConsumerConfig,
    pub ledger: LedgerConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    ///
    /// Unparsable values fall back to the default, as does a zero
    /// `RELAY_BATCH_SIZE`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| {
            parsed::<u64>(&lookup, name)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            relay: RelayConfig {
                poll_interval: millis("RELAY_POLL_INTERVAL_MS", defaults.relay.poll_interval),
                batch_size: parsed(&lookup, "RELAY_BATCH_SIZE")
                    .filter(|size: &usize| *size > 0)
                    .unwrap_or(defaults.relay.batch_size),
                lease: millis("RELAY_LEASE_MS", defaults.relay.lease),
                ..defaults.relay
            },
            consumer: ConsumerConfig {
                max_attempts: parsed(&lookup, "CONSUMER_MAX_ATTEMPTS")
                    .unwrap_or(defaults.consumer.max_attempts),
                handler_timeout: millis("HANDLER_TIMEOUT_MS", defaults.consumer.handler_timeout),
                ..defaults.consumer
            },
            ledger: LedgerConfig {
                attempt_timeout: millis("RESERVE_TIMEOUT_MS", defaults.ledger.attempt_timeout),
                max_retries: parsed(&lookup, "RESERVE_MAX_RETRIES")
                    .unwrap_or(defaults.ledger.max_retries),
                ..defaults.ledger
            },
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            database_max_connections: 10,
            relay: RelayConfig::default(),
            consumer: ConsumerConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}
