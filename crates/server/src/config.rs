// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Invalid numeric values fall back to their defaults;
// `validate` rejects combinations that would break the lease protocol.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;
use tracing::warn;

use crate::db::pool::PoolConfig;
use crate::lock::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_LEASE_TTL};

const DEV_JWT_SECRET: &str = "inkwell_local_development_jwt_secret_must_be_32_chars";
const DEFAULT_PORT: u16 = 8090;
const DEFAULT_SWEEP_SECS: u64 = 60;
const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 10_000;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HS256 secret for bearer tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string. `None` selects the in-memory backends.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive, overridden by `RUST_LOG`.
    pub log_filter: String,
    pub log_format: LogFormat,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
    /// `None` disables the expired-lease sweep.
    pub sweep_interval: Option<Duration>,
    /// Upper bound for every version store call.
    pub storage_timeout: Duration,
    pub pool: PoolConfig,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `INKWELL_HOST` | `0.0.0.0` |
    /// | `INKWELL_PORT` | `8090` |
    /// | `INKWELL_JWT_SECRET` | dev-only placeholder |
    /// | `INKWELL_DATABASE_URL` | *(none: memory backends)* |
    /// | `INKWELL_CORS_ORIGINS` | *(none: cors.rs uses dev defaults)* |
    /// | `INKWELL_LOG_FILTER` | `info` |
    /// | `INKWELL_LOG_FORMAT` | `text` |
    /// | `INKWELL_LEASE_TTL_SECS` | `90` |
    /// | `INKWELL_HEARTBEAT_INTERVAL_SECS` | `30` |
    /// | `INKWELL_LEASE_SWEEP_SECS` | `60` (`0` disables) |
    /// | `INKWELL_STORAGE_TIMEOUT_MS` | `10000` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    pub fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("INKWELL_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_or(&env, "INKWELL_PORT", DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("INKWELL_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());
        let database_url = env("INKWELL_DATABASE_URL").ok().filter(|url| !url.trim().is_empty());
        let cors_origins = env("INKWELL_CORS_ORIGINS").ok();
        let log_filter = env("INKWELL_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format =
            env("INKWELL_LOG_FORMAT").map(|v| LogFormat::parse(&v)).unwrap_or(LogFormat::Text);

        let lease_ttl = Duration::from_secs(parse_or(
            &env,
            "INKWELL_LEASE_TTL_SECS",
            DEFAULT_LEASE_TTL.as_secs(),
        ));
        let heartbeat_interval = Duration::from_secs(parse_or(
            &env,
            "INKWELL_HEARTBEAT_INTERVAL_SECS",
            DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
        ));
        let sweep_secs: u64 = parse_or(&env, "INKWELL_LEASE_SWEEP_SECS", DEFAULT_SWEEP_SECS);
        let sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));
        let storage_timeout = Duration::from_millis(parse_or(
            &env,
            "INKWELL_STORAGE_TIMEOUT_MS",
            DEFAULT_STORAGE_TIMEOUT_MS,
        ));

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            cors_origins,
            log_filter,
            log_format,
            lease_ttl,
            heartbeat_interval,
            sweep_interval,
            storage_timeout,
            pool: PoolConfig::from_env_fn(&env),
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    /// Reject settings under which a live editor could lose its lease
    /// between two heartbeats.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lease_ttl.is_zero() {
            bail!("INKWELL_LEASE_TTL_SECS must be greater than zero");
        }
        if self.heartbeat_interval.is_zero() {
            bail!("INKWELL_HEARTBEAT_INTERVAL_SECS must be greater than zero");
        }
        if self.heartbeat_interval >= self.lease_ttl {
            bail!(
                "heartbeat interval ({}s) must be shorter than the lease ttl ({}s)",
                self.heartbeat_interval.as_secs(),
                self.lease_ttl.as_secs()
            );
        }
        if self.storage_timeout.is_zero() {
            bail!("INKWELL_STORAGE_TIMEOUT_MS must be greater than zero");
        }

        if self.lease_ttl < self.heartbeat_interval * 2 {
            warn!(
                lease_ttl_secs = self.lease_ttl.as_secs(),
                heartbeat_interval_secs = self.heartbeat_interval.as_secs(),
                "lease ttl is less than two heartbeat intervals; one slow heartbeat loses the lease"
            );
        }
        if self.is_dev_jwt_secret() {
            warn!("using the development JWT secret; set INKWELL_JWT_SECRET in production");
        }

        Ok(())
    }
}

pub(crate) fn parse_or<F, T>(env: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: std::str::FromStr,
{
    env(key).ok().and_then(|value| value.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    fn config_with(pairs: &[(&'static str, &'static str)]) -> ServerConfig {
        ServerConfig::from_env_fn(env_from_map(pairs.iter().copied().collect()))
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = config_with(&[]);
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:8090");
        assert!(cfg.is_dev_jwt_secret());
        assert!(cfg.database_url.is_none());
        assert!(cfg.cors_origins.is_none());
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert_eq!(cfg.lease_ttl, Duration::from_secs(90));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.sweep_interval, Some(Duration::from_secs(60)));
        assert_eq!(cfg.storage_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.pool.max_connections, 20);
        cfg.validate().expect("defaults should validate");
    }

    #[test]
    fn custom_host_and_port() {
        let cfg = config_with(&[("INKWELL_HOST", "127.0.0.1"), ("INKWELL_PORT", "3000")]);
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn invalid_port_uses_default() {
        let cfg = config_with(&[("INKWELL_PORT", "not_a_number")]);
        assert_eq!(cfg.listen_addr.port(), 8090);
    }

    #[test]
    fn custom_jwt_secret_is_not_dev() {
        let cfg = config_with(&[("INKWELL_JWT_SECRET", "production_secret_at_least_32_chars!!")]);
        assert!(!cfg.is_dev_jwt_secret());
    }

    #[test]
    fn blank_database_url_selects_memory_backends() {
        let cfg = config_with(&[("INKWELL_DATABASE_URL", "  ")]);
        assert!(cfg.database_url.is_none());

        let cfg = config_with(&[("INKWELL_DATABASE_URL", "postgres://u:p@host/db")]);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://u:p@host/db"));
    }

    #[test]
    fn json_log_format_is_case_insensitive() {
        assert_eq!(config_with(&[("INKWELL_LOG_FORMAT", "JSON")]).log_format, LogFormat::Json);
        assert_eq!(config_with(&[("INKWELL_LOG_FORMAT", "pretty")]).log_format, LogFormat::Text);
    }

    #[test]
    fn zero_sweep_disables_sweeper() {
        let cfg = config_with(&[("INKWELL_LEASE_SWEEP_SECS", "0")]);
        assert_eq!(cfg.sweep_interval, None);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let cfg = config_with(&[("INKWELL_LEASE_TTL_SECS", "0")]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn heartbeat_must_be_shorter_than_ttl() {
        let cfg = config_with(&[
            ("INKWELL_LEASE_TTL_SECS", "30"),
            ("INKWELL_HEARTBEAT_INTERVAL_SECS", "30"),
        ]);
        let error = cfg.validate().expect_err("equal interval and ttl should be rejected");
        assert!(error.to_string().contains("shorter than the lease ttl"));
    }

    #[test]
    fn tight_ttl_only_warns() {
        let cfg = config_with(&[
            ("INKWELL_LEASE_TTL_SECS", "40"),
            ("INKWELL_HEARTBEAT_INTERVAL_SECS", "30"),
        ]);
        cfg.validate().expect("ttl below twice the interval is allowed");
    }

    #[test]
    fn pool_settings_come_from_the_same_lookup() {
        let cfg = config_with(&[
            ("INKWELL_DB_MIN_CONNECTIONS", "1"),
            ("INKWELL_DB_MAX_CONNECTIONS", "4"),
            ("INKWELL_DB_ACQUIRE_TIMEOUT_SECS", "3"),
        ]);
        assert_eq!(cfg.pool.min_connections, 1);
        assert_eq!(cfg.pool.max_connections, 4);
        assert_eq!(cfg.pool.acquire_timeout, Duration::from_secs(3));
    }
}
