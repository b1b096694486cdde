//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

/// Runtime configuration for corral-server.
///
/// Every field except [`Config::database_url`] has a default, so a dev
/// instance needs exactly one variable set.
#[derive(Debug, Clone)]
pub struct Config {
    /// Catalog database URL (required, `CORRAL_DATABASE_URL`).
    ///
    /// Any sqlx-compatible SQLite URL, e.g.
    /// `sqlite:///var/lib/corral/corral.db?mode=rwc`.  Relative paths resolve
    /// against the server's working directory at startup.
    pub database_url: String,

    /// Interface to bind (default `"0.0.0.0"`).
    pub addr: String,

    /// TCP port (default `"8080"`).
    pub port: String,

    /// External message broker placement.  The in-process bus ignores these;
    /// they are read by broker-backed [`corral_bus::Messenger`]
    /// implementations wired in at build time.
    pub nats_url: String,
    pub nats_user: String,
    pub nats_password: String,

    /// Base URL of the operator UI, reserved for the fronting proxy.
    pub ui_base_url: String,

    /// Comma-separated CORS origin allow-list; `*` allows any origin.
    pub allowed_origins: String,
    /// Comma-separated CORS methods.
    pub allowed_methods: String,
    /// Comma-separated CORS headers.
    pub allowed_headers: String,
    /// Origins that may send credentialed requests (the UI proxy).
    pub proxy_origin: String,

    /// Shared secret for bearer-token identities.
    pub jwt_secret: String,
    /// When `false` (default), authorization checks are skipped entirely.
    pub jwt_enabled: bool,

    /// `tracing` filter string, e.g. `"info"` or `"debug,sqlx=warn"`.
    pub log_level: String,
    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Seconds between reconciliation / download ticks (default 10).
    pub sync_interval_secs: u64,
    /// Consecutive failures before a supervised loop's breaker opens.
    pub failure_threshold: u32,
    /// Seconds an open breaker waits before admitting a probe.
    pub reset_timeout_secs: u64,

    /// When `true`, reconcile per pool instead of against the global model
    /// list.
    pub pool_sync: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: env_or("CORRAL_DATABASE_URL", ""),
            addr: env_or("CORRAL_ADDR", "0.0.0.0"),
            port: env_or("CORRAL_PORT", "8080"),
            nats_url: env_or("CORRAL_NATS_URL", ""),
            nats_user: env_or("CORRAL_NATS_USER", ""),
            nats_password: env_or("CORRAL_NATS_PASSWORD", ""),
            ui_base_url: env_or("CORRAL_UI_BASE_URL", "http://localhost:3000"),
            allowed_origins: env_or("CORRAL_ALLOWED_ORIGINS", "*"),
            allowed_methods: env_or("CORRAL_ALLOWED_METHODS", "GET,POST,PUT,DELETE,OPTIONS"),
            allowed_headers: env_or("CORRAL_ALLOWED_HEADERS", "Authorization,Content-Type"),
            proxy_origin: env_or("CORRAL_PROXY_ORIGIN", ""),
            jwt_secret: env_or("CORRAL_JWT_SECRET", ""),
            jwt_enabled: bool_env("CORRAL_JWT_ENABLED", false),
            log_level: env_or("CORRAL_LOG", "info"),
            log_json: bool_env("CORRAL_LOG_JSON", false),
            sync_interval_secs: parse_env("CORRAL_SYNC_INTERVAL_SECS", 10),
            failure_threshold: parse_env("CORRAL_FAILURE_THRESHOLD", 3),
            reset_timeout_secs: parse_env("CORRAL_RESET_TIMEOUT_SECS", 10),
            pool_sync: bool_env("CORRAL_POOL_SYNC", false),
        }
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("CORRAL_DATABASE_URL is required");
        }
        if self.sync_interval_secs == 0 {
            anyhow::bail!("CORRAL_SYNC_INTERVAL_SECS must be at least 1");
        }
        if self.jwt_enabled && self.jwt_secret.is_empty() {
            anyhow::bail!("CORRAL_JWT_SECRET is required when CORRAL_JWT_ENABLED is set");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database_url: "sqlite://corral.db?mode=rwc".to_owned(),
            addr: "0.0.0.0".to_owned(),
            port: "8080".to_owned(),
            nats_url: String::new(),
            nats_user: String::new(),
            nats_password: String::new(),
            ui_base_url: String::new(),
            allowed_origins: "*".to_owned(),
            allowed_methods: "GET".to_owned(),
            allowed_headers: "Authorization".to_owned(),
            proxy_origin: String::new(),
            jwt_secret: String::new(),
            jwt_enabled: false,
            log_level: "info".to_owned(),
            log_json: false,
            sync_interval_secs: 10,
            failure_threshold: 3,
            reset_timeout_secs: 10,
            pool_sync: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn missing_database_url_is_rejected() {
        let mut cfg = base_config();
        cfg.database_url = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = base_config();
        cfg.sync_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn jwt_enabled_requires_secret() {
        let mut cfg = base_config();
        cfg.jwt_enabled = true;
        assert!(cfg.validate().is_err());
        cfg.jwt_secret = "secret".to_owned();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bind_address_joins_addr_and_port() {
        assert_eq!(base_config().bind_address(), "0.0.0.0:8080");
    }
}
