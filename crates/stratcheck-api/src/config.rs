//! # Service Configuration
//!
//! Command-line flags with `STRATCHECK_*` environment fallbacks, parsed once
//! at startup by `clap`. [`AppConfig::validate`] rejects settings the trust
//! layer cannot honour before anything binds a socket.

use std::time::Duration;

use axum::http::HeaderValue;
use clap::{Args, Parser, ValueEnum};
use stratcheck_core::{
    RateLimitConfig, RateLimitConfigError, RetryPolicy, DEFAULT_PURGE_INTERVAL, DEFAULT_STORE_DEADLINE,
};
use thiserror::Error;

/// Deployment environment, reported by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Top-level service configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "stratcheck-api", version, about = "StratCheck API server")]
pub struct AppConfig {
    /// API server port.
    #[arg(long, env = "STRATCHECK_PORT", default_value_t = 4000)]
    pub port: u16,

    /// Environment name.
    #[arg(long, env = "STRATCHECK_ENV", value_enum, default_value_t = Environment::Development)]
    pub env: Environment,

    /// Log output format.
    #[arg(long, env = "STRATCHECK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub db: DbConfig,

    #[command(flatten)]
    pub limiter: LimiterConfig,

    #[command(flatten)]
    pub shutdown: ShutdownConfig,

    #[command(flatten)]
    pub notify: NotifyConfig,

    #[command(flatten)]
    pub tokens: TokenConfig,

    #[command(flatten)]
    pub cors: CorsConfig,
}

/// Database settings.
#[derive(Clone, Args)]
pub struct DbConfig {
    /// PostgreSQL DSN. When absent the service runs on in-memory stores.
    #[arg(long = "db-dsn", env = "DATABASE_URL")]
    pub dsn: Option<String>,

    /// Maximum open connections in the pool.
    #[arg(long = "db-max-open-conns", env = "STRATCHECK_DB_MAX_OPEN_CONNS", default_value_t = 25)]
    pub max_open_conns: u32,

    /// Connections kept open while idle.
    #[arg(long = "db-min-idle-conns", env = "STRATCHECK_DB_MIN_IDLE_CONNS", default_value_t = 2)]
    pub min_idle_conns: u32,

    /// Close connections idle for longer than this many seconds.
    #[arg(long = "db-max-idle-secs", env = "STRATCHECK_DB_MAX_IDLE_SECS", default_value_t = 900)]
    pub max_idle_secs: u64,

    /// Deadline for a single storage call, in milliseconds.
    #[arg(long = "db-timeout-ms", env = "STRATCHECK_DB_TIMEOUT_MS", default_value_t = 3000)]
    pub timeout_ms: u64,
}

impl DbConfig {
    pub fn store_deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

// The DSN may embed a password.
impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("dsn", &self.dsn.as_ref().map(|_| "[REDACTED]"))
            .field("max_open_conns", &self.max_open_conns)
            .field("min_idle_conns", &self.min_idle_conns)
            .field("max_idle_secs", &self.max_idle_secs)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, Args)]
pub struct LimiterConfig {
    /// Enable the per-client rate limiter.
    #[arg(
        long = "limiter-enabled",
        env = "STRATCHECK_LIMITER_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enabled: bool,

    /// Tokens refilled per second.
    #[arg(long = "limiter-rps", env = "STRATCHECK_LIMITER_RPS", default_value_t = 2.0)]
    pub rps: f64,

    /// Bucket capacity (maximum burst).
    #[arg(long = "limiter-burst", env = "STRATCHECK_LIMITER_BURST", default_value_t = 4)]
    pub burst: u32,

    /// Seconds between idle-bucket sweeps.
    #[arg(long = "limiter-sweep-secs", env = "STRATCHECK_LIMITER_SWEEP_SECS", default_value_t = 60)]
    pub sweep_secs: u64,

    /// Seconds a bucket may go unseen before it is swept.
    #[arg(long = "limiter-idle-secs", env = "STRATCHECK_LIMITER_IDLE_SECS", default_value_t = 180)]
    pub idle_secs: u64,
}

impl LimiterConfig {
    pub fn to_rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            enabled: self.enabled,
            capacity: self.burst,
            refill_per_sec: self.rps,
            sweep_interval: Duration::from_secs(self.sweep_secs),
            idle_threshold: Duration::from_secs(self.idle_secs),
        }
    }
}

/// Shutdown deadlines.
#[derive(Debug, Clone, Args)]
pub struct ShutdownConfig {
    /// Seconds in-flight requests get to finish after a shutdown signal.
    #[arg(long = "shutdown-grace-secs", env = "STRATCHECK_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub grace_secs: u64,

    /// Seconds background tasks get to drain after the server stops.
    #[arg(long = "background-drain-secs", env = "STRATCHECK_BACKGROUND_DRAIN_SECS", default_value_t = 5)]
    pub drain_secs: u64,
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

/// Notification delivery settings.
#[derive(Debug, Clone, Args)]
pub struct NotifyConfig {
    /// Delivery attempts per notification, including the first.
    #[arg(long = "notify-attempts", env = "STRATCHECK_NOTIFY_ATTEMPTS", default_value_t = 3)]
    pub attempts: u32,

    /// Pause between delivery attempts, in milliseconds.
    #[arg(long = "notify-backoff-ms", env = "STRATCHECK_NOTIFY_BACKOFF_MS", default_value_t = 500)]
    pub backoff_ms: u64,
}

impl NotifyConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

/// Token housekeeping.
#[derive(Debug, Clone, Args)]
pub struct TokenConfig {
    /// Seconds between deletions of expired tokens.
    #[arg(long = "token-purge-secs", env = "STRATCHECK_TOKEN_PURGE_SECS", default_value_t = 900)]
    pub purge_secs: u64,
}

impl TokenConfig {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_secs)
    }
}

/// Cross-origin settings.
#[derive(Debug, Clone, Args)]
pub struct CorsConfig {
    /// Space-separated origins allowed to make cross-origin requests.
    #[arg(
        long = "cors-trusted-origins",
        env = "STRATCHECK_CORS_TRUSTED_ORIGINS",
        value_delimiter = ' '
    )]
    pub trusted_origins: Vec<String>,
}

impl CorsConfig {
    /// Trusted origins as header values. Entries that are not valid header
    /// values are skipped; [`AppConfig::validate`] rejects them at startup.
    pub fn origins(&self) -> Vec<HeaderValue> {
        self.trusted_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect()
    }
}

/// Configuration rejected at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Limiter(#[from] RateLimitConfigError),

    #[error("storage call deadline must be non-zero")]
    ZeroStoreDeadline,

    #[error("notification attempts must be at least 1")]
    ZeroNotifyAttempts,

    #[error("token purge interval must be non-zero")]
    ZeroPurgeInterval,

    #[error("invalid CORS trusted origin `{0}`")]
    InvalidOrigin(String),
}

impl AppConfig {
    /// Check cross-field constraints clap cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limiter.to_rate_limit().validate()?;
        if self.db.timeout_ms == 0 {
            return Err(ConfigError::ZeroStoreDeadline);
        }
        if self.notify.attempts == 0 {
            return Err(ConfigError::ZeroNotifyAttempts);
        }
        if self.tokens.purge_secs == 0 {
            return Err(ConfigError::ZeroPurgeInterval);
        }
        if let Some(bad) = self
            .cors
            .trusted_origins
            .iter()
            .find(|origin| HeaderValue::from_str(origin).is_err())
        {
            return Err(ConfigError::InvalidOrigin(bad.clone()));
        }
        Ok(())
    }

    /// Defaults only, ignoring flags and environment. Used by tests.
    pub fn defaults() -> Self {
        Self {
            port: 4000,
            env: Environment::Development,
            log_format: LogFormat::Text,
            db: DbConfig {
                dsn: None,
                max_open_conns: 25,
                min_idle_conns: 2,
                max_idle_secs: 900,
                timeout_ms: DEFAULT_STORE_DEADLINE.as_millis() as u64,
            },
            limiter: LimiterConfig {
                enabled: true,
                rps: 2.0,
                burst: 4,
                sweep_secs: 60,
                idle_secs: 180,
            },
            shutdown: ShutdownConfig {
                grace_secs: 5,
                drain_secs: 5,
            },
            notify: NotifyConfig {
                attempts: 3,
                backoff_ms: 500,
            },
            tokens: TokenConfig {
                purge_secs: DEFAULT_PURGE_INTERVAL.as_secs(),
            },
            cors: CorsConfig {
                trusted_origins: Vec::new(),
            },
        }
    }
}
