//! # Application State
//!
//! Shared state passed to all Axum route handlers via the `State`
//! extractor, plus the `Strategy` record served by the API.
//!
//! Storage is chosen once at startup: [`Backends::postgres`] when a DSN is
//! configured, [`Backends::in_memory`] otherwise. Everything above the
//! backends is identical in both modes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratcheck_core::{
    BackgroundTaskRunner, ConcurrencyGuard, LogNotifier, MemoryTokenStore, MemoryUserDirectory,
    MemoryVersionedStore, Notifier, PrincipalId, RateLimiter, RetryPolicy, StoreError,
    TokenAuthenticator, TokenIssuer, TokenPurger, TokenStore, UserDirectory, Versioned,
    VersionedStore,
};

use crate::config::AppConfig;
use crate::extractors::{unique, Validate, Validator};
use crate::middleware::metrics::ApiMetrics;

/// Maximum strategy name length in bytes.
pub const MAX_STRATEGY_NAME_BYTES: usize = 500;

// ── Strategy ────────────────────────────────────────────────────────

/// A user-owned backtesting strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    #[serde(skip_serializing, default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub public: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<String>,
    pub user_id: PrincipalId,
    pub version: i32,
}

/// Strategies are looked up through their owner; another user's strategy
/// with the same id is a different key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrategyKey {
    pub owner: PrincipalId,
    pub id: i64,
}

impl Versioned for Strategy {
    type Key = StrategyKey;

    fn key(&self) -> StrategyKey {
        StrategyKey {
            owner: self.user_id,
            id: self.id,
        }
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

impl Validate for Strategy {
    fn validate(&self, v: &mut Validator) {
        v.check(!self.name.is_empty(), "name", "must be provided");
        v.check(
            self.name.len() <= MAX_STRATEGY_NAME_BYTES,
            "name",
            "must not be more than 500 bytes long",
        );
        v.check(!self.fields.is_empty(), "fields", "must contain at least 1 field");
        v.check(
            !self.criteria.is_empty(),
            "criteria",
            "must contain at least 1 criterium",
        );
        v.check(unique(&self.fields), "fields", "must not contain duplicate values");
        v.check(
            unique(&self.criteria),
            "criteria",
            "must not contain duplicate values",
        );
    }
}

/// Creation and deletion of strategies. Updates go through the
/// [`ConcurrencyGuard`].
#[async_trait]
pub trait StrategyCatalog: Send + Sync {
    /// Persist a new strategy for `draft.user_id`. The store assigns `id`
    /// and `created_at`; the stored record starts at version 1.
    async fn insert(&self, draft: &Strategy) -> Result<Strategy, StoreError>;

    /// Delete the strategy under `key`. Returns `false` when no such
    /// strategy exists for that owner.
    async fn delete(&self, key: &StrategyKey) -> Result<bool, StoreError>;
}

#[async_trait]
impl StrategyCatalog for MemoryVersionedStore<Strategy> {
    async fn insert(&self, draft: &Strategy) -> Result<Strategy, StoreError> {
        Ok(self.insert_with(|existing| Strategy {
            id: existing.keys().map(|key| key.id).max().unwrap_or(0) + 1,
            created_at: Utc::now(),
            version: 1,
            ..draft.clone()
        }))
    }

    async fn delete(&self, key: &StrategyKey) -> Result<bool, StoreError> {
        Ok(key.id >= 1 && self.remove(key).is_some())
    }
}

// ── Backends ────────────────────────────────────────────────────────

/// Storage and delivery collaborators.
#[derive(Clone)]
pub struct Backends {
    pub tokens: Arc<dyn TokenStore>,
    pub users: Arc<dyn UserDirectory>,
    pub strategies: Arc<dyn VersionedStore<Strategy>>,
    pub catalog: Arc<dyn StrategyCatalog>,
    pub notifier: Arc<dyn Notifier>,
}

/// Handles onto the in-memory stores, kept so tests and development
/// seeding can populate them.
#[derive(Debug, Clone)]
pub struct MemoryBackends {
    pub users: MemoryUserDirectory,
    pub tokens: MemoryTokenStore,
    pub strategies: MemoryVersionedStore<Strategy>,
}

impl MemoryBackends {
    pub fn new() -> Self {
        let users = MemoryUserDirectory::new();
        Self {
            tokens: MemoryTokenStore::new(users.clone()),
            users,
            strategies: MemoryVersionedStore::new(),
        }
    }
}

impl Default for MemoryBackends {
    fn default() -> Self {
        Self::new()
    }
}

impl Backends {
    /// In-memory stores with the logging notifier.
    pub fn in_memory(memory: &MemoryBackends) -> Self {
        Self {
            tokens: Arc::new(memory.tokens.clone()),
            users: Arc::new(memory.users.clone()),
            strategies: Arc::new(memory.strategies.clone()),
            catalog: Arc::new(memory.strategies.clone()),
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Replace the notification transport.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

// ── AppState ────────────────────────────────────────────────────────

/// Shared application state. Clones share every component.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub authenticator: TokenAuthenticator,
    pub issuer: TokenIssuer,
    pub users: Arc<dyn UserDirectory>,
    pub strategies: ConcurrencyGuard<Strategy>,
    pub catalog: Arc<dyn StrategyCatalog>,
    pub limiter: RateLimiter,
    pub purger: TokenPurger,
    pub background: BackgroundTaskRunner,
    pub notifier: Arc<dyn Notifier>,
    pub retry: RetryPolicy,
    pub metrics: ApiMetrics,
}

impl AppState {
    /// Assemble the trust layer over `backends`.
    ///
    /// The limiter and the token purger are constructed idle; the binary
    /// starts both.
    pub fn new(config: AppConfig, backends: Backends) -> Self {
        let deadline = config.db.store_deadline();
        Self {
            authenticator: TokenAuthenticator::new(Arc::clone(&backends.tokens), deadline),
            purger: TokenPurger::new(
                Arc::clone(&backends.tokens),
                config.tokens.purge_interval(),
                deadline,
            ),
            issuer: TokenIssuer::new(backends.tokens, deadline),
            users: backends.users,
            strategies: ConcurrencyGuard::new(backends.strategies, deadline),
            catalog: backends.catalog,
            limiter: RateLimiter::new(config.limiter.to_rate_limit()),
            background: BackgroundTaskRunner::new(),
            notifier: backends.notifier,
            retry: config.notify.retry_policy(),
            metrics: ApiMetrics::new(),
            config: Arc::new(config),
        }
    }

    /// In-memory state with default configuration. Returns the store handles
    /// alongside so callers can seed them.
    pub fn in_memory() -> (Self, MemoryBackends) {
        Self::in_memory_with(AppConfig::defaults())
    }

    /// In-memory state with the given configuration.
    pub fn in_memory_with(config: AppConfig) -> (Self, MemoryBackends) {
        let memory = MemoryBackends::new();
        let state = Self::new(config, Backends::in_memory(&memory));
        (state, memory)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .field("purger", &self.purger)
            .field("background", &self.background)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
