//! # Database Persistence Layer
//!
//! Postgres implementations of the trust layer's storage traits via SQLx.
//!
//! The database layer is **optional**. When a DSN is configured the API
//! stores users, permission grants, token hashes and strategies in
//! PostgreSQL. When absent, the API runs on the in-memory stores from
//! `stratcheck-core` (suitable for development and testing).

pub mod strategies;
pub mod tokens;
pub mod users;

use std::sync::Arc;

use sqlx::postgres::{PgPool, PgPoolOptions};
use stratcheck_core::{LogNotifier, StoreError};

use crate::config::DbConfig;
use crate::state::Backends;

pub use strategies::PgStrategyStore;
pub use tokens::PgTokenStore;
pub use users::PgUserDirectory;

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if no DSN is configured (in-memory-only mode).
/// Returns `Err` if the DSN is set but the connection or migration fails.
pub async fn init_pool(config: &DbConfig) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = config.dsn.as_deref() else {
        tracing::warn!(
            "no database DSN configured, running in-memory only mode. \
             State will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.max_open_conns)
        .min_connections(config.min_idle_conns)
        .idle_timeout(config.max_idle_time())
        .acquire_timeout(config.store_deadline())
        .connect(url)
        .await?;

    tracing::info!(
        max_connections = config.max_open_conns,
        "connected to PostgreSQL"
    );

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("database migrations applied");

    Ok(Some(pool))
}

impl Backends {
    /// Postgres-backed stores with the logging notifier.
    pub fn postgres(pool: PgPool) -> Self {
        let strategies = PgStrategyStore::new(pool.clone());
        Self {
            tokens: Arc::new(PgTokenStore::new(pool.clone())),
            users: Arc::new(PgUserDirectory::new(pool)),
            strategies: Arc::new(strategies.clone()),
            catalog: Arc::new(strategies),
            notifier: Arc::new(LogNotifier),
        }
    }
}

/// Collapse a driver error into the storage error the trust layer sees.
pub(crate) fn backend(err: sqlx::Error) -> StoreError {
    tracing::error!(error = %err, "database call failed");
    StoreError::Backend(err.to_string())
}
