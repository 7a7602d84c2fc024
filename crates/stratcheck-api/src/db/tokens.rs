//! Token persistence.
//!
//! Only the SHA-256 hash of a token is stored. The lookup resolves hash,
//! scope and expiry in one statement, joined to the owner's permission
//! grants.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use stratcheck_core::{Account, StoreError, TokenHash, TokenRecord, TokenScope, TokenStore};

use super::backend;
use super::users::AccountRow;

/// [`TokenStore`] over the `tokens` table.
#[derive(Debug, Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tokens (hash, user_id, expiry, scope, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.hash.as_bytes().as_slice())
        .bind(record.principal_id)
        .bind(record.expiry)
        .bind(record.scope.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn account_for_token(
        &self,
        scope: TokenScope,
        hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT users.id, users.email::text AS email, users.activated,
                    COALESCE(array_agg(permissions.code) FILTER (WHERE permissions.code IS NOT NULL),
                             '{}') AS permissions
             FROM users
             INNER JOIN tokens ON tokens.user_id = users.id
             LEFT JOIN users_permissions ON users_permissions.user_id = users.id
             LEFT JOIN permissions ON permissions.id = users_permissions.permission_id
             WHERE tokens.hash = $1
               AND tokens.scope = $2
               AND tokens.expiry > $3
             GROUP BY users.id",
        )
        .bind(hash.as_bytes().as_slice())
        .bind(scope.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(AccountRow::into_account))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tokens WHERE expiry <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }
}
