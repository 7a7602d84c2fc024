//! User lookup and password comparison.
//!
//! Password hashes are bcrypt digests in `users.password_hash`. The
//! comparison runs inside Postgres through `pgcrypto`'s `crypt()`, so no
//! hashing code lives in this process.

use async_trait::async_trait;
use sqlx::PgPool;
use stratcheck_core::{Account, PrincipalId, StoreError, UserDirectory};

use super::backend;

/// [`UserDirectory`] over the `users` table.
#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct AccountRow {
    pub id: i64,
    pub email: String,
    pub activated: bool,
    pub permissions: Vec<String>,
}

impl AccountRow {
    pub(crate) fn into_account(self) -> Account {
        Account {
            id: self.id,
            email: self.email,
            activated: self.activated,
            permissions: self.permissions.into_iter().collect(),
        }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT users.id, users.email::text AS email, users.activated,
                    COALESCE(array_agg(permissions.code) FILTER (WHERE permissions.code IS NOT NULL),
                             '{}') AS permissions
             FROM users
             LEFT JOIN users_permissions ON users_permissions.user_id = users.id
             LEFT JOIN permissions ON permissions.id = users_permissions.permission_id
             WHERE users.email = $1::citext
             GROUP BY users.id",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(AccountRow::into_account))
    }

    async fn password_matches(&self, id: PrincipalId, plaintext: &str) -> Result<bool, StoreError> {
        let matched = sqlx::query_scalar::<_, bool>(
            "SELECT password_hash = crypt($2, password_hash) FROM users WHERE id = $1",
        )
        .bind(id)
        .bind(plaintext)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(matched.unwrap_or(false))
    }
}
