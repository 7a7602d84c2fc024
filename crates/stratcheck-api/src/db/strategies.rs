//! Strategy persistence.
//!
//! Every query is scoped to the owning user. The update is the conditioned
//! write: it matches on id, owner and the version the caller loaded, and
//! bumps the version in the same statement. Inserts take id, creation time
//! and the initial version from column defaults.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use stratcheck_core::{StoreError, VersionedStore};

use super::backend;
use crate::state::{Strategy, StrategyCatalog, StrategyKey};

/// [`VersionedStore`] and [`StrategyCatalog`] over the `strategies` table.
#[derive(Debug, Clone)]
pub struct PgStrategyStore {
    pool: PgPool,
}

impl PgStrategyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct StrategyRow {
    id: i64,
    created_at: DateTime<Utc>,
    name: String,
    public: bool,
    fields: Vec<String>,
    criteria: Vec<String>,
    user_id: i64,
    version: i32,
}

impl StrategyRow {
    fn into_record(self) -> Strategy {
        Strategy {
            id: self.id,
            created_at: self.created_at,
            name: self.name,
            public: self.public,
            fields: self.fields,
            criteria: self.criteria,
            user_id: self.user_id,
            version: self.version,
        }
    }
}

#[async_trait]
impl VersionedStore<Strategy> for PgStrategyStore {
    async fn load(&self, key: &StrategyKey) -> Result<Option<Strategy>, StoreError> {
        if key.id < 1 {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, StrategyRow>(
            "SELECT id, created_at, name, public, fields, criteria, user_id, version
             FROM strategies
             WHERE id = $1 AND user_id = $2",
        )
        .bind(key.id)
        .bind(key.owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(StrategyRow::into_record))
    }

    async fn update_if_version(
        &self,
        record: &Strategy,
        expected: i32,
    ) -> Result<Option<i32>, StoreError> {
        sqlx::query_scalar::<_, i32>(
            "UPDATE strategies
             SET name = $1, public = $2, fields = $3, criteria = $4, version = version + 1
             WHERE id = $5 AND user_id = $6 AND version = $7
             RETURNING version",
        )
        .bind(&record.name)
        .bind(record.public)
        .bind(&record.fields)
        .bind(&record.criteria)
        .bind(record.id)
        .bind(record.user_id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)
    }
}

#[async_trait]
impl StrategyCatalog for PgStrategyStore {
    async fn insert(&self, draft: &Strategy) -> Result<Strategy, StoreError> {
        let (id, created_at, version) = sqlx::query_as::<_, (i64, DateTime<Utc>, i32)>(
            "INSERT INTO strategies (name, public, fields, criteria, user_id)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, created_at, version",
        )
        .bind(&draft.name)
        .bind(draft.public)
        .bind(&draft.fields)
        .bind(&draft.criteria)
        .bind(draft.user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(Strategy {
            id,
            created_at,
            version,
            ..draft.clone()
        })
    }

    async fn delete(&self, key: &StrategyKey) -> Result<bool, StoreError> {
        if key.id < 1 {
            return Ok(false);
        }
        let result = sqlx::query("DELETE FROM strategies WHERE id = $1 AND user_id = $2")
            .bind(key.id)
            .bind(key.owner)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}
