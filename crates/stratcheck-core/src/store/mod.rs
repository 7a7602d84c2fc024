//! # Storage Collaborators
//!
//! The trust layer never talks to a database directly. It consumes three
//! traits:
//!
//! - [`TokenStore`]: persist token hashes and resolve a live token of a given
//!   scope to the owning account.
//! - [`UserDirectory`]: look accounts up by email and answer the opaque
//!   password `Matches` question.
//! - [`VersionedStore`]: load a versioned record and perform the conditioned
//!   write the [`ConcurrencyGuard`](crate::ConcurrencyGuard) relies on.
//!
//! Postgres implementations live in the API crate. The in-memory
//! implementations in [`memory`] back tests and development mode.
//!
//! Every call the trust layer makes goes through [`with_deadline`], so a hung
//! backend surfaces as [`StoreError::DeadlineExceeded`] instead of a hung
//! request.

pub mod memory;

use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::principal::{Account, PrincipalId};
use crate::token::{TokenHash, TokenRecord, TokenScope};

pub use memory::{MemoryTokenStore, MemoryUserDirectory, MemoryVersionedStore};

/// Default deadline for a single storage round trip.
pub const DEFAULT_STORE_DEADLINE: Duration = Duration::from_secs(3);

/// Run `call` under `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::DeadlineExceeded(deadline)),
    }
}

/// Token persistence.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a freshly issued token.
    async fn insert(&self, record: &TokenRecord) -> Result<(), StoreError>;

    /// Resolve the account owning a token with this `hash` and `scope` whose
    /// expiry is after `now`.
    ///
    /// Absent, wrong-scope and expired tokens all yield `Ok(None)`.
    /// Implementations should resolve all three in a single lookup.
    async fn account_for_token(
        &self,
        scope: TokenScope,
        hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError>;

    /// Delete every token whose expiry is at or before `now`. Returns the
    /// number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Account lookup and the password comparison capability.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find an account by login email.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Whether `plaintext` matches the stored password of account `id`.
    ///
    /// The hashing algorithm is the directory's business. An unknown `id`
    /// answers `false`.
    async fn password_matches(&self, id: PrincipalId, plaintext: &str) -> Result<bool, StoreError>;
}

/// A record carrying an optimistic-concurrency version.
pub trait Versioned {
    /// Lookup key. For owned resources this includes the owner.
    type Key: Clone + Eq + Hash + Send + Sync + std::fmt::Debug;

    /// Key of this record.
    fn key(&self) -> Self::Key;

    /// Stored version; starts at 1.
    fn version(&self) -> i32;

    /// Overwrite the version after a successful conditioned write.
    fn set_version(&mut self, version: i32);
}

/// Load and conditioned-write for a versioned record type.
#[async_trait]
pub trait VersionedStore<R>: Send + Sync
where
    R: Versioned + Send + Sync + 'static,
{
    /// Load the current record, if it exists.
    async fn load(&self, key: &R::Key) -> Result<Option<R>, StoreError>;

    /// Persist the mutable fields of `record` if and only if the stored
    /// version still equals `expected`, bumping the version by one.
    ///
    /// Returns the new version, or `Ok(None)` when no row matched (deleted
    /// or concurrently updated). The check and the write must be a single
    /// atomic operation. A version that cannot be bumped without overflow is
    /// a backend error.
    async fn update_if_version(&self, record: &R, expected: i32) -> Result<Option<i32>, StoreError>;
}
