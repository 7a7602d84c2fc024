//! In-memory storage backends.
//!
//! All maps sit behind `parking_lot::RwLock` and no lock is held across an
//! `.await`. The conditioned write in [`MemoryVersionedStore`] runs its
//! compare and its swap under one write guard, which gives it the same
//! atomicity the Postgres `UPDATE … WHERE version = $n` provides.
//!
//! Passwords in [`MemoryUserDirectory`] are kept as plain SHA-256 digests.
//! That is adequate for fixtures and local development only.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::{TokenStore, UserDirectory, Versioned, VersionedStore};
use crate::error::StoreError;
use crate::principal::{Account, PrincipalId};
use crate::token::{TokenHash, TokenRecord, TokenScope};

// ── Users ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredUser {
    account: Account,
    password_digest: [u8; 32],
}

/// In-memory [`UserDirectory`].
#[derive(Debug, Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<RwLock<HashMap<PrincipalId, StoredUser>>>,
}

impl MemoryUserDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account with the given password.
    pub fn insert(&self, account: Account, password: &str) {
        let stored = StoredUser {
            password_digest: Sha256::digest(password.as_bytes()).into(),
            account,
        };
        self.users.write().insert(stored.account.id, stored);
    }

    /// Fetch an account by id.
    pub fn get(&self, id: PrincipalId) -> Option<Account> {
        self.users.read().get(&id).map(|u| u.account.clone())
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Whether the directory has no accounts.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.account.email.eq_ignore_ascii_case(email))
            .map(|u| u.account.clone()))
    }

    async fn password_matches(&self, id: PrincipalId, plaintext: &str) -> Result<bool, StoreError> {
        let candidate: [u8; 32] = Sha256::digest(plaintext.as_bytes()).into();
        Ok(self
            .users
            .read()
            .get(&id)
            .is_some_and(|u| bool::from(u.password_digest.ct_eq(&candidate))))
    }
}

// ── Tokens ──────────────────────────────────────────────────────────

/// In-memory [`TokenStore`], resolving owners through a shared
/// [`MemoryUserDirectory`].
#[derive(Debug, Clone)]
pub struct MemoryTokenStore {
    tokens: Arc<RwLock<HashMap<TokenHash, TokenRecord>>>,
    users: MemoryUserDirectory,
}

impl MemoryTokenStore {
    /// Create an empty token table over `users`.
    pub fn new(users: MemoryUserDirectory) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
            users,
        }
    }

    /// Number of stored tokens, expired ones included.
    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    /// Whether no token is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StoreError> {
        self.tokens.write().insert(record.hash, record.clone());
        Ok(())
    }

    async fn account_for_token(
        &self,
        scope: TokenScope,
        hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError> {
        let owner = self
            .tokens
            .read()
            .get(hash)
            .filter(|record| record.scope == scope && record.is_live_at(now))
            .map(|record| record.principal_id);
        Ok(owner.and_then(|id| self.users.get(id)))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, record| record.is_live_at(now));
        Ok((before - tokens.len()) as u64)
    }
}

// ── Versioned records ───────────────────────────────────────────────

/// In-memory [`VersionedStore`] for any [`Versioned`] record.
#[derive(Debug)]
pub struct MemoryVersionedStore<R: Versioned> {
    records: Arc<RwLock<HashMap<R::Key, R>>>,
}

impl<R: Versioned> Clone for MemoryVersionedStore<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<R: Versioned> Default for MemoryVersionedStore<R> {
    fn default() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<R: Versioned + Clone> MemoryVersionedStore<R> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record as-is, version included.
    pub fn insert(&self, record: R) {
        self.records.write().insert(record.key(), record);
    }

    /// Current stored copy of a record.
    pub fn get(&self, key: &R::Key) -> Option<R> {
        self.records.read().get(key).cloned()
    }

    /// Remove a record.
    pub fn remove(&self, key: &R::Key) -> Option<R> {
        self.records.write().remove(key)
    }

    /// Build a record from the current contents and insert it, under one
    /// write guard. Lets callers assign ids that no concurrent insert can
    /// also take.
    pub fn insert_with<F>(&self, build: F) -> R
    where
        F: FnOnce(&HashMap<R::Key, R>) -> R,
    {
        let mut records = self.records.write();
        let record = build(&records);
        records.insert(record.key(), record.clone());
        record
    }
}

#[async_trait]
impl<R> VersionedStore<R> for MemoryVersionedStore<R>
where
    R: Versioned + Clone + Send + Sync + 'static,
{
    async fn load(&self, key: &R::Key) -> Result<Option<R>, StoreError> {
        Ok(self.get(key))
    }

    async fn update_if_version(&self, record: &R, expected: i32) -> Result<Option<i32>, StoreError> {
        let mut records = self.records.write();
        match records.get_mut(&record.key()) {
            Some(stored) if stored.version() == expected => {
                let next = expected.checked_add(1).ok_or_else(|| {
                    StoreError::Backend(format!("version {expected} cannot be incremented"))
                })?;
                *stored = record.clone();
                stored.set_version(next);
                Ok(Some(next))
            }
            _ => Ok(None),
        }
    }
}
