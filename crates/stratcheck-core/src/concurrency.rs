//! # Optimistic Concurrency
//!
//! Updates to versioned records take two steps:
//!
//! 1. **Pre-check.** If the client sent an expected version and it differs
//!    from the version just loaded, fail with `EditConflict` before any
//!    write.
//! 2. **Conditioned write.** The store persists the record only if the stored
//!    version still equals the loaded version, bumping it by one in the same
//!    operation. Zero rows matched means a concurrent writer won, which is
//!    also an `EditConflict`.
//!
//! The pre-check saves a write. The conditioned write is what guarantees
//! that two writers starting from the same version never both succeed. No
//! lock is held between load and write.

use std::sync::Arc;
use std::time::Duration;

use crate::error::GateError;
use crate::store::{with_deadline, Versioned, VersionedStore};

/// Request header carrying the client's expected version.
pub const EXPECTED_VERSION_HEADER: &str = "X-Expected-Version";

/// Compare the client's expected version with the stored one.
///
/// Absent means no pre-check. A value that is not a decimal integer can
/// never equal a stored version and is reported as a conflict.
pub fn check_expected_version(expected: Option<&str>, stored: i32) -> Result<(), GateError> {
    let Some(raw) = expected else {
        return Ok(());
    };
    match raw.trim().parse::<i32>() {
        Ok(v) if v == stored => Ok(()),
        _ => Err(GateError::EditConflict {
            current_version: Some(stored),
        }),
    }
}

/// Applies the two-step update protocol against a [`VersionedStore`].
pub struct ConcurrencyGuard<R>
where
    R: Versioned + Send + Sync + 'static,
{
    store: Arc<dyn VersionedStore<R>>,
    deadline: Duration,
}

impl<R> Clone for ConcurrencyGuard<R>
where
    R: Versioned + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            deadline: self.deadline,
        }
    }
}

impl<R> std::fmt::Debug for ConcurrencyGuard<R>
where
    R: Versioned + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGuard")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl<R> ConcurrencyGuard<R>
where
    R: Versioned + Send + Sync + 'static,
{
    /// Guard updates to `store`, bounding each call by `deadline`.
    pub fn new(store: Arc<dyn VersionedStore<R>>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    /// Load the current record.
    pub async fn load(&self, key: &R::Key) -> Result<Option<R>, GateError> {
        Ok(with_deadline(self.deadline, self.store.load(key)).await?)
    }

    /// Load `key`, pre-check `expected`, let `apply` mutate the record, then
    /// commit with a conditioned write.
    ///
    /// `apply` may reject the change (e.g. field validation); its error is
    /// returned as-is and nothing is written. Returns `Ok(None)` when the
    /// record does not exist, and the committed record with its new version
    /// on success.
    pub async fn update<F, E>(&self, key: &R::Key, expected: Option<&str>, apply: F) -> Result<Option<R>, E>
    where
        F: FnOnce(&mut R) -> Result<(), E>,
        E: From<GateError>,
    {
        let Some(mut record) = self.load(key).await? else {
            return Ok(None);
        };
        let loaded = record.version();
        check_expected_version(expected, loaded)?;

        apply(&mut record)?;

        let committed = with_deadline(self.deadline, self.store.update_if_version(&record, loaded))
            .await
            .map_err(GateError::from)?;
        match committed {
            Some(version) => {
                record.set_version(version);
                Ok(Some(record))
            }
            None => {
                let current_version = self.load(key).await.ok().flatten().map(|r| r.version());
                tracing::warn!(?key, loaded, ?current_version, "conditioned write lost a race");
                Err(GateError::EditConflict { current_version }.into())
            }
        }
    }
}
