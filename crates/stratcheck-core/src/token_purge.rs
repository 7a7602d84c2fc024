//! # Expired Token Purge
//!
//! Expired tokens can no longer authenticate anyone, but they stay in the
//! token table until something deletes them. [`TokenPurger`] owns a tokio
//! task that calls [`TokenStore::purge_expired`] on a fixed interval.
//!
//! The lifecycle mirrors the limiter sweep: [`TokenPurger::start`] spawns
//! the task, [`TokenPurger::stop`] cancels and joins it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::store::{with_deadline, TokenStore};

/// Default time between purges.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

struct PurgeTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    store: Arc<dyn TokenStore>,
    interval: Duration,
    deadline: Duration,
    task: Mutex<Option<PurgeTask>>,
}

impl Shared {
    async fn purge_once(&self) -> Result<u64, StoreError> {
        with_deadline(self.deadline, self.store.purge_expired(Utc::now())).await
    }
}

/// Periodically deletes expired tokens. Clones share the task.
#[derive(Clone)]
pub struct TokenPurger {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for TokenPurger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPurger")
            .field("interval", &self.inner.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TokenPurger {
    /// Purge `store` every `interval`, bounding each call by `deadline`.
    pub fn new(store: Arc<dyn TokenStore>, interval: Duration, deadline: Duration) -> Self {
        Self {
            inner: Arc::new(Shared {
                store,
                interval,
                deadline,
                task: Mutex::new(None),
            }),
        }
    }

    /// Time between purges.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Run one purge now.
    pub async fn purge_once(&self) -> Result<u64, StoreError> {
        self.inner.purge_once().await
    }

    /// Whether the purge task is running.
    pub fn is_running(&self) -> bool {
        self.inner.task.lock().is_some()
    }

    /// Spawn the purge task. Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        let mut slot = self.inner.task.lock();
        if slot.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let shared: Weak<Shared> = Arc::downgrade(&self.inner);
        let period = self.inner.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(shared) = shared.upgrade() else { break };
                        match shared.purge_once().await {
                            Ok(0) => {}
                            Ok(purged) => tracing::debug!(purged, "purged expired tokens"),
                            Err(err) => tracing::warn!(error = %err, "expired token purge failed"),
                        }
                    }
                }
            }
        });

        *slot = Some(PurgeTask { cancel, handle });
        tracing::info!(interval = ?period, "expired token purge started");
        true
    }

    /// Cancel the purge task and wait for it to exit.
    pub async fn stop(&self) {
        let task = self.inner.task.lock().take();
        if let Some(PurgeTask { cancel, handle }) = task {
            cancel.cancel();
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "token purge task ended abnormally");
            }
            tracing::info!("expired token purge stopped");
        }
    }
}
