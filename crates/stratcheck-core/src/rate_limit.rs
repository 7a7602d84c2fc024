//! # Per-Client Rate Limiting
//!
//! Token bucket per client key. Each bucket holds up to `capacity` tokens
//! and refills continuously at `refill_per_sec`. An admission check refills
//! the bucket for the elapsed time and takes one token if a whole token is
//! available. A rejected check consumes nothing.
//!
//! Buckets live in a `DashMap`. Admission goes through `entry()`, which holds
//! the shard write lock for the whole refill-and-take step, and the idle
//! sweep goes through `retain()`, which takes the same shard locks. Checks
//! and evictions for one key are therefore serialized; different keys on
//! different shards never contend.
//!
//! The sweep is a tokio task owned by the limiter. [`RateLimiter::start`]
//! spawns it and [`RateLimiter::stop`] cancels and joins it.

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::GateError;

// ── Configuration ───────────────────────────────────────────────────

/// Limiter settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// When false every check is admitted and no sweep runs.
    pub enabled: bool,
    /// Maximum tokens a bucket holds (burst size).
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// How often idle buckets are swept.
    pub sweep_interval: Duration,
    /// A bucket unseen for longer than this is evicted by the sweep.
    pub idle_threshold: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 4,
            refill_per_sec: 2.0,
            sweep_interval: Duration::from_secs(60),
            idle_threshold: Duration::from_secs(180),
        }
    }
}

/// Rejected limiter settings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RateLimitConfigError {
    /// A bucket must hold at least one token.
    #[error("limiter capacity must be at least 1")]
    ZeroCapacity,

    /// The refill rate must be positive and finite.
    #[error("limiter refill rate must be a positive finite number, got {0}")]
    InvalidRate(f64),

    /// The sweep needs a period.
    #[error("limiter sweep interval must be non-zero")]
    ZeroSweepInterval,

    /// Evicting a bucket before it could refill one token would reset a
    /// throttled client to a full bucket.
    #[error("limiter idle threshold {idle:?} must exceed one refill cycle ({cycle:?})")]
    IdleTooShort {
        /// Configured idle threshold.
        idle: Duration,
        /// Time to refill one token.
        cycle: Duration,
    },
}

impl RateLimitConfig {
    /// Time to refill a single token.
    pub fn refill_cycle(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refill_per_sec)
    }

    /// Check the settings. A disabled limiter is always valid.
    pub fn validate(&self) -> Result<(), RateLimitConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.capacity == 0 {
            return Err(RateLimitConfigError::ZeroCapacity);
        }
        if !(self.refill_per_sec.is_finite() && self.refill_per_sec > 0.0) {
            return Err(RateLimitConfigError::InvalidRate(self.refill_per_sec));
        }
        if self.sweep_interval.is_zero() {
            return Err(RateLimitConfigError::ZeroSweepInterval);
        }
        let cycle = self.refill_cycle();
        if self.idle_threshold <= cycle {
            return Err(RateLimitConfigError::IdleTooShort {
                idle: self.idle_threshold,
                cycle,
            });
        }
        Ok(())
    }
}

// ── Buckets ─────────────────────────────────────────────────────────

/// Identity a bucket is keyed on, derived from the connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Key from an arbitrary identifier.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl From<IpAddr> for ClientKey {
    fn from(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One client's token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl ClientBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    /// Tokens currently held, as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Instant of the last admission check for this client.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Refill for the time elapsed since the last refill, then take one
    /// token if available. On rejection returns the wait until one whole
    /// token will be available.
    fn admit(&mut self, capacity: f64, rate: f64, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = self.last_refill.max(now);
        self.last_seen = self.last_seen.max(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / rate))
        }
    }
}

// ── Limiter ─────────────────────────────────────────────────────────

struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    config: RateLimitConfig,
    buckets: DashMap<ClientKey, ClientBucket>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Shared {
    fn sweep(&self, now: Instant) -> usize {
        let idle = self.config.idle_threshold;
        let mut evicted = 0;
        self.buckets.retain(|_, bucket| {
            let keep = now.saturating_duration_since(bucket.last_seen) <= idle;
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }
}

/// Per-client admission control. Clones share the same buckets.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Shared>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.inner.config)
            .field("buckets", &self.inner.buckets.len())
            .field("sweeping", &self.is_sweeping())
            .finish()
    }
}

impl RateLimiter {
    /// Build a limiter. The sweep is not running until [`start`](Self::start).
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                config,
                buckets: DashMap::new(),
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Active settings.
    pub fn config(&self) -> &RateLimitConfig {
        &self.inner.config
    }

    /// Admission check for `key` at the current instant.
    pub fn check(&self, key: &ClientKey) -> Result<(), GateError> {
        self.check_at(key, Instant::now())
    }

    /// Admission check for `key` at `now`.
    pub fn check_at(&self, key: &ClientKey, now: Instant) -> Result<(), GateError> {
        let config = &self.inner.config;
        if !config.enabled {
            return Ok(());
        }
        let capacity = f64::from(config.capacity);
        let mut bucket = self
            .inner
            .buckets
            .entry(key.clone())
            .or_insert_with(|| ClientBucket::full(capacity, now));
        bucket
            .admit(capacity, config.refill_per_sec, now)
            .map_err(|retry_after| GateError::RateLimited { retry_after })
    }

    /// Evict every bucket idle for longer than the threshold as of `now`.
    /// Returns the number evicted.
    pub fn sweep_at(&self, now: Instant) -> usize {
        self.inner.sweep(now)
    }

    /// Snapshot of one client's bucket.
    pub fn bucket(&self, key: &ClientKey) -> Option<ClientBucket> {
        self.inner.buckets.get(key).map(|b| *b)
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.inner.buckets.len()
    }

    /// Whether no bucket is live.
    pub fn is_empty(&self) -> bool {
        self.inner.buckets.is_empty()
    }

    /// Whether the sweep task is running.
    pub fn is_sweeping(&self) -> bool {
        self.inner.sweeper.lock().is_some()
    }

    /// Spawn the idle sweep on the current tokio runtime.
    ///
    /// Returns `false` without spawning when the limiter is disabled or the
    /// sweep is already running. The task holds only a weak reference, so
    /// dropping every clone of the limiter also ends it.
    pub fn start(&self) -> bool {
        let config = self.inner.config;
        if !config.enabled {
            return false;
        }
        let mut slot = self.inner.sweeper.lock();
        if slot.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let shared: Weak<Shared> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let period = config.sweep_interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(shared) = shared.upgrade() else { break };
                        let evicted = shared.sweep(Instant::now());
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = shared.buckets.len(), "swept idle rate limit buckets");
                        }
                    }
                }
            }
        });

        *slot = Some(Sweeper { cancel, handle });
        tracing::info!(
            capacity = config.capacity,
            refill_per_sec = config.refill_per_sec,
            sweep_interval = ?config.sweep_interval,
            idle_threshold = ?config.idle_threshold,
            "rate limiter sweep started"
        );
        true
    }

    /// Cancel the sweep task and wait for it to exit.
    pub async fn stop(&self) {
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(Sweeper { cancel, handle }) = sweeper {
            cancel.cancel();
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "rate limiter sweep task ended abnormally");
            }
            tracing::info!("rate limiter sweep stopped");
        }
    }
}
