#![deny(missing_docs)]

//! # stratcheck-core — Request-Time Trust Layer
//!
//! This crate holds everything that stands between an inbound request and
//! the business handler that serves it. It has no HTTP dependencies; the
//! `stratcheck-api` crate wires these components into Axum middleware.
//!
//! ## Pipeline
//!
//! ```text
//! RateLimiter ─▶ TokenAuthenticator ─▶ PermissionGate ─▶ handler
//!                                                         │
//!                        ConcurrencyGuard ◀── mutation ───┤
//!                    BackgroundTaskRunner ◀── side effect ┘
//! ```
//!
//! Each stage short-circuits with a [`GateError`] on failure.
//!
//! ## Design Principles
//!
//! 1. **Storage is a collaborator.** Token lookup, principal lookup, the
//!    password comparison and the conditioned write are traits in [`store`].
//!    Every call runs under a bounded deadline ([`store::with_deadline`]).
//!
//! 2. **Plaintext never rests.** Only the SHA-256 of a token is persisted.
//!    [`TokenPlaintext`] zeroizes on drop and redacts in `Debug`.
//!
//! 3. **Explicit lifecycles.** The limiter's sweep task, the expired-token
//!    purge and the background runner are constructed, started and drained
//!    by the owning process. Nothing lives in a global.

pub mod authn;
pub mod authz;
pub mod background;
pub mod concurrency;
pub mod error;
pub mod notify;
pub mod principal;
pub mod rate_limit;
pub mod store;
pub mod token;
pub mod token_purge;

pub use authn::{parse_authorization, TokenAuthenticator, TokenIssuer};
pub use authz::{require_activated, require_authenticated, require_permission};
pub use background::{BackgroundTaskRunner, DrainTimeout, RunnerSnapshot, TaskOutcome};
pub use concurrency::{check_expected_version, ConcurrencyGuard, EXPECTED_VERSION_HEADER};
pub use error::{GateError, StoreError, TaskFault};
pub use notify::{send_with_retry, LogNotifier, Notification, Notifier, NotifyError, RetryPolicy};
pub use principal::{Account, PermissionCode, Permissions, Principal, PrincipalId};
pub use rate_limit::{ClientBucket, ClientKey, RateLimitConfig, RateLimitConfigError, RateLimiter};
pub use store::{
    with_deadline, MemoryTokenStore, MemoryUserDirectory, MemoryVersionedStore, TokenStore,
    UserDirectory, Versioned, VersionedStore, DEFAULT_STORE_DEADLINE,
};
pub use token::{MalformedToken, Token, TokenHash, TokenPlaintext, TokenRecord, TokenScope};
pub use token_purge::{TokenPurger, DEFAULT_PURGE_INTERVAL};
