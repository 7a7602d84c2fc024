//! # Token Authentication
//!
//! [`TokenAuthenticator`] turns the raw `Authorization` header value into a
//! [`Principal`]:
//!
//! | Header                         | Outcome                              |
//! |--------------------------------|--------------------------------------|
//! | absent or empty                | `Principal::Anonymous`               |
//! | not `Bearer <one-segment>`     | `GateError::AuthFormat`              |
//! | wrong length / alphabet        | `GateError::InvalidCredentials`      |
//! | unknown, expired, wrong scope  | `GateError::InvalidCredentials`      |
//! | live token                     | `Principal::Authenticated(account)`  |
//!
//! Syntactically invalid plaintext is rejected before any storage call.
//! Everything past the syntax check is a single store lookup keyed by hash,
//! scope and expiry, so the store answers "no" the same way for every
//! sub-case.
//!
//! [`TokenIssuer`] is the write side: it mints and persists tokens for the
//! login and password-reset flows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::GateError;
use crate::principal::{Account, Principal, PrincipalId};
use crate::store::{with_deadline, TokenStore};
use crate::token::{Token, TokenHash, TokenPlaintext, TokenScope};

/// Authentication scheme accepted in the `Authorization` header.
pub const BEARER_SCHEME: &str = "Bearer";

/// Split `Bearer <token>` and return the token segment.
pub fn parse_authorization(header: &str) -> Result<&str, GateError> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(BEARER_SCHEME), Some(token), None) if !token.is_empty() => Ok(token),
        (Some(BEARER_SCHEME), _, _) => Err(GateError::AuthFormat(
            "expected exactly one token after the Bearer scheme",
        )),
        _ => Err(GateError::AuthFormat(
            "authorization header must use the Bearer scheme",
        )),
    }
}

/// Resolves bearer credentials to principals. Read-only and cheap to clone.
#[derive(Clone)]
pub struct TokenAuthenticator {
    tokens: Arc<dyn TokenStore>,
    deadline: Duration,
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl TokenAuthenticator {
    /// Authenticate against `tokens`, bounding each lookup by `deadline`.
    pub fn new(tokens: Arc<dyn TokenStore>, deadline: Duration) -> Self {
        Self { tokens, deadline }
    }

    /// Resolve the `Authorization` header of a request.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Principal, GateError> {
        let header = match header {
            None | Some("") => return Ok(Principal::Anonymous),
            Some(h) => h,
        };
        let raw = parse_authorization(header)?;
        let account = self.resolve(TokenScope::Authentication, raw).await?;
        Ok(Principal::Authenticated(account))
    }

    /// Resolve a raw token of `scope` to its owner.
    pub async fn resolve(&self, scope: TokenScope, raw: &str) -> Result<Account, GateError> {
        let plaintext = TokenPlaintext::parse(raw).map_err(|_| GateError::InvalidCredentials)?;
        let hash = TokenHash::of(&plaintext);
        let found = with_deadline(
            self.deadline,
            self.tokens.account_for_token(scope, &hash, Utc::now()),
        )
        .await?;
        found.ok_or(GateError::InvalidCredentials)
    }
}

/// Mints tokens and persists their hashes.
#[derive(Clone)]
pub struct TokenIssuer {
    tokens: Arc<dyn TokenStore>,
    deadline: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Issue into `tokens`, bounding each insert by `deadline`.
    pub fn new(tokens: Arc<dyn TokenStore>, deadline: Duration) -> Self {
        Self { tokens, deadline }
    }

    /// Generate, persist and return a token. The plaintext in the result is
    /// the only copy.
    pub async fn issue(&self, principal_id: PrincipalId, scope: TokenScope) -> Result<Token, GateError> {
        let token = Token::generate(principal_id, scope, Utc::now());
        with_deadline(self.deadline, self.tokens.insert(&token.record)).await?;
        tracing::debug!(principal_id, scope = %scope, expiry = %token.expiry(), "issued token");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};

    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryTokenStore, MemoryUserDirectory};
    use crate::token::TokenRecord;

    const DEADLINE: Duration = Duration::from_secs(3);

    fn fixture() -> (TokenAuthenticator, TokenIssuer, MemoryTokenStore) {
        let users = MemoryUserDirectory::new();
        users.insert(
            Account {
                id: 1,
                email: "alice@example.com".into(),
                activated: true,
                permissions: ["strategies:read"].into_iter().collect(),
            },
            "pa55word",
        );
        let store = MemoryTokenStore::new(users);
        let shared: Arc<dyn TokenStore> = Arc::new(store.clone());
        (
            TokenAuthenticator::new(shared.clone(), DEADLINE),
            TokenIssuer::new(shared, DEADLINE),
            store,
        )
    }

    /// Counts lookups so tests can assert that storage was not touched.
    struct CountingStore {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl TokenStore for CountingStore {
        async fn insert(&self, _record: &TokenRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn account_for_token(
            &self,
            _scope: TokenScope,
            _hash: &TokenHash,
            _now: DateTime<Utc>,
        ) -> Result<Option<Account>, StoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    struct HungStore;

    #[async_trait]
    impl TokenStore for HungStore {
        async fn insert(&self, _record: &TokenRecord) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn account_for_token(
            &self,
            _scope: TokenScope,
            _hash: &TokenHash,
            _now: DateTime<Utc>,
        ) -> Result<Option<Account>, StoreError> {
            std::future::pending().await
        }

        async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            std::future::pending().await
        }
    }

    #[test]
    fn parse_accepts_bearer() {
        assert_eq!(parse_authorization("Bearer abc"), Ok("abc"));
    }

    #[test]
    fn parse_rejects_other_schemes_and_shapes() {
        for header in [
            "Basic dXNlcjpwYXNz",
            "bearer abc",
            "Bearer",
            "Bearer ",
            "Bearer a b",
            "Bearer  abc",
            "abc",
        ] {
            assert!(
                matches!(parse_authorization(header), Err(GateError::AuthFormat(_))),
                "{header:?} should be a format error"
            );
        }
    }

    #[tokio::test]
    async fn absent_header_is_anonymous() {
        let (authn, _, _) = fixture();
        assert_eq!(authn.authenticate(None).await, Ok(Principal::Anonymous));
        assert_eq!(authn.authenticate(Some("")).await, Ok(Principal::Anonymous));
    }

    #[tokio::test]
    async fn issued_token_authenticates() {
        let (authn, issuer, _) = fixture();
        let token = issuer.issue(1, TokenScope::Authentication).await.unwrap();
        let header = format!("Bearer {}", token.plaintext.expose());
        let principal = authn.authenticate(Some(&header)).await.unwrap();
        assert_eq!(principal.id(), Some(1));
        assert!(principal.has_permission("strategies:read"));
    }

    #[tokio::test]
    async fn password_reset_token_is_not_a_bearer_credential() {
        let (authn, issuer, _) = fixture();
        let token = issuer.issue(1, TokenScope::PasswordReset).await.unwrap();
        let header = format!("Bearer {}", token.plaintext.expose());
        assert_eq!(
            authn.authenticate(Some(&header)).await,
            Err(GateError::InvalidCredentials)
        );
        let owner = authn
            .resolve(TokenScope::PasswordReset, token.plaintext.expose())
            .await
            .unwrap();
        assert_eq!(owner.id, 1);
    }

    #[tokio::test]
    async fn expired_and_unknown_tokens_fail_identically() {
        let (authn, _, store) = fixture();
        let past = Utc::now() - ChronoDuration::hours(48);
        let expired = Token::generate(1, TokenScope::Authentication, past);
        store.insert(&expired.record).await.unwrap();

        let unknown = TokenPlaintext::generate();

        let expired_outcome = authn
            .authenticate(Some(&format!("Bearer {}", expired.plaintext.expose())))
            .await;
        let unknown_outcome = authn
            .authenticate(Some(&format!("Bearer {}", unknown.expose())))
            .await;
        assert_eq!(expired_outcome, Err(GateError::InvalidCredentials));
        assert_eq!(expired_outcome, unknown_outcome);
    }

    #[tokio::test]
    async fn malformed_plaintext_never_reaches_storage() {
        let store = Arc::new(CountingStore {
            lookups: AtomicUsize::new(0),
        });
        let authn = TokenAuthenticator::new(store.clone(), DEADLINE);

        let outcome = authn.authenticate(Some("Bearer not-a-token")).await;
        assert_eq!(outcome, Err(GateError::InvalidCredentials));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);

        let well_formed = TokenPlaintext::generate();
        let outcome = authn
            .authenticate(Some(&format!("Bearer {}", well_formed.expose())))
            .await;
        assert_eq!(outcome, Err(GateError::InvalidCredentials));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_store_surfaces_as_internal_fault() {
        let authn = TokenAuthenticator::new(Arc::new(HungStore), DEADLINE);
        let token = TokenPlaintext::generate();
        let outcome = authn
            .authenticate(Some(&format!("Bearer {}", token.expose())))
            .await;
        assert!(matches!(outcome, Err(GateError::Internal(msg)) if msg.contains("deadline")));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_store_fails_issuance() {
        let issuer = TokenIssuer::new(Arc::new(HungStore), DEADLINE);
        let outcome = issuer.issue(1, TokenScope::Authentication).await;
        assert!(matches!(outcome, Err(GateError::Internal(_))));
    }

    #[tokio::test]
    async fn issuer_persists_hash_not_plaintext() {
        let (_, issuer, store) = fixture();
        let token = issuer.issue(1, TokenScope::Authentication).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(token.record.hash, TokenHash::of(&token.plaintext));
        let debug = format!("{:?}", token.record);
        assert!(!debug.contains(token.plaintext.expose()));
    }
}
