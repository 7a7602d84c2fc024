//! # Opaque Bearer Tokens
//!
//! A token is 24 bytes of OS randomness rendered as 32 characters of
//! unpadded URL-safe base64. The plaintext is handed to the client exactly
//! once; the store only ever sees its SHA-256 ([`TokenHash`]).
//!
//! [`TokenPlaintext::parse`] performs the syntactic check (length and
//! alphabet) so malformed values never reach storage.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::principal::PrincipalId;

/// Random bytes per token.
pub const TOKEN_ENTROPY_BYTES: usize = 24;

/// Length of the encoded plaintext.
pub const TOKEN_PLAINTEXT_LEN: usize = 32;

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenScope {
    /// Bearer credential for API requests.
    Authentication,
    /// One-time credential mailed to reset a password.
    PasswordReset,
}

impl TokenScope {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::PasswordReset => "password-reset",
        }
    }

    /// Fixed lifetime for tokens of this scope.
    pub fn ttl(&self) -> Duration {
        match self {
            Self::Authentication => Duration::hours(24),
            Self::PasswordReset => Duration::minutes(45),
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token plaintext. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPlaintext(Zeroizing<String>);

/// The value is not a syntactically valid token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("token must be {TOKEN_PLAINTEXT_LEN} characters of [A-Za-z0-9_-]")]
pub struct MalformedToken;

impl TokenPlaintext {
    /// Draw fresh plaintext from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; TOKEN_ENTROPY_BYTES]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self(Zeroizing::new(URL_SAFE_NO_PAD.encode(&bytes[..])))
    }

    /// Accept `raw` only if it has the exact length and alphabet of a
    /// generated token.
    pub fn parse(raw: &str) -> Result<Self, MalformedToken> {
        let well_formed = raw.len() == TOKEN_PLAINTEXT_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !well_formed {
            return Err(MalformedToken);
        }
        Ok(Self(Zeroizing::new(raw.to_owned())))
    }

    /// The plaintext. Only for the single disclosure to the client.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for TokenPlaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenPlaintext([REDACTED])")
    }
}

/// SHA-256 of a token plaintext. This is what storage keys on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    /// Hash a plaintext.
    pub fn of(plaintext: &TokenPlaintext) -> Self {
        Self(Sha256::digest(plaintext.expose().as_bytes()).into())
    }

    /// Rebuild from stored bytes. Returns `None` if `bytes` is not 32 long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash(")?;
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "…)")
    }
}

/// The persisted form of a token: everything except the plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// SHA-256 of the plaintext.
    pub hash: TokenHash,
    /// Owning principal.
    pub principal_id: PrincipalId,
    /// Intended use.
    pub scope: TokenScope,
    /// Issue instant.
    pub created_at: DateTime<Utc>,
    /// Instant after which lookups fail.
    pub expiry: DateTime<Utc>,
}

impl TokenRecord {
    /// A token is live strictly before its expiry instant.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry
    }
}

/// A freshly issued token, plaintext included.
#[derive(Debug, Clone)]
pub struct Token {
    /// Disclosed to the client once, never stored.
    pub plaintext: TokenPlaintext,
    /// Persisted form.
    pub record: TokenRecord,
}

impl Token {
    /// Generate a token for `principal_id` valid for `scope.ttl()` from `now`.
    pub fn generate(principal_id: PrincipalId, scope: TokenScope, now: DateTime<Utc>) -> Self {
        let plaintext = TokenPlaintext::generate();
        let record = TokenRecord {
            hash: TokenHash::of(&plaintext),
            principal_id,
            scope,
            created_at: now,
            expiry: now + scope.ttl(),
        };
        Self { plaintext, record }
    }

    /// Expiry instant, for the response body.
    pub fn expiry(&self) -> DateTime<Utc> {
        self.record.expiry
    }
}
