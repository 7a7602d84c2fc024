//! # Principals and Permission Grants
//!
//! A [`Principal`] is the identity attached to a request after
//! authentication. Callers without a credential are [`Principal::Anonymous`];
//! the sentinel carries no id and no permissions, and is never activated, so
//! it fails every gate that needs an account.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Primary key of a principal in the user directory.
pub type PrincipalId = i64;

/// A capability string such as `strategies:read`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionCode(String);

impl PermissionCode {
    /// Wrap a permission code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PermissionCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// The set of permission codes granted to a principal.
///
/// Grants are read-only from the trust layer's point of view. Ordering is
/// irrelevant; a `BTreeSet` keeps serialized output stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeSet<PermissionCode>);

impl Permissions {
    /// An empty grant set.
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether `code` is granted.
    pub fn includes(&self, code: &str) -> bool {
        self.0.iter().any(|granted| granted.as_str() == code)
    }

    /// Number of distinct grants.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no permission is granted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over granted codes in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &PermissionCode> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(PermissionCode::new).collect())
    }
}

/// A registered user as resolved from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Directory primary key.
    pub id: PrincipalId,
    /// Login email.
    pub email: String,
    /// Whether the account completed activation.
    pub activated: bool,
    /// Granted permission codes.
    pub permissions: Permissions,
}

/// Identity attached to a request for the rest of its processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// No credential was presented.
    Anonymous,
    /// A bearer token resolved to this account.
    Authenticated(Account),
}

impl Principal {
    /// Whether this is the anonymous sentinel.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// The resolved account, if any.
    pub fn account(&self) -> Option<&Account> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(account) => Some(account),
        }
    }

    /// The principal id, if any.
    pub fn id(&self) -> Option<PrincipalId> {
        self.account().map(|a| a.id)
    }

    /// Anonymous is never activated.
    pub fn is_activated(&self) -> bool {
        self.account().is_some_and(|a| a.activated)
    }

    /// Whether `code` is granted. Always false for Anonymous.
    pub fn has_permission(&self, code: &str) -> bool {
        self.account().is_some_and(|a| a.permissions.includes(code))
    }
}
