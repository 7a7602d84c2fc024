//! # Permission Gate
//!
//! Stateless checks run after authentication. Order matters: an anonymous
//! caller is told to authenticate, an unactivated account is told to
//! activate, and only then is the grant set consulted.

use crate::error::GateError;
use crate::principal::{Account, Principal};

/// Require a resolved account.
pub fn require_authenticated(principal: &Principal) -> Result<&Account, GateError> {
    principal.account().ok_or(GateError::AuthRequired)
}

/// Require a resolved, activated account.
pub fn require_activated(principal: &Principal) -> Result<&Account, GateError> {
    let account = require_authenticated(principal)?;
    if !account.activated {
        return Err(GateError::AccountNotActivated);
    }
    Ok(account)
}

/// Require an activated account holding `code`.
pub fn require_permission<'p>(principal: &'p Principal, code: &str) -> Result<&'p Account, GateError> {
    let account = require_activated(principal)?;
    if !account.permissions.includes(code) {
        return Err(GateError::PermissionDenied {
            required: code.to_string(),
        });
    }
    Ok(account)
}
