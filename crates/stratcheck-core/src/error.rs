//! # Error Hierarchy
//!
//! Three error families with distinct audiences:
//!
//! - [`GateError`] is request-visible. Every variant maps to a stable
//!   response category in the API crate.
//! - [`StoreError`] comes from storage collaborators. It is always reported to
//!   clients as an undifferentiated internal fault.
//! - [`TaskFault`] is produced inside background work and is only ever
//!   logged.

use std::time::Duration;

use thiserror::Error;

/// Failures raised by the trust layer while admitting a request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    /// The credential header is not of the form `Bearer <token>`.
    #[error("malformed authorization header: {0}")]
    AuthFormat(&'static str),

    /// Unknown, expired, wrong-scope or syntactically invalid token, or a
    /// failed login. The sub-case is never disclosed.
    #[error("invalid or expired authentication credentials")]
    InvalidCredentials,

    /// The caller is anonymous and the action requires a principal.
    #[error("you must be authenticated to access this resource")]
    AuthRequired,

    /// The principal exists but has not activated their account.
    #[error("your user account must be activated to access this resource")]
    AccountNotActivated,

    /// The principal lacks the permission code the action is gated on.
    #[error("your user account doesn't have the `{required}` permission")]
    PermissionDenied {
        /// Permission code the action requires.
        required: String,
    },

    /// The client's bucket is empty.
    #[error("rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// Time until the bucket holds one whole token again.
        retry_after: Duration,
    },

    /// The stored version does not match the version the update was based on.
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict {
        /// Stored version at the time the conflict was detected, when known.
        current_version: Option<i32>,
    },

    /// Unclassified failure. The message is for server logs only.
    #[error("internal fault: {0}")]
    Internal(String),
}

/// Failures from a storage collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The call did not complete within its deadline and was abandoned.
    #[error("storage call exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),

    /// The backend reported an error.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for GateError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A contained failure of a background unit of work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskFault {
    /// The unit of work returned an error.
    #[error("background task `{task}` failed: {message}")]
    Failed {
        /// Task name given at spawn time.
        task: String,
        /// Rendered error.
        message: String,
    },

    /// The unit of work panicked; the panic was caught at the task boundary.
    #[error("background task `{task}` panicked: {message}")]
    Panicked {
        /// Task name given at spawn time.
        task: String,
        /// Panic payload, when it was a string.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_becomes_internal_fault() {
        let err: GateError = StoreError::DeadlineExceeded(Duration::from_secs(3)).into();
        match err {
            GateError::Internal(msg) => assert!(msg.contains("deadline")),
            other => panic!("expected Internal, got {other:?}"),
        }
    }

    #[test]
    fn invalid_credentials_message_is_generic() {
        let msg = GateError::InvalidCredentials.to_string();
        assert!(!msg.contains("expired token"));
        assert!(!msg.contains("unknown"));
    }

    #[test]
    fn task_fault_display_names_task() {
        let fault = TaskFault::Panicked {
            task: "password-reset-email".into(),
            message: "boom".into(),
        };
        assert_eq!(
            fault.to_string(),
            "background task `password-reset-email` panicked: boom"
        );
    }
}
