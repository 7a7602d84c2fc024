//! # Token Endpoints
//!
//! - `POST /v1/tokens/authentication` exchanges email and password for a
//!   24-hour bearer token.
//! - `POST /v1/tokens/password-reset` mails a 45-minute reset token to an
//!   activated account. Delivery happens in the background; the response
//!   does not wait for it.
//!
//! Both are reachable anonymously. Unknown email and wrong password are
//! indistinguishable on the login endpoint.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratcheck_core::{with_deadline, Account, GateError, Notification, TokenScope};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, is_email, Validate, Validator};
use crate::state::AppState;

/// Template used for password reset mail.
pub const PASSWORD_RESET_TEMPLATE: &str = "token_password_reset.tmpl";

/// Build the tokens router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/tokens/authentication", post(create_authentication_token))
        .route("/v1/tokens/password-reset", post(create_password_reset_token))
}

fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(is_email(email), "email", "must be a valid email address");
}

fn validate_password_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(password.len() >= 8, "password", "must be at least 8 bytes long");
    v.check(
        password.len() <= 72,
        "password",
        "must not be more than 72 bytes long",
    );
}

// ── Authentication ──────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthenticationRequest {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AuthenticationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Validate for AuthenticationRequest {
    fn validate(&self, v: &mut Validator) {
        validate_email(v, &self.email);
        validate_password_plaintext(v, &self.password);
    }
}

#[derive(Debug, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AuthenticationResponse {
    pub authentication_token: IssuedToken,
}

async fn find_account(state: &AppState, email: &str) -> Result<Option<Account>, AppError> {
    let deadline = state.config.db.store_deadline();
    Ok(with_deadline(deadline, state.users.find_by_email(email)).await?)
}

/// POST /v1/tokens/authentication
async fn create_authentication_token(
    State(state): State<AppState>,
    body: Result<Json<AuthenticationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthenticationResponse>), AppError> {
    let req = extract_validated_json(body)?;

    let Some(account) = find_account(&state, &req.email).await? else {
        tracing::warn!("login attempt for unknown email");
        return Err(GateError::InvalidCredentials.into());
    };

    let deadline = state.config.db.store_deadline();
    let matches = with_deadline(
        deadline,
        state.users.password_matches(account.id, &req.password),
    )
    .await?;
    if !matches {
        tracing::warn!(principal = account.id, "login attempt with wrong password");
        return Err(GateError::InvalidCredentials.into());
    }

    let token = state
        .issuer
        .issue(account.id, TokenScope::Authentication)
        .await?;
    tracing::info!(principal = account.id, expiry = %token.expiry(), "authentication token issued");

    Ok((
        StatusCode::CREATED,
        Json(AuthenticationResponse {
            authentication_token: IssuedToken {
                token: token.plaintext.expose().to_string(),
                expiry: token.expiry(),
            },
        }),
    ))
}

// ── Password reset ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordResetRequest {
    pub email: String,
}

impl Validate for PasswordResetRequest {
    fn validate(&self, v: &mut Validator) {
        validate_email(v, &self.email);
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// POST /v1/tokens/password-reset
async fn create_password_reset_token(
    State(state): State<AppState>,
    body: Result<Json<PasswordResetRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let req = extract_validated_json(body)?;

    let Some(account) = find_account(&state, &req.email).await? else {
        return Err(AppError::invalid("email", "no matching email address found"));
    };
    if !account.activated {
        return Err(AppError::invalid("email", "user account must be activated"));
    }

    let token = state
        .issuer
        .issue(account.id, TokenScope::PasswordReset)
        .await?;

    let notification = Notification::new(account.email.as_str(), PASSWORD_RESET_TEMPLATE)
        .with("passwordResetToken", token.plaintext.expose());
    // Detached; the runner records the outcome.
    let _ = state
        .background
        .notify(state.notifier.clone(), notification, state.retry);
    tracing::info!(principal = account.id, "password reset token issued");

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "an email will be sent to you containing password reset instructions",
        }),
    ))
}
