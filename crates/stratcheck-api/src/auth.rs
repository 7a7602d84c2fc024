//! # Authentication & Authorization Middleware
//!
//! Bearer token middleware and per-route permission gates.
//!
//! ## Flow
//!
//! 1. [`auth_middleware`] resolves the `Authorization` header through the
//!    [`TokenAuthenticator`] found in request extensions and injects the
//!    resulting [`Principal`]. Requests without a header proceed as
//!    `Anonymous`; malformed or unknown credentials are rejected here.
//! 2. [`permission_middleware`] is attached per route with
//!    `from_fn_with_state(code, permission_middleware)` and runs the
//!    permission gate against the injected principal.
//! 3. Handlers read the principal through the [`Caller`] extractor.
//!
//! Every response that passed through the authenticator carries
//! `Vary: Authorization`.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use stratcheck_core::{require_permission, GateError, Principal, TokenAuthenticator};

use crate::error::AppError;

// ── Caller ──────────────────────────────────────────────────────────

/// The principal the authenticator attached to this request.
///
/// Extraction fails with an internal error if the authenticator did not
/// run, which is a routing mistake rather than a client error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub Principal);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(Caller)
            .ok_or_else(|| AppError::Internal("no principal in request context".into()))
    }
}

// ── Authentication ──────────────────────────────────────────────────

fn with_vary(mut response: Response) -> Response {
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("authorization"));
    response
}

/// Middleware that resolves bearer credentials to a [`Principal`].
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let Some(authenticator) = request.extensions().get::<TokenAuthenticator>().cloned() else {
        return AppError::Internal("authenticator missing from request context".into())
            .into_response();
    };

    let header = match request.headers().get(header::AUTHORIZATION) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(s) => Some(s.to_owned()),
            Err(_) => {
                return with_vary(
                    AppError::from(GateError::AuthFormat(
                        "authorization header is not valid ASCII",
                    ))
                    .into_response(),
                );
            }
        },
    };

    match authenticator.authenticate(header.as_deref()).await {
        Ok(principal) => {
            if let Some(id) = principal.id() {
                tracing::debug!(principal = id, "request authenticated");
            }
            request.extensions_mut().insert(principal);
            with_vary(next.run(request).await)
        }
        Err(err) => {
            if matches!(err, GateError::Internal(_)) {
                tracing::error!(error = %err, "authentication lookup failed");
            } else {
                tracing::warn!(
                    method = %request.method(),
                    path = %request.uri().path(),
                    error = %err,
                    "authentication rejected"
                );
            }
            with_vary(AppError::from(err).into_response())
        }
    }
}

// ── Authorization ───────────────────────────────────────────────────

/// Route-level permission gate. The permission code is the layer state.
///
/// ```ignore
/// get(handler).route_layer(from_fn_with_state("strategies:read", permission_middleware))
/// ```
pub async fn permission_middleware(
    State(code): State<&'static str>,
    request: Request,
    next: Next,
) -> Response {
    let Some(principal) = request.extensions().get::<Principal>() else {
        return AppError::Internal("no principal in request context".into()).into_response();
    };
    if let Err(err) = require_permission(principal, code) {
        tracing::warn!(
            principal = ?principal.id(),
            required = code,
            error = %err,
            "permission gate rejected request"
        );
        return AppError::from(err).into_response();
    }
    next.run(request).await
}
