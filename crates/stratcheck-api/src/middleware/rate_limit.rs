//! # Per-Client Rate Limiting
//!
//! Axum glue for [`stratcheck_core::RateLimiter`]. Requests are keyed by the
//! peer IP from `ConnectInfo`; the limiter itself is read from request
//! extensions.
//!
//! Forwarded-for headers are ignored. Behind a proxy every client shares the
//! proxy's bucket.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use stratcheck_core::{ClientKey, RateLimiter};

use crate::error::AppError;

/// Middleware that enforces the per-client token bucket.
pub async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    let Some(limiter) = request.extensions().get::<RateLimiter>().cloned() else {
        return next.run(request).await;
    };
    if !limiter.config().enabled {
        return next.run(request).await;
    }

    let Some(ConnectInfo(peer)) = request.extensions().get::<ConnectInfo<SocketAddr>>().copied()
    else {
        return AppError::Internal("peer address missing from request".into()).into_response();
    };
    let client = ClientKey::from(peer.ip());

    if let Err(rejection) = limiter.check(&client) {
        tracing::warn!(client = %client, "rate limit exceeded");
        return AppError::from(rejection).into_response();
    }

    next.run(request).await
}
