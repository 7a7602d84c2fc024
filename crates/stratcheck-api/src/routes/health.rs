//! # Health & Diagnostics
//!
//! `GET /v1/healthcheck` and `GET /debug/vars`. Both are mounted outside
//! the rate limiter and the authenticator.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use stratcheck_core::RunnerSnapshot;

use crate::middleware::metrics::MetricsSnapshot;
use crate::state::AppState;

/// Build the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/healthcheck", get(healthcheck))
        .route("/debug/vars", get(debug_vars))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub environment: &'static str,
    pub version: &'static str,
}

/// GET /v1/healthcheck
async fn healthcheck(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "available",
        system_info: SystemInfo {
            environment: state.config.env.as_str(),
            version: env!("CARGO_PKG_VERSION"),
        },
    })
}

#[derive(Debug, Serialize)]
pub struct DebugVars {
    pub version: &'static str,
    pub metrics: MetricsSnapshot,
    pub limiter: LimiterVars,
    pub background: RunnerSnapshot,
}

#[derive(Debug, Serialize)]
pub struct LimiterVars {
    pub enabled: bool,
    pub sweeping: bool,
    pub buckets: usize,
}

/// GET /debug/vars
async fn debug_vars(State(state): State<AppState>) -> Json<DebugVars> {
    Json(DebugVars {
        version: env!("CARGO_PKG_VERSION"),
        metrics: state.metrics.snapshot(),
        limiter: LimiterVars {
            enabled: state.limiter.config().enabled,
            sweeping: state.limiter.is_sweeping(),
            buckets: state.limiter.len(),
        },
        background: state.background.snapshot(),
    })
}
