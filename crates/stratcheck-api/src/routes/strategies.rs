//! # Strategy Endpoints
//!
//! - `POST /v1/strategies` requires `strategies:write` and creates a
//!   strategy owned by the caller at version 1.
//! - `GET /v1/strategies/{id}` requires `strategies:read`.
//! - `PATCH /v1/strategies/{id}` requires `strategies:write` and applies a
//!   partial update under optimistic concurrency. Clients may send
//!   `X-Expected-Version` to refuse the write if the record has moved on.
//! - `DELETE /v1/strategies/{id}` requires `strategies:write`.
//!
//! A strategy is only visible to its owner. Someone else's strategy, an id
//! below 1 and an id that is not an integer are all reported as not found.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use stratcheck_core::{require_activated, with_deadline, EXPECTED_VERSION_HEADER};

use crate::auth::{permission_middleware, Caller};
use crate::error::AppError;
use crate::extractors::{extract_json, validate};
use crate::routes::tokens::MessageResponse;
use crate::state::{AppState, Strategy, StrategyKey};

pub const READ_PERMISSION: &str = "strategies:read";
pub const WRITE_PERMISSION: &str = "strategies:write";

/// Build the strategies router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/strategies",
            post(create_strategy)
                .route_layer(from_fn_with_state(WRITE_PERMISSION, permission_middleware)),
        )
        .route(
            "/v1/strategies/{id}",
            get(show_strategy)
                .route_layer(from_fn_with_state(READ_PERMISSION, permission_middleware))
                .merge(
                    patch(update_strategy)
                        .delete(delete_strategy)
                        .route_layer(from_fn_with_state(WRITE_PERMISSION, permission_middleware)),
                ),
        )
}

/// Body of a create request. Missing fields fall through to validation.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CreateStrategyRequest {
    pub name: String,
    pub public: bool,
    pub fields: Vec<String>,
    pub criteria: Vec<String>,
}

/// Partial update. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyPatch {
    pub name: Option<String>,
    pub public: Option<bool>,
    pub fields: Option<Vec<String>>,
    pub criteria: Option<Vec<String>>,
}

impl StrategyPatch {
    pub fn apply(self, strategy: &mut Strategy) {
        if let Some(name) = self.name {
            strategy.name = name;
        }
        if let Some(public) = self.public {
            strategy.public = public;
        }
        if let Some(fields) = self.fields {
            strategy.fields = fields;
        }
        if let Some(criteria) = self.criteria {
            strategy.criteria = criteria;
        }
    }
}

fn strategy_key(caller: &Caller, raw_id: &str) -> Result<StrategyKey, AppError> {
    let account = require_activated(&caller.0)?;
    match raw_id.parse::<i64>() {
        Ok(id) if id >= 1 => Ok(StrategyKey {
            owner: account.id,
            id,
        }),
        _ => Err(AppError::NotFound),
    }
}

/// POST /v1/strategies
async fn create_strategy(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<CreateStrategyRequest>, JsonRejection>,
) -> Result<(StatusCode, [(header::HeaderName, String); 1], Json<Strategy>), AppError> {
    let account = require_activated(&caller.0)?;
    let req = extract_json(body)?;
    let draft = Strategy {
        id: 0,
        created_at: Utc::now(),
        name: req.name,
        public: req.public,
        fields: req.fields,
        criteria: req.criteria,
        user_id: account.id,
        version: 0,
    };
    validate(&draft)?;

    let deadline = state.config.db.store_deadline();
    let created = with_deadline(deadline, state.catalog.insert(&draft)).await?;
    tracing::info!(principal = created.user_id, strategy = created.id, "strategy created");

    let location = format!("/v1/strategies/{}", created.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(created)))
}

/// GET /v1/strategies/{id}
async fn show_strategy(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Strategy>, AppError> {
    let key = strategy_key(&caller, &id)?;
    let strategy = state
        .strategies
        .load(&key)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(strategy))
}

/// PATCH /v1/strategies/{id}
async fn update_strategy(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<StrategyPatch>, JsonRejection>,
) -> Result<Json<Strategy>, AppError> {
    let key = strategy_key(&caller, &id)?;
    let patch = extract_json(body)?;
    // A header that is not visible ASCII can never name a stored version.
    let expected = headers
        .get(EXPECTED_VERSION_HEADER)
        .map(|v| v.to_str().unwrap_or_default());

    let updated = state
        .strategies
        .update(&key, expected, |strategy: &mut Strategy| {
            patch.apply(strategy);
            validate(strategy)
        })
        .await?
        .ok_or(AppError::NotFound)?;

    tracing::info!(
        principal = key.owner,
        strategy = key.id,
        version = updated.version,
        "strategy updated"
    );
    Ok(Json(updated))
}

/// DELETE /v1/strategies/{id}
async fn delete_strategy(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let key = strategy_key(&caller, &id)?;
    let deadline = state.config.db.store_deadline();
    if !with_deadline(deadline, state.catalog.delete(&key)).await? {
        return Err(AppError::NotFound);
    }
    tracing::info!(principal = key.owner, strategy = key.id, "strategy deleted");
    Ok(Json(MessageResponse {
        message: "strategy successfully deleted",
    }))
}
