//! # stratcheck-api — Axum API Service
//!
//! HTTP surface for the StratCheck trust layer, built on Axum/Tower/Tokio.
//! Wires the `stratcheck-core` components into middleware and serves the
//! token and strategy endpoints.
//!
//! ## Routes
//!
//! | Method | Path                           | Gate                 |
//! |--------|--------------------------------|----------------------|
//! | POST   | `/v1/tokens/authentication`    | none                 |
//! | POST   | `/v1/tokens/password-reset`    | none                 |
//! | POST   | `/v1/strategies`               | `strategies:write`   |
//! | GET    | `/v1/strategies/{id}`          | `strategies:read`    |
//! | PATCH  | `/v1/strategies/{id}`          | `strategies:write`   |
//! | DELETE | `/v1/strategies/{id}`          | `strategies:write`   |
//! | GET    | `/v1/healthcheck`              | outside the limiter  |
//! | GET    | `/debug/vars`                  | outside the limiter  |
//!
//! ## Middleware Stack (Tower), outermost first
//!
//! TraceLayer → Metrics → CatchPanic → CORS → RateLimit → Auth → PermissionGate
//!
//! Health and diagnostics routes skip the last three. CORS answers
//! preflight requests itself, so they never consume a rate limit token.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod routes;
pub mod state;

use std::any::Any;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub use config::AppConfig;
pub use error::AppError;
pub use state::AppState;

/// Build the application router over `state`.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::tokens::router())
        .merge(routes::strategies::router())
        .layer(from_fn(auth::auth_middleware))
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware));

    Router::new()
        .merge(routes::health::router())
        .merge(api)
        .layer(cors_layer(&state.config.cors.origins()))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(middleware::tracing_layer::layer())
        .layer(Extension(state.authenticator.clone()))
        .layer(Extension(state.limiter.clone()))
        .layer(Extension(state.metrics.clone()))
        .with_state(state)
}

/// Cross-origin access for the trusted origins only. An empty list allows
/// no cross-origin caller.
fn cors_layer(trusted: &[HeaderValue]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(trusted.iter().cloned()))
        .allow_methods([
            Method::OPTIONS,
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-expected-version"),
        ])
        .expose_headers([header::LOCATION])
}

/// Turn a handler panic into a 500 and close the connection.
fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    let mut response = AppError::Internal(format!("handler panicked: {detail}")).into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};

    use crate::config::AppConfig;
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    async fn boom() -> &'static str {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn panic_becomes_internal_error_with_connection_close() {
        let app = Router::new()
            .route("/boom", get(boom))
            .layer(CatchPanicLayer::custom(panic_response));
        let resp: Response = app
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.headers().get(header::CONNECTION).unwrap(), "close");
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/v1/strategies/1")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn preflight_from_trusted_origin_is_answered_without_rate_limiting() {
        let mut config = AppConfig::defaults();
        config.cors.trusted_origins = vec!["https://app.example.com".into()];
        config.limiter.burst = 1;
        let (state, _) = AppState::in_memory_with(config);
        let app = app(state);

        for _ in 0..3 {
            let resp = app
                .clone()
                .oneshot(preflight("https://app.example.com"))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(
                resp.headers()
                    .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                    .unwrap(),
                "https://app.example.com"
            );
        }
    }

    #[tokio::test]
    async fn untrusted_origin_gets_no_allow_origin_header() {
        let (state, _) = AppState::in_memory();
        let resp = app(state)
            .oneshot(preflight("https://evil.example.com"))
            .await
            .unwrap();
        assert!(resp
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (state, _) = AppState::in_memory();
        let mut req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 50000))));
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
