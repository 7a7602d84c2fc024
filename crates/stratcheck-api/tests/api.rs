//! # Integration Tests for stratcheck-api
//!
//! Drives the assembled router against the in-memory stores: login,
//! permission gating, the strategy lifecycle under optimistic concurrency,
//! rate limiting, expired-token housekeeping and the diagnostics endpoints.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Method, Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use stratcheck_api::config::AppConfig;
use stratcheck_api::state::{AppState, MemoryBackends, Strategy};
use stratcheck_core::{Account, Token, TokenScope, TokenStore};
use tower::ServiceExt;

const PASSWORD: &str = "pa55word";

struct TestApp {
    state: AppState,
    memory: MemoryBackends,
}

impl TestApp {
    fn new() -> Self {
        let mut config = AppConfig::defaults();
        // Generous bucket so only the rate-limit tests ever hit it.
        config.limiter.burst = 1000;
        Self::with_config(config)
    }

    fn with_config(config: AppConfig) -> Self {
        let (state, memory) = AppState::in_memory_with(config);
        let users = [
            (1, "alice@example.com", &["strategies:read", "strategies:write"][..]),
            (2, "bob@example.com", &["strategies:read"][..]),
            (3, "carol@example.com", &[][..]),
        ];
        for (id, email, grants) in users {
            memory.users.insert(
                Account {
                    id,
                    email: email.into(),
                    activated: true,
                    permissions: grants.iter().copied().collect(),
                },
                PASSWORD,
            );
        }
        for (id, owner, name) in [(1, 1, "Golden cross"), (2, 2, "Bob's breakout")] {
            memory.strategies.insert(Strategy {
                id,
                created_at: Utc::now(),
                name: name.into(),
                public: false,
                fields: vec!["close".into(), "sma_50".into()],
                criteria: vec!["close > sma_50".into()],
                user_id: owner,
                version: 1,
            });
        }
        Self { state, memory }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        self.send_from([192, 0, 2, 10], request).await
    }

    async fn send_from(
        &self,
        ip: [u8; 4],
        mut request: Request<Body>,
    ) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 51000))));
        let response = stratcheck_api::app(self.state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    async fn login(&self, email: &str) -> String {
        let body = serde_json::json!({ "email": email, "password": PASSWORD }).to_string();
        let (status, _, body) = self
            .send(
                Request::post("/v1/tokens/authentication")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "login failed: {body}");
        format!(
            "Bearer {}",
            body["authentication_token"]["token"].as_str().unwrap()
        )
    }
}

fn get(path: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(path);
    if let Some(b) = bearer {
        builder = builder.header(header::AUTHORIZATION, b);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(path: &str, bearer: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(path)
        .header(header::AUTHORIZATION, bearer)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(path: &str, bearer: &str) -> Request<Body> {
    Request::delete(path)
        .header(header::AUTHORIZATION, bearer)
        .body(Body::empty())
        .unwrap()
}

fn patch(path: &str, bearer: &str, expected: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::PATCH)
        .uri(path)
        .header(header::AUTHORIZATION, bearer)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(v) = expected {
        builder = builder.header("X-Expected-Version", v);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

// -- Authentication & permission gate ----------------------------------------

#[tokio::test]
async fn owner_reads_own_strategy() {
    let t = TestApp::new();
    let bearer = t.login("alice@example.com").await;
    let (status, headers, body) = t.send(get("/v1/strategies/1", Some(&bearer))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Golden cross");
    assert_eq!(body["version"], 1);
    assert_eq!(headers.get(header::VARY).unwrap(), "authorization");
}

#[tokio::test]
async fn anonymous_caller_must_authenticate() {
    let t = TestApp::new();
    let (status, headers, body) = t.send(get("/v1/strategies/1", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_REQUIRED");
    assert_eq!(headers.get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
}

#[tokio::test]
async fn caller_without_grant_is_forbidden() {
    let t = TestApp::new();
    let bearer = t.login("carol@example.com").await;
    let (status, _, body) = t.send(get("/v1/strategies/1", Some(&bearer))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["details"]["required_permission"], "strategies:read");
}

#[tokio::test]
async fn other_users_strategy_is_not_found() {
    let t = TestApp::new();
    let bearer = t.login("alice@example.com").await;
    let (status, _, body) = t.send(get("/v1/strategies/2", Some(&bearer))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _, _) = t.send(get("/v1/strategies/zero", Some(&bearer))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reader_cannot_write() {
    let t = TestApp::new();
    let bearer = t.login("bob@example.com").await;
    let (status, _, body) = t
        .send(patch(
            "/v1/strategies/2",
            &bearer,
            None,
            serde_json::json!({ "public": true }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "PERMISSION_DENIED");
    let key = stratcheck_api::state::StrategyKey { owner: 2, id: 2 };
    assert!(!t.memory.strategies.get(&key).unwrap().public);
}

// -- Optimistic concurrency --------------------------------------------------

#[tokio::test]
async fn patch_bumps_version() {
    let t = TestApp::new();
    let bearer = t.login("alice@example.com").await;
    let (status, _, body) = t
        .send(patch(
            "/v1/strategies/1",
            &bearer,
            Some("1"),
            serde_json::json!({ "name": "Death cross", "public": true }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Death cross");
    assert_eq!(body["public"], true);
    assert_eq!(body["version"], 2);
}

#[tokio::test]
async fn stale_expected_version_conflicts_before_writing() {
    let t = TestApp::new();
    let bearer = t.login("alice@example.com").await;
    let first = t
        .send(patch(
            "/v1/strategies/1",
            &bearer,
            Some("1"),
            serde_json::json!({ "name": "First" }),
        ))
        .await;
    assert_eq!(first.0, StatusCode::OK);

    let (status, _, body) = t
        .send(patch(
            "/v1/strategies/1",
            &bearer,
            Some("1"),
            serde_json::json!({ "name": "Second" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "EDIT_CONFLICT");
    assert_eq!(body["error"]["details"]["current_version"], 2);

    let (_, _, current) = t.send(get("/v1/strategies/1", Some(&bearer))).await;
    assert_eq!(current["name"], "First");
}

#[tokio::test]
async fn invalid_patch_is_rejected_without_writing() {
    let t = TestApp::new();
    let bearer = t.login("alice@example.com").await;
    let (status, _, body) = t
        .send(patch(
            "/v1/strategies/1",
            &bearer,
            None,
            serde_json::json!({ "fields": [], "criteria": ["a", "a"] }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["details"]["fields"], "must contain at least 1 field");
    assert_eq!(body["error"]["details"]["criteria"], "must not contain duplicate values");

    let (_, _, current) = t.send(get("/v1/strategies/1", Some(&bearer))).await;
    assert_eq!(current["version"], 1);
}

#[tokio::test]
async fn non_numeric_expected_version_conflicts() {
    let t = TestApp::new();
    let bearer = t.login("alice@example.com").await;
    let (status, _, _) = t
        .send(patch(
            "/v1/strategies/1",
            &bearer,
            Some("latest"),
            serde_json::json!({ "public": true }),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// -- Strategy lifecycle ------------------------------------------------------

#[tokio::test]
async fn created_strategy_starts_at_version_one_and_can_be_patched() {
    let t = TestApp::new();
    let bearer = t.login("alice@example.com").await;
    let (status, headers, created) = t
        .send(post_json(
            "/v1/strategies",
            &bearer,
            serde_json::json!({
                "name": "Mean reversion",
                "fields": ["close", "bb_lower"],
                "criteria": ["close < bb_lower"]
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["version"], 1);
    assert_eq!(created["user_id"], 1);
    assert_eq!(created["public"], false);
    let id = created["id"].as_i64().unwrap();
    assert_eq!(id, 3);
    let location = format!("/v1/strategies/{id}");
    assert_eq!(headers.get(header::LOCATION).unwrap(), location.as_str());

    let (status, _, fetched) = t.send(get(&location, Some(&bearer))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);

    let (status, _, patched) = t
        .send(patch(&location, &bearer, Some("1"), serde_json::json!({ "public": true })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["version"], 2);
}

#[tokio::test]
async fn invalid_create_is_rejected_without_storing() {
    let t = TestApp::new();
    let bearer = t.login("alice@example.com").await;
    let (status, _, body) = t
        .send(post_json(
            "/v1/strategies",
            &bearer,
            serde_json::json!({ "fields": ["close"], "criteria": [] }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["details"]["name"], "must be provided");
    assert_eq!(body["error"]["details"]["criteria"], "must contain at least 1 criterium");
    let key = stratcheck_api::state::StrategyKey { owner: 1, id: 3 };
    assert!(t.memory.strategies.get(&key).is_none());
}

#[tokio::test]
async fn reader_cannot_create_or_delete() {
    let t = TestApp::new();
    let bearer = t.login("bob@example.com").await;
    let (status, _, _) = t
        .send(post_json(
            "/v1/strategies",
            &bearer,
            serde_json::json!({ "name": "x", "fields": ["a"], "criteria": ["b"] }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = t.send(delete("/v1/strategies/2", &bearer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let key = stratcheck_api::state::StrategyKey { owner: 2, id: 2 };
    assert!(t.memory.strategies.get(&key).is_some());
}

#[tokio::test]
async fn patch_after_delete_is_not_found() {
    let t = TestApp::new();
    let bearer = t.login("alice@example.com").await;
    let (status, _, body) = t.send(delete("/v1/strategies/1", &bearer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "strategy successfully deleted");

    let (status, _, _) = t
        .send(patch(
            "/v1/strategies/1",
            &bearer,
            Some("1"),
            serde_json::json!({ "public": true }),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = t.send(get("/v1/strategies/1", Some(&bearer))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = t.send(delete("/v1/strategies/1", &bearer)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cannot_delete_another_users_strategy() {
    let t = TestApp::new();
    let bearer = t.login("alice@example.com").await;
    let (status, _, _) = t.send(delete("/v1/strategies/2", &bearer)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let key = stratcheck_api::state::StrategyKey { owner: 2, id: 2 };
    assert!(t.memory.strategies.get(&key).is_some());
}

// -- Token housekeeping ------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn expired_tokens_are_purged_after_one_interval() {
    let t = TestApp::new();
    let long_ago = Utc::now() - chrono::Duration::days(3);
    for _ in 0..100 {
        let token = Token::generate(1, TokenScope::Authentication, long_ago);
        t.memory.tokens.insert(&token.record).await.unwrap();
    }
    let live = Token::generate(1, TokenScope::Authentication, Utc::now());
    t.memory.tokens.insert(&live.record).await.unwrap();

    assert!(t.state.purger.start());
    tokio::time::sleep(t.state.purger.interval() + std::time::Duration::from_secs(1)).await;
    tokio::task::yield_now().await;
    assert_eq!(t.memory.tokens.len(), 1);

    t.state.purger.stop().await;
}

// -- Rate limiting -----------------------------------------------------------

#[tokio::test]
async fn burst_is_limited_per_client_but_healthcheck_is_not() {
    let mut config = AppConfig::defaults();
    config.limiter.burst = 2;
    config.limiter.rps = 0.01;
    config.limiter.idle_secs = 3600;
    let t = TestApp::with_config(config);

    for _ in 0..2 {
        let (status, _, _) = t.send_from([198, 51, 100, 7], get("/v1/strategies/1", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, headers, body) = t.send_from([198, 51, 100, 7], get("/v1/strategies/1", None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
    assert!(headers.contains_key(header::RETRY_AFTER));

    // Another client is unaffected.
    let (status, _, _) = t.send_from([198, 51, 100, 8], get("/v1/strategies/1", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    for _ in 0..5 {
        let (status, _, _) = t.send_from([198, 51, 100, 7], get("/v1/healthcheck", None)).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn limiter_runs_before_authentication() {
    let mut config = AppConfig::defaults();
    config.limiter.burst = 1;
    config.limiter.rps = 0.01;
    config.limiter.idle_secs = 3600;
    let t = TestApp::with_config(config);

    let first = t
        .send(get("/v1/strategies/1", Some("Bearer AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")))
        .await;
    assert_eq!(first.0, StatusCode::UNAUTHORIZED);
    let second = t
        .send(get("/v1/strategies/1", Some("Bearer AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")))
        .await;
    assert_eq!(second.0, StatusCode::TOO_MANY_REQUESTS);
}

// -- Diagnostics -------------------------------------------------------------

#[tokio::test]
async fn debug_vars_counts_requests_and_buckets() {
    let t = TestApp::new();
    t.send(get("/v1/strategies/1", None)).await;
    t.send(get("/v1/healthcheck", None)).await;

    let (status, _, body) = t.send(get("/debug/vars", None)).await;
    assert_eq!(status, StatusCode::OK);
    // The current request is counted on entry.
    assert_eq!(body["metrics"]["total_requests_received"], 3);
    assert_eq!(body["metrics"]["total_responses_sent"], 2);
    assert_eq!(body["metrics"]["total_responses_sent_by_status"]["401"], 1);
    assert_eq!(body["limiter"]["buckets"], 1);
}
