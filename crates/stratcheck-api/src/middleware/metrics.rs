//! # Request Metrics
//!
//! Process-local request counters using atomics, exposed as JSON at
//! `GET /debug/vars`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;
use serde::Serialize;

/// Shared metrics state. Clones share the counters.
#[derive(Debug, Clone, Default)]
pub struct ApiMetrics {
    requests_received: Arc<AtomicU64>,
    responses_sent: Arc<AtomicU64>,
    processing_time_us: Arc<AtomicU64>,
    by_status: Arc<Mutex<BTreeMap<u16, u64>>>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests_received: u64,
    pub total_responses_sent: u64,
    pub total_processing_time_us: u64,
    pub total_responses_sent_by_status: BTreeMap<u16, u64>,
}

impl ApiMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that have entered the middleware.
    pub fn requests(&self) -> u64 {
        self.requests_received.load(Ordering::Relaxed)
    }

    /// Responses that have left the middleware.
    pub fn responses(&self) -> u64 {
        self.responses_sent.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests_received: self.requests(),
            total_responses_sent: self.responses(),
            total_processing_time_us: self.processing_time_us.load(Ordering::Relaxed),
            total_responses_sent_by_status: self.by_status.lock().clone(),
        }
    }

    fn record(&self, status: u16, elapsed_us: u64) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
        self.processing_time_us
            .fetch_add(elapsed_us, Ordering::Relaxed);
        *self.by_status.lock().entry(status).or_insert(0) += 1;
    }
}

/// Middleware that counts requests, responses and processing time.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();
    let started = Instant::now();
    if let Some(m) = &metrics {
        m.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    let response = next.run(request).await;

    if let Some(m) = metrics {
        let elapsed = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        m.record(response.status().as_u16(), elapsed);
    }
    response
}
