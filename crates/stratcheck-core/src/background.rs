//! # Background Tasks
//!
//! Fire-and-forget work that must not delay the response and must not be
//! able to hurt the process. Each unit of work runs on its own tokio task
//! inside a `TaskTracker`:
//!
//! - An error returned by the work, or a panic raised by it, is caught at
//!   the task boundary, logged with full detail and turned into a
//!   [`TaskOutcome`]. Nothing propagates to the request that spawned it.
//! - The tracker counts in-flight tasks. On shutdown the owning process
//!   calls [`BackgroundTaskRunner::drain`] to wait, up to a grace period,
//!   for them to finish.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::error::TaskFault;

/// How a unit of work ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Returned `Ok`.
    Completed,
    /// Returned `Err` or panicked; contained.
    Faulted(TaskFault),
}

impl TaskOutcome {
    /// Whether the work faulted.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }
}

/// Drain gave up with work still running.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{remaining} background task(s) still running after {grace:?}")]
pub struct DrainTimeout {
    /// Tasks still in flight when the grace period ran out.
    pub remaining: usize,
    /// The grace period that elapsed.
    pub grace: Duration,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunnerSnapshot {
    /// Tasks enqueued and not yet finished.
    pub in_flight: usize,
    /// Tasks that returned `Ok`.
    pub completed: u64,
    /// Tasks that returned `Err` or panicked.
    pub faulted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    faulted: AtomicU64,
}

/// Spawns and tracks contained background work. Clones share one tracker.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTaskRunner {
    tracker: TaskTracker,
    counters: Arc<Counters>,
}

impl BackgroundTaskRunner {
    /// Create an idle runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` in the background under the name `task`.
    ///
    /// The closure itself is invoked inside the spawned task, so a panic
    /// while building the future is contained too. The returned handle
    /// resolves to the outcome; dropping it detaches the task.
    pub fn spawn<F, Fut, E>(&self, task: impl Into<String>, work: F) -> JoinHandle<TaskOutcome>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let task = task.into();
        let counters = Arc::clone(&self.counters);
        self.tracker.spawn(async move {
            let result = AssertUnwindSafe(async move { work().await })
                .catch_unwind()
                .await;
            let outcome = match result {
                Ok(Ok(())) => TaskOutcome::Completed,
                Ok(Err(err)) => TaskOutcome::Faulted(TaskFault::Failed {
                    task: task.clone(),
                    message: err.to_string(),
                }),
                Err(payload) => TaskOutcome::Faulted(TaskFault::Panicked {
                    task: task.clone(),
                    message: panic_message(payload.as_ref()),
                }),
            };
            match &outcome {
                TaskOutcome::Completed => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(task = %task, "background task completed");
                }
                TaskOutcome::Faulted(fault) => {
                    counters.faulted.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(task = %task, error = %fault, "background task faulted");
                }
            }
            outcome
        })
    }

    /// Tasks enqueued and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Current counters.
    pub fn snapshot(&self) -> RunnerSnapshot {
        RunnerSnapshot {
            in_flight: self.tracker.len(),
            completed: self.counters.completed.load(Ordering::Relaxed),
            faulted: self.counters.faulted.load(Ordering::Relaxed),
        }
    }

    /// Wait up to `grace` for every in-flight task to finish.
    ///
    /// Tasks still running when the grace period ends are left to be
    /// dropped with the runtime.
    pub async fn drain(&self, grace: Duration) -> Result<(), DrainTimeout> {
        self.tracker.close();
        let waiting = self.tracker.len();
        if waiting > 0 {
            tracing::info!(in_flight = waiting, ?grace, "waiting for background tasks");
        }
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await;
        // Later spawns are still tracked.
        self.tracker.reopen();
        match drained {
            Ok(()) => Ok(()),
            Err(_) => Err(DrainTimeout {
                remaining: self.tracker.len(),
                grace,
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn completed_work_is_counted() {
        let runner = BackgroundTaskRunner::new();
        let outcome = runner
            .spawn("ok", || async { Ok::<_, String>(()) })
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Completed);
        let snap = runner.snapshot();
        assert_eq!((snap.in_flight, snap.completed, snap.faulted), (0, 1, 0));
    }

    #[tokio::test]
    async fn returned_error_is_contained() {
        let runner = BackgroundTaskRunner::new();
        let outcome = runner
            .spawn("mail", || async { Err::<(), _>("smtp refused") })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TaskOutcome::Faulted(TaskFault::Failed {
                task: "mail".into(),
                message: "smtp refused".into()
            })
        );
        assert_eq!(runner.snapshot().faulted, 1);
    }

    #[tokio::test]
    async fn panic_inside_future_is_contained() {
        let runner = BackgroundTaskRunner::new();
        let outcome = runner
            .spawn("boom", || async {
                if true {
                    panic!("kaboom");
                }
                Ok::<_, String>(())
            })
            .await
            .expect("panic must not escape the task");
        assert!(matches!(
            outcome,
            TaskOutcome::Faulted(TaskFault::Panicked { ref message, .. }) if message == "kaboom"
        ));
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    async fn panic_while_building_future_is_contained() {
        let runner = BackgroundTaskRunner::new();
        let outcome = runner
            .spawn("eager", || -> std::future::Ready<Result<(), String>> {
                panic!("before first poll {}", 42)
            })
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            TaskOutcome::Faulted(TaskFault::Panicked { ref message, .. }) if message == "before first poll 42"
        ));
    }

    #[tokio::test]
    async fn in_flight_tracks_running_work() {
        let runner = BackgroundTaskRunner::new();
        let (release, gate) = oneshot::channel::<()>();
        let handle = runner.spawn("held", move || async move {
            let _ = gate.await;
            Ok::<_, String>(())
        });
        assert_eq!(runner.in_flight(), 1);
        release.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_outstanding_work() {
        let runner = BackgroundTaskRunner::new();
        for i in 0..8u64 {
            runner.spawn(format!("job-{i}"), move || async move {
                tokio::time::sleep(Duration::from_millis(5 * i)).await;
                Ok::<_, String>(())
            });
        }
        runner.drain(Duration::from_secs(5)).await.unwrap();
        assert_eq!(runner.snapshot().completed, 8);
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_on_stuck_work() {
        let runner = BackgroundTaskRunner::new();
        runner.spawn("stuck", || async {
            std::future::pending::<()>().await;
            Ok::<_, String>(())
        });
        let err = runner.drain(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.remaining, 1);
        assert_eq!(err.grace, Duration::from_secs(5));
    }

    #[test]
    fn panic_message_handles_payload_kinds() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
