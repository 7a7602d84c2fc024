//! # Outbound Notifications
//!
//! [`Notifier`] is the delivery capability (mail, queue, whatever the
//! deployment wires in). Deliveries are only ever made from background
//! tasks: [`BackgroundTaskRunner::notify`] enqueues one with a bounded,
//! fixed-backoff retry. After the last attempt fails the notification is
//! logged and dropped. Nothing is persisted for a later retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::background::{BackgroundTaskRunner, TaskOutcome};

/// Delivery failure reported by a [`Notifier`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The transport refused or failed the delivery.
    #[error("delivery to {recipient} failed: {reason}")]
    Delivery {
        /// Intended recipient.
        recipient: String,
        /// Transport-specific reason.
        reason: String,
    },

    /// The template could not be rendered with the given data.
    #[error("template `{template}` could not be rendered: {reason}")]
    Template {
        /// Template identifier.
        template: String,
        /// Rendering failure.
        reason: String,
    },
}

/// A message to deliver.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Destination address.
    pub recipient: String,
    /// Template identifier, e.g. `token_password_reset.tmpl`.
    pub template: String,
    /// Values the template is rendered with.
    pub data: Map<String, Value>,
}

impl Notification {
    /// Notification with no template data.
    pub fn new(recipient: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            template: template.into(),
            data: Map::new(),
        }
    }

    /// Add one template value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Delivery capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `notification` once.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes deliveries to the log instead of sending them.
///
/// Template data is not logged; it may hold one-time tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let keys: Vec<&str> = notification.data.keys().map(String::as_str).collect();
        tracing::info!(
            recipient = %notification.recipient,
            template = %notification.template,
            data_keys = ?keys,
            "notification delivered to log"
        );
        Ok(())
    }
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause after each failed attempt except the last.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Deliver with retry. Returns the last error once attempts are exhausted.
pub async fn send_with_retry(
    notifier: &dyn Notifier,
    notification: &Notification,
    policy: RetryPolicy,
) -> Result<(), NotifyError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match notifier.send(notification).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                tracing::warn!(
                    attempt,
                    max_attempts = attempts,
                    template = %notification.template,
                    error = %err,
                    "notification delivery failed, retrying in {:?}",
                    policy.backoff
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
        }
    }
}

impl BackgroundTaskRunner {
    /// Enqueue a retried delivery of `notification` as a background task.
    pub fn notify(
        &self,
        notifier: Arc<dyn Notifier>,
        notification: Notification,
        policy: RetryPolicy,
    ) -> JoinHandle<TaskOutcome> {
        let task = format!("notify:{}", notification.template);
        self.spawn(task, move || async move {
            send_with_retry(notifier.as_ref(), &notification, policy).await
        })
    }
}
