//! Fire-and-forget notifications for request lifecycle events.
//!
//! Workflow operations hand a [`RequestNotification`] to the [`NotificationDispatcher`], which
//! queues it on a bounded channel and returns immediately. A single worker task drains the
//! queue and calls the configured [`NotificationSender`]. Nothing on this path can fail the
//! operation that triggered it: full queues and sender errors are logged and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::request::MaterialRequest;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Created,
    Approved,
    Rejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestNotification {
    pub kind: NotificationKind,
    pub request: MaterialRequest,
    pub reason: Option<String>,
    pub correlation_id: String,
}

impl RequestNotification {
    pub fn new(
        kind: NotificationKind,
        request: MaterialRequest,
        correlation_id: impl Into<String>,
    ) -> Self {
        let reason = match kind {
            NotificationKind::Rejected => request.rejection_reason.clone(),
            NotificationKind::Created | NotificationKind::Approved => None,
        };
        Self { kind, request, reason, correlation_id: correlation_id.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification endpoint answered with status {0}")]
    Status(u16),
    #[error("notification payload could not be encoded: {0}")]
    Encode(String),
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &RequestNotification) -> Result<(), NotificationError>;
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    submitted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSnapshot {
    pub submitted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Dropped,
    Disabled,
}

#[derive(Clone, Debug)]
pub struct NotificationDispatcher {
    tx: Option<mpsc::Sender<RequestNotification>>,
    stats: Arc<DispatchStats>,
}

/// Receiving half of a dispatcher, drained by [`NotificationQueue::run`].
pub struct NotificationQueue {
    rx: mpsc::Receiver<RequestNotification>,
    stats: Arc<DispatchStats>,
}

impl NotificationDispatcher {
    pub fn channel(capacity: usize) -> (Self, NotificationQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(DispatchStats::default());
        (Self { tx: Some(tx), stats: stats.clone() }, NotificationQueue { rx, stats })
    }

    /// Starts the worker on the current tokio runtime. The worker exits once every dispatcher
    /// clone has been dropped and the queue is drained.
    pub fn spawn(sender: Arc<dyn NotificationSender>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (dispatcher, queue) = Self::channel(capacity);
        let handle = tokio::spawn(queue.run(sender));
        (dispatcher, handle)
    }

    pub fn disabled() -> Self {
        Self { tx: None, stats: Arc::new(DispatchStats::default()) }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    pub fn submit(&self, notification: RequestNotification) -> SubmitOutcome {
        let Some(tx) = &self.tx else {
            debug!(
                event_name = "notification.dispatch.disabled",
                correlation_id = %notification.correlation_id,
                request_id = %notification.request.id.0,
                "notifications disabled; skipping"
            );
            return SubmitOutcome::Disabled;
        };

        let kind = notification.kind;
        let correlation_id = notification.correlation_id.clone();
        let request_id = notification.request.id.0.clone();
        match tx.try_send(notification) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                SubmitOutcome::Queued
            }
            Err(error) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                let reason = match error {
                    mpsc::error::TrySendError::Full(_) => "queue_full",
                    mpsc::error::TrySendError::Closed(_) => "queue_closed",
                };
                warn!(
                    event_name = "notification.dispatch.dropped",
                    correlation_id = %correlation_id,
                    request_id = %request_id,
                    kind = kind.as_str(),
                    reason,
                    "notification dropped"
                );
                SubmitOutcome::Dropped
            }
        }
    }
}

impl NotificationQueue {
    pub async fn run(mut self, sender: Arc<dyn NotificationSender>) {
        info!(
            event_name = "notification.worker.start",
            sender = sender.name(),
            "notification worker started"
        );

        while let Some(notification) = self.rx.recv().await {
            match sender.send(&notification).await {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        event_name = "notification.dispatch.delivered",
                        correlation_id = %notification.correlation_id,
                        request_id = %notification.request.id.0,
                        kind = notification.kind.as_str(),
                        "notification delivered"
                    );
                }
                Err(error) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        event_name = "notification.dispatch.failed",
                        correlation_id = %notification.correlation_id,
                        request_id = %notification.request.id.0,
                        kind = notification.kind.as_str(),
                        sender = sender.name(),
                        error = %error,
                        "notification delivery failed"
                    );
                }
            }
        }

        info!(event_name = "notification.worker.stop", "notification worker stopped");
    }
}

/// Default sender: one structured log record per notification.
#[derive(Clone, Debug, Default)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, notification: &RequestNotification) -> Result<(), NotificationError> {
        info!(
            event_name = "notification.request",
            correlation_id = %notification.correlation_id,
            request_id = %notification.request.id.0,
            kind = notification.kind.as_str(),
            requester_id = %notification.request.requester_id.0,
            unit_id = %notification.request.unit_id.0,
            items = notification.request.items.len(),
            reason = notification.reason.as_deref().unwrap_or(""),
            "request notification"
        );
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryNotificationSender {
    sent: Arc<Mutex<Vec<RequestNotification>>>,
}

impl InMemoryNotificationSender {
    pub fn sent(&self) -> Vec<RequestNotification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationSender for InMemoryNotificationSender {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn send(&self, notification: &RequestNotification) -> Result<(), NotificationError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
        Ok(())
    }
}

/// Always fails. Used to prove that delivery problems stay out of the workflow.
#[derive(Clone, Debug, Default)]
pub struct FailingNotificationSender;

#[async_trait]
impl NotificationSender for FailingNotificationSender {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn send(&self, _notification: &RequestNotification) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp relay unreachable".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::{
        DispatchSnapshot, FailingNotificationSender, InMemoryNotificationSender,
        NotificationDispatcher, NotificationKind, RequestNotification, SubmitOutcome,
    };
    use crate::domain::material::MaterialId;
    use crate::domain::principal::UserId;
    use crate::domain::request::{MaterialRequest, NewLineItem, UnitId};

    fn notification(kind: NotificationKind) -> RequestNotification {
        let mut request = MaterialRequest::new(
            UserId("u-requester".to_owned()),
            UnitId("unit-a".to_owned()),
            None,
            vec![NewLineItem { material_id: MaterialId("7".to_owned()), quantity: 3 }],
            Utc::now(),
        )
        .expect("valid request");
        request.rejection_reason = Some("budget frozen".to_owned());
        RequestNotification::new(kind, request, "corr-1")
    }

    #[tokio::test]
    async fn worker_delivers_queued_notifications() {
        let sender = InMemoryNotificationSender::default();
        let (dispatcher, worker) = NotificationDispatcher::spawn(Arc::new(sender.clone()), 8);
        let stats = dispatcher.stats();

        assert_eq!(
            dispatcher.submit(notification(NotificationKind::Created)),
            SubmitOutcome::Queued
        );
        assert_eq!(
            dispatcher.submit(notification(NotificationKind::Rejected)),
            SubmitOutcome::Queued
        );
        drop(dispatcher);
        worker.await.expect("worker exits after senders drop");

        let sent = sender.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].reason, None);
        assert_eq!(sent[1].reason.as_deref(), Some("budget frozen"));
        assert_eq!(
            stats.snapshot(),
            DispatchSnapshot { submitted: 2, delivered: 2, failed: 0, dropped: 0 }
        );
    }

    #[tokio::test]
    async fn sender_failures_are_counted_not_raised() {
        let (dispatcher, worker) =
            NotificationDispatcher::spawn(Arc::new(FailingNotificationSender), 4);
        let stats = dispatcher.stats();

        assert_eq!(
            dispatcher.submit(notification(NotificationKind::Approved)),
            SubmitOutcome::Queued
        );
        drop(dispatcher);
        worker.await.expect("worker exits");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.delivered, 0);
    }

    #[test]
    fn full_or_closed_queue_drops_without_blocking() {
        let (dispatcher, queue) = NotificationDispatcher::channel(1);

        assert_eq!(
            dispatcher.submit(notification(NotificationKind::Created)),
            SubmitOutcome::Queued
        );
        assert_eq!(
            dispatcher.submit(notification(NotificationKind::Created)),
            SubmitOutcome::Dropped
        );

        drop(queue);
        assert_eq!(
            dispatcher.submit(notification(NotificationKind::Approved)),
            SubmitOutcome::Dropped
        );
        assert_eq!(
            dispatcher.stats().snapshot(),
            DispatchSnapshot { submitted: 1, delivered: 0, failed: 0, dropped: 2 }
        );
    }

    #[test]
    fn disabled_dispatcher_skips_silently() {
        let dispatcher = NotificationDispatcher::disabled();

        assert!(!dispatcher.is_enabled());
        assert_eq!(
            dispatcher.submit(notification(NotificationKind::Created)),
            SubmitOutcome::Disabled
        );
        assert_eq!(dispatcher.stats().snapshot(), DispatchSnapshot::default());
    }
}
