//! Worker pool (§4.7): a fixed-size set of background tasks draining the
//! queue and driving each entry through [`Hub::dispatch_once`], narrowing
//! and re-enqueueing the targets that still need another attempt.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use notifyhub_common::{DeliveryResult, DeliveryStatus, Message, SendOptions, Target};
use notifyhub_queue::QueueEntry;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::HubError;
use crate::events::{EventCategory, EventSeverity};
use crate::hub::Hub;

/// Running worker handles plus the per-task `SendOptions` a `send_async`
/// call stashes before enqueueing. `QueueEntry` itself only carries
/// `{task_id, message, attempt}` (§4.7) — the options a caller passed for
/// this particular send live here, keyed by task id, and are dropped once
/// the task reaches a terminal outcome.
pub struct WorkerPool {
    handles: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) task_options: DashMap<String, SendOptions>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            task_options: DashMap::new(),
        }
    }

    /// Spawn `count` workers pulling from `hub.queue` until `cancel` fires
    /// or the queue is shut down.
    pub fn spawn(&self, hub: Arc<Hub>, count: usize, cancel: CancellationToken) {
        let mut handles = self.handles.lock();
        for _ in 0..count {
            let hub = hub.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(run_worker(hub, cancel)));
        }
    }

    /// Hand over every spawned worker's `JoinHandle`, leaving none behind —
    /// used once, by `Hub::shutdown`, to hand them to the
    /// `ShutdownCoordinator`.
    pub fn take_handles(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.handles.lock())
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(hub: Arc<Hub>, cancel: CancellationToken) {
    loop {
        let entry = tokio::select! {
            _ = cancel.cancelled() => return,
            result = hub.queue.dequeue() => match result {
                Ok(entry) => entry,
                Err(_) => return,
            },
        };
        hub.metrics.record_dequeued();
        handle_entry(&hub, entry).await;
    }
}

async fn handle_entry(hub: &Arc<Hub>, entry: QueueEntry) {
    let opts = hub
        .pool
        .task_options
        .get(&entry.task_id)
        .map(|o| o.value().clone())
        .unwrap_or_default();

    match hub.dispatch_once(entry.message.clone(), &opts).await {
        Ok(results) => settle(hub, &entry, &opts, results).await,
        Err(HubError::AllTargetsFailed { results, .. }) => settle(hub, &entry, &opts, results).await,
        Err(HubError::RateLimited { platform }) => defer_rate_limited(hub, &entry, &platform).await,
        Err(err) => {
            tracing::error!(
                task_id = %entry.task_id,
                error = %err,
                "dispatch_once returned an error with no per-target results to narrow against"
            );
            finish(hub, &entry.task_id).await;
        }
    }
}

/// Decide whether any target still needs another attempt and either
/// re-enqueue a narrowed retry or close the task out.
async fn settle(hub: &Arc<Hub>, entry: &QueueEntry, opts: &SendOptions, results: Vec<DeliveryResult>) {
    let retry_policy = hub.pick_retry_policy(opts);
    match narrow_message(&entry.message, &results) {
        Some(narrowed) if entry.attempt < retry_policy.max_attempts => {
            for target in &narrowed.targets {
                hub.metrics.record_retried(target.resolved_platform());
            }
            let delay = retry_policy.next_backoff(entry.attempt);
            let due_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            if hub.queue.nack(&entry.task_id, due_at, Some(narrowed)).await.is_err() {
                tracing::warn!(task_id = %entry.task_id, "retry requeue failed; task was no longer in flight");
            }
        }
        Some(_) => {
            tracing::warn!(task_id = %entry.task_id, attempt = entry.attempt, "retries exhausted; dropping remaining targets");
            hub.events.record(
                EventCategory::Retry,
                EventSeverity::Error,
                format!("retries exhausted for task '{}' after {} attempt(s)", entry.task_id, entry.attempt),
                None,
            );
            finish(hub, &entry.task_id).await;
        }
        None => finish(hub, &entry.task_id).await,
    }
}

/// A fail-fast rate-limit rejection happens before any transport is
/// called, so the whole message (not a narrowed subset) is requeued after
/// the bucket's refill window (§7: "floor delay = bucket refill period").
async fn defer_rate_limited(hub: &Arc<Hub>, entry: &QueueEntry, platform: &str) {
    let delay = hub.rate_limiter.window_for(platform).unwrap_or(Duration::from_secs(1));
    let due_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
    if hub.queue.nack(&entry.task_id, due_at, None).await.is_err() {
        tracing::warn!(task_id = %entry.task_id, "failed to requeue a rate-limited task");
    }
}

async fn finish(hub: &Arc<Hub>, task_id: &str) {
    let _ = hub.queue.ack(task_id);
    hub.pool.task_options.remove(task_id);
}

/// The subset of `message`'s targets whose delivery result was marked
/// `Retrying` — successes and terminal failures are dropped, so a retry
/// never re-invokes a transport for a target that already settled (§8
/// testable property 3).
fn narrow_message(message: &Message, results: &[DeliveryResult]) -> Option<Message> {
    let retry_targets: Vec<Target> = results
        .iter()
        .filter(|r| r.status == DeliveryStatus::Retrying)
        .map(|r| r.target.clone())
        .collect();
    if retry_targets.is_empty() {
        return None;
    }
    let mut narrowed = message.clone();
    narrowed.targets = retry_targets;
    Some(narrowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyhub_common::TargetType;

    fn result(status: DeliveryStatus, platform: &str) -> DeliveryResult {
        DeliveryResult {
            message_id: "m1".to_string(),
            target: Target::new(TargetType::Channel, "c1", platform),
            platform: platform.to_string(),
            success: status == DeliveryStatus::Sent,
            error: None,
            status,
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            response: None,
        }
    }

    #[test]
    fn narrow_message_is_none_when_nothing_is_retrying() {
        let message = Message::new("t", "b").with_target(Target::new(TargetType::Channel, "c1", "chat"));
        let results = vec![result(DeliveryStatus::Sent, "chat")];
        assert!(narrow_message(&message, &results).is_none());
    }

    #[test]
    fn narrow_message_keeps_only_retrying_targets() {
        let message = Message::new("t", "b")
            .with_target(Target::new(TargetType::Channel, "c1", "chat"))
            .with_target(Target::new(TargetType::Channel, "c2", "sms"));
        let results = vec![
            result(DeliveryStatus::Sent, "chat"),
            result(DeliveryStatus::Retrying, "sms"),
        ];
        let narrowed = narrow_message(&message, &results).unwrap();
        assert_eq!(narrowed.targets.len(), 1);
        assert_eq!(narrowed.targets[0].platform, "sms");
    }
}
