//! Bounded in-memory FIFO queue (§4.7): the reference `Queue` implementation.
//! A full queue blocks `enqueue` up to `opts.enqueue_timeout`; delayed
//! messages (`due_at() > now`) are handed to a [`Scheduler`] instead of the
//! channel directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notifyhub_common::Message;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::error::{QueueError, Result};
use crate::scheduler::Scheduler;

/// One trip through the queue for a `(message, target-set)` pair. `attempt`
/// is 1 on first delivery and increments each time `nack` re-enqueues it.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub task_id: String,
    pub message: Message,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct EnqueueOptions {
    pub enqueue_timeout: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            enqueue_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub capacity: usize,
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            workers: 4,
        }
    }
}

/// The reference `Queue`: a bounded channel plus a delayed-delivery
/// scheduler and an in-flight table backing `ack`/`nack`.
pub struct InMemoryQueue {
    capacity: usize,
    sender: mpsc::Sender<QueueEntry>,
    receiver: AsyncMutex<mpsc::Receiver<QueueEntry>>,
    inflight: Mutex<HashMap<String, QueueEntry>>,
    scheduler: Arc<Scheduler<QueueEntry>>,
    scheduler_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    enqueued_total: AtomicU64,
    dequeued_total: AtomicU64,
    acked_total: AtomicU64,
    nacked_total: AtomicU64,
}

impl InMemoryQueue {
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let scheduler = Scheduler::new();

        let queue = Arc::new(Self {
            capacity: config.capacity,
            sender,
            receiver: AsyncMutex::new(receiver),
            inflight: Mutex::new(HashMap::new()),
            scheduler,
            scheduler_task: Mutex::new(None),
            enqueued_total: AtomicU64::new(0),
            dequeued_total: AtomicU64::new(0),
            acked_total: AtomicU64::new(0),
            nacked_total: AtomicU64::new(0),
        });

        let dispatch_sender = queue.sender.clone();
        let scheduler = queue.scheduler.clone();
        let task = tokio::spawn(async move {
            scheduler
                .run(|entry| {
                    let tx = dispatch_sender.clone();
                    tokio::spawn(async move {
                        if tx.send(entry).await.is_err() {
                            tracing::warn!("scheduler dispatch dropped: queue receiver closed");
                        }
                    });
                })
                .await;
        });
        *queue.scheduler_task.lock() = Some(task);

        queue
    }

    /// `true` once the message's `due_at()` has passed and it can move
    /// straight into the FIFO channel instead of the scheduler.
    fn is_due_now(message: &Message) -> bool {
        message.due_at() <= Utc::now()
    }

    /// Enqueue a freshly-submitted message (§3 invariant: `delay > 0`
    /// messages are not handed to a worker before `createdAt + delay`).
    pub async fn enqueue(&self, message: Message, opts: EnqueueOptions) -> Result<String> {
        let task_id = notifyhub_common_task_id(&message);
        let entry = QueueEntry {
            task_id: task_id.clone(),
            message: message.clone(),
            attempt: 1,
        };

        if Self::is_due_now(&message) {
            self.send_with_timeout(entry, opts.enqueue_timeout).await?;
        } else {
            self.scheduler.schedule(entry, message.due_at());
        }

        self.enqueued_total.fetch_add(1, Ordering::Relaxed);
        Ok(task_id)
    }

    async fn send_with_timeout(&self, entry: QueueEntry, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.sender.send(entry)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(QueueError::ShutDown),
            Err(_) => Err(QueueError::Full {
                capacity: self.capacity,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Pull the next ready entry, recording it in-flight so a later
    /// `ack`/`nack` can find it. Blocks until an entry is available or the
    /// queue is shut down.
    pub async fn dequeue(&self) -> Result<QueueEntry> {
        let mut receiver = self.receiver.lock().await;
        let entry = receiver.recv().await.ok_or(QueueError::ShutDown)?;
        self.dequeued_total.fetch_add(1, Ordering::Relaxed);
        self.inflight
            .lock()
            .insert(entry.task_id.clone(), entry.clone());
        Ok(entry)
    }

    /// Mark a dequeued entry delivered. Drops its in-flight record.
    pub fn ack(&self, task_id: &str) -> Result<()> {
        self.inflight
            .lock()
            .remove(task_id)
            .ok_or_else(|| QueueError::UnknownTask(task_id.to_string()))?;
        self.acked_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Re-enqueue a failed in-flight entry for another attempt at
    /// `next_due_at`, bumping its attempt counter. Returns
    /// `QueueError::UnknownTask` if the entry isn't in flight (already
    /// acked, or never dequeued). `narrowed_message`, when given, replaces
    /// the entry's message before redelivery — the worker pool uses this to
    /// shrink the target list to only the targets that actually need
    /// another attempt, so a retry never re-invokes a transport for a
    /// target that already succeeded (§8 testable property 3).
    pub async fn nack(
        &self,
        task_id: &str,
        next_due_at: DateTime<Utc>,
        narrowed_message: Option<Message>,
    ) -> Result<()> {
        let mut entry = self
            .inflight
            .lock()
            .remove(task_id)
            .ok_or_else(|| QueueError::UnknownTask(task_id.to_string()))?;
        entry.attempt += 1;
        if let Some(message) = narrowed_message {
            entry.message = message;
        }
        self.nacked_total.fetch_add(1, Ordering::Relaxed);

        if next_due_at <= Utc::now() {
            self.send_with_timeout(entry, Duration::from_secs(5)).await
        } else {
            self.scheduler.schedule(entry, next_due_at);
            Ok(())
        }
    }

    /// Approximate count of messages waiting to be dequeued plus those held
    /// by the scheduler for future delivery — the `queued_depth` gauge
    /// (§6).
    pub fn depth(&self) -> usize {
        let buffered = self.capacity.saturating_sub(self.sender.capacity());
        buffered + self.scheduler.len()
    }

    pub fn enqueued_total(&self) -> u64 {
        self.enqueued_total.load(Ordering::Relaxed)
    }

    pub fn dequeued_total(&self) -> u64 {
        self.dequeued_total.load(Ordering::Relaxed)
    }

    pub fn acked_total(&self) -> u64 {
        self.acked_total.load(Ordering::Relaxed)
    }

    pub fn nacked_total(&self) -> u64 {
        self.nacked_total.load(Ordering::Relaxed)
    }

    /// Stop the scheduler dispatcher and hand back everything still pending
    /// delivery (in the scheduler and not yet in the channel). The caller
    /// decides whether to persist or discard — the in-memory reference has
    /// no durability of its own (§9 open question (a)).
    pub async fn shutdown(&self) -> Vec<(Message, DateTime<Utc>)> {
        self.scheduler.shutdown();
        if let Some(task) = self.scheduler_task.lock().take() {
            let _ = task.await;
        }
        self.scheduler
            .drain()
            .into_iter()
            .map(|(entry, due_at)| (entry.message, due_at))
            .collect()
    }
}

fn notifyhub_common_task_id(message: &Message) -> String {
    format!("{}-{}", message.id, uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyhub_common::{Target, TargetType};

    fn message() -> Message {
        Message::new("t", "b").with_target(Target::new(TargetType::Channel, "c1", "chat"))
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_roundtrips() {
        let queue = InMemoryQueue::new(QueueConfig::default());
        let task_id = queue
            .enqueue(message(), EnqueueOptions::default())
            .await
            .unwrap();

        let entry = queue.dequeue().await.unwrap();
        assert_eq!(entry.task_id, task_id);
        assert_eq!(entry.attempt, 1);

        queue.ack(&task_id).unwrap();
        assert_eq!(queue.acked_total(), 1);
    }

    #[tokio::test]
    async fn nack_increments_attempt_and_redelivers_immediately() {
        let queue = InMemoryQueue::new(QueueConfig::default());
        let task_id = queue
            .enqueue(message(), EnqueueOptions::default())
            .await
            .unwrap();
        let entry = queue.dequeue().await.unwrap();
        assert_eq!(entry.attempt, 1);

        queue.nack(&task_id, Utc::now(), None).await.unwrap();
        let redelivered = queue.dequeue().await.unwrap();
        assert_eq!(redelivered.attempt, 2);
        assert_eq!(redelivered.task_id, task_id);
    }

    #[tokio::test]
    async fn delayed_message_is_not_dequeued_before_due_at() {
        let queue = InMemoryQueue::new(QueueConfig::default());
        let mut msg = message();
        msg.delay = Some(Duration::from_millis(60));
        let created_at = msg.created_at;

        queue.enqueue(msg, EnqueueOptions::default()).await.unwrap();

        let entry = tokio::time::timeout(Duration::from_secs(1), queue.dequeue())
            .await
            .unwrap()
            .unwrap();
        assert!(entry.message.due_at() >= created_at);
        assert!(Utc::now() >= entry.message.due_at() - chrono::Duration::milliseconds(20));
    }

    #[tokio::test]
    async fn full_queue_times_out_enqueue() {
        let queue = InMemoryQueue::new(QueueConfig {
            capacity: 1,
            workers: 1,
        });
        queue
            .enqueue(
                message(),
                EnqueueOptions {
                    enqueue_timeout: Duration::from_millis(50),
                },
            )
            .await
            .unwrap();

        let result = queue
            .enqueue(
                message(),
                EnqueueOptions {
                    enqueue_timeout: Duration::from_millis(20),
                },
            )
            .await;
        assert!(matches!(result, Err(QueueError::Full { .. })));
    }

    #[tokio::test]
    async fn ack_of_unknown_task_errors() {
        let queue = InMemoryQueue::new(QueueConfig::default());
        assert!(queue.ack("missing").is_err());
    }
}
