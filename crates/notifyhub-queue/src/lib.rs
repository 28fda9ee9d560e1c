//! Queue + worker pool (§4.7) and scheduler (§4.6) for delayed delivery.
//!
//! The `Queue` trait is the pluggable surface; `InMemoryQueue` is the
//! reference implementation the spec calls for (§1: persistent/distributed
//! back-ends are an external collaborator left unspecified beyond this
//! trait). A worker pool lives in `notifyhub-core`, which drives `Queue`
//! through this trait rather than depending on `InMemoryQueue` directly.

pub mod error;
pub mod memory;
pub mod scheduler;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifyhub_common::Message;

pub use error::QueueError;
pub use memory::{EnqueueOptions, InMemoryQueue, QueueConfig, QueueEntry};
pub use scheduler::{ScheduleId, Scheduler};

pub type Result<T> = std::result::Result<T, QueueError>;

/// The queue contract (§4.7): `enqueue`/`dequeue`/`ack`/`nack`. Implemented
/// here by `InMemoryQueue`; an external back-end (Redis, SQS, …) would
/// implement the same trait without the dispatch orchestrator caring which
/// one it's talking to.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, message: Message, opts: EnqueueOptions) -> Result<String>;
    async fn dequeue(&self) -> Result<QueueEntry>;
    async fn ack(&self, task_id: &str) -> Result<()>;
    async fn nack(
        &self,
        task_id: &str,
        next_due_at: DateTime<Utc>,
        narrowed_message: Option<Message>,
    ) -> Result<()>;
    fn depth(&self) -> usize;
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(&self, message: Message, opts: EnqueueOptions) -> Result<String> {
        InMemoryQueue::enqueue(self, message, opts).await
    }

    async fn dequeue(&self) -> Result<QueueEntry> {
        InMemoryQueue::dequeue(self).await
    }

    async fn ack(&self, task_id: &str) -> Result<()> {
        InMemoryQueue::ack(self, task_id)
    }

    async fn nack(
        &self,
        task_id: &str,
        next_due_at: DateTime<Utc>,
        narrowed_message: Option<Message>,
    ) -> Result<()> {
        InMemoryQueue::nack(self, task_id, next_due_at, narrowed_message).await
    }

    fn depth(&self) -> usize {
        InMemoryQueue::depth(self)
    }
}
