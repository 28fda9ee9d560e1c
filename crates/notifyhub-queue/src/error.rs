use notifyhub_common::NotifyError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("queue is full (capacity {capacity}), enqueue timed out after {timeout_ms}ms")]
    Full { capacity: usize, timeout_ms: u64 },

    #[error("unknown task id: {0}")]
    UnknownTask(String),

    #[error("queue is shut down")]
    ShutDown,
}

impl From<QueueError> for NotifyError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Full { .. } => NotifyError::Internal(e.to_string()),
            QueueError::UnknownTask(_) => NotifyError::Internal(e.to_string()),
            QueueError::ShutDown => NotifyError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
