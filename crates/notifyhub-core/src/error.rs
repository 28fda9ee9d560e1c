//! Orchestration-level error taxonomy: wraps the lower crates' errors and
//! adds the handful of failures that only make sense at the Hub's altitude
//! (construction with zero transports, queue-full, total fan-out failure).

use notifyhub_common::{DeliveryResult, NotifyError};
use notifyhub_queue::QueueError;
use notifyhub_transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("hub configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// §4.8.3: "returns non-nil error only when every transport produced
    /// zero successful Results". Carries the (all-failed) per-target
    /// results alongside the error so a caller that wants them doesn't
    /// have to re-derive them.
    #[error("all {attempted} target(s) failed for message {message_id}")]
    AllTargetsFailed {
        message_id: String,
        attempted: usize,
        results: Vec<DeliveryResult>,
    },

    /// §4.4: "if any bucket is empty the send fails fast with RateLimit
    /// error (not retried locally)" — raised before any transport is
    /// invoked, so there are no partial results to report.
    #[error("rate limit exceeded for platform '{platform}'")]
    RateLimited { platform: String },
}

impl From<HubError> for NotifyError {
    fn from(e: HubError) -> Self {
        match e {
            HubError::Config(m) => NotifyError::Config(m),
            HubError::Notify(inner) => inner,
            HubError::Transport(inner) => inner.into_notify_error("unknown"),
            HubError::Queue(inner) => inner.into(),
            HubError::AllTargetsFailed { message_id, attempted, .. } => NotifyError::Internal(format!(
                "all {attempted} target(s) failed for message {message_id}"
            )),
            HubError::RateLimited { platform } => {
                NotifyError::RateLimit(format!("rate limit exceeded for platform '{platform}'"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
