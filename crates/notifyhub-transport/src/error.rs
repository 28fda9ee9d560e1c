use notifyhub_common::NotifyError;
use thiserror::Error;

/// Transport-local error taxonomy. Every variant carries enough to be
/// folded into `NotifyError` (§7) without the caller re-deriving category
/// or retryability from a string.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("config error: {0}")]
    Config(String),

    #[error("request validation failed: {0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("rate limited by remote: {0}")]
    RateLimit(String),

    #[error("auth rejected: {0}")]
    Auth(String),

    #[error("platform rejected (code {code:?}): {message}")]
    Platform {
        code: Option<u16>,
        message: String,
        retryable: bool,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("internal transport error: {0}")]
    Internal(String),
}

impl TransportError {
    pub fn into_notify_error(self, platform: &str) -> NotifyError {
        match self {
            TransportError::Config(m) => NotifyError::Config(m),
            TransportError::Validation(m) => NotifyError::Validation(m),
            TransportError::Network(m) => NotifyError::Network(m),
            TransportError::Timeout(d) => NotifyError::Timeout(format!("{:?}", d)),
            TransportError::RateLimit(m) => NotifyError::RateLimit(m),
            TransportError::Auth(m) => NotifyError::Auth(m),
            TransportError::Platform {
                code,
                message,
                retryable,
            } => NotifyError::platform(platform, code, message, retryable),
            TransportError::Cancelled => NotifyError::Internal("cancelled".to_string()),
            TransportError::Internal(m) => NotifyError::Internal(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
