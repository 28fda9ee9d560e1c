//! Error taxonomy (§7): category + retryability, shared by every crate so
//! the retry policy and worker pool can classify a failure without
//! matching on transport-specific variants.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Validation,
    Network,
    Timeout,
    RateLimit,
    Auth,
    Platform,
    Internal,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::RateLimit
        )
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("config error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("platform error ({platform}, code {code:?}): {message}")]
    Platform {
        platform: String,
        code: Option<u16>,
        message: String,
        retryable: bool,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl NotifyError {
    pub fn validation(message: impl Into<String>) -> Self {
        NotifyError::Validation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        NotifyError::Config(message.into())
    }

    pub fn platform(platform: impl Into<String>, code: Option<u16>, message: impl Into<String>, retryable: bool) -> Self {
        NotifyError::Platform {
            platform: platform.into(),
            code,
            message: message.into(),
            retryable,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            NotifyError::Config(_) => ErrorCategory::Config,
            NotifyError::Validation(_) => ErrorCategory::Validation,
            NotifyError::Network(_) => ErrorCategory::Network,
            NotifyError::Timeout(_) => ErrorCategory::Timeout,
            NotifyError::RateLimit(_) => ErrorCategory::RateLimit,
            NotifyError::Auth(_) => ErrorCategory::Auth,
            NotifyError::Platform { .. } => ErrorCategory::Platform,
            NotifyError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// §7 propagation policy: category dictates retryability, except
    /// `Platform` errors which carry their own classification from the
    /// transport (e.g. invalid recipient vs. webhook temporarily disabled).
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Platform { retryable, .. } => *retryable,
            other => other.category().is_retryable(),
        }
    }

    /// Short remediation hint appended to the user-visible failure message
    /// (§7): category, platform, response code where known.
    pub fn remediation_hint(&self) -> String {
        match self {
            NotifyError::Config(_) => "check transport configuration (url, credentials)".to_string(),
            NotifyError::Validation(_) => "fix the message/target before resending".to_string(),
            NotifyError::Network(_) | NotifyError::Timeout(_) => "will be retried automatically".to_string(),
            NotifyError::RateLimit(_) => "backing off until the rate limit window refills".to_string(),
            NotifyError::Auth(_) => "check credentials/signing secret for this transport".to_string(),
            NotifyError::Platform { retryable, .. } => if *retryable {
                "transient platform rejection, will be retried".to_string()
            } else {
                "platform rejected the request; will not be retried".to_string()
            },
            NotifyError::Internal(_) => "unexpected internal error, please report".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_not_retryable() {
        assert!(!NotifyError::config("bad url").is_retryable());
    }

    #[test]
    fn network_errors_are_retryable() {
        assert!(NotifyError::Network("connection refused".into()).is_retryable());
    }

    #[test]
    fn platform_error_honors_explicit_flag() {
        let retryable = NotifyError::platform("chat", Some(500), "server error", true);
        let terminal = NotifyError::platform("chat", Some(400), "bad payload", false);
        assert!(retryable.is_retryable());
        assert!(!terminal.is_retryable());
    }
}
