//! Core data model and error taxonomy shared by every NotifyHub crate.
//!
//! This mirrors the role `fc_common` plays in FlowCatalyst: a single
//! dependency-light crate that defines the wire/value types so routing,
//! templating, transports, the queue and the dispatch orchestrator can all
//! agree on them without depending on each other.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod logging;

pub use error::{ErrorCategory, NotifyError, Result};

// ============================================================================
// Message
// ============================================================================

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_BODY_LEN: usize = 5_000;
pub const MAX_TARGETS: usize = 100;

/// Rendering/content format of a message. Transports advertise which of
/// these they accept via `Transport::supports`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    Text,
    Markdown,
    Html,
    Card,
}

impl Default for MessageFormat {
    fn default() -> Self {
        MessageFormat::Text
    }
}

/// The unit of notification intent, independent of channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub format: MessageFormat,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub targets: Vec<Target>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub template: Option<String>,
    /// Non-negative delay before the message is eligible for delivery.
    #[serde(default, with = "duration_millis_opt")]
    pub delay: Option<Duration>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub card_data: Option<serde_json::Value>,
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_priority() -> u8 {
    3
}

mod duration_millis_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> std::result::Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&d.as_millis()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Duration>, D::Error> {
        let ms: Option<u64> = Option::deserialize(d)?;
        Ok(ms.map(Duration::from_millis))
    }
}

impl Message {
    /// Build a minimal, valid message. Timestamps and id are generated.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            title: title.into(),
            body: body.into(),
            format: MessageFormat::Text,
            priority: default_priority(),
            targets: Vec::new(),
            variables: HashMap::new(),
            metadata: HashMap::new(),
            template: None,
            delay: None,
            created_at: Utc::now(),
            card_data: None,
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Ingestion-time validation: empty title+body, missing targets, size
    /// caps, embedded NULs, malformed emails, target-count bound, priority
    /// range. Transports may tighten further (§4.3).
    pub fn validate(&self) -> Result<()> {
        if self.title.is_empty() && self.body.is_empty() {
            return Err(NotifyError::validation("title and body are both empty"));
        }
        if self.title.contains('\0') || self.body.contains('\0') {
            return Err(NotifyError::validation("title/body must not contain NUL bytes"));
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(NotifyError::validation(format!(
                "title exceeds {} characters",
                MAX_TITLE_LEN
            )));
        }
        if self.body.chars().count() > MAX_BODY_LEN {
            return Err(NotifyError::validation(format!(
                "body exceeds {} characters",
                MAX_BODY_LEN
            )));
        }
        if self.targets.is_empty() {
            return Err(NotifyError::validation("message has no targets"));
        }
        if self.targets.len() > MAX_TARGETS {
            return Err(NotifyError::validation(format!(
                "message has {} targets, max is {}",
                self.targets.len(),
                MAX_TARGETS
            )));
        }
        if !(1..=5).contains(&self.priority) {
            return Err(NotifyError::validation(format!(
                "priority {} out of range 1-5",
                self.priority
            )));
        }
        for target in &self.targets {
            target.validate()?;
        }
        Ok(())
    }

    /// `createdAt + delay`, or `created_at` if there is no delay.
    pub fn due_at(&self) -> DateTime<Utc> {
        match self.delay {
            Some(d) => self.created_at + chrono::Duration::from_std(d).unwrap_or_default(),
            None => self.created_at,
        }
    }
}

// ============================================================================
// Target
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Email,
    User,
    Group,
    Channel,
    Webhook,
    Sms,
    Other,
}

/// A concrete recipient on a specific platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub value: String,
    #[serde(default)]
    pub platform: String,
}

impl Target {
    pub fn new(target_type: TargetType, value: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            target_type,
            value: value.into(),
            platform: platform.into(),
        }
    }

    /// Resolved platform name: empty is only legal for `type=email`, where
    /// it defaults to `"email"`.
    pub fn resolved_platform(&self) -> &str {
        if self.platform.is_empty() {
            "email"
        } else {
            &self.platform
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.value.is_empty() {
            return Err(NotifyError::validation("target value must not be empty"));
        }
        if self.platform.is_empty() && self.target_type != TargetType::Email {
            return Err(NotifyError::validation(
                "empty platform is only allowed for email targets",
            ));
        }
        if self.target_type == TargetType::Email && !self.value.contains('@') {
            return Err(NotifyError::validation(format!(
                "malformed email address: {}",
                self.value
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Delivery result & state machine
// ============================================================================

/// Per-`(message, target)` attempt state (§4.8.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Retrying,
    Cancelled,
}

/// Per-target delivery outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub message_id: String,
    pub target: Target,
    pub platform: String,
    pub success: bool,
    pub error: Option<String>,
    pub status: DeliveryStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

impl DeliveryResult {
    pub fn pending(message_id: impl Into<String>, target: Target, platform: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            target,
            platform: platform.into(),
            success: false,
            error: None,
            status: DeliveryStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            response: None,
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    pub fn mark_sent(mut self, response: Option<serde_json::Value>) -> Self {
        self.success = true;
        self.status = DeliveryStatus::Sent;
        self.end_time = Some(Utc::now());
        self.response = response;
        self
    }

    pub fn mark_failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.status = DeliveryStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error = Some(error.into());
        self
    }

    pub fn mark_retrying(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.status = DeliveryStatus::Retrying;
        self.end_time = Some(Utc::now());
        self.error = Some(error.into());
        self
    }

    pub fn mark_cancelled(mut self) -> Self {
        self.success = false;
        self.status = DeliveryStatus::Cancelled;
        self.end_time = Some(Utc::now());
        self
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Bounded-attempt backoff schedule (§4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Default profile: exponential, 3 attempts, 1s base, 30s cap, 5s jitter.
    pub fn default_profile() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            max_jitter: Duration::from_secs(5),
        }
    }

    /// Aggressive profile for urgent messages: shorter base/cap, 2s jitter.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            max_jitter: Duration::from_secs(2),
        }
    }

    /// Linear profile: fixed step plus jitter, no exponential growth.
    pub fn linear(step: Duration, max_attempts: u32, max_jitter: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: step,
            max_backoff: step,
            multiplier: 1.0,
            max_jitter,
        }
    }

    /// `min(initial * multiplier^(attempt-1), max) + uniform(0, max_jitter)`.
    /// `attempt` is 1-based (the backoff *before* the next attempt).
    pub fn next_backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_backoff.as_secs_f64()).max(0.0);
        let jitter = if self.max_jitter.is_zero() {
            0.0
        } else {
            rand::random::<f64>() * self.max_jitter.as_secs_f64()
        };
        Duration::from_secs_f64(capped + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_profile()
    }
}

// ============================================================================
// Ambient configuration values shared across crates
// ============================================================================

/// Options accepted by `Hub::send` / `Hub::send_async` (§4.8, §6).
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub r#async: bool,
    pub concurrency: Option<usize>,
    pub timeout: Duration,
    pub enqueue_timeout: Duration,
    pub retry_policy: Option<RetryPolicy>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            r#async: false,
            concurrency: None,
            timeout: Duration::from_secs(30),
            enqueue_timeout: Duration::from_secs(5),
            retry_policy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_message() {
        let msg = Message::new("", "").with_target(Target::new(TargetType::Channel, "c1", "chat"));
        assert!(msg.validate().is_err());
    }

    #[test]
    fn rejects_message_without_targets() {
        let msg = Message::new("hi", "there");
        assert!(msg.validate().is_err());
    }

    #[test]
    fn email_target_defaults_platform() {
        let t = Target::new(TargetType::Email, "a@b.com", "");
        assert_eq!(t.resolved_platform(), "email");
        assert!(t.validate().is_ok());
    }

    #[test]
    fn non_email_target_requires_platform() {
        let t = Target::new(TargetType::Channel, "c1", "");
        assert!(t.validate().is_err());
    }

    #[test]
    fn backoff_is_capped_and_monotonic_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            max_jitter: Duration::ZERO,
        };
        assert_eq!(policy.next_backoff(1), Duration::from_secs(1));
        assert_eq!(policy.next_backoff(2), Duration::from_secs(2));
        assert_eq!(policy.next_backoff(3), Duration::from_secs(4));
        assert_eq!(policy.next_backoff(4), Duration::from_secs(8));
        assert_eq!(policy.next_backoff(5), Duration::from_secs(10)); // capped
    }
}
