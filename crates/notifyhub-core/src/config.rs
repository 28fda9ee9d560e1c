//! Hub configuration (SPEC_FULL §10.3): one functional-options builder,
//! validated once in `Hub::build`, replacing the source pattern's dozens of
//! `With…` functions (§9 DESIGN NOTES).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use notifyhub_common::RetryPolicy;
use notifyhub_queue::QueueConfig;
use notifyhub_routing::RoutingRule;
use notifyhub_transport::Transport;

use crate::error::{HubError, Result};
use crate::rate_limit::RateLimitConfig;

/// A plain in-memory value assembled by the embedding application (§6:
/// "Consumed as a structured value at construction"). No file-format
/// parsing lives here — that's explicitly out of scope (§1).
pub struct HubConfig {
    pub transports: Vec<Arc<dyn Transport>>,
    pub queue: QueueConfig,
    pub retry_policy: RetryPolicy,
    pub rate_limits: HashMap<String, RateLimitConfig>,
    pub routing_rules: Vec<RoutingRule>,
    pub templates: HashMap<String, String>,
    pub health_success_rate_threshold: f64,
    pub shutdown_grace_period: Duration,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_success_threshold: u32,
    pub circuit_breaker_reset_timeout: Duration,
}

pub struct HubConfigBuilder {
    transports: Vec<Arc<dyn Transport>>,
    queue: QueueConfig,
    retry_policy: RetryPolicy,
    rate_limits: HashMap<String, RateLimitConfig>,
    routing_rules: Vec<RoutingRule>,
    templates: HashMap<String, String>,
    health_success_rate_threshold: f64,
    shutdown_grace_period: Duration,
    circuit_breaker_failure_threshold: u32,
    circuit_breaker_success_threshold: u32,
    circuit_breaker_reset_timeout: Duration,
}

impl HubConfigBuilder {
    pub fn new() -> Self {
        Self {
            transports: Vec::new(),
            queue: QueueConfig::default(),
            retry_policy: RetryPolicy::default_profile(),
            rate_limits: HashMap::new(),
            routing_rules: Vec::new(),
            templates: HashMap::new(),
            health_success_rate_threshold: crate::health::DEFAULT_SUCCESS_RATE_THRESHOLD,
            shutdown_grace_period: Duration::from_secs(30),
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_success_threshold: 2,
            circuit_breaker_reset_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_rate_limit(mut self, platform: impl Into<String>, config: RateLimitConfig) -> Self {
        self.rate_limits.insert(platform.into(), config);
        self
    }

    pub fn with_routing_rule(mut self, rule: RoutingRule) -> Self {
        self.routing_rules.push(rule);
        self
    }

    pub fn with_template(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.insert(name.into(), body.into());
        self
    }

    pub fn with_health_success_rate_threshold(mut self, threshold: f64) -> Self {
        self.health_success_rate_threshold = threshold;
        self
    }

    pub fn with_shutdown_grace_period(mut self, grace_period: Duration) -> Self {
        self.shutdown_grace_period = grace_period;
        self
    }

    /// Validated once here: a Hub with zero transports is rejected (§4.8).
    pub fn build(self) -> Result<HubConfig> {
        if self.transports.is_empty() {
            return Err(HubError::Config(
                "hub requires at least one registered transport".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.health_success_rate_threshold) {
            return Err(HubError::Config(
                "health_success_rate_threshold must be within [0.0, 1.0]".to_string(),
            ));
        }

        Ok(HubConfig {
            transports: self.transports,
            queue: self.queue,
            retry_policy: self.retry_policy,
            rate_limits: self.rate_limits,
            routing_rules: self.routing_rules,
            templates: self.templates,
            health_success_rate_threshold: self.health_success_rate_threshold,
            shutdown_grace_period: self.shutdown_grace_period,
            circuit_breaker_failure_threshold: self.circuit_breaker_failure_threshold,
            circuit_breaker_success_threshold: self.circuit_breaker_success_threshold,
            circuit_breaker_reset_timeout: self.circuit_breaker_reset_timeout,
        })
    }
}

impl Default for HubConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyhub_transport::{SecurityMode, WebhookConfig, WebhookTransport};

    #[test]
    fn rejects_zero_transports() {
        let result = HubConfigBuilder::new().build();
        assert!(result.is_err());
    }

    #[test]
    fn accepts_at_least_one_transport() {
        let transport = Arc::new(
            WebhookTransport::new(
                "chat",
                WebhookConfig::new("https://example.invalid/hook", SecurityMode::None),
            )
            .unwrap(),
        );
        let config = HubConfigBuilder::new().with_transport(transport).build();
        assert!(config.is_ok());
    }
}
