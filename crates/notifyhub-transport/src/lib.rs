//! Transport interface + registry (§4.3), and the two reference
//! implementations: webhook (§4.3.1) and SMTP (§4.3.2).
//!
//! A `Transport` is stateless with respect to messages — it owns its own
//! network client and is safe to call concurrently. The registry is an
//! immutable, construction-time snapshot (§9 DESIGN NOTES: "shared-mutable
//! manager registries ⇒ construction-time immutable snapshots"); adding a
//! transport after the fact produces a new registry rather than mutating
//! one in place.

pub mod error;
pub mod smtp;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notifyhub_common::{DeliveryResult, Message, MessageFormat, Target};
use tokio_util::sync::CancellationToken;

pub use error::TransportError;
pub use smtp::{SmtpConnectionMode, SmtpConfig, SmtpTransport};
pub use webhook::{SecurityMode, WebhookConfig, WebhookTransport};

pub type Result<T> = std::result::Result<T, TransportError>;

/// Abstract per-platform delivery (§4.3). Implementors must be safe for
/// concurrent use and must honor `cancel` and `timeout` on every call that
/// touches the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The platform name this transport registers under, e.g. `"email"`.
    fn name(&self) -> &str;

    /// Whether this transport can render the given message format.
    fn supports(&self, format: MessageFormat) -> bool;

    /// Deliver `message` to `target`. `success` on the returned result
    /// reflects acceptance by the remote endpoint, not merely that the
    /// network call returned.
    async fn send(
        &self,
        message: &Message,
        target: &Target,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult>;

    /// Transport-specific validation beyond the generic `Message::validate`
    /// (e.g. a webhook transport might reject `format=card` without
    /// `card_data`).
    fn validate(&self, message: &Message) -> Result<()>;

    /// Liveness probe used by `Hub::health`.
    async fn health(&self) -> Result<()>;

    /// Release any held resources (connection pools, clients). Called once
    /// during `Hub::shutdown`.
    async fn shutdown(&self) -> Result<()>;
}

/// Maps platform name -> transport instance. Registration rejects
/// duplicate names; lookup is by exact platform match.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes `self` and returns a registry with `transport` added,
    /// leaving any existing registry (and its callers) untouched — the
    /// copy-on-write discipline §9 calls for.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Result<Self> {
        let name = transport.name().to_string();
        if self.transports.contains_key(&name) {
            return Err(TransportError::Config(format!(
                "transport '{name}' already registered"
            )));
        }
        self.transports.insert(name, transport);
        Ok(self)
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(platform).cloned()
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Transport>)> {
        self.transports.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn platforms(&self) -> Vec<String> {
        self.transports.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyhub_common::{DeliveryResult, TargetType};

    struct StubTransport(&'static str);

    #[async_trait]
    impl Transport for StubTransport {
        fn name(&self) -> &str {
            self.0
        }

        fn supports(&self, _format: MessageFormat) -> bool {
            true
        }

        async fn send(
            &self,
            message: &Message,
            target: &Target,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<DeliveryResult> {
            Ok(DeliveryResult::pending(&message.id, target.clone(), self.0).mark_sent(None))
        }

        fn validate(&self, _message: &Message) -> Result<()> {
            Ok(())
        }

        async fn health(&self) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = TransportRegistry::new()
            .with_transport(Arc::new(StubTransport("chat")))
            .unwrap();
        let err = registry.with_transport(Arc::new(StubTransport("chat")));
        assert!(err.is_err());
    }

    #[test]
    fn lookup_by_exact_platform_name() {
        let registry = TransportRegistry::new()
            .with_transport(Arc::new(StubTransport("chat")))
            .unwrap();
        assert!(registry.get("chat").is_some());
        assert!(registry.get("sms").is_none());
    }

    #[tokio::test]
    async fn stub_transport_reports_success() {
        let transport = StubTransport("chat");
        let msg = Message::new("t", "b");
        let target = Target::new(TargetType::Channel, "c1", "chat");
        let result = transport
            .send(&msg, &target, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
    }
}
