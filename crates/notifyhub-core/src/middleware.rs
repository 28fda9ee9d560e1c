//! Middleware chain (§4.8.1): interceptors wrapping `Hub::send_sync` in
//! registration order, with the fan-out routine as the final handler.
//!
//! Two of the spec's five named built-ins — rate-limit and retry-wrap —
//! are implemented as internal stages of the dispatch pipeline itself
//! rather than registrable `Middleware` objects (see `Hub::dispatch_once`
//! and `pool::handle_entry`): rate-limiting needs the post-routing,
//! post-templating target set to group by platform, which only exists
//! inside the terminal handler, and retry-wrapping is a multi-attempt
//! concern the worker pool owns, not a single-pass interceptor. That
//! split is recorded as a design decision in `DESIGN.md`, not an
//! oversight. `Validation`, `Logging`, and `Metrics` below are genuine
//! interceptors that run before routing ever sees the message.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use notifyhub_common::{DeliveryResult, Message, SendOptions};

use crate::error::{HubError, Result};
use crate::metrics::Metrics;

/// The remainder of the chain (and, eventually, the fan-out routine)
/// still to run. Owned rather than borrowed so a chain can be built once
/// at `Hub::build` time and reused across concurrent `send_sync` calls.
pub type NextFn = Box<dyn FnOnce(Message, SendOptions) -> BoxFuture<'static, Result<Vec<DeliveryResult>>> + Send>;

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, message: Message, opts: SendOptions, next: NextFn) -> Result<Vec<DeliveryResult>>;
}

/// An immutable, priority-free FIFO chain: `middlewares[0]` runs first and
/// decides whether (and with what) to call the rest.
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub async fn run<F>(&self, message: Message, opts: SendOptions, terminal: F) -> Result<Vec<DeliveryResult>>
    where
        F: FnOnce(Message, SendOptions) -> BoxFuture<'static, Result<Vec<DeliveryResult>>> + Send + 'static,
    {
        let chain = self.build(0, Box::new(terminal));
        chain(message, opts).await
    }

    fn build(&self, idx: usize, terminal: NextFn) -> NextFn {
        if idx >= self.middlewares.len() {
            return terminal;
        }
        let middleware = self.middlewares[idx].clone();
        let rest = self.build(idx + 1, terminal);
        Box::new(move |message, opts| Box::pin(async move { middleware.handle(message, opts, rest).await }))
    }
}

/// Rejects empty title+body, missing targets, and malformed emails before
/// the message ever reaches routing (§4.8.1 built-in "validation").
/// `Message::validate` (§3) already encodes the exact rule set; this
/// middleware's only job is to run it first in the chain so a later
/// interceptor never sees an invalid message.
pub struct ValidationMiddleware;

#[async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    async fn handle(&self, message: Message, opts: SendOptions, next: NextFn) -> Result<Vec<DeliveryResult>> {
        message.validate().map_err(HubError::Notify)?;
        next(message, opts).await
    }
}

/// Structured before/after events for every `send_sync` call (§4.8.1
/// built-in "logging"; §10.1 ambient stack).
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, message: Message, opts: SendOptions, next: NextFn) -> Result<Vec<DeliveryResult>> {
        let message_id = message.id.clone();
        let target_count = message.targets.len();
        tracing::debug!(message_id = %message_id, targets = target_count, "dispatching message");
        let start = std::time::Instant::now();
        let outcome = next(message, opts).await;
        match &outcome {
            Ok(results) => tracing::info!(
                message_id = %message_id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                results = results.len(),
                "dispatch complete"
            ),
            Err(err) => tracing::warn!(message_id = %message_id, error = %err, "dispatch failed"),
        }
        outcome
    }
}

/// Records dispatch-level rejections that never reach a transport (e.g.
/// the rate-limit fail-fast, or a validation error raised further down
/// the chain) against a best-effort platform label, so they still show
/// up in `failed_total` (§4.8.1 built-in "metrics"). Per-target send
/// outcomes are recorded directly in `Hub::dispatch_once`/`send_to_target`,
/// closer to the transport call they describe — `AllTargetsFailed` is
/// excluded here since every one of its targets was already counted
/// there, and counting it again here would double it.
pub struct MetricsMiddleware {
    metrics: Arc<Metrics>,
}

impl MetricsMiddleware {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn handle(&self, message: Message, opts: SendOptions, next: NextFn) -> Result<Vec<DeliveryResult>> {
        let platform_hint = message
            .targets
            .first()
            .map(|t| t.resolved_platform().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let outcome = next(message, opts).await;
        match &outcome {
            Err(HubError::AllTargetsFailed { .. }) => {}
            Err(_) => self.metrics.record_failed(&platform_hint),
            Ok(_) => {}
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyhub_common::{Target, TargetType};

    fn ok_terminal() -> impl FnOnce(Message, SendOptions) -> BoxFuture<'static, Result<Vec<DeliveryResult>>> + Send + 'static
    {
        |message: Message, _opts: SendOptions| {
            Box::pin(async move {
                Ok(vec![DeliveryResult::pending(
                    message.id.clone(),
                    message.targets[0].clone(),
                    "chat",
                )
                .mark_sent(None)])
            })
        }
    }

    fn msg() -> Message {
        Message::new("t", "b").with_target(Target::new(TargetType::Channel, "c1", "chat"))
    }

    #[tokio::test]
    async fn empty_chain_runs_terminal_directly() {
        let chain = MiddlewareChain::new(Vec::new());
        let results = chain.run(msg(), SendOptions::default(), ok_terminal()).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn validation_middleware_rejects_before_terminal_runs() {
        let chain = MiddlewareChain::new(vec![Arc::new(ValidationMiddleware)]);
        let invalid = Message::new("", "");
        let err = chain.run(invalid, SendOptions::default(), ok_terminal()).await.unwrap_err();
        assert!(matches!(err, HubError::Notify(_)));
    }

    #[tokio::test]
    async fn chain_runs_middlewares_in_registration_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        struct Tag(Arc<parking_lot::Mutex<Vec<&'static str>>>, &'static str);
        #[async_trait]
        impl Middleware for Tag {
            fn name(&self) -> &str {
                self.1
            }
            async fn handle(&self, message: Message, opts: SendOptions, next: NextFn) -> Result<Vec<DeliveryResult>> {
                self.0.lock().push(self.1);
                next(message, opts).await
            }
        }

        let chain = MiddlewareChain::new(vec![
            Arc::new(Tag(order.clone(), "first")),
            Arc::new(Tag(order.clone(), "second")),
        ]);
        chain.run(msg(), SendOptions::default(), ok_terminal()).await.unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn metrics_middleware_records_failure_on_error() {
        let metrics = Arc::new(Metrics::new());
        let chain = MiddlewareChain::new(vec![Arc::new(MetricsMiddleware::new(metrics.clone()))]);
        let failing = |_message: Message, _opts: SendOptions| -> BoxFuture<'static, Result<Vec<DeliveryResult>>> {
            Box::pin(async move { Err(HubError::RateLimited { platform: "chat".to_string() }) })
        };
        let err = chain.run(msg(), SendOptions::default(), failing).await.unwrap_err();
        assert!(matches!(err, HubError::RateLimited { .. }));
        assert_eq!(metrics.snapshot(0).failed_total, 1);
    }

    #[tokio::test]
    async fn metrics_middleware_skips_all_targets_failed_to_avoid_double_counting() {
        let metrics = Arc::new(Metrics::new());
        let chain = MiddlewareChain::new(vec![Arc::new(MetricsMiddleware::new(metrics.clone()))]);
        let failing = |message: Message, _opts: SendOptions| -> BoxFuture<'static, Result<Vec<DeliveryResult>>> {
            Box::pin(async move {
                // Stand in for `dispatch_once` already having recorded one
                // `record_failed` per target before surfacing this error.
                Err(HubError::AllTargetsFailed {
                    message_id: message.id,
                    attempted: 1,
                    results: vec![],
                })
            })
        };
        let err = chain.run(msg(), SendOptions::default(), failing).await.unwrap_err();
        assert!(matches!(err, HubError::AllTargetsFailed { .. }));
        assert_eq!(metrics.snapshot(0).failed_total, 0);
    }
}
