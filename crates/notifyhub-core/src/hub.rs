//! Dispatch orchestrator (§4.8): the single entry point embedding
//! applications call. `Hub::build` assembles the transports, routing,
//! templates, queue, rate limiter and circuit breakers into one `Arc<Hub>`;
//! `start` launches the worker pool; `send`/`send_sync`/`send_async` drive
//! a message through the middleware chain and, ultimately,
//! `dispatch_once`'s per-target fan-out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use notifyhub_common::{DeliveryResult, Message, RetryPolicy, SendOptions, Target, TargetType};
use notifyhub_queue::{EnqueueOptions, InMemoryQueue};
use notifyhub_routing::RoutingEngine;
use notifyhub_template::{TemplateEngine, TemplateRegistry};
use notifyhub_transport::TransportRegistry;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::HubConfig;
use crate::error::{HubError, Result};
use crate::events::{Event, EventCategory, EventFeed, EventSeverity};
use crate::health::{self, HealthReport};
use crate::lifecycle::ShutdownCoordinator;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::middleware::{LoggingMiddleware, MetricsMiddleware, MiddlewareChain, ValidationMiddleware};
use crate::pool::WorkerPool;
use crate::rate_limit::RateLimiterRegistry;

/// Per-target fan-out concurrency used when `SendOptions::concurrency` is
/// unset (§4.8: "bounded concurrency, default if unspecified").
const DEFAULT_CONCURRENCY: usize = 8;

/// The assembled engine. Always held behind an `Arc` — the worker pool's
/// background tasks and the middleware chain's terminal closure both need
/// a `'static` handle back to it.
pub struct Hub {
    transports: TransportRegistry,
    routing: RoutingEngine,
    templates: TemplateRegistry,
    template_engine: TemplateEngine,
    pub(crate) queue: Arc<InMemoryQueue>,
    pub(crate) rate_limiter: RateLimiterRegistry,
    circuit_breakers: CircuitBreakerRegistry,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) events: Arc<EventFeed>,
    middleware: MiddlewareChain,
    pub(crate) pool: WorkerPool,
    lifecycle: ShutdownCoordinator,
    default_retry_policy: RetryPolicy,
    health_threshold: f64,
    shutdown_grace_period: Duration,
    workers: usize,
}

impl Hub {
    /// Assemble a `Hub` from a validated [`HubConfig`]. Does not start the
    /// worker pool — call [`Hub::start`] once the returned handle has been
    /// stored wherever the embedding application keeps it.
    pub fn build(config: HubConfig) -> Result<Arc<Hub>> {
        let mut transports = TransportRegistry::new();
        for transport in config.transports {
            transports = transports.with_transport(transport)?;
        }

        let templates = TemplateRegistry::new();
        for (name, body) in config.templates {
            templates.add_template(name, body);
        }

        let metrics = Arc::new(Metrics::new());
        let middleware = MiddlewareChain::new(vec![
            Arc::new(ValidationMiddleware),
            Arc::new(LoggingMiddleware),
            Arc::new(MetricsMiddleware::new(metrics.clone())),
        ]);

        Ok(Arc::new(Hub {
            transports,
            routing: RoutingEngine::new(config.routing_rules),
            templates,
            template_engine: TemplateEngine::new(),
            queue: InMemoryQueue::new(config.queue),
            rate_limiter: RateLimiterRegistry::new(config.rate_limits),
            circuit_breakers: CircuitBreakerRegistry::new(
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_success_threshold,
                config.circuit_breaker_reset_timeout,
            ),
            metrics,
            events: Arc::new(EventFeed::default()),
            middleware,
            pool: WorkerPool::new(),
            lifecycle: ShutdownCoordinator::new(),
            default_retry_policy: config.retry_policy,
            health_threshold: config.health_success_rate_threshold,
            shutdown_grace_period: config.shutdown_grace_period,
            workers: config.queue.workers,
        }))
    }

    /// Launch the background worker pool. Idempotent to call once; calling
    /// it again spawns an additional set of workers on top of any already
    /// running, which is never what a caller wants — embedding
    /// applications should call this exactly once after `build`.
    pub fn start(self: &Arc<Self>) {
        self.metrics.set_worker_count(self.workers);
        self.pool.spawn(self.clone(), self.workers, self.lifecycle.token());
    }

    /// Cancel the worker pool, wait up to the configured grace period for
    /// in-flight attempts to finish, close every transport, and hand back
    /// anything the scheduler still held for future delivery (§9 open
    /// question (a): no cross-restart persistence — the caller decides what
    /// to do with the drained messages).
    pub async fn shutdown(&self) -> Vec<(Message, DateTime<Utc>)> {
        self.lifecycle.trigger();
        let handles = self.pool.take_handles();
        self.lifecycle.drain(handles, self.shutdown_grace_period).await;

        for (_, transport) in self.transports.iter() {
            if let Err(e) = transport.shutdown().await {
                tracing::warn!(error = %e, "transport shutdown returned an error");
            }
        }

        self.queue.shutdown().await
    }

    /// Render, route, rate-limit-check and fan a message out to every
    /// transport synchronously, blocking until every target has settled
    /// (§4.8.3). Never retries internally — a caller wanting retries uses
    /// `send_async` so the worker pool owns the retry loop.
    pub async fn send_sync(self: &Arc<Self>, message: Message, opts: SendOptions) -> Result<Vec<DeliveryResult>> {
        let hub = self.clone();
        self.middleware
            .run(message, opts, move |message, opts| {
                let hub = hub.clone();
                Box::pin(async move { hub.dispatch_once(message, &opts).await })
            })
            .await
    }

    /// Validate and enqueue `message`, returning its task id immediately.
    /// The worker pool started by `start` drives delivery (and retries) in
    /// the background.
    pub async fn send_async(self: &Arc<Self>, message: Message, opts: SendOptions) -> Result<String> {
        message.validate().map_err(HubError::Notify)?;
        let enqueue_opts = EnqueueOptions {
            enqueue_timeout: opts.enqueue_timeout,
        };
        let task_id = self.queue.enqueue(message, enqueue_opts).await?;
        self.pool.task_options.insert(task_id.clone(), opts);
        self.metrics.record_enqueued();
        Ok(task_id)
    }

    /// The single call embedding applications make: synchronous or
    /// fire-and-forget depending on `opts.async` (§4.8). The async branch
    /// returns a single synthetic "queued" `DeliveryResult` rather than one
    /// per target, since no target has actually been attempted yet.
    pub async fn send(self: &Arc<Self>, message: Message, opts: SendOptions) -> Result<Vec<DeliveryResult>> {
        if opts.r#async {
            let message_id = message.id.clone();
            let task_id = self.send_async(message, opts).await?;
            Ok(vec![synthetic_queued_result(message_id, task_id)])
        } else {
            self.send_sync(message, opts).await
        }
    }

    /// Dispatch every message concurrently, preserving input order in the
    /// returned `Vec` (§6: batch submission).
    pub async fn send_batch(
        self: &Arc<Self>,
        messages: Vec<Message>,
        opts: SendOptions,
    ) -> Vec<Result<Vec<DeliveryResult>>> {
        let futures = messages.into_iter().map(|message| {
            let hub = self.clone();
            let opts = opts.clone();
            async move { hub.send(message, opts).await }
        });
        futures::future::join_all(futures).await
    }

    pub async fn health(&self) -> HealthReport {
        health::probe(&self.transports, &self.metrics, self.health_threshold).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.queue.depth() as u64)
    }

    /// The most recent dispatch-level events (rate-limit rejections,
    /// circuit breaker trips, exhausted retries), newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        self.events.recent(limit)
    }

    pub(crate) fn pick_retry_policy(&self, opts: &SendOptions) -> RetryPolicy {
        opts.retry_policy.unwrap_or(self.default_retry_policy)
    }

    /// One full pass for a message: template render, routing, a fail-fast
    /// rate-limit check across every distinct platform, then a bounded
    /// concurrent fan-out to each target's transport. Returns
    /// `Err(AllTargetsFailed)` only when every target produced zero
    /// successes (§4.8.3) — a partial success is `Ok` with the failures'
    /// results embedded (`status = Retrying` or `Failed` per target),
    /// leaving the caller (or the worker pool, for async sends) to decide
    /// whether to retry the failed subset.
    pub(crate) async fn dispatch_once(&self, message: Message, opts: &SendOptions) -> Result<Vec<DeliveryResult>> {
        message.validate().map_err(HubError::Notify)?;

        let rendered = self
            .template_engine
            .render(&message, &self.templates)
            .map_err(|e| HubError::Notify(e.into()))?;
        let routed = self.routing.process(&rendered);

        let mut platforms: Vec<String> = routed.targets.iter().map(|t| t.resolved_platform().to_string()).collect();
        platforms.sort();
        platforms.dedup();
        for platform in &platforms {
            if !self.rate_limiter.try_consume(platform) {
                self.events.record(
                    EventCategory::RateLimit,
                    EventSeverity::Warning,
                    format!("rate limit exceeded for platform '{platform}'"),
                    Some(platform.clone()),
                );
                return Err(HubError::RateLimited {
                    platform: platform.clone(),
                });
            }
        }

        let concurrency = opts.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1);
        let cancel = self.lifecycle.token();
        let timeout = opts.timeout;
        let targets = routed.targets.clone();
        let results: Vec<DeliveryResult> = stream::iter(targets.into_iter().map(|target| {
            let routed = &routed;
            let cancel = cancel.clone();
            async move { self.send_to_target(routed, target, timeout, &cancel).await }
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await;

        let attempted = results.len();
        if results.iter().all(|r| !r.success) {
            return Err(HubError::AllTargetsFailed {
                message_id: routed.id.clone(),
                attempted,
                results,
            });
        }
        Ok(results)
    }

    /// Deliver to one target, consulting and updating that platform's
    /// circuit breaker around the transport call (§4.3, SPEC_FULL §11).
    async fn send_to_target(
        &self,
        message: &Message,
        target: Target,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> DeliveryResult {
        let platform = target.resolved_platform().to_string();
        let pending = DeliveryResult::pending(&message.id, target.clone(), platform.clone());

        let breaker = self.circuit_breakers.get(&platform);
        if !breaker.allow() {
            self.events.record(
                EventCategory::CircuitBreaker,
                EventSeverity::Error,
                format!("circuit breaker open for platform '{platform}'"),
                Some(platform.clone()),
            );
            return pending.mark_retrying("circuit breaker open for this platform");
        }

        let Some(transport) = self.transports.get(&platform) else {
            let message = format!("no transport registered for platform '{platform}'");
            self.events.record(EventCategory::Delivery, EventSeverity::Error, message.clone(), Some(platform.clone()));
            return pending.mark_failed(message);
        };

        // §4.8 step 2: only invoke a transport whose `supports(format)` and
        // `validate(message)` accept the rendered message. Neither check
        // is a transport-level send error, so both are non-retryable —
        // this is a routing mismatch (wrong format for this platform),
        // not a transient failure that should be reattempted.
        if !transport.supports(message.format) {
            let err = format!("transport '{platform}' does not support format {:?}", message.format);
            self.events.record(EventCategory::Delivery, EventSeverity::Error, err.clone(), Some(platform.clone()));
            return pending.mark_failed(err);
        }
        if let Err(e) = transport.validate(message) {
            let notify_err = e.into_notify_error(&platform);
            self.events.record(
                EventCategory::Delivery,
                EventSeverity::Error,
                notify_err.to_string(),
                Some(platform.clone()),
            );
            return pending.mark_failed(notify_err.to_string());
        }

        let start = Instant::now();
        match transport.send(message, &target, timeout, cancel).await {
            Ok(result) => {
                breaker.record_success();
                self.metrics.record_sent(&platform, start.elapsed());
                result
            }
            Err(err) => {
                breaker.record_failure();
                self.metrics.record_failed(&platform);
                let notify_err = err.into_notify_error(&platform);
                if notify_err.is_retryable() {
                    pending.mark_retrying(notify_err.to_string())
                } else {
                    self.events.record(
                        EventCategory::Delivery,
                        EventSeverity::Error,
                        notify_err.to_string(),
                        Some(platform.clone()),
                    );
                    pending.mark_failed(notify_err.to_string())
                }
            }
        }
    }
}

/// The single placeholder result an async `send` returns (§4.8: "equivalent
/// to sendAsync wrapped in a single synthetic queued Result") — one, not
/// one per target, since targets haven't been attempted yet.
fn synthetic_queued_result(message_id: String, task_id: String) -> DeliveryResult {
    let target = Target::new(TargetType::Other, task_id, "queue");
    DeliveryResult::pending(message_id, target, "queue").mark_sent(None)
}
