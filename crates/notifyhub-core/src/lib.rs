//! NotifyHub dispatch engine
//!
//! This crate provides the library-embedded notification dispatch engine
//! assembled from the rest of the workspace:
//! - `Hub`: the orchestrator applications build once and call `send`/
//!   `send_async`/`send_batch` against
//! - `WorkerPool`: background tasks draining the queue and retrying failed
//!   targets with backoff
//! - `MiddlewareChain`: interceptors (validation, logging, metrics) wrapping
//!   every synchronous send
//! - `RateLimiterRegistry` / `CircuitBreakerRegistry`: per-platform token
//!   buckets and failure breakers guarding the transports
//! - `Metrics` / `health::probe`: rolling counters and a liveness+success-rate
//!   roll-up
//! - `ShutdownCoordinator`: cooperative cancellation and drain for graceful
//!   shutdown

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod hub;
pub mod lifecycle;
pub mod metrics;
pub mod middleware;
pub mod pool;
pub mod rate_limit;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use config::{HubConfig, HubConfigBuilder};
pub use error::{HubError, Result};
pub use events::{Event, EventCategory, EventFeed, EventSeverity};
pub use health::{HealthReport, TransportHealth, DEFAULT_SUCCESS_RATE_THRESHOLD};
pub use hub::Hub;
pub use lifecycle::{LifecycleState, ShutdownCoordinator};
pub use metrics::{Metrics, MetricsSnapshot, PlatformMetricsSnapshot};
pub use middleware::{LoggingMiddleware, MetricsMiddleware, Middleware, MiddlewareChain, NextFn, ValidationMiddleware};
pub use pool::WorkerPool;
pub use rate_limit::{RateLimitConfig, RateLimiterRegistry};

// Re-exported so an embedding application can build a full `HubConfig`
// without adding the lower crates as direct dependencies of its own.
pub use notifyhub_common::{
    DeliveryResult, DeliveryStatus, Message, MessageFormat, NotifyError, RetryPolicy, SendOptions, Target, TargetType,
};
pub use notifyhub_queue::QueueConfig;
pub use notifyhub_routing::{RoutingAction, RoutingRule};
pub use notifyhub_transport::{SecurityMode, SmtpConfig, SmtpTransport, Transport, TransportRegistry, WebhookConfig, WebhookTransport};
