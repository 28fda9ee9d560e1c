//! Structured logging setup for applications embedding NotifyHub.
//!
//! The library itself never installs a subscriber — only emits events via
//! `tracing`. This module is an opt-in convenience for binaries/tests that
//! want the same JSON-or-text split the rest of the ambient stack uses.
//!
//! # Environment variables
//!
//! - `LOG_FORMAT`: `"json"` for machine-readable output, anything else
//!   (default) for human-readable text.
//! - `RUST_LOG`: standard env-filter syntax, defaults to `info`.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize logging for the given service name. `service_name` is
/// currently only used to label the default filter target in `RUST_LOG`
/// examples; it is accepted for interface symmetry with other NotifyHub
/// embedding points.
pub fn init_logging(_service_name: &str) {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_format.eq_ignore_ascii_case("json") {
        init_json_logging(env_filter);
    } else {
        init_text_logging(env_filter);
    }
}

fn init_json_logging(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .init();
}

fn init_text_logging(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .init();
}

/// Initialize with `"notifyhub"` as the service name.
pub fn init_default_logging() {
    init_logging("notifyhub");
}
