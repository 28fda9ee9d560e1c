//! In-memory event feed (SPEC_FULL §11, supplemented feature grounded in
//! `fc-router::warning::WarningService`): a bounded, queryable record of
//! dispatch-level events — rate-limit rejections, circuit breaker trips,
//! exhausted retries — distinct from the `tracing` stream `LoggingMiddleware`
//! emits. `tracing` is for an operator tailing logs; this feed is for a
//! caller that wants to poll "what went wrong recently" as structured data
//! without standing up a log pipeline.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    RateLimit,
    CircuitBreaker,
    Retry,
    Delivery,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub category: EventCategory,
    pub severity: EventSeverity,
    pub message: String,
    pub platform: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A fixed-capacity ring buffer: the oldest event is dropped once `capacity`
/// is exceeded, mirroring the teacher's `max_warnings` eviction rule.
pub struct EventFeed {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl EventFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, category: EventCategory, severity: EventSeverity, message: impl Into<String>, platform: Option<String>) {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(Event {
            category,
            severity,
            message: message.into(),
            platform,
            created_at: Utc::now(),
        });
    }

    /// The most recent `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        self.events.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_returns_newest_first() {
        let feed = EventFeed::new(10);
        feed.record(EventCategory::RateLimit, EventSeverity::Warning, "first", None);
        feed.record(EventCategory::CircuitBreaker, EventSeverity::Error, "second", Some("chat".to_string()));

        let recent = feed.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[1].message, "first");
    }

    #[test]
    fn oldest_event_is_evicted_once_capacity_is_exceeded() {
        let feed = EventFeed::new(2);
        feed.record(EventCategory::Retry, EventSeverity::Info, "a", None);
        feed.record(EventCategory::Retry, EventSeverity::Info, "b", None);
        feed.record(EventCategory::Retry, EventSeverity::Info, "c", None);

        assert_eq!(feed.len(), 2);
        let recent = feed.recent(10);
        assert_eq!(recent[1].message, "b");
    }
}
