//! Metrics (§6, §4.8): flat counters plus, per SPEC_FULL §11, rolling
//! 5-minute/30-minute success-rate windows that `Hub::health`'s
//! roll-up threshold reads from.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct PlatformCounters {
    sent_total: AtomicU64,
    failed_total: AtomicU64,
    retried_total: AtomicU64,
    send_duration_total_ms: AtomicU64,
    send_duration_samples: AtomicU64,
}

/// Fixed-size ring of recent success/failure samples, pruned by age on
/// read. Backs `Hub::health`'s rolling success-rate threshold (§4.8).
struct RollingWindow {
    window: Duration,
    samples: Mutex<VecDeque<(Instant, bool)>>,
}

impl RollingWindow {
    fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    fn record(&self, success: bool) {
        let mut samples = self.samples.lock();
        samples.push_back((Instant::now(), success));
        self.prune(&mut samples);
    }

    fn prune(&self, samples: &mut VecDeque<(Instant, bool)>) {
        let cutoff = Instant::now().checked_sub(self.window);
        while let Some((at, _)) = samples.front() {
            if let Some(cutoff) = cutoff {
                if *at < cutoff {
                    samples.pop_front();
                    continue;
                }
            }
            break;
        }
    }

    fn success_rate(&self) -> Option<f64> {
        let mut samples = self.samples.lock();
        self.prune(&mut samples);
        if samples.is_empty() {
            return None;
        }
        let successes = samples.iter().filter(|(_, ok)| *ok).count();
        Some(successes as f64 / samples.len() as f64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlatformMetricsSnapshot {
    pub sent_total: u64,
    pub failed_total: u64,
    pub retried_total: u64,
    pub avg_send_duration: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub sent_total: u64,
    pub failed_total: u64,
    pub retried_total: u64,
    pub queued_depth: u64,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    pub worker_count: usize,
    pub uptime: Duration,
    pub per_platform: HashMap<String, PlatformMetricsSnapshot>,
    pub success_rate_5m: Option<f64>,
    pub success_rate_30m: Option<f64>,
}

/// Concurrent counters the Hub updates on every dispatch result (§5:
/// "metrics (concurrent counters)").
pub struct Metrics {
    platforms: DashMap<String, PlatformCounters>,
    enqueued_total: AtomicU64,
    dequeued_total: AtomicU64,
    worker_count: AtomicUsize,
    started_at: Instant,
    window_5m: RollingWindow,
    window_30m: RollingWindow,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            platforms: DashMap::new(),
            enqueued_total: AtomicU64::new(0),
            dequeued_total: AtomicU64::new(0),
            worker_count: AtomicUsize::new(0),
            started_at: Instant::now(),
            window_5m: RollingWindow::new(Duration::from_secs(5 * 60)),
            window_30m: RollingWindow::new(Duration::from_secs(30 * 60)),
        }
    }

    fn platform(&self, platform: &str) -> dashmap::mapref::one::RefMut<'_, String, PlatformCounters> {
        self.platforms
            .entry(platform.to_string())
            .or_insert_with(PlatformCounters::default)
    }

    pub fn record_sent(&self, platform: &str, duration: Duration) {
        let counters = self.platform(platform);
        counters.sent_total.fetch_add(1, Ordering::Relaxed);
        counters
            .send_duration_total_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        counters.send_duration_samples.fetch_add(1, Ordering::Relaxed);
        drop(counters);
        self.window_5m.record(true);
        self.window_30m.record(true);
    }

    pub fn record_failed(&self, platform: &str) {
        self.platform(platform).failed_total.fetch_add(1, Ordering::Relaxed);
        self.window_5m.record(false);
        self.window_30m.record(false);
    }

    pub fn record_retried(&self, platform: &str) {
        self.platform(platform).retried_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.enqueued_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dequeued(&self) {
        self.dequeued_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_worker_count(&self, count: usize) {
        self.worker_count.store(count, Ordering::Relaxed);
    }

    pub fn success_rate_5m(&self) -> Option<f64> {
        self.window_5m.success_rate()
    }

    pub fn snapshot(&self, queued_depth: u64) -> MetricsSnapshot {
        let mut sent_total = 0;
        let mut failed_total = 0;
        let mut retried_total = 0;
        let mut per_platform = HashMap::new();

        for entry in self.platforms.iter() {
            let counters = entry.value();
            let sent = counters.sent_total.load(Ordering::Relaxed);
            let failed = counters.failed_total.load(Ordering::Relaxed);
            let retried = counters.retried_total.load(Ordering::Relaxed);
            let samples = counters.send_duration_samples.load(Ordering::Relaxed);
            let avg_send_duration = if samples > 0 {
                Some(Duration::from_millis(
                    counters.send_duration_total_ms.load(Ordering::Relaxed) / samples,
                ))
            } else {
                None
            };

            sent_total += sent;
            failed_total += failed;
            retried_total += retried;
            per_platform.insert(
                entry.key().clone(),
                PlatformMetricsSnapshot {
                    sent_total: sent,
                    failed_total: failed,
                    retried_total: retried,
                    avg_send_duration,
                },
            );
        }

        MetricsSnapshot {
            sent_total,
            failed_total,
            retried_total,
            queued_depth,
            enqueued_total: self.enqueued_total.load(Ordering::Relaxed),
            dequeued_total: self.dequeued_total.load(Ordering::Relaxed),
            worker_count: self.worker_count.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            per_platform,
            success_rate_5m: self.window_5m.success_rate(),
            success_rate_30m: self.window_30m.success_rate(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_platform() {
        let metrics = Metrics::new();
        metrics.record_sent("chat", Duration::from_millis(10));
        metrics.record_sent("chat", Duration::from_millis(30));
        metrics.record_failed("email");

        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.sent_total, 2);
        assert_eq!(snapshot.failed_total, 1);
        assert_eq!(snapshot.per_platform["chat"].sent_total, 2);
        assert_eq!(
            snapshot.per_platform["chat"].avg_send_duration,
            Some(Duration::from_millis(20))
        );
    }

    #[test]
    fn rolling_window_reports_success_rate() {
        let metrics = Metrics::new();
        metrics.record_sent("chat", Duration::from_millis(1));
        metrics.record_sent("chat", Duration::from_millis(1));
        metrics.record_failed("chat");
        let rate = metrics.success_rate_5m().unwrap();
        assert!((rate - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn no_samples_is_none_not_zero() {
        let metrics = Metrics::new();
        assert!(metrics.success_rate_5m().is_none());
    }
}
