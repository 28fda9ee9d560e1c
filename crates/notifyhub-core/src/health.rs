//! Health probing (§4.8, §6): probes every registered transport and rolls
//! up into a single boolean, gated on both transport liveness and a rolling
//! success-rate threshold (default 0.80).

use notifyhub_transport::TransportRegistry;

use crate::metrics::Metrics;

pub const DEFAULT_SUCCESS_RATE_THRESHOLD: f64 = 0.80;

#[derive(Debug, Clone)]
pub struct TransportHealth {
    pub platform: String,
    pub healthy: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub transports: Vec<TransportHealth>,
    pub success_rate: Option<f64>,
    pub threshold: f64,
}

/// Probes every transport concurrently, then rolls up: healthy iff every
/// transport is healthy AND the rolling success rate (when there is
/// enough data to compute one) meets `threshold`.
pub async fn probe(registry: &TransportRegistry, metrics: &Metrics, threshold: f64) -> HealthReport {
    let probes = registry
        .iter()
        .map(|(name, transport)| {
            let name = name.to_string();
            let transport = transport.clone();
            async move {
                match transport.health().await {
                    Ok(()) => TransportHealth {
                        platform: name,
                        healthy: true,
                        error: None,
                    },
                    Err(e) => TransportHealth {
                        platform: name,
                        healthy: false,
                        error: Some(e.to_string()),
                    },
                }
            }
        })
        .collect::<Vec<_>>();

    let transports = futures::future::join_all(probes).await;
    let all_healthy = transports.iter().all(|t| t.healthy);
    let success_rate = metrics.success_rate_5m();
    let rate_ok = success_rate.map(|rate| rate >= threshold).unwrap_or(true);

    HealthReport {
        healthy: all_healthy && rate_ok,
        transports,
        success_rate,
        threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_registry_is_healthy() {
        let registry = TransportRegistry::new();
        let metrics = Metrics::new();
        let report = probe(&registry, &metrics, DEFAULT_SUCCESS_RATE_THRESHOLD).await;
        assert!(report.healthy);
        assert!(report.transports.is_empty());
    }

    #[test]
    fn low_success_rate_fails_rollup_even_with_healthy_transports() {
        let metrics = Metrics::new();
        for _ in 0..8 {
            metrics.record_failed("chat");
        }
        for _ in 0..2 {
            metrics.record_sent("chat", std::time::Duration::from_millis(1));
        }
        let rate = metrics.success_rate_5m().unwrap();
        assert!(rate < DEFAULT_SUCCESS_RATE_THRESHOLD);
    }
}
