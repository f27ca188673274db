//! Process-wide metrics, collected into one Prometheus [`Registry`] per
//! [`crate::app_state::AppState`] so `/metrics` always exposes a coherent
//! snapshot regardless of which worker thread served which prior request.

use std::time::Duration;

use prometheus::{Encoder, HistogramVec, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum Error {
    /// failed to register a collector: {0}
    Register(#[from] prometheus::Error),
}

/// Labels attached to every latency observation.
pub struct RequestLabels<'a> {
    pub cache: &'a str,
    pub status: &'a str,
    pub method: &'a str,
    pub user: &'a str,
}

pub struct Metrics {
    registry: Registry,
    http_request: IntCounter,
    request_latency_seconds: HistogramVec,
    cache_size_bytes: IntGauge,
    cached_objects: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, Error> {
        let registry = Registry::new();

        let http_request = IntCounter::new(
            "http_request",
            "Total number of requests proxied by the mirror.",
        )?;
        registry.register(Box::new(http_request.clone()))?;

        let request_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "request_latency_seconds",
                "Wall-clock time spent servicing a proxied request.",
            ),
            &["cache", "status", "method", "user"],
        )?;
        registry.register(Box::new(request_latency_seconds.clone()))?;

        let cache_size_bytes = IntGauge::new(
            "github_mirror_cache_size",
            "Estimated size in bytes of the response cache.",
        )?;
        registry.register(Box::new(cache_size_bytes.clone()))?;

        let cached_objects = IntGauge::new(
            "github_mirror_cached_objects",
            "Number of entries currently held in the response cache.",
        )?;
        registry.register(Box::new(cached_objects.clone()))?;

        registry.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;

        Ok(Self {
            registry,
            http_request,
            request_latency_seconds,
            cache_size_bytes,
            cached_objects,
        })
    }

    pub fn record_request(&self, labels: RequestLabels<'_>, elapsed: Duration) {
        self.http_request.inc();
        self.request_latency_seconds
            .with_label_values(&[labels.cache, labels.status, labels.method, labels.user])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_cache_gauges(&self, byte_size: u64, len: u64) {
        self.cache_size_bytes.set(byte_size as i64);
        self.cached_objects.set(len as i64);
    }

    /// Renders the registry in the Prometheus exposition text format.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_families() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request(
            RequestLabels {
                cache: "ONLINE_MISS",
                status: "200",
                method: "GET",
                user: "None",
            },
            Duration::from_millis(5),
        );
        metrics.set_cache_gauges(128, 1);
        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("http_request"));
        assert!(encoded.contains("github_mirror_cache_size"));
        assert!(encoded.contains("github_mirror_cached_objects"));
    }
}
