//! Prometheus telemetry (spec.md §2's ambient stack — the core emits
//! counters/histograms; exposing them over HTTP is boundary code, see
//! `admin.rs`). Field selection follows the teacher's `DnsMetrics`
//! (`metrics.rs`) but trimmed to what this pipeline actually produces:
//! no blocking/allowlist counters (there is no blocklist plugin here),
//! added sequence-engine and rate-limiter-by-prefix counters instead.

use prometheus::{
    CounterVec, HistogramVec, IntCounter, IntGauge, Registry, histogram_opts, opts,
};

pub struct Metrics {
    pub registry: Registry,

    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub cache_evictions: IntCounter,
    pub cache_size: IntGauge,
    pub cache_lazy_refreshes: IntCounter,

    pub queries_total: CounterVec,
    pub query_duration: HistogramVec,
    pub truncated_responses: IntCounter,
    pub error_responses: CounterVec,

    pub upstream_requests: CounterVec,
    pub upstream_errors: CounterVec,
    pub upstream_exchange_duration: HistogramVec,
    pub fan_out_all_failed: IntCounter,

    pub rate_limit_drops: IntCounter,
    pub rate_limit_buckets: IntGauge,

    pub sequence_errors: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cache_hits =
            IntCounter::with_opts(opts!("flowdns_cache_hits_total", "Total cache hits"))?;
        let cache_misses =
            IntCounter::with_opts(opts!("flowdns_cache_misses_total", "Total cache misses"))?;
        let cache_evictions = IntCounter::with_opts(opts!(
            "flowdns_cache_evictions_total",
            "Total cache entries evicted by capacity or sweep"
        ))?;
        let cache_size =
            IntGauge::with_opts(opts!("flowdns_cache_size", "Current cache entry count"))?;
        let cache_lazy_refreshes = IntCounter::with_opts(opts!(
            "flowdns_cache_lazy_refreshes_total",
            "Total background lazy-refresh builds scheduled"
        ))?;

        let queries_total = CounterVec::new(
            opts!("flowdns_queries_total", "Total queries handled, by transport"),
            &["transport"],
        )?;
        let query_duration = HistogramVec::new(
            histogram_opts!("flowdns_query_duration_seconds", "End-to-end query handling latency"),
            &["transport"],
        )?;
        let truncated_responses = IntCounter::with_opts(opts!(
            "flowdns_truncated_responses_total",
            "Total UDP responses truncated to fit the client buffer"
        ))?;
        let error_responses = CounterVec::new(
            opts!("flowdns_error_responses_total", "Total non-NOERROR responses, by rcode"),
            &["rcode"],
        )?;

        let upstream_requests = CounterVec::new(
            opts!("flowdns_upstream_requests_total", "Total upstream exchange attempts"),
            &["upstream", "transport"],
        )?;
        let upstream_errors = CounterVec::new(
            opts!("flowdns_upstream_errors_total", "Total upstream exchange failures"),
            &["upstream", "transport"],
        )?;
        let upstream_exchange_duration = HistogramVec::new(
            histogram_opts!(
                "flowdns_upstream_exchange_duration_seconds",
                "Upstream exchange latency"
            ),
            &["upstream", "transport"],
        )?;
        let fan_out_all_failed = IntCounter::with_opts(opts!(
            "flowdns_fan_out_all_failed_total",
            "Total fast-forward executions where every upstream failed"
        ))?;

        let rate_limit_drops = IntCounter::with_opts(opts!(
            "flowdns_rate_limit_drops_total",
            "Total queries refused by the rate limiter"
        ))?;
        let rate_limit_buckets = IntGauge::with_opts(opts!(
            "flowdns_rate_limit_buckets",
            "Current number of live rate-limiter buckets"
        ))?;

        let sequence_errors = CounterVec::new(
            opts!("flowdns_sequence_errors_total", "Total sequence engine errors, by kind"),
            &["kind"],
        )?;

        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_evictions.clone()))?;
        registry.register(Box::new(cache_size.clone()))?;
        registry.register(Box::new(cache_lazy_refreshes.clone()))?;
        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;
        registry.register(Box::new(truncated_responses.clone()))?;
        registry.register(Box::new(error_responses.clone()))?;
        registry.register(Box::new(upstream_requests.clone()))?;
        registry.register(Box::new(upstream_errors.clone()))?;
        registry.register(Box::new(upstream_exchange_duration.clone()))?;
        registry.register(Box::new(fan_out_all_failed.clone()))?;
        registry.register(Box::new(rate_limit_drops.clone()))?;
        registry.register(Box::new(rate_limit_buckets.clone()))?;
        registry.register(Box::new(sequence_errors.clone()))?;

        Ok(Self {
            registry,
            cache_hits,
            cache_misses,
            cache_evictions,
            cache_size,
            cache_lazy_refreshes,
            queries_total,
            query_duration,
            truncated_responses,
            error_responses,
            upstream_requests,
            upstream_errors,
            upstream_exchange_duration,
            fan_out_all_failed,
            rate_limit_drops,
            rate_limit_buckets,
            sequence_errors,
        })
    }

    /// Renders the registry in Prometheus text exposition format, for
    /// the admin HTTP surface to serve verbatim.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, TextEncoder};
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_without_error() {
        let m = Metrics::new().unwrap();
        m.cache_hits.inc();
        m.queries_total.with_label_values(&["udp"]).inc();
        let text = m.encode().unwrap();
        assert!(text.contains("flowdns_cache_hits_total"));
    }
}
