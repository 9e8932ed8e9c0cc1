//! Prometheus registry implementing the metrics sink described in spec
//! §6.6: query/cache/mark counters, request-duration and upstream-RTT
//! histograms, and the cache/readiness/tracked-IP gauges.

use prometheus::{
    CounterVec, Gauge, GaugeVec, Histogram, HistogramVec, IntCounter, Registry, histogram_opts,
    opts,
};
use tracing::warn;

pub struct Metrics {
    registry: Registry,

    queries_total: IntCounter,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    cache_evictions: IntCounter,
    resolve_errors: CounterVec,
    marks_success: IntCounter,
    marks_error: IntCounter,
    marks_dropped: IntCounter,

    request_duration: Histogram,
    request_duration_by_upstream: HistogramVec,
    upstream_rtt: Histogram,

    cache_entries: Gauge,
    cache_bytes: Gauge,
    service_ready: Gauge,
    tracked_ips: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queries_total = IntCounter::with_opts(opts!(
            "dns_queries_total",
            "Total number of DNS queries received"
        ))?;
        let cache_hits = IntCounter::with_opts(opts!(
            "dns_cache_hits_total",
            "Total number of cache hits"
        ))?;
        let cache_misses = IntCounter::with_opts(opts!(
            "dns_cache_misses_total",
            "Total number of cache misses"
        ))?;
        let cache_evictions = IntCounter::with_opts(opts!(
            "dns_cache_evictions_total",
            "Total number of cache evictions"
        ))?;
        let resolve_errors = CounterVec::new(
            opts!(
                "dns_resolve_errors_total",
                "Total number of upstream resolve errors"
            ),
            &["upstream"],
        )?;
        let marks_success = IntCounter::with_opts(opts!(
            "marks_success_total",
            "Total number of successful MarkIP calls"
        ))?;
        let marks_error = IntCounter::with_opts(opts!(
            "marks_error_total",
            "Total number of failed MarkIP calls"
        ))?;
        let marks_dropped = IntCounter::with_opts(opts!(
            "marks_dropped_total",
            "Total number of mark requests dropped by dedup"
        ))?;

        let request_duration = Histogram::with_opts(histogram_opts!(
            "dns_request_duration_seconds",
            "DNS request handling duration"
        ))?;
        let request_duration_by_upstream = HistogramVec::new(
            histogram_opts!(
                "dns_request_duration_seconds_by_upstream",
                "DNS request handling duration broken down by upstream"
            ),
            &["upstream"],
        )?;
        let upstream_rtt = Histogram::with_opts(histogram_opts!(
            "dns_upstream_rtt_seconds",
            "Upstream exchange round-trip time"
        ))?;

        let cache_entries = Gauge::with_opts(opts!("cache_entries", "Current cache entry count"))?;
        let cache_bytes = Gauge::with_opts(opts!("cache_bytes", "Current cache size in bytes"))?;
        let service_ready = Gauge::with_opts(opts!("service_ready", "1 once the listener is bound"))?;
        let tracked_ips = GaugeVec::new(
            opts!("tracked_ips", "Number of IPs currently marked per interface"),
            &["iface"],
        )?;

        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_evictions.clone()))?;
        registry.register(Box::new(resolve_errors.clone()))?;
        registry.register(Box::new(marks_success.clone()))?;
        registry.register(Box::new(marks_error.clone()))?;
        registry.register(Box::new(marks_dropped.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(request_duration_by_upstream.clone()))?;
        registry.register(Box::new(upstream_rtt.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;
        registry.register(Box::new(cache_bytes.clone()))?;
        registry.register(Box::new(service_ready.clone()))?;
        registry.register(Box::new(tracked_ips.clone()))?;

        Ok(Metrics {
            registry,
            queries_total,
            cache_hits,
            cache_misses,
            cache_evictions,
            resolve_errors,
            marks_success,
            marks_error,
            marks_dropped,
            request_duration,
            request_duration_by_upstream,
            upstream_rtt,
            cache_entries,
            cache_bytes,
            service_ready,
            tracked_ips,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn inc_queries(&self) {
        self.queries_total.inc();
    }

    pub fn inc_cache_hit(&self) {
        self.cache_hits.inc();
    }

    pub fn inc_cache_miss(&self) {
        self.cache_misses.inc();
    }

    pub fn inc_cache_eviction(&self) {
        self.cache_evictions.inc();
    }

    pub fn inc_resolve_error(&self, upstream: &str) {
        self.resolve_errors.with_label_values(&[upstream]).inc();
    }

    pub fn inc_marks_success(&self) {
        self.marks_success.inc();
    }

    pub fn inc_marks_error(&self) {
        self.marks_error.inc();
    }

    pub fn inc_marks_dropped(&self) {
        self.marks_dropped.inc();
    }

    /// Records a per-upstream request duration sample (chain resolver only
    /// — it is the sole stage that knows which upstream answered).
    pub fn observe_upstream_duration(&self, upstream: &str, seconds: f64) {
        self.request_duration_by_upstream
            .with_label_values(&[upstream])
            .observe(seconds);
    }

    /// Records the end-to-end request duration (metrics wrapper, spec
    /// §6.6 `dns.request.duration`).
    pub fn observe_total_duration(&self, seconds: f64) {
        self.request_duration.observe(seconds);
    }

    pub fn observe_upstream_rtt(&self, seconds: f64) {
        self.upstream_rtt.observe(seconds);
    }

    pub fn set_cache_entries(&self, count: usize) {
        self.cache_entries.set(count as f64);
    }

    pub fn set_cache_bytes(&self, bytes: usize) {
        self.cache_bytes.set(bytes as f64);
    }

    pub fn set_ready(&self, ready: bool) {
        self.service_ready.set(if ready { 1.0 } else { 0.0 });
    }

    pub fn set_tracked_ips(&self, iface: &str, count: usize) {
        self.tracked_ips.with_label_values(&[iface]).set(count as f64);
    }

    /// Renders the registry in Prometheus text exposition format, for an
    /// embedding binary (or out-of-scope admin layer) to serve.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, TextEncoder};
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            warn!(error = %e, "metrics output was not valid utf-8");
            prometheus::Error::Msg(e.to_string())
        })
    }
}
