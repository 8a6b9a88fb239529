use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** at startup before any `counter!` /
    /// `histogram!` calls.
    pub fn install() -> anyhow::Result<Self> {
        let handle = builder()?.install_recorder()?;
        describe();
        Ok(Self { handle })
    }

    /// A recorder that is not installed globally. Renders only what is
    /// recorded through it directly; used where a global recorder may
    /// already exist.
    pub fn detached() -> anyhow::Result<Self> {
        let recorder = builder()?.build_recorder();
        Ok(Self {
            handle: recorder.handle(),
        })
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn builder() -> anyhow::Result<PrometheusBuilder> {
    Ok(PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("_duration_seconds".to_string()), LATENCY_BUCKETS)?)
}

fn describe() {
    // local rate limit filter
    describe_counter!(
        "http_local_rate_limit_enabled_total",
        Unit::Count,
        "Requests for which the local rate limit filter was enabled"
    );
    describe_counter!(
        "http_local_rate_limit_enforced_total",
        Unit::Count,
        "Rate limited requests that were answered with a local reply"
    );
    describe_counter!(
        "http_local_rate_limit_ok_total",
        Unit::Count,
        "Requests allowed by the local rate limiter"
    );
    describe_counter!(
        "http_local_rate_limit_rate_limited_total",
        Unit::Count,
        "Requests over the limit, enforced or not"
    );

    // request path
    describe_counter!(
        "gateway_http_requests_total",
        Unit::Count,
        "Total HTTP requests processed"
    );
    describe_histogram!(
        "gateway_http_request_duration_seconds",
        Unit::Seconds,
        "Total request duration from client perspective"
    );

    // connections
    describe_counter!(
        "gateway_connections_total",
        Unit::Count,
        "Total connections accepted"
    );
    describe_gauge!(
        "gateway_connections_active",
        Unit::Count,
        "Number of active downstream connections"
    );
}
