use crate::config::{
    LocalRateLimitConfig, RuntimeFractionalPercent, VhRateLimitsMode, XRateLimitHeaders,
};
use crate::error::ConfigError;
use crate::proxy::context::RequestContext;
use crate::proxy::filter::{FilterFactoryContext, FilterResult, GrpcStatus, LocalReply};
use crate::proxy::formatter::{apply_rendered, HeaderMutations};
use crate::ratelimit::{
    BucketScope, BucketSet, Clock, DescriptorDefinition, DescriptorSourceResolver,
    DescriptorTable, LocalRateLimiter, RateLimitDecision,
};
use crate::routing::RateLimitPolicy;
use crate::runtime::FeatureGate;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const LOCAL_RATE_LIMITED: &str = "local_rate_limited";

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

static NEXT_CONFIG_ID: AtomicU64 = AtomicU64::new(1);

/// Filter counters. Kept as atomics so they can be read back (metrics facade
/// counters are write-only) and mirrored into the Prometheus recorder.
#[derive(Debug, Default)]
pub struct LocalRateLimitStats {
    stat_prefix: String,
    enabled: AtomicU64,
    enforced: AtomicU64,
    ok: AtomicU64,
    rate_limited: AtomicU64,
}

/// Point-in-time copy of `LocalRateLimitStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub enabled: u64,
    pub enforced: u64,
    pub ok: u64,
    pub rate_limited: u64,
}

impl LocalRateLimitStats {
    fn new(stat_prefix: &str) -> Self {
        Self {
            stat_prefix: stat_prefix.to_string(),
            ..Default::default()
        }
    }

    pub fn stat_prefix(&self) -> &str {
        &self.stat_prefix
    }

    fn inc_enabled(&self) {
        self.enabled.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("http_local_rate_limit_enabled_total", "stat_prefix" => self.stat_prefix.clone())
            .increment(1);
    }

    fn inc_enforced(&self) {
        self.enforced.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("http_local_rate_limit_enforced_total", "stat_prefix" => self.stat_prefix.clone())
            .increment(1);
    }

    fn inc_ok(&self) {
        self.ok.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("http_local_rate_limit_ok_total", "stat_prefix" => self.stat_prefix.clone())
            .increment(1);
    }

    fn inc_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("http_local_rate_limit_rate_limited_total", "stat_prefix" => self.stat_prefix.clone())
            .increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enabled: self.enabled.load(Ordering::Relaxed),
            enforced: self.enforced.load(Ordering::Relaxed),
            ok: self.ok.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

/// Compiled filter configuration, shared by every request that uses it.
#[derive(Debug)]
pub struct FilterConfig {
    id: u64,
    limiter: LocalRateLimiter,
    /// `None` when every connection gets its own buckets.
    shared_buckets: Option<Arc<BucketSet>>,
    clock: Arc<dyn Clock>,
    runtime: Arc<dyn FeatureGate>,
    filter_enabled: Option<RuntimeFractionalPercent>,
    filter_enforced: Option<RuntimeFractionalPercent>,
    rejected_code: StatusCode,
    grpc_status: Option<GrpcStatus>,
    response_headers_to_add: HeaderMutations,
    request_headers_to_add_when_not_enforced: HeaderMutations,
    x_ratelimit_headers: XRateLimitHeaders,
    stage: u32,
    vh_rate_limits: VhRateLimitsMode,
    rate_limits: RateLimitPolicy,
    stats: LocalRateLimitStats,
}

impl FilterConfig {
    pub fn new(
        cfg: &LocalRateLimitConfig,
        factory: &FilterFactoryContext,
    ) -> Result<Self, ConfigError> {
        if cfg.stat_prefix.is_empty() {
            return Err(ConfigError::EmptyStatPrefix);
        }

        let definitions = cfg
            .descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| {
                Ok(DescriptorDefinition {
                    descriptor: d.entries.iter().map(|e| (e.key.as_str(), e.value.as_str())).collect(),
                    token_bucket: d.token_bucket.bucket_spec(&format!("descriptors[{i}]"))?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let table = DescriptorTable::new(cfg.token_bucket.bucket_spec("token_bucket")?, definitions)?;
        let limiter = LocalRateLimiter::new(Arc::new(table), cfg.always_consume_default_token_bucket);

        let shared_buckets = if cfg.per_downstream_connection {
            None
        } else {
            Some(Arc::new(limiter.new_bucket_set(factory.clock.clone())))
        };

        // Envoy convention: anything below 400 is not a rejection status.
        let rejected_code = StatusCode::from_u16(cfg.rejected_code)
            .ok()
            .filter(|s| s.as_u16() >= 400)
            .unwrap_or(StatusCode::TOO_MANY_REQUESTS);

        let config = Self {
            id: NEXT_CONFIG_ID.fetch_add(1, Ordering::Relaxed),
            limiter,
            shared_buckets,
            clock: factory.clock.clone(),
            runtime: factory.runtime.clone(),
            filter_enabled: cfg.filter_enabled.clone(),
            filter_enforced: cfg.filter_enforced.clone(),
            rejected_code,
            grpc_status: cfg
                .rate_limited_as_resource_exhausted
                .then_some(GrpcStatus::ResourceExhausted),
            response_headers_to_add: HeaderMutations::compile(&cfg.response_headers_to_add)?,
            request_headers_to_add_when_not_enforced: HeaderMutations::compile(
                &cfg.request_headers_to_add_when_not_enforced,
            )?,
            x_ratelimit_headers: cfg.enable_x_ratelimit_headers,
            stage: cfg.stage,
            vh_rate_limits: cfg.vh_rate_limits,
            rate_limits: RateLimitPolicy::compile(&cfg.rate_limits, &factory.runtime)?,
            stats: LocalRateLimitStats::new(&cfg.stat_prefix),
        };

        tracing::info!(
            stat_prefix = %cfg.stat_prefix,
            descriptors = config.limiter.table().definitions().len(),
            per_connection = cfg.per_downstream_connection,
            "local_rate_limit: filter config built"
        );
        Ok(config)
    }

    /// Unique per built configuration; keys per-connection filter instances.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stats(&self) -> &LocalRateLimitStats {
        &self.stats
    }

    pub fn rejected_code(&self) -> StatusCode {
        self.rejected_code
    }

    pub fn per_connection(&self) -> bool {
        self.shared_buckets.is_none()
    }

    fn enabled(&self) -> bool {
        self.runtime.enabled(self.filter_enabled.as_ref())
    }

    fn enforced(&self) -> bool {
        self.runtime.enabled(self.filter_enforced.as_ref())
    }

    fn bucket_scope(&self) -> BucketScope {
        match &self.shared_buckets {
            Some(shared) => BucketScope::Shared(shared.clone()),
            None => BucketScope::Owned(self.limiter.new_bucket_set(self.clock.clone())),
        }
    }
}

/// A filter instance: a configuration plus the buckets it draws from.
#[derive(Debug)]
pub struct LocalRateLimitFilter {
    config: Arc<FilterConfig>,
    buckets: BucketScope,
}

impl LocalRateLimitFilter {
    pub fn new(config: Arc<FilterConfig>) -> Self {
        let buckets = config.bucket_scope();
        Self { config, buckets }
    }

    pub fn config(&self) -> &Arc<FilterConfig> {
        &self.config
    }

    /// Request phase. Records the decision in `req` for the response phase.
    pub fn decode_headers(&self, req: &mut RequestContext) -> FilterResult {
        let config = &self.config;
        if !config.enabled() {
            return FilterResult::Continue;
        }
        config.stats.inc_enabled();

        let descriptors =
            DescriptorSourceResolver::new(&config.rate_limits, config.stage, config.vh_rate_limits)
                .resolve(req);
        let decision = config.limiter.request_allowed(self.buckets.buckets(), &descriptors);
        req.rate_limit_decision = Some(decision);

        if decision.allowed {
            config.stats.inc_ok();
            return FilterResult::Continue;
        }

        config.stats.inc_rate_limited();

        if !config.enforced() {
            let rendered = config.request_headers_to_add_when_not_enforced.render(req);
            apply_rendered(rendered, &mut req.headers);
            return FilterResult::Continue;
        }

        config.stats.inc_enforced();
        tracing::debug!(
            stat_prefix = %config.stats.stat_prefix(),
            route = %req.route_name(),
            descriptors = descriptors.len(),
            "local_rate_limit: request rejected"
        );

        let mut headers = HeaderMap::new();
        config.response_headers_to_add.apply(req, &mut headers);
        FilterResult::Reject(LocalReply {
            status: config.rejected_code,
            body: Bytes::from_static(LOCAL_RATE_LIMITED.as_bytes()),
            headers,
            grpc_status: config.grpc_status,
            details: LOCAL_RATE_LIMITED,
        })
    }

    /// Response phase. A no-op unless the request phase ran and the
    /// rate-limit headers are enabled.
    pub fn encode_headers(&self, req: &RequestContext, headers: &mut HeaderMap) {
        if self.config.x_ratelimit_headers == XRateLimitHeaders::Off {
            return;
        }
        let Some(decision) = req.rate_limit_decision else {
            return;
        };
        insert_x_ratelimit_headers(&decision, headers);
    }
}

fn insert_x_ratelimit_headers(decision: &RateLimitDecision, headers: &mut HeaderMap) {
    let mut buf = itoa::Buffer::new();
    headers.insert(X_RATELIMIT_LIMIT, numeric_value(&mut buf, decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, numeric_value(&mut buf, decision.remaining));
    // Whole seconds, rounded up so a pending refill never reads as 0.
    let reset = decision.reset.as_millis().div_ceil(1000);
    let reset = u64::try_from(reset).unwrap_or(u64::MAX);
    headers.insert(X_RATELIMIT_RESET, numeric_value(&mut buf, reset));
}

fn numeric_value(buf: &mut itoa::Buffer, n: u64) -> HeaderValue {
    HeaderValue::from_str(buf.format(n)).unwrap_or(HeaderValue::from_static("0"))
}
