pub mod local_rate_limit;

use crate::config::LocalRateLimitConfig;
use crate::error::ConfigError;
use crate::proxy::context::{full_body, BoxBody, RequestContext};
use crate::ratelimit::Clock;
use crate::runtime::FeatureGate;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use local_rate_limit::FilterConfig;
use std::sync::Arc;

/// Result of a filter's on_request phase.
#[derive(Debug)]
pub enum FilterResult {
    /// Continue to the next filter / phase.
    Continue,
    /// Short-circuit: answer with this locally generated reply.
    Reject(LocalReply),
}

/// gRPC status codes used in local replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcStatus {
    Unknown = 2,
    ResourceExhausted = 8,
    Unavailable = 14,
}

impl GrpcStatus {
    /// The conventional mapping for an HTTP status.
    pub fn from_http(status: StatusCode) -> Self {
        match status.as_u16() {
            429 | 502 | 503 | 504 => GrpcStatus::Unavailable,
            _ => GrpcStatus::Unknown,
        }
    }
}

/// A response generated by a filter instead of the upstream.
#[derive(Debug, Clone)]
pub struct LocalReply {
    pub status: StatusCode,
    pub body: Bytes,
    pub headers: HeaderMap,
    /// Overrides the status derived from `status` when the request is gRPC.
    pub grpc_status: Option<GrpcStatus>,
    /// Why the reply was sent, for access logs.
    pub details: &'static str,
}

impl LocalReply {
    /// gRPC requests get HTTP 200 with the status in `grpc-status`, as gRPC
    /// clients expect.
    pub fn into_response(self, is_grpc: bool) -> hyper::Response<BoxBody> {
        let mut resp = hyper::Response::new(full_body(Bytes::new()));
        if is_grpc {
            let code = self.grpc_status.unwrap_or_else(|| GrpcStatus::from_http(self.status));
            let mut buf = itoa::Buffer::new();
            let headers = resp.headers_mut();
            headers.insert("content-type", HeaderValue::from_static("application/grpc"));
            headers.insert(
                "grpc-status",
                HeaderValue::from_str(buf.format(code as u8)).unwrap_or(HeaderValue::from_static("2")),
            );
            if let Ok(msg) = HeaderValue::from_maybe_shared(self.body.clone()) {
                headers.insert("grpc-message", msg);
            }
        } else {
            *resp.status_mut() = self.status;
            resp.headers_mut()
                .insert("content-type", HeaderValue::from_static("text/plain"));
            *resp.body_mut() = full_body(self.body);
        }
        for (name, value) in self.headers.iter() {
            resp.headers_mut().append(name.clone(), value.clone());
        }
        resp
    }
}

/// Shared dependencies handed to every filter at build time.
#[derive(Debug, Clone)]
pub struct FilterFactoryContext {
    pub runtime: Arc<dyn FeatureGate>,
    pub clock: Arc<dyn Clock>,
}

impl FilterFactoryContext {
    pub fn new(runtime: Arc<dyn FeatureGate>, clock: Arc<dyn Clock>) -> Self {
        Self { runtime, clock }
    }
}

/// Enum-based filter with static dispatch.
///
/// Filters are built once at config load, NOT per-request. State that must
/// not outlive a connection is kept in the connection context instead.
pub enum Filter {
    LocalRateLimit { config: Arc<FilterConfig> },
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Filter::LocalRateLimit { config } => f
                .debug_struct("LocalRateLimit")
                .field("stat_prefix", &config.stats().stat_prefix())
                .finish(),
        }
    }
}

impl Filter {
    /// Request phase. Return `FilterResult::Reject` to short-circuit.
    pub fn on_request(&self, ctx: &mut RequestContext) -> FilterResult {
        match self {
            Filter::LocalRateLimit { config } => {
                let config = effective_config(config, ctx);
                let filter = ctx.connection.local_rate_limit_filter(&config);
                filter.decode_headers(ctx)
            }
        }
    }

    /// Response phase. Runs for upstream responses and local replies alike.
    pub fn on_response(&self, ctx: &RequestContext, resp: &mut hyper::Response<BoxBody>) {
        match self {
            Filter::LocalRateLimit { config } => {
                let config = effective_config(config, ctx);
                let filter = ctx.connection.local_rate_limit_filter(&config);
                filter.encode_headers(ctx, resp.headers_mut());
            }
        }
    }
}

/// A route-level configuration replaces the listener-level one.
fn effective_config(listener: &Arc<FilterConfig>, ctx: &RequestContext) -> Arc<FilterConfig> {
    ctx.route
        .as_ref()
        .and_then(|r| r.local_rate_limit())
        .unwrap_or(listener)
        .clone()
}

/// Build the listener filter chain. Called once per configuration load.
pub fn build_filters(
    config: &LocalRateLimitConfig,
    factory: &FilterFactoryContext,
) -> Result<Vec<Filter>, ConfigError> {
    Ok(vec![Filter::LocalRateLimit {
        config: Arc::new(FilterConfig::new(config, factory)?),
    }])
}
