use crate::proxy::filter::local_rate_limit::{FilterConfig, LocalRateLimitFilter};
use crate::ratelimit::RateLimitDecision;
use crate::routing::RouteEntry;
use bytes::Bytes;
use http::HeaderMap;
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

/// State that lives as long as one downstream connection.
#[derive(Debug)]
pub struct ConnectionContext {
    peer_addr: SocketAddr,
    /// Filter instances keyed by filter config id, built on first use.
    local_rate_limit: Mutex<HashMap<u64, Arc<LocalRateLimitFilter>>>,
}

impl ConnectionContext {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            local_rate_limit: Mutex::new(HashMap::new()),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The filter instance for `config` on this connection. With per-connection
    /// buckets every connection gets its own instance; otherwise the instance
    /// wraps the config's shared buckets.
    pub fn local_rate_limit_filter(&self, config: &Arc<FilterConfig>) -> Arc<LocalRateLimitFilter> {
        self.local_rate_limit
            .lock()
            .entry(config.id())
            .or_insert_with(|| Arc::new(LocalRateLimitFilter::new(config.clone())))
            .clone()
    }
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
    }
}

pub struct RequestContext {
    pub host: String,
    pub uri_path: String,
    pub method: String,
    pub client_ip: IpAddr,
    pub headers: HeaderMap,
    /// Request body bytes received so far; 0 while only headers have arrived.
    pub bytes_received: u64,
    pub start: Instant,
    pub route: Option<Arc<dyn RouteEntry>>,
    pub connection: Arc<ConnectionContext>,
    /// Set by the rate limit filter in the request phase, read back in the
    /// response phase.
    pub rate_limit_decision: Option<RateLimitDecision>,
}

impl RequestContext {
    pub fn new(
        host: String,
        uri_path: String,
        method: String,
        client_ip: IpAddr,
        headers: HeaderMap,
        connection: Arc<ConnectionContext>,
    ) -> Self {
        Self {
            host,
            uri_path,
            method,
            client_ip,
            headers,
            bytes_received: 0,
            start: Instant::now(),
            route: None,
            connection,
            rate_limit_decision: None,
        }
    }

    pub fn route_name(&self) -> &str {
        self.route.as_ref().map_or("", |r| r.name())
    }

    /// First value of header `name` as UTF-8, if any.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("host", &self.host)
            .field("uri_path", &self.uri_path)
            .field("method", &self.method)
            .field("client_ip", &self.client_ip)
            .field("route", &self.route_name())
            .finish()
    }
}
