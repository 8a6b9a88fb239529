use crate::config::{RouteConfig, VirtualHostConfig};
use crate::error::ConfigError;
use crate::proxy::filter::local_rate_limit::FilterConfig;
use crate::proxy::filter::FilterFactoryContext;
use crate::ratelimit::DescriptorSource;
use crate::routing::policy::RateLimitPolicy;
use crate::routing::RouteEntry;
use bytes::Bytes;
use http::uri::Authority;
use http::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;

/// The route table, partitioned by host.
///
/// Matching order:
/// 1. Exact host match (O(1) HashMap lookup)
/// 2. Wildcard host patterns (linear scan over small set)
/// 3. Default virtual host (host `_`)
///
/// Within a virtual host, routes are tried in configuration order and the
/// first one whose uri and method match wins.
#[derive(Debug, Default)]
pub struct RouteTable {
    exact_hosts: HashMap<String, Arc<CompiledVirtualHost>>,
    wildcard_hosts: Vec<(String, Arc<CompiledVirtualHost>)>,
    default: Option<Arc<CompiledVirtualHost>>,
    route_count: usize,
}

#[derive(Debug)]
pub struct CompiledVirtualHost {
    pub name: String,
    pub routes: Vec<Arc<CompiledRoute>>,
}

/// A compiled route, the runtime counterpart of `RouteConfig`.
#[derive(Debug)]
pub struct CompiledRoute {
    pub name: String,
    pub uri: UriPattern,
    pub methods: Vec<String>,
    pub cluster: Option<String>,
    pub include_vh_rate_limits: bool,
    pub rate_limits: RateLimitPolicy,
    /// Shared with every route of the same virtual host.
    pub vh_rate_limits: Arc<RateLimitPolicy>,
    pub direct_response: DirectResponse,
    pub max_body_bytes: Option<u64>,
    pub local_rate_limit: Option<Arc<FilterConfig>>,
}

#[derive(Debug, Clone)]
pub struct DirectResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// "/v1/users/*" -> Prefix("/v1/users"), "/*" -> Any, anything else exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriPattern {
    Exact(String),
    Prefix(String),
    Any,
}

impl UriPattern {
    pub fn parse(uri: &str) -> Self {
        match uri.strip_suffix("/*") {
            Some("") => UriPattern::Any,
            Some(base) => UriPattern::Prefix(base.to_string()),
            None if uri == "*" => UriPattern::Any,
            None => UriPattern::Exact(uri.to_string()),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        match self {
            UriPattern::Any => true,
            UriPattern::Exact(p) => path == p,
            UriPattern::Prefix(base) => path
                .strip_prefix(base.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/')),
        }
    }
}

impl CompiledRoute {
    fn compile(
        cfg: &RouteConfig,
        vh_rate_limits: Arc<RateLimitPolicy>,
        factory: &FilterFactoryContext,
    ) -> Result<Self, ConfigError> {
        let local_rate_limit = cfg
            .local_rate_limit
            .as_ref()
            .map(|c| FilterConfig::new(c, factory).map(Arc::new))
            .transpose()?;
        let status = StatusCode::from_u16(cfg.direct_response.status).map_err(|_| {
            ConfigError::InvalidStatus {
                route: cfg.name.clone(),
                status: cfg.direct_response.status,
            }
        })?;
        Ok(Self {
            name: cfg.name.clone(),
            uri: UriPattern::parse(&cfg.uri),
            methods: cfg.methods.iter().map(|m| m.to_uppercase()).collect(),
            cluster: cfg.cluster.clone(),
            include_vh_rate_limits: cfg.include_vh_rate_limits,
            rate_limits: RateLimitPolicy::compile(&cfg.rate_limits, &factory.runtime)?,
            vh_rate_limits,
            direct_response: DirectResponse {
                status,
                body: Bytes::from(cfg.direct_response.body.clone()),
            },
            max_body_bytes: cfg.max_body_bytes,
            local_rate_limit,
        })
    }

    fn matches(&self, path: &str, method_upper: &str) -> bool {
        (self.methods.is_empty() || self.methods.iter().any(|m| m == method_upper))
            && self.uri.matches(path)
    }
}

impl RouteEntry for CompiledRoute {
    fn name(&self) -> &str {
        &self.name
    }

    fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    fn include_virtual_host_rate_limits(&self) -> bool {
        self.include_vh_rate_limits
    }

    fn rate_limit_policy(&self) -> &dyn DescriptorSource {
        &self.rate_limits
    }

    fn virtual_host_rate_limit_policy(&self) -> &dyn DescriptorSource {
        self.vh_rate_limits.as_ref()
    }

    fn local_rate_limit(&self) -> Option<&Arc<FilterConfig>> {
        self.local_rate_limit.as_ref()
    }
}

impl RouteTable {
    /// Build from virtual host configs. Hosts `_` make up the default
    /// virtual host; all other hosts are partitioned into exact or wildcard.
    pub fn new(
        virtual_hosts: &[VirtualHostConfig],
        factory: &FilterFactoryContext,
    ) -> Result<Self, ConfigError> {
        let mut table = RouteTable::default();

        for vh in virtual_hosts {
            let vh_rate_limits = Arc::new(RateLimitPolicy::compile(&vh.rate_limits, &factory.runtime)?);
            let routes = vh
                .routes
                .iter()
                .map(|r| CompiledRoute::compile(r, vh_rate_limits.clone(), factory).map(Arc::new))
                .collect::<Result<Vec<_>, _>>()?;
            table.route_count += routes.len();
            tracing::debug!(
                "routing: compiled virtual host, name={}, routes={}, rate_limits={}",
                vh.name,
                routes.len(),
                vh_rate_limits.rules().len(),
            );

            let compiled = Arc::new(CompiledVirtualHost {
                name: vh.name.clone(),
                routes,
            });
            for host in &vh.hosts {
                if host == "_" {
                    table.default = Some(compiled.clone());
                } else if host.contains('*') {
                    table.wildcard_hosts.push((host.clone(), compiled.clone()));
                } else {
                    table
                        .exact_hosts
                        .insert(host.to_ascii_lowercase(), compiled.clone());
                }
            }
        }

        tracing::info!("routing: compiled route table, count={}", table.route_count);
        Ok(table)
    }

    /// Lookup order: exact host → wildcard host → default (host `_`).
    pub fn match_route(&self, host: &str, uri: &str, method: &str) -> Option<Arc<CompiledRoute>> {
        let method_upper = method.to_uppercase();
        let authority = host.parse::<Authority>().ok();
        let req_host = authority.as_ref().map_or(host, Authority::host);
        let req_host_lower = req_host.to_ascii_lowercase();

        // 1. Exact host
        if let Some(vh) = self.exact_hosts.get(&req_host_lower) {
            if let Some(route) = match_in_vhost(vh, uri, &method_upper) {
                return Some(route);
            }
        }

        // 2. Wildcard host patterns
        for (pattern, vh) in &self.wildcard_hosts {
            if host_matches(req_host, pattern) {
                if let Some(route) = match_in_vhost(vh, uri, &method_upper) {
                    return Some(route);
                }
            }
        }

        // 3. Default fallback (host "_")
        self.default
            .as_ref()
            .and_then(|vh| match_in_vhost(vh, uri, &method_upper))
    }

    pub fn route_count(&self) -> usize {
        self.route_count
    }
}

fn match_in_vhost(vh: &CompiledVirtualHost, uri: &str, method_upper: &str) -> Option<Arc<CompiledRoute>> {
    vh.routes.iter().find(|r| r.matches(uri, method_upper)).cloned()
}

/// Match a request host against a route host pattern.
///
/// Supported patterns:
/// - `api.example.com`: exact match (case-insensitive)
/// - `*.example.com`: suffix wildcard (matches any subdomain)
/// - `api.*`: prefix wildcard (matches any TLD/domain change)
fn host_matches(req_host: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        req_host.len() >= suffix.len()
            && req_host.is_char_boundary(req_host.len() - suffix.len())
            && req_host[req_host.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        req_host.len() >= prefix.len()
            && req_host.is_char_boundary(prefix.len())
            && req_host[..prefix.len()].eq_ignore_ascii_case(prefix)
    } else {
        req_host.eq_ignore_ascii_case(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DirectResponseConfig, LocalRateLimitConfig, RateLimitActionConfig, RateLimitConfig,
    };
    use crate::ratelimit::ManualClock;
    use crate::runtime::StaticGate;

    fn factory() -> FilterFactoryContext {
        FilterFactoryContext::new(Arc::new(StaticGate(true)), Arc::new(ManualClock::new()))
    }

    fn make_route(name: &str, uri: &str) -> RouteConfig {
        RouteConfig {
            name: name.to_string(),
            uri: uri.to_string(),
            methods: vec![],
            cluster: Some("backend".to_string()),
            include_vh_rate_limits: false,
            rate_limits: vec![],
            direct_response: DirectResponseConfig::default(),
            max_body_bytes: None,
            local_rate_limit: None,
        }
    }

    fn make_vhost(name: &str, hosts: &[&str], routes: Vec<RouteConfig>) -> VirtualHostConfig {
        VirtualHostConfig {
            name: name.to_string(),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            rate_limits: vec![],
            routes,
        }
    }

    #[test]
    fn test_uri_patterns() {
        assert_eq!(UriPattern::parse("/*"), UriPattern::Any);
        assert_eq!(UriPattern::parse("/v1/*"), UriPattern::Prefix("/v1".to_string()));
        assert_eq!(UriPattern::parse("/v1"), UriPattern::Exact("/v1".to_string()));

        let prefix = UriPattern::parse("/v1/users/*");
        assert!(prefix.matches("/v1/users"));
        assert!(prefix.matches("/v1/users/42"));
        assert!(prefix.matches("/v1/users/42?x=1"));
        assert!(!prefix.matches("/v1/usersx"));
        assert!(!prefix.matches("/v2/users"));

        let exact = UriPattern::parse("/health");
        assert!(exact.matches("/health"));
        assert!(exact.matches("/health?verbose=1"));
        assert!(!exact.matches("/health/x"));
    }

    #[test]
    fn test_host_lookup_order() {
        let table = RouteTable::new(
            &[
                make_vhost("exact", &["api.example.com"], vec![make_route("exact", "/*")]),
                make_vhost("wild", &["*.example.com"], vec![make_route("wild", "/*")]),
                make_vhost("default", &["_"], vec![make_route("default", "/*")]),
            ],
            &factory(),
        )
        .unwrap();
        assert_eq!(table.route_count(), 3);
        assert_eq!(table.match_route("API.example.com:8080", "/", "GET").unwrap().name, "exact");
        assert_eq!(table.match_route("www.example.com", "/", "GET").unwrap().name, "wild");
        assert_eq!(table.match_route("other.org", "/", "GET").unwrap().name, "default");
    }

    #[test]
    fn test_host_port_is_stripped() {
        let table = RouteTable::new(
            &[
                make_vhost("v6", &["[::1]"], vec![make_route("v6", "/*")]),
                make_vhost("v4", &["127.0.0.1"], vec![make_route("v4", "/*")]),
                make_vhost("default", &["_"], vec![make_route("default", "/*")]),
            ],
            &factory(),
        )
        .unwrap();
        assert_eq!(table.match_route("[::1]:8080", "/", "GET").unwrap().name, "v6");
        assert_eq!(table.match_route("[::1]", "/", "GET").unwrap().name, "v6");
        assert_eq!(table.match_route("127.0.0.1:8080", "/", "GET").unwrap().name, "v4");
        assert_eq!(table.match_route("[::2]:8080", "/", "GET").unwrap().name, "default");
        assert_eq!(table.match_route("", "/", "GET").unwrap().name, "default");
    }

    #[test]
    fn test_invalid_direct_status_fails_build() {
        let mut route = make_route("bad", "/*");
        route.direct_response.status = 1000;
        let err = RouteTable::new(&[make_vhost("vh", &["_"], vec![route])], &factory()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStatus { status: 1000, .. }));
    }

    #[test]
    fn test_no_default_no_match() {
        let table = RouteTable::new(
            &[make_vhost("a", &["a.com"], vec![make_route("r", "/x")])],
            &factory(),
        )
        .unwrap();
        assert!(table.match_route("b.com", "/x", "GET").is_none());
        assert!(table.match_route("a.com", "/y", "GET").is_none());
    }

    #[test]
    fn test_first_route_wins_and_methods_filter() {
        let mut post_only = make_route("post", "/items");
        post_only.methods = vec!["post".to_string()];
        let table = RouteTable::new(
            &[make_vhost(
                "vh",
                &["_"],
                vec![post_only, make_route("items", "/items"), make_route("all", "/*")],
            )],
            &factory(),
        )
        .unwrap();
        assert_eq!(table.match_route("h", "/items", "POST").unwrap().name, "post");
        assert_eq!(table.match_route("h", "/items", "GET").unwrap().name, "items");
        assert_eq!(table.match_route("h", "/other", "GET").unwrap().name, "all");
    }

    #[test]
    fn test_route_entry_view() {
        let mut route = make_route("r", "/*");
        route.include_vh_rate_limits = true;
        route.cluster = None;
        route.local_rate_limit = Some(LocalRateLimitConfig::default());
        let mut vh = make_vhost("vh", &["_"], vec![route]);
        vh.rate_limits = vec![RateLimitConfig {
            stage: 0,
            actions: vec![RateLimitActionConfig::RemoteAddress],
            hits_addend: None,
            disable_key: None,
        }];
        let table = RouteTable::new(&[vh], &factory()).unwrap();
        let route = table.match_route("h", "/", "GET").unwrap();
        assert_eq!(route.cluster(), None);
        assert!(route.include_virtual_host_rate_limits());
        assert!(route.rate_limit_policy().is_empty());
        assert!(!route.virtual_host_rate_limit_policy().is_empty());
        assert!(route.local_rate_limit().is_some());
        assert_eq!(route.direct_response.status, StatusCode::OK);
    }

    #[test]
    fn test_invalid_rate_limit_fails_build() {
        let mut route = make_route("r", "/*");
        route.rate_limits = vec![RateLimitConfig {
            stage: 0,
            actions: vec![],
            hits_addend: None,
            disable_key: None,
        }];
        let err = RouteTable::new(&[make_vhost("vh", &["_"], vec![route])], &factory()).unwrap_err();
        assert!(matches!(err, ConfigError::NoActions));
    }

    #[test]
    fn test_host_matches() {
        assert!(host_matches("api.example.com", "*.example.com"));
        assert!(!host_matches("example.org", "*.example.com"));
        assert!(host_matches("api.example.org", "api.*"));
        assert!(host_matches("API.EXAMPLE.COM", "api.example.com"));
    }
}
