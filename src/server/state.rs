use crate::config::GatewayConfig;
use crate::error::ConfigError;
use crate::metrics::Metrics;
use crate::proxy::filter::{build_filters, Filter, FilterFactoryContext};
use crate::ratelimit::MonotonicClock;
use crate::routing::RouteTable;
use crate::runtime::Runtime;
use std::sync::Arc;
use tracing::info;

/// Shared server state, cheaply cloneable.
///
/// Everything here is compiled once from `GatewayConfig`; the request path
/// only reads it.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub metrics: Metrics,
    pub route_table: Arc<RouteTable>,
    /// Listener filter chain, applied to every request in order.
    pub filters: Arc<Vec<Filter>>,
}

impl GatewayState {
    /// Compile with the process runtime (config `runtime` overrides) and a
    /// monotonic clock.
    pub fn new(config: GatewayConfig, metrics: Metrics) -> Result<Self, ConfigError> {
        let factory = FilterFactoryContext::new(
            Arc::new(Runtime::new(config.runtime.clone())),
            Arc::new(MonotonicClock::default()),
        );
        Self::with_factory(config, metrics, &factory)
    }

    pub fn with_factory(
        config: GatewayConfig,
        metrics: Metrics,
        factory: &FilterFactoryContext,
    ) -> Result<Self, ConfigError> {
        let filters = build_filters(&config.local_rate_limit, factory)?;
        let route_table = RouteTable::new(&config.virtual_hosts, factory)?;
        info!(
            filters = filters.len(),
            routes = route_table.route_count(),
            "server: state compiled"
        );
        Ok(Self {
            config: Arc::new(config),
            metrics,
            route_table: Arc::new(route_table),
            filters: Arc::new(filters),
        })
    }
}
