mod header;
mod matcher;
mod policy;

pub use header::{all_match, CompiledHeaderMatcher, HeaderMatchType};
pub use matcher::{CompiledRoute, CompiledVirtualHost, DirectResponse, RouteTable, UriPattern};
pub use policy::{HitsAddend, RateLimitAction, RateLimitPolicy, RateLimitRule};

use crate::proxy::filter::local_rate_limit::FilterConfig;
use crate::ratelimit::DescriptorSource;
use std::sync::Arc;

/// The view of a matched route that rate limiting needs.
pub trait RouteEntry: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Upstream cluster; `None` for routes that never reach one.
    fn cluster(&self) -> Option<&str>;

    /// Forces virtual host rate limits to be included.
    fn include_virtual_host_rate_limits(&self) -> bool;

    fn rate_limit_policy(&self) -> &dyn DescriptorSource;

    fn virtual_host_rate_limit_policy(&self) -> &dyn DescriptorSource;

    /// Route-level replacement for the filter configuration.
    fn local_rate_limit(&self) -> Option<&Arc<FilterConfig>> {
        None
    }
}
