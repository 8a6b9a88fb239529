use crate::config::VhRateLimitsMode;
use crate::proxy::context::RequestContext;
use crate::ratelimit::descriptor::WeightedDescriptor;
use crate::routing::RateLimitPolicy;

/// Anything that can turn a request into rate limit descriptors.
pub trait DescriptorSource: Send + Sync + std::fmt::Debug {
    /// `true` when the source has no rules at all, at any stage.
    fn is_empty(&self) -> bool;

    fn populate_descriptors(&self, stage: u32, req: &RequestContext) -> Vec<WeightedDescriptor>;
}

/// Where a request's descriptors come from, in evaluation order.
#[derive(Debug, Clone, Copy)]
enum Origin<'a> {
    /// Rules configured on the filter; every stage applies.
    Filter(&'a RateLimitPolicy),
    Route(&'a dyn DescriptorSource),
    VirtualHost(&'a dyn DescriptorSource),
}

/// Collects descriptors for one request from the filter's own rules and from
/// the matched route and its virtual host.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorSourceResolver<'a> {
    local: &'a RateLimitPolicy,
    stage: u32,
    vh_rate_limits: VhRateLimitsMode,
}

impl<'a> DescriptorSourceResolver<'a> {
    pub fn new(local: &'a RateLimitPolicy, stage: u32, vh_rate_limits: VhRateLimitsMode) -> Self {
        Self {
            local,
            stage,
            vh_rate_limits,
        }
    }

    /// Filter rules come first, then route, then virtual host. Sources that
    /// do not apply are never queried.
    pub fn resolve(&self, req: &RequestContext) -> Vec<WeightedDescriptor> {
        let mut origins = Vec::with_capacity(3);

        if !self.local.rules().is_empty() {
            origins.push(Origin::Filter(self.local));
        }

        match req.route.as_deref() {
            Some(route) if route.cluster().is_some() => {
                let route_policy = route.rate_limit_policy();
                origins.push(Origin::Route(route_policy));

                let mode = if route.include_virtual_host_rate_limits() {
                    VhRateLimitsMode::Include
                } else {
                    self.vh_rate_limits
                };
                let include_vh = match mode {
                    VhRateLimitsMode::Ignore => false,
                    VhRateLimitsMode::Include => true,
                    VhRateLimitsMode::Override => route_policy.is_empty(),
                };
                if include_vh {
                    origins.push(Origin::VirtualHost(route.virtual_host_rate_limit_policy()));
                }
            }
            Some(route) => {
                tracing::trace!(route = %route.name(), "local_rate_limit: route has no cluster, skipping route descriptors");
            }
            None => {}
        }

        let mut descriptors = Vec::new();
        for origin in origins {
            match origin {
                Origin::Filter(policy) => descriptors.extend(policy.populate_all(req)),
                Origin::Route(source) | Origin::VirtualHost(source) => {
                    descriptors.extend(source.populate_descriptors(self.stage, req))
                }
            }
        }
        descriptors
    }
}
