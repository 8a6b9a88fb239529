//! Local (per-process) rate limiting: token buckets, descriptor tables, and
//! the engine that matches request descriptors against them.

mod descriptor;
mod limiter;
mod resolver;
mod token_bucket;

pub use descriptor::{
    Descriptor, DescriptorDefinition, DescriptorEntry, DescriptorTable, WeightedDescriptor,
};
pub use limiter::{BucketScope, BucketSet, LocalRateLimiter, RateLimitDecision};
pub use resolver::{DescriptorSource, DescriptorSourceResolver};
pub use token_bucket::{
    Acquire, Clock, ManualClock, MonotonicClock, TokenBucket, TokenBucketSpec,
};
