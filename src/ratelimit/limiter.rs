use crate::ratelimit::descriptor::{DescriptorTable, WeightedDescriptor};
use crate::ratelimit::token_bucket::{Acquire, Clock, TokenBucket};
use std::sync::Arc;
use std::time::Duration;

/// Live bucket state for one descriptor table: the default bucket plus one
/// bucket per definition, index-aligned with the table.
#[derive(Debug)]
pub struct BucketSet {
    default: TokenBucket,
    descriptors: Vec<TokenBucket>,
}

impl BucketSet {
    pub fn new(table: &DescriptorTable, clock: Arc<dyn Clock>) -> Self {
        Self {
            default: TokenBucket::new(*table.default_bucket(), clock.clone()),
            descriptors: table
                .definitions()
                .iter()
                .map(|d| TokenBucket::new(d.token_bucket, clock.clone()))
                .collect(),
        }
    }

    pub fn default_bucket(&self) -> &TokenBucket {
        &self.default
    }

    pub fn descriptor_bucket(&self, index: usize) -> Option<&TokenBucket> {
        self.descriptors.get(index)
    }
}

/// Ownership of a filter's buckets, chosen once when the filter is built.
#[derive(Debug)]
pub enum BucketScope {
    /// One set shared by every connection using the configuration.
    Shared(Arc<BucketSet>),
    /// A set private to one downstream connection.
    Owned(BucketSet),
}

impl BucketScope {
    pub fn buckets(&self) -> &BucketSet {
        match self {
            BucketScope::Shared(set) => set,
            BucketScope::Owned(set) => set,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, BucketScope::Shared(_))
    }
}

/// Result of one admission check, kept for the response phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Index of the deciding descriptor definition; `None` means the default bucket.
    pub matched_descriptor: Option<usize>,
    /// `max_tokens` of the deciding bucket.
    pub limit: u64,
    /// Tokens left in the deciding bucket after this request, 0 when rejected.
    pub remaining: u64,
    /// Time until the deciding bucket refills.
    pub reset: Duration,
}

impl RateLimitDecision {
    fn from_acquire(matched_descriptor: Option<usize>, bucket: &TokenBucket, acquire: Acquire) -> Self {
        Self {
            allowed: acquire.allowed,
            matched_descriptor,
            limit: bucket.max_tokens(),
            remaining: if acquire.allowed { acquire.remaining } else { 0 },
            reset: acquire.next_fill,
        }
    }
}

/// Matches request descriptors against the table and consumes tokens.
#[derive(Debug, Clone)]
pub struct LocalRateLimiter {
    table: Arc<DescriptorTable>,
    always_consume_default_token_bucket: bool,
}

impl LocalRateLimiter {
    pub fn new(table: Arc<DescriptorTable>, always_consume_default_token_bucket: bool) -> Self {
        Self {
            table,
            always_consume_default_token_bucket,
        }
    }

    pub fn table(&self) -> &Arc<DescriptorTable> {
        &self.table
    }

    pub fn new_bucket_set(&self, clock: Arc<dyn Clock>) -> BucketSet {
        BucketSet::new(&self.table, clock)
    }

    /// Walks `descriptors` in order and stops at the first exhausted bucket.
    /// Tokens already taken from earlier buckets in the same request are not
    /// returned when a later bucket rejects.
    pub fn request_allowed(
        &self,
        buckets: &BucketSet,
        descriptors: &[WeightedDescriptor],
    ) -> RateLimitDecision {
        let mut first_match: Option<(usize, Acquire)> = None;

        for wd in descriptors {
            let Some(index) = self.table.find(&wd.descriptor) else {
                tracing::trace!(descriptor = %wd.descriptor, "local_rate_limit: no descriptor match");
                continue;
            };
            let Some(bucket) = buckets.descriptor_bucket(index) else {
                continue;
            };

            let acquire = bucket.acquire(wd.hits_addend);
            if !acquire.allowed {
                tracing::debug!(
                    descriptor = %wd.descriptor,
                    hits_addend = wd.hits_addend,
                    "local_rate_limit: descriptor bucket exhausted"
                );
                return RateLimitDecision::from_acquire(Some(index), bucket, acquire);
            }
            first_match.get_or_insert((index, acquire));
        }

        let default = buckets.default_bucket();
        let Some((index, matched)) = first_match else {
            let acquire = default.acquire(1);
            if !acquire.allowed {
                tracing::debug!("local_rate_limit: default bucket exhausted");
            }
            return RateLimitDecision::from_acquire(None, default, acquire);
        };

        if self.always_consume_default_token_bucket {
            let acquire = default.acquire(1);
            if !acquire.allowed {
                tracing::debug!("local_rate_limit: default bucket exhausted");
                return RateLimitDecision::from_acquire(None, default, acquire);
            }
        }

        RateLimitDecision::from_acquire(Some(index), &buckets.descriptors[index], matched)
    }
}
