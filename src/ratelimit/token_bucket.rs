use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source so refills can be driven by hand in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Nanoseconds since an arbitrary fixed origin.
    fn now_nanos(&self) -> u64;
}

/// Monotonic clock backed by `Instant::now()`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Clock that only moves when told to. Cloning shares the same time line.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.now.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Immutable bucket parameters, validated at configuration load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketSpec {
    pub max_tokens: u64,
    pub tokens_per_fill: u64,
    pub fill_interval: Duration,
}

/// Outcome of a single consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquire {
    pub allowed: bool,
    /// Tokens left in the bucket right after this attempt.
    pub remaining: u64,
    /// Time until the next refill period completes.
    pub next_fill: Duration,
}

/// A refillable counter. Refill is lazy: it happens inside `acquire`, under the
/// same lock as the test-and-decrement, so a refill can never race a consume.
#[derive(Debug)]
pub struct TokenBucket {
    spec: TokenBucketSpec,
    interval_ns: u64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    /// Start of the refill period currently in progress.
    last_fill: u64,
}

impl TokenBucket {
    /// Starts full.
    pub fn new(spec: TokenBucketSpec, clock: Arc<dyn Clock>) -> Self {
        let interval_ns = u64::try_from(spec.fill_interval.as_nanos())
            .unwrap_or(u64::MAX)
            .max(1);
        let now = clock.now_nanos();
        Self {
            spec,
            interval_ns,
            state: Mutex::new(BucketState {
                tokens: spec.max_tokens,
                last_fill: now,
            }),
            clock,
        }
    }

    pub fn max_tokens(&self) -> u64 {
        self.spec.max_tokens
    }

    /// Returns `true` if `weight` tokens were taken.
    pub fn consume(&self, weight: u64) -> bool {
        self.acquire(weight).allowed
    }

    /// Refill, then take `weight` tokens if available. A failed attempt leaves
    /// the token count untouched.
    pub fn acquire(&self, weight: u64) -> Acquire {
        let now = self.clock.now_nanos();
        let mut state = self.state.lock();

        let elapsed = now.saturating_sub(state.last_fill);
        let periods = elapsed / self.interval_ns;
        if periods > 0 {
            let refill = periods.saturating_mul(self.spec.tokens_per_fill);
            state.tokens = state.tokens.saturating_add(refill).min(self.spec.max_tokens);
            // Only whole periods are consumed; the remainder carries over.
            state.last_fill = state
                .last_fill
                .saturating_add(periods.saturating_mul(self.interval_ns));
        }

        let allowed = self.spec.max_tokens > 0 && state.tokens >= weight;
        if allowed {
            state.tokens -= weight;
        }

        let into_period = now.saturating_sub(state.last_fill);
        Acquire {
            allowed,
            remaining: state.tokens,
            next_fill: Duration::from_nanos(self.interval_ns.saturating_sub(into_period)),
        }
    }

    /// Current token count after applying any pending refill.
    pub fn remaining_tokens(&self) -> u64 {
        self.acquire(0).remaining
    }
}
