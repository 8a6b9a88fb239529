use crate::config::{FractionalPercent, RuntimeFractionalPercent};
use rand::Rng;
use std::collections::HashMap;

/// Decides whether a percentage-gated feature applies to the current request.
pub trait FeatureGate: Send + Sync + std::fmt::Debug {
    fn feature_enabled(&self, runtime_key: &str, default_value: FractionalPercent) -> bool;

    /// `None` means the gate was never configured, which reads as disabled.
    fn enabled(&self, gate: Option<&RuntimeFractionalPercent>) -> bool {
        gate.is_some_and(|p| self.feature_enabled(&p.runtime_key, p.default_value))
    }
}

/// Runtime snapshot: per-key overrides loaded from the `runtime` config
/// section, sampled with a thread-local RNG.
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    overrides: HashMap<String, FractionalPercent>,
}

impl Runtime {
    pub fn new(overrides: HashMap<String, FractionalPercent>) -> Self {
        Self { overrides }
    }

    pub fn fractional_percent(&self, runtime_key: &str, default_value: FractionalPercent) -> FractionalPercent {
        self.overrides.get(runtime_key).copied().unwrap_or(default_value)
    }
}

impl FeatureGate for Runtime {
    fn feature_enabled(&self, runtime_key: &str, default_value: FractionalPercent) -> bool {
        let percent = self.fractional_percent(runtime_key, default_value);
        let denominator = percent.denominator.value();
        let numerator = u64::from(percent.numerator);
        if numerator == 0 {
            return false;
        }
        if numerator >= denominator {
            return true;
        }
        rand::thread_rng().gen_range(0..denominator) < numerator
    }
}

/// Gate with a fixed answer for every key. Useful where sampling must be
/// deterministic.
#[derive(Debug, Clone, Copy)]
pub struct StaticGate(pub bool);

impl FeatureGate for StaticGate {
    fn feature_enabled(&self, _runtime_key: &str, _default_value: FractionalPercent) -> bool {
        self.0
    }
}
