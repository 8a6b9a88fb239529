use crate::config::{DenominatorType, FractionalPercent, HitsAddendConfig, RateLimitActionConfig, RateLimitConfig};
use crate::error::ConfigError;
use crate::proxy::context::RequestContext;
use crate::proxy::formatter::FormatString;
use crate::ratelimit::{Descriptor, DescriptorEntry, DescriptorSource, WeightedDescriptor};
use crate::routing::header::{all_match, CompiledHeaderMatcher};
use crate::runtime::FeatureGate;
use http::HeaderName;
use std::sync::Arc;

/// One step of a rule: produces at most one descriptor entry.
#[derive(Debug, Clone)]
pub enum RateLimitAction {
    RequestHeaders {
        header_name: HeaderName,
        descriptor_key: String,
        skip_if_absent: bool,
    },
    GenericKey {
        descriptor_key: String,
        descriptor_value: String,
    },
    HeaderValueMatch {
        descriptor_key: String,
        descriptor_value: String,
        expect_match: bool,
        headers: Vec<CompiledHeaderMatcher>,
    },
    RemoteAddress,
    RequestPath,
}

enum ActionOutcome {
    Entry(DescriptorEntry),
    /// Contributes nothing, rule continues.
    Skip,
    /// The whole rule produces no descriptor.
    Abort,
}

impl RateLimitAction {
    fn compile(config: &RateLimitActionConfig) -> Result<Self, ConfigError> {
        Ok(match config {
            RateLimitActionConfig::RequestHeaders {
                header_name,
                descriptor_key,
                skip_if_absent,
            } => RateLimitAction::RequestHeaders {
                header_name: HeaderName::from_bytes(header_name.as_bytes()).map_err(|e| {
                    ConfigError::InvalidHeaderName {
                        name: header_name.clone(),
                        reason: e.to_string(),
                    }
                })?,
                descriptor_key: descriptor_key.clone(),
                skip_if_absent: *skip_if_absent,
            },
            RateLimitActionConfig::GenericKey {
                descriptor_key,
                descriptor_value,
            } => RateLimitAction::GenericKey {
                descriptor_key: descriptor_key.clone(),
                descriptor_value: descriptor_value.clone(),
            },
            RateLimitActionConfig::HeaderValueMatch {
                descriptor_key,
                descriptor_value,
                expect_match,
                headers,
            } => RateLimitAction::HeaderValueMatch {
                descriptor_key: descriptor_key.clone(),
                descriptor_value: descriptor_value.clone(),
                expect_match: *expect_match,
                headers: CompiledHeaderMatcher::compile_all(headers)?,
            },
            RateLimitActionConfig::RemoteAddress => RateLimitAction::RemoteAddress,
            RateLimitActionConfig::RequestPath => RateLimitAction::RequestPath,
        })
    }

    fn evaluate(&self, req: &RequestContext) -> ActionOutcome {
        match self {
            RateLimitAction::RequestHeaders {
                header_name,
                descriptor_key,
                skip_if_absent,
            } => match req.headers.get(header_name).and_then(|v| v.to_str().ok()) {
                Some(value) => ActionOutcome::Entry(DescriptorEntry::new(descriptor_key.as_str(), value)),
                None if *skip_if_absent => ActionOutcome::Skip,
                None => ActionOutcome::Abort,
            },
            RateLimitAction::GenericKey {
                descriptor_key,
                descriptor_value,
            } => ActionOutcome::Entry(DescriptorEntry::new(
                descriptor_key.as_str(),
                descriptor_value.as_str(),
            )),
            RateLimitAction::HeaderValueMatch {
                descriptor_key,
                descriptor_value,
                expect_match,
                headers,
            } => {
                if all_match(headers, &req.headers) == *expect_match {
                    ActionOutcome::Entry(DescriptorEntry::new(
                        descriptor_key.as_str(),
                        descriptor_value.as_str(),
                    ))
                } else {
                    ActionOutcome::Abort
                }
            }
            RateLimitAction::RemoteAddress => ActionOutcome::Entry(DescriptorEntry::new(
                "remote_address",
                req.client_ip.to_string(),
            )),
            RateLimitAction::RequestPath => {
                ActionOutcome::Entry(DescriptorEntry::new("request_path", req.uri_path.as_str()))
            }
        }
    }
}

/// Per-rule token cost.
#[derive(Debug, Clone)]
pub enum HitsAddend {
    Number(u64),
    Format(FormatString),
}

impl HitsAddend {
    /// A format that does not render to an integer costs 1.
    pub fn resolve(&self, req: &RequestContext) -> u64 {
        match self {
            HitsAddend::Number(n) => *n,
            HitsAddend::Format(f) => {
                let rendered = f.format(req);
                rendered.trim().parse().unwrap_or_else(|_| {
                    tracing::debug!(rendered = %rendered, "hits_addend did not render an integer, using 1");
                    1
                })
            }
        }
    }
}

/// Runtime switch for one rule. The rule applies while `key` is enabled,
/// which it is at 100% unless the runtime overrides it.
#[derive(Debug, Clone)]
struct DisableKey {
    key: String,
    runtime: Arc<dyn FeatureGate>,
}

impl DisableKey {
    fn disabled(&self) -> bool {
        let always = FractionalPercent {
            numerator: 100,
            denominator: DenominatorType::Hundred,
        };
        !self.runtime.feature_enabled(&self.key, always)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pub stage: u32,
    pub actions: Vec<RateLimitAction>,
    pub hits_addend: Option<HitsAddend>,
    disable_key: Option<DisableKey>,
}

impl RateLimitRule {
    pub fn compile(config: &RateLimitConfig, runtime: &Arc<dyn FeatureGate>) -> Result<Self, ConfigError> {
        if config.actions.is_empty() {
            return Err(ConfigError::NoActions);
        }
        let actions = config
            .actions
            .iter()
            .map(RateLimitAction::compile)
            .collect::<Result<Vec<_>, _>>()?;
        let hits_addend = match &config.hits_addend {
            None => None,
            Some(HitsAddendConfig::Number(n)) => Some(HitsAddend::Number(*n)),
            Some(HitsAddendConfig::Format(f)) => Some(HitsAddend::Format(FormatString::parse(f)?)),
        };
        let disable_key = config.disable_key.as_ref().map(|key| DisableKey {
            key: key.clone(),
            runtime: runtime.clone(),
        });
        Ok(Self {
            stage: config.stage,
            actions,
            hits_addend,
            disable_key,
        })
    }

    /// `None` when the rule is switched off at runtime, any action aborts, or
    /// every action was skipped.
    pub fn populate(&self, req: &RequestContext) -> Option<WeightedDescriptor> {
        if self.disable_key.as_ref().is_some_and(DisableKey::disabled) {
            return None;
        }
        let mut entries = Vec::with_capacity(self.actions.len());
        for action in &self.actions {
            match action.evaluate(req) {
                ActionOutcome::Entry(e) => entries.push(e),
                ActionOutcome::Skip => {}
                ActionOutcome::Abort => return None,
            }
        }
        if entries.is_empty() {
            return None;
        }
        let hits_addend = self.hits_addend.as_ref().map_or(1, |h| h.resolve(req));
        Some(WeightedDescriptor::new(Descriptor::new(entries), hits_addend))
    }
}

/// An ordered list of rules attached to a route, a virtual host, or the
/// filter itself.
#[derive(Debug, Clone, Default)]
pub struct RateLimitPolicy {
    rules: Vec<RateLimitRule>,
}

impl RateLimitPolicy {
    pub fn compile(configs: &[RateLimitConfig], runtime: &Arc<dyn FeatureGate>) -> Result<Self, ConfigError> {
        let rules = configs
            .iter()
            .map(|c| RateLimitRule::compile(c, runtime))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[RateLimitRule] {
        &self.rules
    }

    /// Every rule regardless of stage.
    pub fn populate_all(&self, req: &RequestContext) -> Vec<WeightedDescriptor> {
        self.rules.iter().filter_map(|r| r.populate(req)).collect()
    }
}

impl DescriptorSource for RateLimitPolicy {
    fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn populate_descriptors(&self, stage: u32, req: &RequestContext) -> Vec<WeightedDescriptor> {
        self.rules
            .iter()
            .filter(|r| r.stage == stage)
            .filter_map(|r| r.populate(req))
            .collect()
    }
}
