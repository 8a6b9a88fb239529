pub mod types;


pub use types::*;

use crate::error::ConfigError;
use crate::ratelimit::TokenBucketSpec;
use anyhow::Result;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used so the server can start with zero configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!("config file not found at {}, using defaults", path.display());
            GatewayConfig::default()
        };

        config.apply_env_overrides();

        config.validate()?;
        tracing::info!(
            virtual_hosts = config.virtual_hosts.len(),
            total_routes = config.total_route_count(),
            descriptors = config.local_rate_limit.descriptors.len(),
            "loaded rate limit configuration"
        );
        Ok(config)
    }

    /// Environment overrides for the listener-level filter.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HERMES_RL_STAT_PREFIX") {
            self.local_rate_limit.stat_prefix = v;
        }
        if let Ok(v) = std::env::var("HERMES_RL_PER_CONNECTION") {
            self.local_rate_limit.per_downstream_connection = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("HERMES_RL_STAGE") {
            if let Ok(n) = v.parse::<u32>() {
                self.local_rate_limit.stage = n;
            }
        }
    }

    /// Structural checks. Header names, regexes, and format strings are
    /// checked when the configuration is compiled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_local_rate_limit(&self.local_rate_limit, "local_rate_limit")?;

        for vh in &self.virtual_hosts {
            if vh.hosts.is_empty() {
                return Err(ConfigError::NoHosts {
                    name: vh.name.clone(),
                });
            }
            if vh.hosts.iter().any(|h| h.is_empty()) {
                return Err(ConfigError::EmptyHost {
                    name: vh.name.clone(),
                });
            }
            for route in &vh.routes {
                if route.uri.is_empty() {
                    return Err(ConfigError::EmptyUri {
                        virtual_host: vh.name.clone(),
                        route: route.name.clone(),
                    });
                }
                if let Some(ref rl) = route.local_rate_limit {
                    validate_local_rate_limit(rl, &format!("route '{}'", route.name))?;
                }
            }
        }
        Ok(())
    }

    /// Total route count across all virtual hosts.
    pub fn total_route_count(&self) -> usize {
        self.virtual_hosts.iter().map(|v| v.routes.len()).sum()
    }
}

fn validate_local_rate_limit(cfg: &LocalRateLimitConfig, context: &str) -> Result<(), ConfigError> {
    if cfg.stat_prefix.is_empty() {
        return Err(ConfigError::EmptyStatPrefix);
    }
    cfg.token_bucket.bucket_spec(&format!("{context}.token_bucket"))?;
    for (i, d) in cfg.descriptors.iter().enumerate() {
        if d.entries.is_empty() {
            return Err(ConfigError::EmptyDescriptor { index: i });
        }
        d.token_bucket.bucket_spec(&format!("{context}.descriptors[{i}]"))?;
    }
    for rule in &cfg.rate_limits {
        if rule.actions.is_empty() {
            return Err(ConfigError::NoActions);
        }
    }
    Ok(())
}

impl TokenBucketConfig {
    /// Checked conversion into bucket parameters. `context` names the bucket
    /// in the error.
    pub fn bucket_spec(&self, context: &str) -> Result<TokenBucketSpec, ConfigError> {
        let invalid = |reason| ConfigError::InvalidTokenBucket {
            context: context.to_string(),
            reason,
        };
        if self.tokens_per_fill == 0 {
            return Err(invalid("tokens_per_fill must be greater than 0"));
        }
        if self.fill_interval.is_zero() {
            return Err(invalid("fill_interval must be greater than 0"));
        }
        Ok(TokenBucketSpec {
            max_tokens: self.max_tokens,
            tokens_per_fill: self.tokens_per_fill,
            fill_interval: self.fill_interval,
        })
    }
}
