use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Deserialize a `T` that implements `Default`; treats JSON `null` the same as
/// a missing field (returns `T::default()`).  Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Durations are written the humantime way: `"60s"`, `"500ms"`, `"1m 30s"`.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener-level filter configuration.
    #[serde(default)]
    pub local_rate_limit: LocalRateLimitConfig,

    /// Runtime overrides for feature gates, keyed by runtime key.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub runtime: HashMap<String, FractionalPercent>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub virtual_hosts: Vec<VirtualHostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalRateLimitConfig {
    /// Prefix for this filter's stats.
    pub stat_prefix: String,

    /// The default (global) bucket.
    pub token_bucket: TokenBucketConfig,

    /// Absent means the filter never runs.
    #[serde(default)]
    pub filter_enabled: Option<RuntimeFractionalPercent>,

    /// Absent means rejections are never enforced.
    #[serde(default)]
    pub filter_enforced: Option<RuntimeFractionalPercent>,

    /// Status of the local reply. Codes below 400 fall back to 429.
    #[serde(default = "default_rejected_code")]
    pub rejected_code: u16,

    /// Attach gRPC status RESOURCE_EXHAUSTED instead of UNAVAILABLE to local replies.
    #[serde(default)]
    pub rate_limited_as_resource_exhausted: bool,

    /// Added to the local reply when a rejection is enforced.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub response_headers_to_add: Vec<HeaderValueOption>,

    /// Added to the request when a rejection is not enforced.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub request_headers_to_add_when_not_enforced: Vec<HeaderValueOption>,

    /// Give every downstream connection its own set of buckets.
    #[serde(default)]
    pub per_downstream_connection: bool,

    /// Draw from the default bucket even when a descriptor matched.
    #[serde(default = "default_true")]
    pub always_consume_default_token_bucket: bool,

    #[serde(default)]
    pub enable_x_ratelimit_headers: XRateLimitHeaders,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub descriptors: Vec<DescriptorConfig>,

    /// Selects which route / virtual host policy entries apply.
    #[serde(default)]
    pub stage: u32,

    #[serde(default)]
    pub vh_rate_limits: VhRateLimitsMode,

    /// Descriptor rules evaluated by the filter itself.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub rate_limits: Vec<RateLimitConfig>,
}

impl Default for LocalRateLimitConfig {
    fn default() -> Self {
        Self {
            stat_prefix: default_stat_prefix(),
            token_bucket: TokenBucketConfig::default(),
            filter_enabled: None,
            filter_enforced: None,
            rejected_code: default_rejected_code(),
            rate_limited_as_resource_exhausted: false,
            response_headers_to_add: Vec::new(),
            request_headers_to_add_when_not_enforced: Vec::new(),
            per_downstream_connection: false,
            always_consume_default_token_bucket: true,
            enable_x_ratelimit_headers: XRateLimitHeaders::Off,
            descriptors: Vec::new(),
            stage: 0,
            vh_rate_limits: VhRateLimitsMode::Override,
            rate_limits: Vec::new(),
        }
    }
}

fn default_stat_prefix() -> String {
    "http_local_rate_limiter".to_string()
}

fn default_rejected_code() -> u16 {
    429
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    pub max_tokens: u64,

    #[serde(default = "default_tokens_per_fill")]
    pub tokens_per_fill: u64,

    #[serde(with = "humantime_duration")]
    pub fill_interval: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            tokens_per_fill: 1000,
            fill_interval: Duration::from_secs(1),
        }
    }
}

fn default_tokens_per_fill() -> u64 {
    1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum XRateLimitHeaders {
    #[default]
    Off,
    DraftVersion03,
}

/// How virtual host rate limits combine with route rate limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VhRateLimitsMode {
    /// Use virtual host limits only when the route has none.
    #[default]
    Override,
    /// Always use both.
    Include,
    /// Never use virtual host limits.
    Ignore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorConfig {
    pub entries: Vec<DescriptorEntryConfig>,
    pub token_bucket: TokenBucketConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorEntryConfig {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FractionalPercent {
    pub numerator: u32,

    #[serde(default)]
    pub denominator: DenominatorType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenominatorType {
    #[default]
    Hundred,
    TenThousand,
    Million,
}

impl DenominatorType {
    pub fn value(self) -> u64 {
        match self {
            DenominatorType::Hundred => 100,
            DenominatorType::TenThousand => 10_000,
            DenominatorType::Million => 1_000_000,
        }
    }
}

/// A percentage that can be overridden at runtime under `runtime_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeFractionalPercent {
    pub runtime_key: String,
    pub default_value: FractionalPercent,
}

/// A header to add, with a value that may reference request attributes
/// (`%REQ(x-request-id)%`, `%BYTES_RECEIVED%`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderValueOption {
    pub key: String,

    #[serde(default)]
    pub value: String,

    #[serde(default)]
    pub append_action: AppendAction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppendAction {
    #[default]
    AppendIfExistsOrAdd,
    AddIfAbsent,
    OverwriteIfExistsOrAdd,
    OverwriteIfExists,
}

/// Supports exact (default), prefix, suffix, contains, regex, and presence-only
/// match. Multiple matchers use AND semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderMatcher {
    pub name: String,

    /// Ignored when `match_type` is "present".
    #[serde(default)]
    pub value: String,

    /// "exact" (default), "prefix", "suffix", "contains", "regex", "present".
    #[serde(default = "default_header_match_type")]
    pub match_type: String,

    #[serde(default)]
    pub invert: bool,
}

fn default_header_match_type() -> String {
    "exact".to_string()
}

/// One descriptor-producing rule: every action contributes one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Ignored for rules configured on the filter itself.
    #[serde(default)]
    pub stage: u32,

    pub actions: Vec<RateLimitActionConfig>,

    #[serde(default)]
    pub hits_addend: Option<HitsAddendConfig>,

    /// Runtime key that switches this rule off when the runtime reports it
    /// disabled. Unset keys default to enabled.
    #[serde(default)]
    pub disable_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateLimitActionConfig {
    /// `(descriptor_key, <header value>)`.
    RequestHeaders {
        header_name: String,
        descriptor_key: String,
        #[serde(default)]
        skip_if_absent: bool,
    },
    /// `(descriptor_key, descriptor_value)`, unconditionally.
    GenericKey {
        #[serde(default = "default_generic_key")]
        descriptor_key: String,
        descriptor_value: String,
    },
    /// `(descriptor_key, descriptor_value)` when the headers match `expect_match`.
    HeaderValueMatch {
        #[serde(default = "default_header_match_key")]
        descriptor_key: String,
        descriptor_value: String,
        #[serde(default = "default_true")]
        expect_match: bool,
        headers: Vec<HeaderMatcher>,
    },
    /// `("remote_address", <client ip>)`.
    RemoteAddress,
    /// `("request_path", <path>)`.
    RequestPath,
}

fn default_generic_key() -> String {
    "generic_key".to_string()
}

fn default_header_match_key() -> String {
    "header_match".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitsAddendConfig {
    Number(u64),
    /// Formatted from request attributes, e.g. `%BYTES_RECEIVED%`.
    Format(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualHostConfig {
    pub name: String,

    /// Exact (`api.example.com`), wildcard suffix (`*.example.com`),
    /// wildcard prefix (`api.*`), or `_` for the fallback host.
    pub hosts: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub rate_limits: Vec<RateLimitConfig>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    #[serde(default)]
    pub name: String,

    /// Exact match, prefix match (`/v1/api/*`), or `/*` for catch-all.
    pub uri: String,

    /// Allowed HTTP methods. Empty means all methods.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub methods: Vec<String>,

    /// Upstream cluster. Routes without one get no route or virtual host
    /// descriptors.
    #[serde(default)]
    pub cluster: Option<String>,

    /// Always include virtual host rate limits, whatever `vh_rate_limits` says.
    #[serde(default)]
    pub include_vh_rate_limits: bool,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub rate_limits: Vec<RateLimitConfig>,

    #[serde(default)]
    pub direct_response: DirectResponseConfig,

    /// Maximum request body size in bytes. Admitted requests exceeding this
    /// limit are rejected with 413. `None` means no limit.
    #[serde(default)]
    pub max_body_bytes: Option<u64>,

    /// Replaces the listener-level filter configuration for this route.
    #[serde(default)]
    pub local_rate_limit: Option<LocalRateLimitConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectResponseConfig {
    #[serde(default = "default_direct_status")]
    pub status: u16,

    #[serde(default)]
    pub body: String,
}

impl Default for DirectResponseConfig {
    fn default() -> Self {
        Self {
            status: default_direct_status(),
            body: String::new(),
        }
    }
}

fn default_direct_status() -> u16 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_rate_limit_full_serde() {
        let json = r#"{
            "stat_prefix": "test",
            "token_bucket": {"max_tokens": 1, "tokens_per_fill": 1, "fill_interval": "1000s"},
            "filter_enabled": {
                "runtime_key": "test_enabled",
                "default_value": {"numerator": 100, "denominator": "HUNDRED"}
            },
            "filter_enforced": {
                "runtime_key": "test_enforced",
                "default_value": {"numerator": 100}
            },
            "rate_limited_as_resource_exhausted": true,
            "response_headers_to_add": [
                {"append_action": "OVERWRITE_IF_EXISTS_OR_ADD", "key": "x-test-rate-limit", "value": "true"},
                {"key": "test-resp-req-id", "value": "%REQ(test-req-id)%"}
            ],
            "request_headers_to_add_when_not_enforced": [
                {"append_action": "OVERWRITE_IF_EXISTS_OR_ADD", "key": "x-local-ratelimited", "value": "true"}
            ],
            "per_downstream_connection": true,
            "enable_x_ratelimit_headers": "DRAFT_VERSION_03",
            "descriptors": [
                {
                    "entries": [{"key": "hello", "value": "world"}, {"key": "foo", "value": "bar"}],
                    "token_bucket": {"max_tokens": 10, "tokens_per_fill": 10, "fill_interval": "60s"}
                }
            ],
            "stage": 1,
            "vh_rate_limits": "INCLUDE"
        }"#;

        let cfg: LocalRateLimitConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.stat_prefix, "test");
        assert_eq!(cfg.token_bucket.max_tokens, 1);
        assert_eq!(cfg.token_bucket.fill_interval, Duration::from_secs(1000));
        let enabled = cfg.filter_enabled.unwrap();
        assert_eq!(enabled.runtime_key, "test_enabled");
        assert_eq!(enabled.default_value.numerator, 100);
        assert_eq!(enabled.default_value.denominator, DenominatorType::Hundred);
        assert!(cfg.rate_limited_as_resource_exhausted);
        assert_eq!(cfg.response_headers_to_add.len(), 2);
        assert_eq!(
            cfg.response_headers_to_add[0].append_action,
            AppendAction::OverwriteIfExistsOrAdd
        );
        assert_eq!(
            cfg.response_headers_to_add[1].append_action,
            AppendAction::AppendIfExistsOrAdd
        );
        assert_eq!(cfg.response_headers_to_add[1].value, "%REQ(test-req-id)%");
        assert_eq!(cfg.request_headers_to_add_when_not_enforced.len(), 1);
        assert!(cfg.per_downstream_connection);
        assert!(cfg.always_consume_default_token_bucket);
        assert_eq!(cfg.enable_x_ratelimit_headers, XRateLimitHeaders::DraftVersion03);
        assert_eq!(cfg.descriptors.len(), 1);
        assert_eq!(cfg.descriptors[0].entries[1].key, "foo");
        assert_eq!(cfg.stage, 1);
        assert_eq!(cfg.vh_rate_limits, VhRateLimitsMode::Include);
    }

    #[test]
    fn test_local_rate_limit_minimal_defaults() {
        let json = r#"{
            "stat_prefix": "min",
            "token_bucket": {"max_tokens": 5, "fill_interval": "1s"}
        }"#;
        let cfg: LocalRateLimitConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.token_bucket.tokens_per_fill, 1);
        assert!(cfg.filter_enabled.is_none());
        assert!(cfg.filter_enforced.is_none());
        assert_eq!(cfg.rejected_code, 429);
        assert!(!cfg.rate_limited_as_resource_exhausted);
        assert!(!cfg.per_downstream_connection);
        assert!(cfg.always_consume_default_token_bucket);
        assert_eq!(cfg.enable_x_ratelimit_headers, XRateLimitHeaders::Off);
        assert_eq!(cfg.vh_rate_limits, VhRateLimitsMode::Override);
        assert_eq!(cfg.stage, 0);
        assert!(cfg.descriptors.is_empty());
        assert!(cfg.rate_limits.is_empty());
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let json = r#"{"max_tokens": 1, "fill_interval": "soon"}"#;
        assert!(serde_json::from_str::<TokenBucketConfig>(json).is_err());
    }

    #[test]
    fn test_rate_limit_actions_serde() {
        let json = r#"{
            "actions": [
                {"type": "header_value_match", "descriptor_value": "bar2",
                 "descriptor_key": "foo2",
                 "headers": [{"name": "x-header-name", "value": "test_value"}]},
                {"type": "request_headers", "header_name": "x-user", "descriptor_key": "user"},
                {"type": "generic_key", "descriptor_value": "gk"},
                {"type": "remote_address"},
                {"type": "request_path"}
            ],
            "hits_addend": {"format": "%BYTES_RECEIVED%"}
        }"#;
        let rl: RateLimitConfig = serde_json::from_str(json).unwrap();
        assert_eq!(rl.stage, 0);
        assert_eq!(rl.actions.len(), 5);
        match &rl.actions[0] {
            RateLimitActionConfig::HeaderValueMatch {
                descriptor_key,
                expect_match,
                headers,
                ..
            } => {
                assert_eq!(descriptor_key, "foo2");
                assert!(*expect_match);
                assert_eq!(headers[0].match_type, "exact");
            }
            other => panic!("unexpected action {other:?}"),
        }
        match &rl.actions[2] {
            RateLimitActionConfig::GenericKey { descriptor_key, .. } => {
                assert_eq!(descriptor_key, "generic_key")
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(
            rl.hits_addend,
            Some(HitsAddendConfig::Format("%BYTES_RECEIVED%".to_string()))
        );
    }

    #[test]
    fn test_hits_addend_number() {
        let json = r#"{"actions": [{"type": "remote_address"}], "hits_addend": {"number": 5}}"#;
        let rl: RateLimitConfig = serde_json::from_str(json).unwrap();
        assert_eq!(rl.hits_addend, Some(HitsAddendConfig::Number(5)));
    }

    #[test]
    fn test_virtual_host_defaults() {
        let json = r#"{
            "name": "api",
            "hosts": ["api.example.com"],
            "routes": [{"uri": "/v1/*"}]
        }"#;
        let vh: VirtualHostConfig = serde_json::from_str(json).unwrap();
        assert!(vh.rate_limits.is_empty());
        let route = &vh.routes[0];
        assert_eq!(route.name, "");
        assert!(route.methods.is_empty());
        assert!(route.cluster.is_none());
        assert!(!route.include_vh_rate_limits);
        assert!(route.rate_limits.is_empty());
        assert_eq!(route.direct_response.status, 200);
        assert!(route.local_rate_limit.is_none());
    }

    #[test]
    fn test_null_lists_default_to_empty() {
        let json = r#"{"name": "n", "hosts": ["h"], "rate_limits": null, "routes": null}"#;
        let vh: VirtualHostConfig = serde_json::from_str(json).unwrap();
        assert!(vh.rate_limits.is_empty());
        assert!(vh.routes.is_empty());
    }

    #[test]
    fn test_denominator_values() {
        assert_eq!(DenominatorType::Hundred.value(), 100);
        assert_eq!(DenominatorType::TenThousand.value(), 10_000);
        assert_eq!(DenominatorType::Million.value(), 1_000_000);
    }

    #[test]
    fn test_token_bucket_roundtrip() {
        let tb = TokenBucketConfig {
            max_tokens: 7,
            tokens_per_fill: 3,
            fill_interval: Duration::from_millis(1500),
        };
        let s = serde_json::to_string(&tb).unwrap();
        let back: TokenBucketConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(back, tb);
    }

    #[test]
    fn test_gateway_config_defaults() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.local_rate_limit.stat_prefix, "http_local_rate_limiter");
        assert_eq!(cfg.local_rate_limit.token_bucket.max_tokens, 1000);
        assert!(cfg.runtime.is_empty());
        assert!(cfg.virtual_hosts.is_empty());
    }
}
