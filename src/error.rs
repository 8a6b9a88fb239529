use thiserror::Error;

/// Errors raised while loading or compiling configuration. Request processing
/// never produces these: exhaustion is reported as a decision, not an error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("stat_prefix must not be empty")]
    EmptyStatPrefix,

    #[error("token bucket '{context}': {reason}")]
    InvalidTokenBucket { context: String, reason: &'static str },

    #[error("descriptor #{index} has no entries")]
    EmptyDescriptor { index: usize },

    #[error("duplicate descriptor {descriptor}")]
    DuplicateDescriptor { descriptor: String },

    #[error("invalid header name '{name}': {reason}")]
    InvalidHeaderName { name: String, reason: String },

    #[error("invalid header value for '{name}': {reason}")]
    InvalidHeaderValue { name: String, reason: String },

    #[error("invalid header matcher '{name}': {reason}")]
    InvalidHeaderMatcher { name: String, reason: String },

    #[error("invalid format string '{format}': {reason}")]
    InvalidFormat { format: String, reason: &'static str },

    #[error("virtual host '{name}' has no hosts defined")]
    NoHosts { name: String },

    #[error("virtual host '{name}' has an empty host entry")]
    EmptyHost { name: String },

    #[error("route '{route}' in virtual host '{virtual_host}' has empty uri")]
    EmptyUri { virtual_host: String, route: String },

    #[error("rate limit rule has no actions")]
    NoActions,

    #[error("route '{route}' has invalid direct response status {status}")]
    InvalidStatus { route: String, status: u16 },
}
