use crate::config::HeaderMatcher;
use crate::error::ConfigError;
use http::{HeaderMap, HeaderName};

/// A compiled header matcher, built once at config load.
#[derive(Debug, Clone)]
pub struct CompiledHeaderMatcher {
    pub name: HeaderName,
    pub value: String,
    pub match_type: HeaderMatchType,
    pub invert: bool,
    pub regex: Option<regex::Regex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMatchType {
    Exact,
    Prefix,
    Suffix,
    Contains,
    Regex,
    Present,
}

impl CompiledHeaderMatcher {
    pub fn compile(config: &HeaderMatcher) -> Result<Self, ConfigError> {
        let name = HeaderName::from_bytes(config.name.as_bytes()).map_err(|e| {
            ConfigError::InvalidHeaderName {
                name: config.name.clone(),
                reason: e.to_string(),
            }
        })?;
        let match_type = match config.match_type.as_str() {
            "exact" => HeaderMatchType::Exact,
            "prefix" => HeaderMatchType::Prefix,
            "suffix" => HeaderMatchType::Suffix,
            "contains" => HeaderMatchType::Contains,
            "regex" => HeaderMatchType::Regex,
            "present" => HeaderMatchType::Present,
            other => {
                return Err(ConfigError::InvalidHeaderMatcher {
                    name: config.name.clone(),
                    reason: format!("unknown match_type '{other}'"),
                })
            }
        };
        let regex = if match_type == HeaderMatchType::Regex {
            // Anchored: the whole value must match.
            let anchored = format!("^(?:{})$", config.value);
            Some(regex::Regex::new(&anchored).map_err(|e| {
                ConfigError::InvalidHeaderMatcher {
                    name: config.name.clone(),
                    reason: format!("invalid regex '{}': {}", config.value, e),
                }
            })?)
        } else {
            None
        };
        Ok(Self {
            name,
            value: config.value.clone(),
            match_type,
            invert: config.invert,
            regex,
        })
    }

    pub fn compile_all(configs: &[HeaderMatcher]) -> Result<Vec<Self>, ConfigError> {
        configs.iter().map(Self::compile).collect()
    }

    pub fn matches(&self, header_value: Option<&str>) -> bool {
        let raw_match = match self.match_type {
            HeaderMatchType::Present => header_value.is_some(),
            HeaderMatchType::Exact => header_value.is_some_and(|v| v == self.value),
            HeaderMatchType::Prefix => header_value.is_some_and(|v| v.starts_with(&self.value)),
            HeaderMatchType::Suffix => header_value.is_some_and(|v| v.ends_with(&self.value)),
            HeaderMatchType::Contains => header_value.is_some_and(|v| v.contains(&self.value)),
            HeaderMatchType::Regex => match self.regex {
                Some(ref re) => header_value.is_some_and(|v| re.is_match(v)),
                None => false,
            },
        };
        if self.invert { !raw_match } else { raw_match }
    }

    pub fn matches_headers(&self, headers: &HeaderMap) -> bool {
        self.matches(headers.get(&self.name).and_then(|v| v.to_str().ok()))
    }
}

/// AND semantics; an empty list matches everything.
pub fn all_match(matchers: &[CompiledHeaderMatcher], headers: &HeaderMap) -> bool {
    matchers.iter().all(|m| m.matches_headers(headers))
}
