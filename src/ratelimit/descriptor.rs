use crate::error::ConfigError;
use crate::ratelimit::token_bucket::TokenBucketSpec;
use std::collections::HashMap;
use std::fmt;

/// One `key=value` fact about a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorEntry {
    pub key: String,
    pub value: String,
}

impl DescriptorEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An unordered set of unique entries. Entries are kept sorted so that derived
/// equality and hashing are set equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Descriptor {
    entries: Vec<DescriptorEntry>,
}

impl Descriptor {
    pub fn new(mut entries: Vec<DescriptorEntry>) -> Self {
        entries.sort();
        entries.dedup();
        Self { entries }
    }

    pub fn entries(&self) -> &[DescriptorEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Descriptor {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| DescriptorEntry::new(k, v))
                .collect(),
        )
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, e) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", e.key, e.value)?;
        }
        f.write_str("}")
    }
}

/// A request descriptor paired with the number of tokens it costs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedDescriptor {
    pub descriptor: Descriptor,
    pub hits_addend: u64,
}

impl WeightedDescriptor {
    pub fn new(descriptor: Descriptor, hits_addend: u64) -> Self {
        Self {
            descriptor,
            hits_addend,
        }
    }
}

impl From<Descriptor> for WeightedDescriptor {
    fn from(descriptor: Descriptor) -> Self {
        Self::new(descriptor, 1)
    }
}

/// A configured descriptor pattern and the bucket bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDefinition {
    pub descriptor: Descriptor,
    pub token_bucket: TokenBucketSpec,
}

/// Ordered descriptor definitions plus the default bucket. Read-only after build.
#[derive(Debug, Clone)]
pub struct DescriptorTable {
    default_bucket: TokenBucketSpec,
    definitions: Vec<DescriptorDefinition>,
    index: HashMap<Descriptor, usize>,
}

impl DescriptorTable {
    pub fn new(
        default_bucket: TokenBucketSpec,
        definitions: Vec<DescriptorDefinition>,
    ) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(definitions.len());
        for (i, def) in definitions.iter().enumerate() {
            if def.descriptor.is_empty() {
                return Err(ConfigError::EmptyDescriptor { index: i });
            }
            if index.insert(def.descriptor.clone(), i).is_some() {
                return Err(ConfigError::DuplicateDescriptor {
                    descriptor: def.descriptor.to_string(),
                });
            }
        }
        Ok(Self {
            default_bucket,
            definitions,
            index,
        })
    }

    pub fn default_bucket(&self) -> &TokenBucketSpec {
        &self.default_bucket
    }

    pub fn definitions(&self) -> &[DescriptorDefinition] {
        &self.definitions
    }

    /// Index of the definition whose pattern is set-equal to `descriptor`.
    pub fn find(&self, descriptor: &Descriptor) -> Option<usize> {
        self.index.get(descriptor).copied()
    }
}
