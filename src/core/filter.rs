//! Metadata filters used when merging a cloned message back into its original

use crate::core::{
    config::MetadataFilterConfig,
    error::{CoreError, CoreResult},
    message::Message,
};
use regex::Regex;

/// Selects which metadata keys survive a merge
#[derive(Debug, Clone, Default)]
pub enum MetadataFilter {
    /// Nothing is merged
    #[default]
    RemoveAll,
    /// Everything is merged
    PassAll,
    /// Keys matching any include pattern (all keys if none) and no exclude pattern.
    /// Patterns match anywhere in the key.
    Regex {
        include: Vec<Regex>,
        exclude: Vec<Regex>,
    },
}

impl MetadataFilter {
    /// Compile a filter from configuration
    pub fn from_config(config: &MetadataFilterConfig, component: &str) -> CoreResult<Self> {
        let compile = |patterns: &[String]| -> CoreResult<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        CoreError::configuration(component, format!("invalid metadata pattern '{}': {}", p, e))
                    })
                })
                .collect()
        };

        Ok(match config {
            MetadataFilterConfig::RemoveAll => MetadataFilter::RemoveAll,
            MetadataFilterConfig::PassAll => MetadataFilter::PassAll,
            MetadataFilterConfig::Regex { include, exclude } => MetadataFilter::Regex {
                include: compile(include)?,
                exclude: compile(exclude)?,
            },
        })
    }

    /// Whether `key` passes the filter
    pub fn allows(&self, key: &str) -> bool {
        match self {
            MetadataFilter::RemoveAll => false,
            MetadataFilter::PassAll => true,
            MetadataFilter::Regex { include, exclude } => {
                let included = include.is_empty() || include.iter().any(|r| r.is_match(key));
                included && !exclude.iter().any(|r| r.is_match(key))
            }
        }
    }

    /// Copy the allowed metadata of `from` onto `into`, overwriting existing keys
    pub fn merge(&self, from: &Message, into: &mut Message) -> usize {
        let mut merged = 0;
        for (key, value) in from.metadata_map() {
            if self.allows(key) {
                into.set_metadata(key.clone(), value.clone());
                merged += 1;
            }
        }
        merged
    }
}
