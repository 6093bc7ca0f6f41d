//! Event matchers

use super::{Event, MatchType};
use crate::core::error::{CoreError, CoreResult};
use regex::Regex;

/// Decides whether a rule applies to an event
#[derive(Debug, Clone)]
pub enum EventMatcher {
    /// The pattern must match the whole value of at least one selected attribute
    Regex {
        pattern: Regex,
        selectors: Vec<MatchType>,
    },
    /// Never matches
    Null,
}

impl EventMatcher {
    /// Compile a full-match pattern over the given attributes
    pub fn regex(pattern: &str, selectors: impl IntoIterator<Item = MatchType>) -> CoreResult<Self> {
        let selectors: Vec<MatchType> = selectors.into_iter().collect();
        if selectors.is_empty() {
            return Err(CoreError::configuration("event-matcher", "no attributes selected"));
        }
        let anchored = format!("^(?:{})$", pattern);
        let pattern = Regex::new(&anchored).map_err(|e| {
            CoreError::configuration("event-matcher", format!("invalid pattern '{}': {}", pattern, e))
        })?;
        Ok(EventMatcher::Regex { pattern, selectors })
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            EventMatcher::Regex { pattern, selectors } => selectors
                .iter()
                .filter_map(|s| event.attribute(*s))
                .any(|value| pattern.is_match(value)),
            EventMatcher::Null => false,
        }
    }
}
