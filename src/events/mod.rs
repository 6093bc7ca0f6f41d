//! Notification events and their rule-based routing

pub mod matcher;
pub mod router;
pub mod sender;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use matcher::EventMatcher;
pub use router::{EventRouter, Rule};
pub use sender::{EventSender, LoggingEventSender, NullEventSender, ProducerEventSender};

/// A notification published outside the message flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub unique_id: String,
    pub created_at: DateTime<Utc>,
    pub event_type: String,
    pub namespace: String,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            unique_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            event_type: event_type.into(),
            namespace: namespace.into(),
            source_id: String::new(),
            destination_id: None,
        }
    }

    pub fn from_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    pub fn to_destination(mut self, destination_id: impl Into<String>) -> Self {
        self.destination_id = Some(destination_id.into());
        self
    }

    /// Value of the attribute a matcher selects, if present
    pub fn attribute(&self, selector: MatchType) -> Option<&str> {
        match selector {
            MatchType::SourceId => Some(&self.source_id),
            MatchType::DestinationId => self.destination_id.as_deref(),
            MatchType::Namespace => Some(&self.namespace),
            MatchType::Type => Some(&self.event_type),
        }
    }
}

/// Event attribute a matcher can inspect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchType {
    SourceId,
    DestinationId,
    Namespace,
    Type,
}
