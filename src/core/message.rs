//! Message domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Metadata key of the stop-processing sentinel
pub const STOP_PROCESSING_KEY: &str = "stopprocessing";

/// Value that marks a message as halted
pub const STOP_PROCESSING_VALUE: &str = "true";

/// A non-serializable object attached to a message
pub type ObjectAttachment = Arc<dyn Any + Send + Sync>;

/// A timestamped record of a stage a message passed through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLifecycleEvent {
    /// Name of the stage (usually the step that processed the message)
    pub stage: String,

    /// When the stage was recorded
    pub timestamp: DateTime<Utc>,
}

/// A unit of data flowing through a pipeline
///
/// Cloning produces an independent message with its own metadata, attachment
/// map and event history. The unique id is kept; attachments are shared
/// handles, not deep copies.
#[derive(Clone)]
pub struct Message {
    unique_id: String,
    payload: Vec<u8>,
    metadata: HashMap<String, String>,
    object_attachments: HashMap<String, ObjectAttachment>,
    lifecycle_events: Vec<MessageLifecycleEvent>,
}

impl Message {
    /// Create a message with a freshly generated id
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload)
    }

    /// Create a message with an explicit id
    pub fn with_id(unique_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            unique_id: unique_id.into(),
            payload: payload.into(),
            metadata: HashMap::new(),
            object_attachments: HashMap::new(),
            lifecycle_events: Vec::new(),
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn set_unique_id(&mut self, id: impl Into<String>) {
        self.unique_id = id.into();
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    /// Payload as text, replacing invalid UTF-8 sequences
    pub fn content(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn set_content(&mut self, content: &str) {
        self.payload = content.as_bytes().to_vec();
    }

    /// Get a metadata value
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Set a metadata value, replacing any previous value for the key
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn remove_metadata(&mut self, key: &str) -> Option<String> {
        self.metadata.remove(key)
    }

    pub fn contains_metadata(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    /// All metadata entries
    pub fn metadata_map(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn object_attachment(&self, key: &str) -> Option<&ObjectAttachment> {
        self.object_attachments.get(key)
    }

    /// Typed view of an attachment
    pub fn object_attachment_as<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.object_attachments
            .get(key)
            .and_then(|o| o.downcast_ref::<T>())
    }

    pub fn set_object_attachment(&mut self, key: impl Into<String>, value: ObjectAttachment) {
        self.object_attachments.insert(key.into(), value);
    }

    /// Drop all transient attachments (e.g. when a transform replaces the payload)
    pub fn clear_object_attachments(&mut self) {
        self.object_attachments.clear();
    }

    /// Record that the message passed through `stage` now
    pub fn append_lifecycle_event(&mut self, stage: impl Into<String>) {
        self.append_lifecycle_event_at(stage, Utc::now());
    }

    pub fn append_lifecycle_event_at(&mut self, stage: impl Into<String>, timestamp: DateTime<Utc>) {
        self.lifecycle_events.push(MessageLifecycleEvent {
            stage: stage.into(),
            timestamp,
        });
    }

    pub fn lifecycle_events(&self) -> &[MessageLifecycleEvent] {
        &self.lifecycle_events
    }

    /// Whether the stop-processing sentinel is set
    pub fn is_stop_processing(&self) -> bool {
        self.metadata(STOP_PROCESSING_KEY)
            .is_some_and(|v| v.eq_ignore_ascii_case(STOP_PROCESSING_VALUE))
    }

    /// Set the stop-processing sentinel
    pub fn stop_processing(&mut self) {
        self.set_metadata(STOP_PROCESSING_KEY, STOP_PROCESSING_VALUE);
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut attachment_keys: Vec<&String> = self.object_attachments.keys().collect();
        attachment_keys.sort();
        f.debug_struct("Message")
            .field("unique_id", &self.unique_id)
            .field("payload_len", &self.payload.len())
            .field("metadata", &self.metadata)
            .field("object_attachments", &attachment_keys)
            .field("lifecycle_events", &self.lifecycle_events.len())
            .finish()
    }
}

/// Returns true for "true", "t", "yes", "y", "on" and "1" (case-insensitive)
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "t" | "yes" | "y" | "on" | "1"
    )
}
