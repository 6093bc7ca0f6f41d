//! Unique id generation, injected wherever new message ids are needed

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Source of message unique ids
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Ids that sort by creation time: 12 hex digits of epoch millis followed by
/// 20 random hex digits
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeOrderedIdGenerator;

impl TimeOrderedIdGenerator {
    /// Recover the creation time embedded in an id produced by this generator
    pub fn timestamp_of(id: &str) -> Option<DateTime<Utc>> {
        let millis = i64::from_str_radix(id.get(..12)?, 16).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

impl IdGenerator for TimeOrderedIdGenerator {
    fn next_id(&self) -> String {
        let millis = Utc::now().timestamp_millis() & 0xFFFF_FFFF_FFFF;
        let random = Uuid::new_v4().simple().to_string();
        format!("{:012x}{}", millis, &random[..20])
    }
}
