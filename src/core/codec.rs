//! Opaque message encoding used at transport boundaries

use crate::core::{
    error::{CoreError, CoreResult},
    message::Message,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Converts messages to and from bytes
pub trait MessageEncoder: Send + Sync {
    fn encode(&self, msg: &Message) -> CoreResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> CoreResult<Message>;
}

/// Serialized form used by [`JsonMessageEncoder`]
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    unique_id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    payload: Payload,
}

/// UTF-8 payloads are written as a JSON string, anything else as a byte array
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Payload::Text(text.to_string()),
            Err(_) => Payload::Bytes(bytes.to_vec()),
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.into_bytes(),
            Payload::Bytes(bytes) => bytes,
        }
    }
}

/// JSON encoding of id, metadata and payload
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageEncoder;

impl MessageEncoder for JsonMessageEncoder {
    fn encode(&self, msg: &Message) -> CoreResult<Vec<u8>> {
        let envelope = Envelope {
            unique_id: msg.unique_id().to_string(),
            metadata: msg.metadata_map().clone(),
            payload: Payload::from_bytes(msg.payload()),
        };
        serde_json::to_vec(&envelope).map_err(|e| CoreError::processing("json-encoder", e))
    }

    fn decode(&self, bytes: &[u8]) -> CoreResult<Message> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| CoreError::processing("json-encoder", e))?;
        let mut msg = Message::with_id(envelope.unique_id, envelope.payload.into_bytes());
        for (k, v) in envelope.metadata {
            msg.set_metadata(k, v);
        }
        Ok(msg)
    }
}
