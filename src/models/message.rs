//! Message-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{IdError, UserId};
use crate::remote::{Document, Fields};

/// Field every message query orders by.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// A message document that cannot be turned into a `Message`.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message {id} has invalid fields: {source}")]
    Fields {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("message {id} has an invalid sender: {source}")]
    Sender {
        id: String,
        #[source]
        source: IdError,
    },
}

/// Chat message as cached from the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender_id: UserId,
    /// `None` when the stored timestamp is missing or unparseable.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageFields {
    text: String,
    sender_id: String,
    #[serde(default)]
    timestamp: Option<Value>,
}

impl Message {
    pub fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        let raw: MessageFields = serde_json::from_value(Value::Object(doc.fields.clone()))
            .map_err(|source| DecodeError::Fields {
                id: doc.id.clone(),
                source,
            })?;
        let sender_id = UserId::parse(raw.sender_id).map_err(|source| DecodeError::Sender {
            id: doc.id.clone(),
            source,
        })?;

        Ok(Self {
            id: doc.id.clone(),
            text: raw.text,
            sender_id,
            timestamp: raw.timestamp.as_ref().and_then(parse_timestamp),
        })
    }

    /// Ordering key: timestamp, then id. Missing timestamps sort first.
    pub fn sort_key(&self) -> (Option<DateTime<Utc>>, &str) {
        (self.timestamp, &self.id)
    }
}

/// Decode a snapshot, skipping documents that cannot be represented.
pub fn decode_messages(docs: &[Document]) -> Vec<Message> {
    docs.iter()
        .filter_map(|doc| match Message::from_document(doc) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!("Skipping malformed message: {}", e);
                None
            }
        })
        .collect()
}

/// Fields written for a newly sent message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage<'a> {
    pub text: &'a str,
    pub sender_id: &'a UserId,
    pub receiver_id: &'a UserId,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub timestamp: DateTime<Utc>,
}

fn serialize_rfc3339<S: serde::Serializer>(
    ts: &DateTime<Utc>,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339())
}

impl NewMessage<'_> {
    pub fn to_fields(&self) -> Fields {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => fields,
            // A struct of strings always serializes to an object.
            _ => Fields::new(),
        }
    }
}

/// Accepts RFC 3339 strings, epoch milliseconds, or `{seconds, nanoseconds}`.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::Object(map) => {
            let secs = map.get("seconds")?.as_i64()?;
            let nanos = map.get("nanoseconds").and_then(Value::as_u64).unwrap_or(0);
            DateTime::from_timestamp(secs, u32::try_from(nanos).ok()?)
        }
        _ => None,
    }
}

/// Continuation point of a timestamp-ordered query: the last document seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    timestamp: Option<DateTime<Utc>>,
    id: String,
}

impl Cursor {
    pub fn from_message(message: &Message) -> Self {
        Self {
            timestamp: message.timestamp,
            id: message.id.clone(),
        }
    }

    pub fn from_document(doc: &Document) -> Self {
        Self {
            timestamp: doc.fields.get(TIMESTAMP_FIELD).and_then(parse_timestamp),
            id: doc.id.clone(),
        }
    }

    pub fn key(&self) -> (Option<DateTime<Utc>>, &str) {
        (self.timestamp, &self.id)
    }
}

/// One page of older messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    /// Newest-first, as the descending page query returns them.
    pub messages: Vec<Message>,
    /// Oldest message of this page; `None` for an empty page.
    pub cursor: Option<Cursor>,
    pub has_more: bool,
}

impl MessagePage {
    pub fn into_ascending(mut self) -> Self {
        self.messages.reverse();
        self
    }
}
