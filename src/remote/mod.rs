//! Remote document store
//!
//! The chat core talks to its backing store only through `RemoteStore`:
//! live query subscriptions, single-document watches, one-shot fetches and
//! merge writes. `MemoryStore` is the in-process implementation.

pub mod memory;
mod subscription;
#[cfg(test)]
pub mod testing;

use std::fmt;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::models::Cursor;

pub use memory::MemoryStore;
pub use subscription::{Forwarder, Subscription, Unsubscribe};

/// Document body.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Errors reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("subscription closed by the store")]
    Closed,
}

/// A stored document: its id within the collection plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Location of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
    pub collection: String,
    pub id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Collection query: optional ordering, cursor and limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub order_by: Option<(String, Direction)>,
    pub start_after: Option<Cursor>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            order_by: None,
            start_after: None,
            limit: None,
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    /// Only documents strictly after `cursor` in this query's order.
    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Capabilities the chat core needs from a document store.
pub trait RemoteStore: Send + Sync + 'static {
    /// Live query: the full result set is delivered on subscribe and again
    /// after every change to the collection.
    fn subscribe(&self, query: Query) -> Subscription<Vec<Document>>;

    /// Live document: `None` while the document does not exist.
    fn watch(&self, path: &DocPath) -> Subscription<Option<Document>>;

    fn fetch_once(&self, query: Query) -> BoxFuture<'_, Result<Vec<Document>, RemoteError>>;

    /// Merge `fields` into the document, creating it when missing.
    fn write_merge(&self, path: DocPath, fields: Fields) -> BoxFuture<'_, Result<(), RemoteError>>;

    /// Create a document with a store-assigned id.
    fn add(&self, collection: String, fields: Fields)
        -> BoxFuture<'_, Result<Document, RemoteError>>;
}
