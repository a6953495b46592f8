//! In-process document store with live listeners
//!
//! Backs the interactive `chat` command and the test suite. Every write
//! re-runs the queries listening on the touched collection and pushes a fresh
//! snapshot to each, the way a hosted document store's listeners behave.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tokio::sync::mpsc;

use super::{
    Direction, DocPath, Document, Fields, Query, RemoteError, RemoteStore, Subscription,
    Unsubscribe,
};
use crate::models::{parse_timestamp, Cursor};

type Snapshot<T> = mpsc::UnboundedSender<Result<T, RemoteError>>;

struct QueryListener {
    query: Query,
    tx: Snapshot<Vec<Document>>,
}

struct DocListener {
    path: DocPath,
    tx: Snapshot<Option<Document>>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Fields>>,
    queries: HashMap<u64, QueryListener>,
    watchers: HashMap<u64, DocListener>,
    next_listener: u64,
    offline: bool,
    fetches: usize,
}

impl Inner {
    fn listener_id(&mut self) -> u64 {
        self.next_listener += 1;
        self.next_listener
    }

    fn document(&self, path: &DocPath) -> Option<Document> {
        self.collections
            .get(&path.collection)
            .and_then(|docs| docs.get(&path.id))
            .map(|fields| Document::new(path.id.clone(), fields.clone()))
    }

    fn run_query(&self, query: &Query) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if let Some((field, direction)) = &query.order_by {
            let key = |doc: &Document| (doc.fields.get(field).and_then(parse_timestamp), doc.id.clone());
            docs.sort_by_key(key);
            if *direction == Direction::Descending {
                docs.reverse();
            }

            if let Some(cursor) = &query.start_after {
                docs.retain(|doc| {
                    let doc_cursor = Cursor::from_document(doc);
                    match direction {
                        Direction::Ascending => doc_cursor.key() > cursor.key(),
                        Direction::Descending => doc_cursor.key() < cursor.key(),
                    }
                });
            }
        }

        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        docs
    }

    /// Push fresh snapshots to everything listening on `path`'s collection.
    fn notify(&mut self, path: &DocPath) {
        let mut dead = Vec::new();
        for (id, listener) in &self.queries {
            if listener.query.collection == path.collection {
                let snapshot = self.run_query(&listener.query);
                if listener.tx.send(Ok(snapshot)).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            self.queries.remove(&id);
        }

        let doc = self.document(path);
        self.watchers.retain(|_, watcher| {
            watcher.path != *path || watcher.tx.send(Ok(doc.clone())).is_ok()
        });
    }

    fn check_online(&self, op: &str) -> Result<(), RemoteError> {
        if self.offline {
            return Err(RemoteError::Unavailable(format!("{} while offline", op)));
        }
        Ok(())
    }
}

/// Shared in-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic inside a listener must not wedge every other client.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a document with a caller-chosen id.
    pub fn insert(&self, path: DocPath, fields: Fields) {
        let mut inner = self.lock();
        inner
            .collections
            .entry(path.collection.clone())
            .or_default()
            .insert(path.id.clone(), fields);
        inner.notify(&path);
    }

    #[cfg(test)]
    pub fn remove(&self, path: &DocPath) -> bool {
        let mut inner = self.lock();
        let removed = inner
            .collections
            .get_mut(&path.collection)
            .and_then(|docs| docs.remove(&path.id))
            .is_some();
        if removed {
            inner.notify(path);
        }
        removed
    }

    #[cfg(test)]
    pub fn get(&self, path: &DocPath) -> Option<Document> {
        self.lock().document(path)
    }

    /// While offline, new subscriptions, fetches and writes fail.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Live listeners (queries and document watches).
    pub fn listener_count(&self) -> usize {
        let inner = self.lock();
        inner.queries.len() + inner.watchers.len()
    }

    /// One-shot fetches served so far.
    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    fn unsubscribe_hook(&self, id: u64) -> Unsubscribe {
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.queries.remove(&id);
                inner.watchers.remove(&id);
            }
        })
    }
}

impl RemoteStore for MemoryStore {
    fn subscribe(&self, query: Query) -> Subscription<Vec<Document>> {
        let mut inner = self.lock();
        if let Err(e) = inner.check_online("subscribe") {
            return Subscription::failed(e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(inner.run_query(&query)));
        let id = inner.listener_id();
        tracing::debug!("Listener {} on {}", id, query.collection);
        inner.queries.insert(id, QueryListener { query, tx });
        drop(inner);

        Subscription::new(rx, self.unsubscribe_hook(id))
    }

    fn watch(&self, path: &DocPath) -> Subscription<Option<Document>> {
        let mut inner = self.lock();
        if let Err(e) = inner.check_online("watch") {
            return Subscription::failed(e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(inner.document(path)));
        let id = inner.listener_id();
        tracing::debug!("Watcher {} on {}", id, path);
        inner.watchers.insert(
            id,
            DocListener {
                path: path.clone(),
                tx,
            },
        );
        drop(inner);

        Subscription::new(rx, self.unsubscribe_hook(id))
    }

    fn fetch_once(&self, query: Query) -> BoxFuture<'_, Result<Vec<Document>, RemoteError>> {
        let mut inner = self.lock();
        let result = inner.check_online("fetch").map(|()| {
            inner.fetches += 1;
            inner.run_query(&query)
        });
        future::ready(result).boxed()
    }

    fn write_merge(&self, path: DocPath, fields: Fields) -> BoxFuture<'_, Result<(), RemoteError>> {
        let mut inner = self.lock();
        let result = inner.check_online("write").map(|()| {
            let doc = inner
                .collections
                .entry(path.collection.clone())
                .or_default()
                .entry(path.id.clone())
                .or_default();
            doc.extend(fields);
            inner.notify(&path);
        });
        future::ready(result).boxed()
    }

    fn add(
        &self,
        collection: String,
        fields: Fields,
    ) -> BoxFuture<'_, Result<Document, RemoteError>> {
        let mut inner = self.lock();
        let result = inner.check_online("add").map(|()| {
            let path = DocPath::new(collection, uuid::Uuid::new_v4().simple().to_string());
            inner
                .collections
                .entry(path.collection.clone())
                .or_default()
                .insert(path.id.clone(), fields.clone());
            inner.notify(&path);
            Document::new(path.id, fields)
        });
        future::ready(result).boxed()
    }
}
