//! Store wrappers that misbehave on purpose, for tests

use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tokio::sync::Semaphore;

use super::{DocPath, Document, Fields, MemoryStore, Query, RemoteError, RemoteStore, Subscription};

/// `write_merge` never completes; everything else goes to the inner store.
pub struct StalledWrites(pub MemoryStore);

impl RemoteStore for StalledWrites {
    fn subscribe(&self, query: Query) -> Subscription<Vec<Document>> {
        self.0.subscribe(query)
    }

    fn watch(&self, path: &DocPath) -> Subscription<Option<Document>> {
        self.0.watch(path)
    }

    fn fetch_once(&self, query: Query) -> BoxFuture<'_, Result<Vec<Document>, RemoteError>> {
        self.0.fetch_once(query)
    }

    fn write_merge(&self, _path: DocPath, _fields: Fields) -> BoxFuture<'_, Result<(), RemoteError>> {
        future::pending().boxed()
    }

    fn add(&self, collection: String, fields: Fields) -> BoxFuture<'_, Result<Document, RemoteError>> {
        self.0.add(collection, fields)
    }
}

/// Each `fetch_once` waits for a permit, handed out in call order.
pub struct GatedFetches {
    pub inner: MemoryStore,
    pub gate: Arc<Semaphore>,
}

impl GatedFetches {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
        }
    }
}

impl RemoteStore for GatedFetches {
    fn subscribe(&self, query: Query) -> Subscription<Vec<Document>> {
        self.inner.subscribe(query)
    }

    fn watch(&self, path: &DocPath) -> Subscription<Option<Document>> {
        self.inner.watch(path)
    }

    fn fetch_once(&self, query: Query) -> BoxFuture<'_, Result<Vec<Document>, RemoteError>> {
        let gate = Arc::clone(&self.gate);
        async move {
            gate.acquire()
                .await
                .map_err(|_| RemoteError::Closed)?
                .forget();
            self.inner.fetch_once(query).await
        }
        .boxed()
    }

    fn write_merge(&self, path: DocPath, fields: Fields) -> BoxFuture<'_, Result<(), RemoteError>> {
        self.inner.write_merge(path, fields)
    }

    fn add(&self, collection: String, fields: Fields) -> BoxFuture<'_, Result<Document, RemoteError>> {
        self.inner.add(collection, fields)
    }
}
