//! In-memory document store.
//!
//! Mirrors the semantics the runtime expects from a managed document store:
//! per-collection write versions, conditional appends stamped with server
//! time, and subscriptions that push the full result set after every write.
//! All state sits behind one mutex, so every write and the snapshot pushes it
//! triggers are serialized in the order the writes were applied.

use futures::channel::mpsc::{UnboundedSender, unbounded};
use rollcall_core::document::{
    AppendOptions, CollectionPath, Document, DocumentError, DocumentPath, DocumentStore, Query,
    Snapshot, SnapshotStream, StoreFuture, Version,
};
use rollcall_core::environment::{Clock, SystemClock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Collection {
    version: Version,
    documents: Vec<Document>,
}

impl Collection {
    fn snapshot(&self, query: &Query) -> Snapshot {
        Snapshot {
            version: self.version,
            documents: self
                .documents
                .iter()
                .filter(|doc| query.matches(&doc.data))
                .cloned()
                .collect(),
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.documents.iter().position(|doc| doc.id == id)
    }
}

struct Subscriber {
    query: Query,
    sender: UnboundedSender<Result<Snapshot, DocumentError>>,
}

#[derive(Default)]
struct State {
    collections: HashMap<CollectionPath, Collection>,
    subscribers: Vec<Subscriber>,
    next_auto_id: u64,
    failing_reads: usize,
    failing_writes: usize,
}

impl State {
    fn take_read_fault(&mut self) -> Result<(), DocumentError> {
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(DocumentError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }

    fn take_write_fault(&mut self) -> Result<(), DocumentError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(DocumentError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    /// Bump the collection version and push fresh snapshots to its subscribers.
    fn commit(&mut self, collection: &CollectionPath) {
        let entry = self.collections.entry(collection.clone()).or_default();
        entry.version = entry.version.next();

        let Self {
            collections,
            subscribers,
            ..
        } = self;
        let Some(entry) = collections.get(collection) else {
            return;
        };
        subscribers.retain(|sub| {
            if &sub.query.collection != collection {
                return !sub.sender.is_closed();
            }
            sub.sender.unbounded_send(Ok(entry.snapshot(&sub.query))).is_ok()
        });
    }
}

/// Document store held entirely in memory.
///
/// Clones share the same data, so a test can keep a handle for assertions
/// and fault injection while the runtime owns another.
///
/// # Example
///
/// ```
/// use rollcall_core::document::{CollectionPath, DocumentStore, Query};
/// use rollcall_testing::InMemoryDocumentStore;
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryDocumentStore::new();
/// let users = CollectionPath::users();
///
/// store.set(&users.doc("u1"), json!({"username": "ada"})).await?;
///
/// let snapshot = store.query(&Query::all(users)).await?;
/// assert_eq!(snapshot.documents.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryDocumentStore {
    /// Create an empty store whose server time is the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store with an injected server clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` reads fail with [`DocumentError::Unavailable`].
    pub fn fail_next_reads(&self, count: usize) {
        self.lock().failing_reads = count;
    }

    /// Make the next `count` writes fail with [`DocumentError::Unavailable`].
    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Number of documents currently stored in a collection.
    #[must_use]
    pub fn document_count(&self, collection: &CollectionPath) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map_or(0, |c| c.documents.len())
    }

    /// Whether a document exists.
    #[must_use]
    pub fn contains(&self, path: &DocumentPath) -> bool {
        self.lock()
            .collections
            .get(path.collection())
            .is_some_and(|c| c.position(path.id()).is_some())
    }

    /// Synchronous read for assertions.
    #[must_use]
    pub fn peek(&self, path: &DocumentPath) -> Option<Value> {
        let state = self.lock();
        let collection = state.collections.get(path.collection())?;
        collection
            .position(path.id())
            .map(|i| collection.documents[i].data.clone())
    }

    /// Number of live subscription feeds.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|sub| !sub.sender.is_closed());
        state.subscribers.len()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, path: &DocumentPath) -> StoreFuture<'_, Option<Document>> {
        let path = path.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut state = self.lock();
            state.take_read_fault()?;
            let found = state.collections.get(path.collection()).and_then(|c| {
                c.position(path.id()).map(|i| c.documents[i].clone())
            });
            Ok(found)
        })
    }

    fn set(&self, path: &DocumentPath, data: Value) -> StoreFuture<'_, ()> {
        let path = path.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut state = self.lock();
            state.take_write_fault()?;
            let collection = state
                .collections
                .entry(path.collection().clone())
                .or_default();
            let document = Document {
                id: path.id().to_string(),
                data,
            };
            match collection.position(path.id()) {
                Some(i) => collection.documents[i] = document,
                None => collection.documents.push(document),
            }
            state.commit(path.collection());
            Ok(())
        })
    }

    fn update(&self, path: &DocumentPath, fields: Map<String, Value>) -> StoreFuture<'_, ()> {
        let path = path.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut state = self.lock();
            state.take_write_fault()?;
            let not_found = || DocumentError::NotFound(path.clone());
            let collection = state
                .collections
                .get_mut(path.collection())
                .ok_or_else(not_found)?;
            let index = collection.position(path.id()).ok_or_else(not_found)?;
            let Value::Object(body) = &mut collection.documents[index].data else {
                return Err(DocumentError::Serialization(format!(
                    "{path} is not an object"
                )));
            };
            body.extend(fields);
            state.commit(path.collection());
            Ok(())
        })
    }

    fn delete(&self, path: &DocumentPath) -> StoreFuture<'_, ()> {
        let path = path.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut state = self.lock();
            state.take_write_fault()?;
            let removed = state
                .collections
                .get_mut(path.collection())
                .and_then(|c| c.position(path.id()).map(|i| c.documents.remove(i)))
                .is_some();
            if removed {
                state.commit(path.collection());
            }
            Ok(())
        })
    }

    fn query(&self, query: &Query) -> StoreFuture<'_, Snapshot> {
        let query = query.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut state = self.lock();
            state.take_read_fault()?;
            Ok(state
                .collections
                .get(&query.collection)
                .map(|c| c.snapshot(&query))
                .unwrap_or_default())
        })
    }

    fn append(
        &self,
        collection: &CollectionPath,
        data: Value,
        options: AppendOptions,
    ) -> StoreFuture<'_, Document> {
        let collection = collection.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut state = self.lock();
            state.take_write_fault()?;

            let actual = state
                .collections
                .get(&collection)
                .map_or_else(Version::default, |c| c.version);
            if let Some(expected) = options.expected_version {
                if expected != actual {
                    return Err(DocumentError::Conflict {
                        collection,
                        expected,
                        actual,
                    });
                }
            }

            let server_time = self.clock.now();
            if let Some(not_before) = options.not_before {
                if server_time < not_before {
                    return Err(DocumentError::PreconditionFailed {
                        not_before,
                        server_time,
                    });
                }
            }

            let mut data = data;
            if let Some(field) = options.server_timestamp_field {
                let Value::Object(body) = &mut data else {
                    return Err(DocumentError::Serialization(
                        "server timestamp requires an object body".to_string(),
                    ));
                };
                let stamp = serde_json::to_value(server_time)
                    .map_err(|e| DocumentError::Serialization(e.to_string()))?;
                body.insert(field, stamp);
            }

            state.next_auto_id += 1;
            let document = Document {
                id: format!("auto-{:08}", state.next_auto_id),
                data,
            };
            state
                .collections
                .entry(collection.clone())
                .or_default()
                .documents
                .push(document.clone());
            state.commit(&collection);
            tracing::trace!(collection = %collection, id = %document.id, "Appended document");
            Ok(document)
        })
    }

    fn delete_collection(&self, collection: &CollectionPath) -> StoreFuture<'_, usize> {
        let collection = collection.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut state = self.lock();
            state.take_write_fault()?;
            let removed = state
                .collections
                .get_mut(&collection)
                .map_or(0, |c| std::mem::take(&mut c.documents).len());
            state.commit(&collection);
            Ok(removed)
        })
    }

    fn subscribe(&self, query: Query) -> StoreFuture<'_, SnapshotStream> {
        Box::pin(async move {
            let (sender, receiver) = unbounded();
            let mut state = self.lock();
            state.take_read_fault()?;
            let initial = state
                .collections
                .get(&query.collection)
                .map(|c| c.snapshot(&query))
                .unwrap_or_default();
            // Receiver is alive, so the send cannot fail.
            let _ = sender.unbounded_send(Ok(initial));
            state.subscribers.push(Subscriber { query, sender });
            let stream: SnapshotStream = Box::pin(receiver);
            Ok(stream)
        })
    }
}
