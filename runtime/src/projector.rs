//! Live roster projector.
//!
//! Turns the document store's snapshot pushes into typed, de-duplicated,
//! immutable views and hands them to a listener.
//!
//! # Delivery guarantees
//!
//! - Each push replaces the previous view wholesale; there are no diffs.
//! - Views are delivered in strictly increasing store version. A push that is
//!   not newer than the last delivered one is dropped; intermediate states
//!   may therefore be coalesced.
//! - Listener invocations never overlap. Every view is a fresh
//!   `Arc<RosterSnapshot<T>>`, so a listener can keep it for rendering
//!   without anyone mutating it underneath.
//! - [`Subscription::unsubscribe`] waits for an in-flight invocation, then
//!   detaches the listener. Once it returns the listener is never called
//!   again.
//! - Dropping the [`Subscription`] cannot wait, but no invocation starts
//!   after the drop; at most one already running finishes.
//! - When the store feed ends or fails, the listener is dropped and the
//!   subscription becomes inactive.
//!
//! # Example
//!
//! ```ignore
//! let projector = LiveProjector::new(documents);
//! let subscription = projector
//!     .subscribe::<Event, _>(Query::all(CollectionPath::events()), |snapshot| {
//!         render(&snapshot.values().collect::<Vec<_>>());
//!     })
//!     .await?;
//!
//! // Screen closed
//! subscription.unsubscribe().await;
//! ```

use futures::StreamExt;
use rollcall_core::document::{DocumentError, DocumentStore, Query, Snapshot, Version};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// One decoded document of a roster view.
#[derive(Clone, Debug, PartialEq)]
pub struct RosterEntry<T> {
    /// Document id
    pub id: String,
    /// Decoded body
    pub value: T,
}

/// Immutable, typed view of one query result set.
#[derive(Clone, Debug, PartialEq)]
pub struct RosterSnapshot<T> {
    /// Store version this view reflects
    pub version: Version,
    /// Entries in store order, unique by id
    pub entries: Vec<RosterEntry<T>>,
}

impl<T> RosterSnapshot<T> {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the view is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decoded values in order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|entry| &entry.value)
    }
}

impl<T: DeserializeOwned> RosterSnapshot<T> {
    /// Decode a raw store snapshot.
    ///
    /// Duplicate ids keep the position of their first occurrence and the
    /// body of their last. Documents that fail to decode are skipped.
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut entries: Vec<RosterEntry<T>> = Vec::with_capacity(snapshot.documents.len());
        let mut positions: HashMap<&str, usize> = HashMap::new();

        for document in &snapshot.documents {
            let value = match document.decode::<T>() {
                Ok(value) => value,
                Err(error) => {
                    tracing::warn!(id = %document.id, %error, "Skipping undecodable document");
                    continue;
                }
            };
            match positions.get(document.id.as_str()) {
                Some(&index) => entries[index].value = value,
                None => {
                    positions.insert(&document.id, entries.len());
                    entries.push(RosterEntry {
                        id: document.id.clone(),
                        value,
                    });
                }
            }
        }

        Self {
            version: snapshot.version,
            entries,
        }
    }
}

type Listener<T> = Box<dyn FnMut(Arc<RosterSnapshot<T>>) + Send>;

struct ListenerSlot<T> {
    listener: Option<Listener<T>>,
    last_version: Option<Version>,
    latest: Option<Arc<RosterSnapshot<T>>>,
}

/// Live subscription handle returned by [`LiveProjector::subscribe`].
///
/// Dropping the handle cancels the feed as well. Unlike
/// [`Subscription::unsubscribe`] it does not wait for an invocation that is
/// already running.
pub struct Subscription<T> {
    slot: Arc<Mutex<ListenerSlot<T>>>,
    cancelled: Arc<AtomicBool>,
    pump: JoinHandle<()>,
}

impl<T> Subscription<T> {
    /// Stop delivery. Idempotent.
    ///
    /// Waits for a listener invocation that is already running, then
    /// detaches the listener and releases the store feed.
    pub async fn unsubscribe(&self) {
        let mut slot = self.slot.lock().await;
        if slot.listener.take().is_some() {
            tracing::debug!("Subscription closed");
        }
        drop(slot);
        self.pump.abort();
    }

    /// Whether the listener is still attached.
    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.listener.is_some() && !self.pump.is_finished()
    }

    /// Last view handed to the listener.
    pub async fn latest(&self) -> Option<Arc<RosterSnapshot<T>>> {
        self.slot.lock().await.latest.clone()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Ok(mut slot) = self.slot.try_lock() {
            slot.listener = None;
        }
        self.pump.abort();
    }
}

/// Subscribes to store queries and projects them into typed views.
#[derive(Clone)]
pub struct LiveProjector {
    documents: Arc<dyn DocumentStore>,
}

impl LiveProjector {
    /// Create a projector over a document store.
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// Subscribe `listener` to the live result set of `query`.
    ///
    /// The listener receives the current result set first and a new view
    /// after every change. It runs on the projector's pump task and must not
    /// block.
    ///
    /// # Errors
    ///
    /// Returns the store error if the subscription cannot be opened.
    pub async fn subscribe<T, F>(
        &self,
        query: Query,
        listener: F,
    ) -> Result<Subscription<T>, DocumentError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        F: FnMut(Arc<RosterSnapshot<T>>) + Send + 'static,
    {
        let collection = query.collection.clone();
        let mut feed = self.documents.subscribe(query).await?;

        let slot = Arc::new(Mutex::new(ListenerSlot {
            listener: Some(Box::new(listener) as Listener<T>),
            last_version: None,
            latest: None,
        }));
        let pump_slot = Arc::clone(&slot);
        let cancelled = Arc::new(AtomicBool::new(false));
        let pump_cancelled = Arc::clone(&cancelled);

        let pump = tokio::spawn(async move {
            while let Some(item) = feed.next().await {
                let snapshot = match item {
                    Ok(snapshot) => snapshot,
                    Err(error) => {
                        tracing::warn!(collection = %collection, %error, "Snapshot feed failed");
                        break;
                    }
                };
                let view = Arc::new(RosterSnapshot::<T>::from_snapshot(&snapshot));

                let mut slot = pump_slot.lock().await;
                if slot.listener.is_none() || pump_cancelled.load(Ordering::Acquire) {
                    break;
                }
                if slot.last_version.is_some_and(|last| view.version <= last) {
                    tracing::trace!(
                        collection = %collection,
                        version = %view.version,
                        "Dropping stale snapshot"
                    );
                    continue;
                }
                slot.last_version = Some(view.version);
                slot.latest = Some(Arc::clone(&view));
                if let Some(listener) = slot.listener.as_mut() {
                    listener(view);
                }
            }
            pump_slot.lock().await.listener = None;
            tracing::debug!(collection = %collection, "Snapshot feed ended");
        });

        Ok(Subscription {
            slot,
            cancelled,
            pump,
        })
    }
}
