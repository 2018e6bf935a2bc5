//! Integration tests for the event catalog

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::Harness;
use rollcall_core::document::{
    AppendOptions, CollectionPath, Document, DocumentPath, DocumentStore, Query, Snapshot,
    SnapshotStream, StoreFuture,
};
use rollcall_core::types::{Capacity, EventDetails, EventId, UserId};
use rollcall_runtime::{CapacityGate, CatalogError, CheckInError, EventCatalog, RetryPolicy};
use rollcall_testing::InMemoryDocumentStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Store that deletes an event through the catalog right before the first
/// attendance append reaches the inner store.
struct DeleteBeforeAppend {
    inner: InMemoryDocumentStore,
    catalog: EventCatalog,
    event: EventId,
    fired: AtomicBool,
}

impl DocumentStore for DeleteBeforeAppend {
    fn get(&self, path: &DocumentPath) -> StoreFuture<'_, Option<Document>> {
        self.inner.get(path)
    }

    fn set(&self, path: &DocumentPath, data: Value) -> StoreFuture<'_, ()> {
        self.inner.set(path, data)
    }

    fn update(&self, path: &DocumentPath, fields: Map<String, Value>) -> StoreFuture<'_, ()> {
        self.inner.update(path, fields)
    }

    fn delete(&self, path: &DocumentPath) -> StoreFuture<'_, ()> {
        self.inner.delete(path)
    }

    fn query(&self, query: &Query) -> StoreFuture<'_, Snapshot> {
        self.inner.query(query)
    }

    fn append(
        &self,
        collection: &CollectionPath,
        data: Value,
        options: AppendOptions,
    ) -> StoreFuture<'_, Document> {
        let collection = collection.clone();
        Box::pin(async move {
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.catalog
                    .delete(&self.event)
                    .await
                    .expect("delete between read and append");
            }
            self.inner.append(&collection, data, options).await
        })
    }

    fn delete_collection(&self, collection: &CollectionPath) -> StoreFuture<'_, usize> {
        self.inner.delete_collection(collection)
    }

    fn subscribe(&self, query: Query) -> StoreFuture<'_, SnapshotStream> {
        self.inner.subscribe(query)
    }
}

fn details(title: &str, description: &str) -> EventDetails {
    EventDetails {
        title: title.to_string(),
        description: description.to_string(),
        location: "Pier 9".to_string(),
        scheduled_at: Utc.with_ymd_and_hms(2025, 4, 12, 18, 0, 0).unwrap(),
        capacity: Capacity::new(25),
    }
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let h = Harness::new();

    let created = h
        .rollcall
        .catalog
        .create(details("Rust Night", "Talks"), vec![1])
        .await
        .unwrap();
    let loaded = h.rollcall.catalog.get(&created.id).await.unwrap();

    assert_eq!(loaded, created);
    assert_eq!(loaded.capacity, Capacity::new(25));
    assert!(loaded.image_url.is_some());
}

#[tokio::test]
async fn edit_without_image_keeps_url_and_replaces_fields() {
    let h = Harness::new();
    let created = h
        .rollcall
        .catalog
        .create(details("Rust Night", "Talks"), vec![1])
        .await
        .unwrap();

    let mut changed = details("Rust Night II", "More talks");
    changed.capacity = Capacity::new(3);
    changed.scheduled_at += Duration::days(7);
    let edited = h.rollcall.catalog.edit(&created.id, changed, None).await.unwrap();

    assert_eq!(edited.image_url, created.image_url);
    assert_eq!(edited.title, "Rust Night II");
    assert_eq!(edited.capacity, Capacity::new(3));
    assert_eq!(h.rollcall.catalog.get(&created.id).await.unwrap(), edited);
    assert_eq!(h.blobs.len(), 1);
}

#[tokio::test]
async fn edit_with_image_swaps_url() {
    let h = Harness::new();
    let created = h
        .rollcall
        .catalog
        .create(details("Rust Night", "Talks"), vec![1])
        .await
        .unwrap();

    let edited = h
        .rollcall
        .catalog
        .edit(&created.id, details("Rust Night", "Talks"), Some(vec![2]))
        .await
        .unwrap();

    assert_ne!(edited.image_url, created.image_url);
    assert_eq!(h.blobs.resolve(edited.image_url.as_deref().unwrap()), Some(vec![2]));
}

#[tokio::test]
async fn edit_with_failed_upload_leaves_event_untouched() {
    let h = Harness::new();
    let created = h
        .rollcall
        .catalog
        .create(details("Rust Night", "Talks"), vec![1])
        .await
        .unwrap();
    h.blobs.reject_uploads(true);

    let result = h
        .rollcall
        .catalog
        .edit(&created.id, details("Renamed", "Talks"), Some(vec![2]))
        .await;

    assert!(matches!(result, Err(CatalogError::Publish(_))));
    assert_eq!(h.rollcall.catalog.get(&created.id).await.unwrap(), created);
}

#[tokio::test]
async fn edit_missing_event_is_not_found() {
    let h = Harness::new();

    let result = h
        .rollcall
        .catalog
        .edit(&EventId::new("nope"), details("x", "y"), None)
        .await;

    assert!(matches!(result, Err(CatalogError::NotFound(_))));
    assert!(h.blobs.is_empty());
}

#[tokio::test]
async fn delete_cascades_attendance() {
    let h = Harness::new();
    let event = h.seed_event("e1", 10).await;
    for user in ["a", "b"] {
        h.rollcall
            .gate
            .try_check_in(&event, &UserId::new(user), h.now())
            .await
            .unwrap();
    }

    tokio_test::assert_ok!(h.rollcall.catalog.delete(&event).await);

    assert!(!h.documents.contains(&DocumentPath::event(&event)));
    assert_eq!(h.documents.document_count(&CollectionPath::attendance(&event)), 0);
    assert!(matches!(
        h.rollcall.catalog.get(&event).await,
        Err(CatalogError::NotFound(_))
    ));
    assert!(matches!(
        h.rollcall.gate.try_check_in(&event, &UserId::new("c"), h.now()).await,
        Err(CheckInError::RecordNotFound(_))
    ));
}

#[tokio::test]
async fn search_is_case_insensitive_over_title_and_description() {
    let h = Harness::new();
    let events = [
        ("Rust Night", "talks"),
        ("Board games", "Bring RUST-themed dice"),
        ("Yoga", "Mats"),
    ];
    for (title, description) in events {
        h.rollcall
            .catalog
            .create(details(title, description), vec![0])
            .await
            .unwrap();
    }

    let mut titles: Vec<String> = h
        .rollcall
        .catalog
        .search("rust")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.title)
        .collect();
    titles.sort();

    assert_eq!(titles, vec!["Board games".to_string(), "Rust Night".to_string()]);
    assert!(h.rollcall.catalog.search("").await.unwrap().is_empty());
    assert!(h.rollcall.catalog.search("   ").await.unwrap().is_empty());
    assert!(h.rollcall.catalog.search("pier").await.unwrap().is_empty());
}

#[tokio::test]
async fn watch_sees_new_events() {
    let h = Harness::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = h
        .rollcall
        .catalog
        .watch(move |view| {
            let _ = tx.send(view.len());
        })
        .await
        .unwrap();
    assert_eq!(rx.recv().await, Some(0));

    h.rollcall
        .catalog
        .create(details("Rust Night", "Talks"), vec![1])
        .await
        .unwrap();

    assert_eq!(rx.recv().await, Some(1));
    subscription.unsubscribe().await;
}

#[tokio::test]
async fn delete_between_roster_read_and_append_wins() {
    let h = Harness::new();
    let event = h.seed_event("e1", 10).await;
    h.rollcall
        .gate
        .try_check_in(&event, &UserId::new("early"), h.now())
        .await
        .unwrap();

    let racing = DeleteBeforeAppend {
        inner: h.documents.clone(),
        catalog: h.rollcall.catalog.clone(),
        event: event.clone(),
        fired: AtomicBool::new(false),
    };
    let gate = CapacityGate::new(Arc::new(racing), RetryPolicy::immediate(4));

    let result = gate.try_check_in(&event, &UserId::new("late"), h.now()).await;

    assert!(matches!(result, Err(CheckInError::RecordNotFound(id)) if id == event));
    assert!(!h.documents.contains(&DocumentPath::event(&event)));
    assert_eq!(h.documents.document_count(&CollectionPath::attendance(&event)), 0);
}

#[tokio::test]
async fn empty_image_is_rejected_before_upload() {
    let h = Harness::new();

    let created = h
        .rollcall
        .catalog
        .create(details("Rust Night", "Talks"), Vec::new())
        .await;
    assert!(matches!(created, Err(CatalogError::MissingImage)));

    let event = h.seed_event("e1", 10).await;
    let before = h.rollcall.catalog.get(&event).await.unwrap();
    let edited = h
        .rollcall
        .catalog
        .edit(&event, details("Renamed", "Talks"), Some(Vec::new()))
        .await;

    assert!(matches!(edited, Err(CatalogError::MissingImage)));
    assert_eq!(h.rollcall.catalog.get(&event).await.unwrap(), before);
    assert!(h.blobs.is_empty());
    assert!(h.rollcall.catalog.list().await.unwrap().iter().all(|e| e.id == event));
}

#[tokio::test]
async fn live_search_follows_edits() {
    let h = Harness::new();
    let yoga = h
        .rollcall
        .catalog
        .create(details("Yoga", "Mats"), vec![1])
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = h
        .rollcall
        .catalog
        .watch_search("rust", move |view| {
            let _ = tx.send(view.values().map(|e| e.title.clone()).collect::<Vec<_>>());
        })
        .await
        .unwrap();
    assert_eq!(rx.recv().await, Some(Vec::<String>::new()));

    h.rollcall
        .catalog
        .edit(&yoga.id, details("Rusty Yoga", "Mats"), None)
        .await
        .unwrap();

    assert_eq!(rx.recv().await, Some(vec!["Rusty Yoga".to_string()]));
    subscription.unsubscribe().await;
}

#[tokio::test]
async fn live_search_with_blank_text_stays_empty() {
    let h = Harness::new();
    h.rollcall
        .catalog
        .create(details("Rust Night", "Talks"), vec![1])
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = h
        .rollcall
        .catalog
        .watch_search("  ", move |view| {
            let _ = tx.send(view.len());
        })
        .await
        .unwrap();

    assert_eq!(rx.recv().await, Some(0));
    subscription.unsubscribe().await;
}
