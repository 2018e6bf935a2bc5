//! Integration tests for the live roster projector
//!
//! Covers delivery ordering, de-duplication, and the unsubscribe guarantee.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use common::Harness;
use futures::stream;
use rollcall_core::document::{
    AppendOptions, CollectionPath, Document, DocumentError, DocumentPath, DocumentStore, Query,
    Snapshot, SnapshotStream, StoreFuture, Version,
};
use rollcall_core::types::{AttendanceRecord, EventId};
use rollcall_runtime::{LiveProjector, RosterSnapshot};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Test Fixtures
// ============================================================================

/// Store whose only capability is replaying a fixed sequence of pushes.
struct ScriptedFeed {
    pushes: Vec<Result<Snapshot, DocumentError>>,
}

impl ScriptedFeed {
    fn new(pushes: Vec<Result<Snapshot, DocumentError>>) -> Self {
        Self { pushes }
    }
}

fn unsupported<T>() -> Result<T, DocumentError> {
    Err(DocumentError::Unavailable("scripted feed".into()))
}

impl DocumentStore for ScriptedFeed {
    fn get(&self, _path: &DocumentPath) -> StoreFuture<'_, Option<Document>> {
        Box::pin(async { unsupported() })
    }

    fn set(&self, _path: &DocumentPath, _data: Value) -> StoreFuture<'_, ()> {
        Box::pin(async { unsupported() })
    }

    fn update(&self, _path: &DocumentPath, _fields: Map<String, Value>) -> StoreFuture<'_, ()> {
        Box::pin(async { unsupported() })
    }

    fn delete(&self, _path: &DocumentPath) -> StoreFuture<'_, ()> {
        Box::pin(async { unsupported() })
    }

    fn query(&self, _query: &Query) -> StoreFuture<'_, Snapshot> {
        Box::pin(async { unsupported() })
    }

    fn append(
        &self,
        _collection: &CollectionPath,
        _data: Value,
        _options: AppendOptions,
    ) -> StoreFuture<'_, Document> {
        Box::pin(async { unsupported() })
    }

    fn delete_collection(&self, _collection: &CollectionPath) -> StoreFuture<'_, usize> {
        Box::pin(async { unsupported() })
    }

    fn subscribe(&self, _query: Query) -> StoreFuture<'_, SnapshotStream> {
        let pushes = self.pushes.clone();
        Box::pin(async move { Ok(Box::pin(stream::iter(pushes)) as SnapshotStream) })
    }
}

fn snapshot(version: u64, rows: &[(&str, &str)]) -> Result<Snapshot, DocumentError> {
    Ok(Snapshot {
        version: Version::new(version),
        documents: rows
            .iter()
            .map(|(id, user)| Document {
                id: (*id).to_string(),
                data: json!({ "userId": user, "checkinTime": "2025-01-01T10:00:00Z" }),
            })
            .collect(),
    })
}

fn attendance_query() -> Query {
    Query::all(CollectionPath::attendance(&EventId::new("e1")))
}

type Views = mpsc::UnboundedReceiver<Arc<RosterSnapshot<AttendanceRecord>>>;

fn channel_listener() -> (
    impl FnMut(Arc<RosterSnapshot<AttendanceRecord>>) + Send + 'static,
    Views,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |view: Arc<RosterSnapshot<AttendanceRecord>>| {
            let _ = tx.send(view);
        },
        rx,
    )
}

async fn drain(mut rx: Views) -> Vec<Arc<RosterSnapshot<AttendanceRecord>>> {
    let mut views = Vec::new();
    while let Some(view) = rx.recv().await {
        views.push(view);
    }
    views
}

// ============================================================================
// Ordering and shape
// ============================================================================

#[tokio::test]
async fn stale_pushes_are_dropped() {
    let feed = ScriptedFeed::new(vec![
        snapshot(1, &[("a", "u1")]),
        snapshot(3, &[("a", "u1"), ("b", "u2"), ("c", "u3")]),
        snapshot(2, &[("a", "u1"), ("b", "u2")]),
        snapshot(3, &[("a", "u1"), ("b", "u2"), ("c", "u3")]),
        snapshot(4, &[("a", "u1"), ("b", "u2"), ("c", "u3"), ("d", "u4")]),
    ]);
    let projector = LiveProjector::new(Arc::new(feed));
    let (listener, rx) = channel_listener();

    let subscription = projector.subscribe(attendance_query(), listener).await.unwrap();
    // The scripted stream ends, which ends the pump and drops the listener.
    let views = drain(rx).await;

    let versions: Vec<u64> = views.iter().map(|v| v.version.get()).collect();
    assert_eq!(versions, vec![1, 3, 4]);
    assert_eq!(subscription.latest().await.unwrap().len(), 4);
}

#[tokio::test]
async fn duplicate_ids_in_one_push_collapse() {
    let feed = ScriptedFeed::new(vec![snapshot(1, &[("a", "u1"), ("b", "u2"), ("a", "u9")])]);
    let projector = LiveProjector::new(Arc::new(feed));
    let (listener, rx) = channel_listener();

    let _subscription = projector.subscribe(attendance_query(), listener).await.unwrap();
    let views = drain(rx).await;

    assert_eq!(views.len(), 1);
    let users: Vec<&str> = views[0].values().map(|r| r.user_id.as_str()).collect();
    assert_eq!(users, vec!["u9", "u2"]);
}

#[tokio::test]
async fn feed_error_ends_subscription() {
    let feed = ScriptedFeed::new(vec![
        snapshot(1, &[("a", "u1")]),
        Err(DocumentError::Unavailable("connection reset".into())),
        snapshot(2, &[("a", "u1"), ("b", "u2")]),
    ]);
    let projector = LiveProjector::new(Arc::new(feed));
    let (listener, rx) = channel_listener();

    let subscription = projector.subscribe(attendance_query(), listener).await.unwrap();
    let views = drain(rx).await;

    assert_eq!(views.len(), 1);
    assert!(!subscription.is_active().await);
}

// ============================================================================
// Live store
// ============================================================================

#[tokio::test]
async fn live_views_follow_check_ins() {
    let h = Harness::new();
    let event = h.seed_event("e1", 5).await;
    let (listener, mut rx) = channel_listener();

    let subscription = h.rollcall.ledger.watch(&event, listener).await.unwrap();

    let initial = rx.recv().await.unwrap();
    assert!(initial.is_empty());

    h.rollcall
        .gate
        .try_check_in(&event, &rollcall_core::types::UserId::new("alice"), h.now())
        .await
        .unwrap();

    let after = rx.recv().await.unwrap();
    assert_eq!(after.len(), 1);
    assert!(after.version > initial.version);
    assert_eq!(subscription.latest().await.unwrap(), after);
}

#[tokio::test]
async fn no_delivery_after_unsubscribe_returns() {
    let h = Harness::new();
    let event = h.seed_event("e1", 5).await;
    let (listener, mut rx) = channel_listener();

    let subscription = h.rollcall.ledger.watch(&event, listener).await.unwrap();
    rx.recv().await.unwrap();

    subscription.unsubscribe().await;
    subscription.unsubscribe().await;

    for user in ["a", "b", "c"] {
        h.rollcall
            .gate
            .try_check_in(&event, &rollcall_core::types::UserId::new(user), h.now())
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The listener (and its sender) were dropped on unsubscribe.
    assert!(rx.recv().await.is_none());
    assert!(!subscription.is_active().await);
    assert_eq!(h.documents.subscriber_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsubscribe_waits_for_in_flight_listener() {
    let h = Harness::new();
    let event = h.seed_event("e1", 5).await;

    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let (s, f) = (Arc::clone(&started), Arc::clone(&finished));

    let subscription = h
        .rollcall
        .ledger
        .watch(&event, move |view| {
            if view.len() == 1 {
                s.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                f.store(true, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();

    h.rollcall
        .gate
        .try_check_in(&event, &rollcall_core::types::UserId::new("alice"), h.now())
        .await
        .unwrap();
    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    subscription.unsubscribe().await;

    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn dropping_subscription_releases_feed() {
    let h = Harness::new();
    let event = h.seed_event("e1", 5).await;

    let subscription = h.rollcall.ledger.watch(&event, |_| {}).await.unwrap();
    assert_eq!(h.documents.subscriber_count(), 1);
    drop(subscription);

    tokio::time::sleep(Duration::from_millis(10)).await;
    h.rollcall
        .gate
        .try_check_in(&event, &rollcall_core::types::UserId::new("alice"), h.now())
        .await
        .unwrap();

    assert_eq!(h.documents.subscriber_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_mid_invocation_stops_queued_views() {
    let feed = ScriptedFeed::new(vec![
        snapshot(1, &[("a", "u1")]),
        snapshot(2, &[("a", "u1"), ("b", "u2")]),
        snapshot(3, &[("a", "u1"), ("b", "u2"), ("c", "u3")]),
    ]);
    let projector = LiveProjector::new(Arc::new(feed));

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    let subscription = projector
        .subscribe::<AttendanceRecord, _>(attendance_query(), move |_| {
            if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                let _ = release_rx.recv();
            }
        })
        .await
        .unwrap();
    while calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // The listener is still running, so the slot is locked during drop.
    drop(subscription);
    release_tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
