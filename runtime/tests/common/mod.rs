//! Shared fixtures for runtime integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use chrono::{DateTime, TimeZone, Utc};
use rollcall_core::document::{DocumentPath, DocumentStore, encode};
use rollcall_core::types::{Capacity, Event, EventId, UserId, UserProfile};
use rollcall_runtime::{RetryPolicy, Rollcall};
use rollcall_testing::{InMemoryBlobStore, InMemoryDocumentStore, ManualClock};
use std::sync::Arc;

/// Route service logs to the test writer; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start time of every seeded event.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
}

/// In-memory stores, a shared server clock, and the wired services.
pub struct Harness {
    pub documents: InMemoryDocumentStore,
    pub blobs: InMemoryBlobStore,
    pub clock: ManualClock,
    pub rollcall: Rollcall,
}

impl Harness {
    /// Clock one second after [`start`], retries without delay.
    pub fn new() -> Self {
        Self::with_retry(RetryPolicy::immediate(16))
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        init_tracing();
        let clock = ManualClock::new(start() + chrono::Duration::seconds(1));
        let documents = InMemoryDocumentStore::with_clock(Arc::new(clock.clone()));
        let blobs = InMemoryBlobStore::new();
        let rollcall = Rollcall::with_retry(
            Arc::new(documents.clone()),
            Arc::new(blobs.clone()),
            Arc::new(clock.clone()),
            retry,
        );
        Self {
            documents,
            blobs,
            clock,
            rollcall,
        }
    }

    /// Current server time.
    pub fn now(&self) -> DateTime<Utc> {
        rollcall_core::environment::Clock::now(&self.clock)
    }

    /// Write an event document directly, bypassing the catalog.
    pub async fn seed_event(&self, id: &str, capacity: u32) -> EventId {
        let event = Event {
            id: EventId::new(id),
            title: format!("Event {id}"),
            description: "Seeded".to_string(),
            location: "Main hall".to_string(),
            scheduled_at: start(),
            image_url: Some(format!("memory://rollcall-bucket/events/{id}.jpg")),
            capacity: Capacity::new(capacity),
        };
        self.documents
            .set(&DocumentPath::event(&event.id), encode(&event).unwrap())
            .await
            .unwrap();
        event.id
    }

    /// Write a profile document directly.
    pub async fn seed_profile(&self, user: &str, username: &str) -> UserId {
        let id = UserId::new(user);
        let profile = UserProfile {
            username: username.to_string(),
            email: format!("{user}@example.com"),
            profile_image_url: None,
            role: rollcall_core::types::Role::User,
        };
        self.documents
            .set(&DocumentPath::user(&id), encode(&profile).unwrap())
            .await
            .unwrap();
        id
    }
}
