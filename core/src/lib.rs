//! # Rollcall Core
//!
//! Domain types and external-collaborator ports for the Rollcall event
//! attendance subsystem.
//!
//! ## Core Concepts
//!
//! - **Event**: an organizer-published gathering with a hard attendance ceiling
//! - **Attendance record**: one check-in of one user, stamped by the store
//! - **Document store**: hierarchical, schema-flexible database with live
//!   snapshot subscriptions and a conditional append
//! - **Blob store**: write-once binary storage returning retrieval URLs
//!
//! Nothing in this crate performs I/O. Runtime components live in
//! `rollcall-runtime`; in-memory adapters live in `rollcall-testing`.
//!
//! ## Example
//!
//! ```
//! use rollcall_core::types::{Capacity, Event, EventDetails, EventId};
//! use chrono::{TimeZone, Utc};
//!
//! let details = EventDetails {
//!     title: "Rust meetup".to_string(),
//!     description: "Talks and pizza".to_string(),
//!     location: "Hall B".to_string(),
//!     scheduled_at: Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap(),
//!     capacity: Capacity::new(40),
//! };
//! let event = Event::from_details(EventId::new("evt-1"), details, None);
//! assert!(event.capacity.admits(39));
//! assert!(!event.capacity.admits(40));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// Blob store port (image uploads)
pub mod blob;

/// Document store port (records, queries, live subscriptions)
pub mod document;

/// Domain types: events, attendance records, user profiles
pub mod types;

/// Environment module - Dependency injection traits
///
/// External time is abstracted so the gate and the in-memory store can be
/// driven deterministically in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use rollcall_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
