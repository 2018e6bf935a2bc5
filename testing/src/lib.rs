//! # Rollcall Testing
//!
//! Testing utilities for the Rollcall attendance subsystem.
//!
//! This crate provides:
//! - [`InMemoryDocumentStore`]: document store with conditional appends,
//!   live snapshot feeds, and fault injection
//! - [`InMemoryBlobStore`]: blob store with fault injection
//! - [`FixedClock`] and [`ManualClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use rollcall_testing::{InMemoryBlobStore, InMemoryDocumentStore, ManualClock, test_clock};
//!
//! #[tokio::test]
//! async fn test_check_in_flow() {
//!     let clock = ManualClock::new(test_clock().now());
//!     let documents = InMemoryDocumentStore::with_clock(Arc::new(clock.clone()));
//!     let gate = CapacityGate::new(Arc::new(documents.clone()), RetryPolicy::default());
//!     // ...
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use rollcall_core::environment::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

mod blob_store;
mod document_store;

pub use blob_store::InMemoryBlobStore;
pub use document_store::InMemoryDocumentStore;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Arc, AtomicI64, Clock, DateTime, Duration, Ordering, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use rollcall_testing::mocks::FixedClock;
    /// use rollcall_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it.
    ///
    /// Clones share the same instant, so a test can hand one copy to the
    /// store as its "server clock" and keep another to advance time.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        millis: Arc<AtomicI64>,
    }

    impl ManualClock {
        /// Start the clock at `time` (millisecond precision).
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                millis: Arc::new(AtomicI64::new(time.timestamp_millis())),
            }
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            self.millis.store(time.timestamp_millis(), Ordering::SeqCst);
        }

        /// Move forward (or backward, for negative durations).
        pub fn advance(&self, by: Duration) {
            self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
