//! # Rollcall Runtime
//!
//! Services for event attendance with capacity limits.
//!
//! This crate provides:
//! - [`gate::CapacityGate`]: race-free check-in against a capacity limit
//! - [`ledger::AttendanceLedger`]: attendance listing, live watching, roster resolution
//! - [`projector::LiveProjector`]: typed, monotonic live views over store queries
//! - [`asset::AssetPipeline`]: upload-then-link for event and profile images
//! - [`catalog::EventCatalog`] and [`profiles::ProfileDirectory`]
//! - [`retry`]: exponential backoff for transient failures
//! - [`config::RollcallConfig`]: environment configuration
//!
//! All services talk to the stores through the ports in `rollcall-core`, so
//! they run unchanged against the in-memory adapters of `rollcall-testing`.
//!
//! # Example
//!
//! ```ignore
//! let config = RollcallConfig::from_env();
//! let rollcall = Rollcall::new(documents, blobs, Arc::new(SystemClock), &config);
//!
//! match rollcall.gate.try_check_in(&event_id, &user_id, Utc::now()).await? {
//!     CheckInOutcome::Accepted(record) => println!("checked in at {}", record.checkin_time),
//!     CheckInOutcome::Rejected(reason) => println!("{reason}"),
//! }
//! ```

pub mod asset;
pub mod catalog;
pub mod config;
pub mod gate;
pub mod ledger;
pub mod profiles;
pub mod projector;
pub mod retry;

pub use asset::{AssetPipeline, NamingPolicy, PublishError, PublishedAsset, WriteMode};
pub use catalog::{CatalogError, EventCatalog};
pub use config::RollcallConfig;
pub use gate::{CapacityGate, CheckInError, CheckInOutcome, Rejection};
pub use ledger::{AttendanceLedger, Attendee};
pub use profiles::{ProfileDirectory, ProfileError};
pub use projector::{LiveProjector, RosterSnapshot, Subscription};
pub use retry::RetryPolicy;

use rollcall_core::blob::BlobStore;
use rollcall_core::document::DocumentStore;
use rollcall_core::environment::Clock;
use std::sync::Arc;

/// All services wired over one pair of stores.
#[derive(Clone)]
pub struct Rollcall {
    /// Check-in decisions
    pub gate: CapacityGate,
    /// Attendance reads
    pub ledger: AttendanceLedger,
    /// Event management
    pub catalog: EventCatalog,
    /// User profiles
    pub profiles: ProfileDirectory,
}

impl Rollcall {
    /// Wire the services. Every component shares the configured retry policy.
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        config: &RollcallConfig,
    ) -> Self {
        Self::with_retry(documents, blobs, clock, config.retry.policy())
    }

    /// Wire the services with an explicit retry policy.
    #[must_use]
    pub fn with_retry(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        let pipeline = AssetPipeline::new(blobs, Arc::clone(&documents), clock, retry.clone());
        Self {
            gate: CapacityGate::new(Arc::clone(&documents), retry.clone()),
            ledger: AttendanceLedger::new(Arc::clone(&documents), retry.clone()),
            catalog: EventCatalog::new(Arc::clone(&documents), pipeline.clone(), retry.clone()),
            profiles: ProfileDirectory::new(documents, pipeline, retry),
        }
    }
}
