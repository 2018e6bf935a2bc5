//! Document store port.
//!
//! The store is hierarchical and schema-flexible: collections hold JSON
//! documents addressed by id, and an event's attendance lives in the
//! `events/{id}/attendance` subcollection.
//!
//! # Concurrency model
//!
//! Every collection carries a [`Version`] that advances on each write to it.
//! [`DocumentStore::append`] accepts an expected version and a not-before
//! instant, which together form the compare-and-swap primitive the capacity
//! gate relies on: a check-in is appended only if nobody else wrote to the
//! attendance collection since the gate read it.
//!
//! # Subscriptions
//!
//! [`DocumentStore::subscribe`] yields the *full* current result set of a
//! query on every change (snapshot push, never diffs). Intermediate states
//! may be coalesced by the implementation.
//!
//! # Implementations
//!
//! - `InMemoryDocumentStore` (in `rollcall-testing`): deterministic tests and
//!   the demo binary

use crate::types::{EventId, UserId};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`DocumentStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DocumentError>> + Send + 'a>>;

/// Live feed of full query results.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<Snapshot, DocumentError>> + Send>>;

// ============================================================================
// Paths
// ============================================================================

/// Path of a collection, e.g. `events` or `events/e1/attendance`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Collection of event documents.
    pub const EVENTS: &'static str = "events";
    /// Collection of user profiles.
    pub const USERS: &'static str = "users";

    /// Wrap a raw collection path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The `events` collection.
    #[must_use]
    pub fn events() -> Self {
        Self::new(Self::EVENTS)
    }

    /// The `users` collection.
    #[must_use]
    pub fn users() -> Self {
        Self::new(Self::USERS)
    }

    /// Attendance subcollection of one event.
    #[must_use]
    pub fn attendance(event_id: &EventId) -> Self {
        Self(format!("{}/{event_id}/attendance", Self::EVENTS))
    }

    /// Path of a document inside this collection.
    #[must_use]
    pub fn doc(&self, id: impl Into<String>) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    /// Borrow the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a single document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

impl DocumentPath {
    /// Document of one event.
    #[must_use]
    pub fn event(id: &EventId) -> Self {
        CollectionPath::events().doc(id.as_str())
    }

    /// Profile document of one user.
    #[must_use]
    pub fn user(id: &UserId) -> Self {
        CollectionPath::users().doc(id.as_str())
    }

    /// Owning collection.
    #[must_use]
    pub const fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    /// Document id within the collection.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

// ============================================================================
// Documents and snapshots
// ============================================================================

/// Write counter of a collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Create a version.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The version after one more write.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A stored document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Id within its collection
    pub id: String,
    /// Document body
    pub data: Value,
}

impl Document {
    /// Decode the body into a typed record.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Serialization`] if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DocumentError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| DocumentError::Serialization(format!("document {}: {e}", self.id)))
    }
}

/// Full result set of a query at one collection version.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    /// Collection version the result set reflects
    pub version: Version,
    /// Matching documents in store order
    pub documents: Vec<Document>,
}

// ============================================================================
// Queries
// ============================================================================

/// Predicate on a top-level document field.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Field equals the value
    Equals {
        /// Field name
        field: String,
        /// Expected value
        value: Value,
    },
    /// String field starts with the prefix
    Prefix {
        /// Field name
        field: String,
        /// Required prefix
        prefix: String,
    },
}

impl Filter {
    /// Whether a document body satisfies this predicate.
    #[must_use]
    pub fn matches(&self, data: &Value) -> bool {
        match self {
            Self::Equals { field, value } => data.get(field) == Some(value),
            Self::Prefix { field, prefix } => data
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
        }
    }
}

/// Query over one collection. All filters must match.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Collection to read
    pub collection: CollectionPath,
    /// Conjunction of predicates
    pub filters: Vec<Filter>,
}

impl Query {
    /// Query returning every document of a collection.
    #[must_use]
    pub const fn all(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
        }
    }

    /// Add an equality predicate.
    #[must_use]
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Equals {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Add a string prefix predicate.
    #[must_use]
    pub fn where_prefix(mut self, field: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.filters.push(Filter::Prefix {
            field: field.into(),
            prefix: prefix.into(),
        });
        self
    }

    /// Whether a document body satisfies every predicate.
    #[must_use]
    pub fn matches(&self, data: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(data))
    }
}

// ============================================================================
// Conditional append
// ============================================================================

/// Preconditions and server-side stamping for [`DocumentStore::append`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Reject with [`DocumentError::Conflict`] unless the collection is at this version
    pub expected_version: Option<Version>,
    /// Reject with [`DocumentError::PreconditionFailed`] if server time is earlier
    pub not_before: Option<DateTime<Utc>>,
    /// Field the store fills with its own current time
    pub server_timestamp_field: Option<String>,
}

impl AppendOptions {
    /// Unconditional append.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the collection to still be at `version`.
    #[must_use]
    pub const fn expect_version(mut self, version: Version) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Require server time to be at or after `instant`.
    #[must_use]
    pub const fn not_before(mut self, instant: DateTime<Utc>) -> Self {
        self.not_before = Some(instant);
        self
    }

    /// Stamp `field` with server time.
    #[must_use]
    pub fn server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.server_timestamp_field = Some(field.into());
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during document store operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    /// The addressed document does not exist.
    #[error("Document not found: {0}")]
    NotFound(DocumentPath),

    /// Optimistic concurrency conflict on a conditional append.
    #[error("Concurrency conflict on {collection}: expected {expected}, found {actual}")]
    Conflict {
        /// Collection that moved
        collection: CollectionPath,
        /// Version the writer read
        expected: Version,
        /// Version the store holds
        actual: Version,
    },

    /// The not-before precondition of a conditional append failed.
    #[error("Server time {server_time} is before {not_before}")]
    PreconditionFailed {
        /// Required earliest time
        not_before: DateTime<Utc>,
        /// Store time at the attempt
        server_time: DateTime<Utc>,
    },

    /// Network or backend unavailability; safe to retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A document body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DocumentError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Encode a typed record as a document body.
///
/// # Errors
///
/// Returns [`DocumentError::Serialization`] if `value` cannot be represented as JSON.
pub fn encode<T: Serialize>(value: &T) -> Result<Value, DocumentError> {
    serde_json::to_value(value).map_err(|e| DocumentError::Serialization(e.to_string()))
}

// ============================================================================
// Port
// ============================================================================

/// Document store abstraction.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so the store can
/// be shared as `Arc<dyn DocumentStore>` across the runtime components.
pub trait DocumentStore: Send + Sync {
    /// Read one document; `Ok(None)` if absent.
    fn get(&self, path: &DocumentPath) -> StoreFuture<'_, Option<Document>>;

    /// Create or fully replace a document.
    fn set(&self, path: &DocumentPath, data: Value) -> StoreFuture<'_, ()>;

    /// Merge top-level fields into an existing document.
    ///
    /// Fails with [`DocumentError::NotFound`] if the document is absent.
    fn update(&self, path: &DocumentPath, fields: Map<String, Value>) -> StoreFuture<'_, ()>;

    /// Delete a document; deleting an absent document succeeds.
    fn delete(&self, path: &DocumentPath) -> StoreFuture<'_, ()>;

    /// One-shot read of a query's full result set.
    fn query(&self, query: &Query) -> StoreFuture<'_, Snapshot>;

    /// Append an auto-keyed document, subject to `options`.
    ///
    /// Returns the stored document including any server-stamped field.
    fn append(
        &self,
        collection: &CollectionPath,
        data: Value,
        options: AppendOptions,
    ) -> StoreFuture<'_, Document>;

    /// Delete every document of a collection; returns how many were removed.
    ///
    /// Always advances the collection version, even when it was empty, so a
    /// conditional append prepared before the deletion fails with
    /// [`DocumentError::Conflict`].
    fn delete_collection(&self, collection: &CollectionPath) -> StoreFuture<'_, usize>;

    /// Subscribe to a query. The stream yields the current result set
    /// immediately and again after every change.
    fn subscribe(&self, query: Query) -> StoreFuture<'_, SnapshotStream>;
}
