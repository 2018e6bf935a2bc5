//! Capacity gate.
//!
//! Decides whether a user may check in to an event and commits the
//! attendance record atomically with that decision.
//!
//! # Protocol
//!
//! Each attempt reads the attendance collection (and its version), then the
//! event, runs the pure [`decide`] function and, if admitted, appends the
//! record conditionally:
//!
//! - `expected_version` = the version read, so any concurrent write to the
//!   roster turns the append into [`DocumentError::Conflict`];
//! - `not_before` = the event's scheduled time, checked against store time;
//! - `checkinTime` stamped by the store.
//!
//! A conflict means the decision was made on stale data; the attempt is
//! re-run from a fresh read after a backoff delay. Two concurrent users
//! competing for the last seat therefore end with exactly one accepted
//! record: the loser re-reads, sees the full roster, and is rejected with
//! [`Rejection::CapacityReached`].

use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use rollcall_core::document::{
    AppendOptions, CollectionPath, DocumentError, DocumentPath, DocumentStore, Query, Snapshot,
};
use rollcall_core::types::{AttendanceRecord, Event, EventId, UserId};
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::sleep;

/// Attendance body field holding the user id.
pub const USER_FIELD: &str = "userId";
/// Attendance body field stamped with store time on commit.
pub const CHECKIN_TIME_FIELD: &str = "checkinTime";

/// Why a check-in was refused. These are outcomes, not failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// The user already has an attendance record for the event.
    #[error("You have already checked in to this event.")]
    AlreadyCheckedIn,
    /// The roster is full.
    #[error("Event attendance limit reached.")]
    CapacityReached,
    /// The event has not started yet.
    #[error("You can only check in after the scheduled time.")]
    TooEarly,
}

impl Rejection {
    /// Stable label used in metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyCheckedIn => "already_checked_in",
            Self::CapacityReached => "capacity_reached",
            Self::TooEarly => "too_early",
        }
    }
}

/// Result of a check-in that reached a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckInOutcome {
    /// The record was committed.
    Accepted(AttendanceRecord),
    /// The check-in was refused; nothing was written.
    Rejected(Rejection),
}

impl CheckInOutcome {
    /// Whether a record was committed.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The rejection reason, if any.
    #[must_use]
    pub const fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(reason) => Some(*reason),
        }
    }
}

/// Check-in failures. No record was written in either case.
#[derive(Error, Debug)]
pub enum CheckInError {
    /// The event does not exist (or was deleted meanwhile).
    #[error("Event not found: {0}")]
    RecordNotFound(EventId),

    /// Retries exhausted or a non-retryable store error occurred.
    #[error("Check-in failed after {attempts} attempt(s), please try again: {source}")]
    Failed {
        /// Attempts made, including the first
        attempts: usize,
        /// Last store error
        #[source]
        source: DocumentError,
    },
}

/// Roster facts the decision depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterState {
    /// Number of attendance records
    pub count: usize,
    /// Whether one of them belongs to the deciding user
    pub includes_user: bool,
}

impl RosterState {
    /// Summarize a raw attendance snapshot for `user_id`.
    ///
    /// Every document counts toward capacity, decodable or not.
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot, user_id: &UserId) -> Self {
        Self {
            count: snapshot.documents.len(),
            includes_user: snapshot
                .documents
                .iter()
                .any(|doc| {
                    doc.data.get(USER_FIELD).and_then(Value::as_str) == Some(user_id.as_str())
                }),
        }
    }
}

/// Decide whether a check-in is admissible.
///
/// Pure function; checks run in order: duplicate, capacity, start time.
///
/// # Errors
///
/// Returns the first [`Rejection`] that applies.
pub fn decide(event: &Event, roster: RosterState, now: DateTime<Utc>) -> Result<(), Rejection> {
    if roster.includes_user {
        return Err(Rejection::AlreadyCheckedIn);
    }
    if !event.capacity.admits(roster.count) {
        return Err(Rejection::CapacityReached);
    }
    if !event.has_started(now) {
        return Err(Rejection::TooEarly);
    }
    Ok(())
}

/// Serializes check-ins per event through conditional appends.
#[derive(Clone)]
pub struct CapacityGate {
    documents: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl CapacityGate {
    /// Create a gate over a document store.
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { documents, retry }
    }

    /// Attempt to check `user_id` in to `event_id`.
    ///
    /// `now` is the caller's clock and only used for the pre-flight
    /// decision; the authoritative start-time check is the store's
    /// `not_before` precondition.
    ///
    /// # Errors
    ///
    /// - [`CheckInError::RecordNotFound`] if the event does not exist
    /// - [`CheckInError::Failed`] when conflicts or outages persist past the
    ///   retry budget, or on a non-retryable store error
    #[tracing::instrument(skip_all, fields(event_id = %event_id, user_id = %user_id))]
    pub async fn try_check_in(
        &self,
        event_id: &EventId,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<CheckInOutcome, CheckInError> {
        let mut attempt = 0;

        loop {
            let error = match self.attempt(event_id, user_id, now).await {
                Ok(outcome) => {
                    record_outcome(&outcome, attempt);
                    return Ok(outcome);
                }
                Err(DocumentError::NotFound(_)) => {
                    tracing::info!("Check-in for unknown event");
                    return Err(CheckInError::RecordNotFound(event_id.clone()));
                }
                Err(error @ DocumentError::Conflict { .. }) => {
                    metrics::counter!("rollcall.checkin.conflicts").increment(1);
                    tracing::debug!(attempt, %error, "Roster changed during check-in");
                    error
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(attempt, %error, "Store unavailable during check-in");
                    error
                }
                Err(error) => {
                    tracing::error!(attempt, %error, "Check-in failed");
                    return Err(CheckInError::Failed {
                        attempts: attempt + 1,
                        source: error,
                    });
                }
            };

            if attempt >= self.retry.max_retries {
                tracing::error!(
                    attempts = attempt + 1,
                    error = %error,
                    "Check-in retries exhausted"
                );
                return Err(CheckInError::Failed {
                    attempts: attempt + 1,
                    source: error,
                });
            }

            sleep(self.retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        event_id: &EventId,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<CheckInOutcome, DocumentError> {
        // Roster before event: a deletion between the two reads bumps the
        // roster version and fails the append below.
        let collection = CollectionPath::attendance(event_id);
        let snapshot = self.documents.query(&Query::all(collection.clone())).await?;

        let event_path = DocumentPath::event(event_id);
        let event: Event = self
            .documents
            .get(&event_path)
            .await?
            .ok_or(DocumentError::NotFound(event_path))?
            .decode()?;

        let roster = RosterState::from_snapshot(&snapshot, user_id);
        if let Err(rejection) = decide(&event, roster, now) {
            return Ok(CheckInOutcome::Rejected(rejection));
        }

        let options = AppendOptions::new()
            .expect_version(snapshot.version)
            .not_before(event.scheduled_at)
            .server_timestamp(CHECKIN_TIME_FIELD);

        match self
            .documents
            .append(&collection, json!({ USER_FIELD: user_id }), options)
            .await
        {
            Ok(document) => Ok(CheckInOutcome::Accepted(document.decode()?)),
            Err(DocumentError::PreconditionFailed {
                not_before,
                server_time,
            }) => {
                tracing::debug!(%not_before, %server_time, "Store clock is before event start");
                Ok(CheckInOutcome::Rejected(Rejection::TooEarly))
            }
            Err(error) => Err(error),
        }
    }
}

fn record_outcome(outcome: &CheckInOutcome, retries: usize) {
    match outcome {
        CheckInOutcome::Accepted(record) => {
            metrics::counter!("rollcall.checkin.accepted").increment(1);
            tracing::info!(checkin_time = %record.checkin_time, retries, "Check-in accepted");
        }
        CheckInOutcome::Rejected(reason) => {
            metrics::counter!("rollcall.checkin.rejected", "reason" => reason.as_str())
                .increment(1);
            tracing::info!(reason = reason.as_str(), retries, "Check-in rejected");
        }
    }
}
