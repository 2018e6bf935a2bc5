//! Attendance ledger: read side of the per-event attendance collections.

use crate::gate::USER_FIELD;
use crate::projector::{LiveProjector, RosterSnapshot, Subscription};
use crate::retry::{RetryPolicy, retry_transient};
use rollcall_core::document::{CollectionPath, DocumentError, DocumentPath, DocumentStore, Query};
use rollcall_core::types::{AttendanceRecord, EventId, UserId, UserProfile};
use std::sync::Arc;

/// An attendance record joined with the attendee's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attendee {
    /// The committed record
    pub record: AttendanceRecord,
    /// Username from the profile; `None` if the profile is missing
    pub username: Option<String>,
}

/// Sort records by check-in time, earliest first. Ties break on user id.
pub fn sort_by_checkin_time(records: &mut [AttendanceRecord]) {
    records.sort_by(|a, b| {
        a.checkin_time
            .cmp(&b.checkin_time)
            .then_with(|| a.user_id.as_str().cmp(b.user_id.as_str()))
    });
}

/// Reads and watches attendance.
#[derive(Clone)]
pub struct AttendanceLedger {
    documents: Arc<dyn DocumentStore>,
    projector: LiveProjector,
    retry: RetryPolicy,
}

impl AttendanceLedger {
    /// Create a ledger over a document store.
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self {
            projector: LiveProjector::new(Arc::clone(&documents)),
            documents,
            retry,
        }
    }

    /// Current attendance of an event in store order.
    ///
    /// # Errors
    ///
    /// Returns the store error once transient retries are exhausted.
    pub async fn list(&self, event_id: &EventId) -> Result<Vec<AttendanceRecord>, DocumentError> {
        let query = Query::all(CollectionPath::attendance(event_id));
        let snapshot = retry_transient(&self.retry, "list_attendance", || {
            self.documents.query(&query)
        })
        .await?;

        Ok(RosterSnapshot::<AttendanceRecord>::from_snapshot(&snapshot)
            .entries
            .into_iter()
            .map(|entry| entry.value)
            .collect())
    }

    /// Whether `user_id` has an attendance record for `event_id`.
    ///
    /// # Errors
    ///
    /// Returns the store error once transient retries are exhausted.
    pub async fn has_checked_in(
        &self,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<bool, DocumentError> {
        let query = Query::all(CollectionPath::attendance(event_id))
            .where_eq(USER_FIELD, user_id.as_str());
        let snapshot = retry_transient(&self.retry, "find_attendance", || {
            self.documents.query(&query)
        })
        .await?;
        Ok(!snapshot.documents.is_empty())
    }

    /// Attendance with usernames resolved, sorted by check-in time.
    ///
    /// A missing or undecodable profile yields `username: None` rather than
    /// failing the whole list.
    ///
    /// # Errors
    ///
    /// Returns the store error if attendance or a profile cannot be read.
    pub async fn attendees(&self, event_id: &EventId) -> Result<Vec<Attendee>, DocumentError> {
        let mut records = self.list(event_id).await?;
        sort_by_checkin_time(&mut records);
        let mut attendees = Vec::with_capacity(records.len());

        for record in records {
            let path = DocumentPath::user(&record.user_id);
            let profile = retry_transient(&self.retry, "load_profile", || {
                self.documents.get(&path)
            })
            .await?;
            let username = profile.and_then(|doc| match doc.decode::<UserProfile>() {
                Ok(profile) => Some(profile.username),
                Err(error) => {
                    tracing::warn!(user_id = %record.user_id, %error, "Undecodable profile");
                    None
                }
            });
            attendees.push(Attendee { record, username });
        }

        Ok(attendees)
    }

    /// Watch the live attendance of an event.
    ///
    /// # Errors
    ///
    /// Returns the store error if the subscription cannot be opened.
    pub async fn watch<F>(
        &self,
        event_id: &EventId,
        listener: F,
    ) -> Result<Subscription<AttendanceRecord>, DocumentError>
    where
        F: FnMut(Arc<RosterSnapshot<AttendanceRecord>>) + Send + 'static,
    {
        self.projector
            .subscribe(Query::all(CollectionPath::attendance(event_id)), listener)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(user: &str, second: u32) -> AttendanceRecord {
        AttendanceRecord {
            user_id: UserId::new(user),
            checkin_time: Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, second).unwrap(),
        }
    }

    #[test]
    fn sorts_earliest_first_with_user_tiebreak() {
        let mut records = vec![record("c", 5), record("b", 1), record("a", 5)];
        sort_by_checkin_time(&mut records);

        let order: Vec<_> = records.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }
}
