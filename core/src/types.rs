//! Domain types for events, attendance, and user profiles.
//!
//! Field names on the wire keep the mobile clients' document layout
//! (`eventId`, `dateTime`, `attendanceLimit`, `checkinTime`, ...). Values do
//! not: `dateTime` is stored as an RFC 3339 UTC instant rather than a
//! device-local `yyyy-MM-ddTHH:mm:ss` string, so clients reading the old
//! local format must be updated; use [`parse_local_schedule`] to convert
//! legacy input.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Format the clients use for schedule strings (device-local wall time).
pub const LOCAL_SCHEDULE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// ============================================================================
// Identifiers
// ============================================================================

/// Stable identifier of an event.
///
/// Generated once by the creating client and never changed afterwards; the
/// event document is stored under this id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity-provider user id.
///
/// The subsystem trusts this value as the check-in actor; it is never derived
/// from client-supplied record fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an identity-provider id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Capacity
// ============================================================================

/// Attendance ceiling of an event.
///
/// Zero is a legal value and means nobody may check in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capacity(u32);

impl Capacity {
    /// Create a capacity.
    #[must_use]
    pub const fn new(limit: u32) -> Self {
        Self(limit)
    }

    /// Raw ceiling.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether one more attendee fits when `current` are already checked in.
    #[must_use]
    pub fn admits(self, current: usize) -> bool {
        current < self.0 as usize
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Event
// ============================================================================

/// Organizer-editable fields of an event (everything except id and image).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventDetails {
    /// Display title
    pub title: String,
    /// Free-text description
    pub description: String,
    /// Free-text location
    pub location: String,
    /// Absolute start time; check-in opens at this instant
    pub scheduled_at: DateTime<Utc>,
    /// Attendance ceiling
    pub capacity: Capacity,
}

/// A published event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Stable identifier, equal to the document id
    #[serde(rename = "eventId")]
    pub id: EventId,
    /// Display title
    pub title: String,
    /// Free-text description
    pub description: String,
    /// Free-text location
    pub location: String,
    /// Absolute start time
    #[serde(rename = "dateTime")]
    pub scheduled_at: DateTime<Utc>,
    /// URL of a fully uploaded image, if any
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
    /// Attendance ceiling
    #[serde(rename = "attendanceLimit")]
    pub capacity: Capacity,
}

impl Event {
    /// Assemble an event from its editable fields.
    #[must_use]
    pub fn from_details(id: EventId, details: EventDetails, image_url: Option<String>) -> Self {
        Self {
            id,
            title: details.title,
            description: details.description,
            location: details.location,
            scheduled_at: details.scheduled_at,
            image_url,
            capacity: details.capacity,
        }
    }

    /// Whether check-in is open at `now`.
    #[must_use]
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.scheduled_at
    }
}

// ============================================================================
// Attendance
// ============================================================================

/// One accepted check-in.
///
/// `checkin_time` is assigned by the document store when the record is
/// appended; clients never supply it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Who checked in
    #[serde(rename = "userId")]
    pub user_id: UserId,
    /// Server-assigned acceptance time
    #[serde(rename = "checkinTime")]
    pub checkin_time: DateTime<Utc>,
}

// ============================================================================
// User profile
// ============================================================================

/// Access role stored on a profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Organizer with event management rights
    Admin,
    /// Regular attendee
    #[default]
    User,
}

impl Role {
    /// Whether this role routes to the organizer screens.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Profile document owned by the identity side; read here for display and
/// role lookup, written by the profile directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Display name
    pub username: String,
    /// Contact email
    pub email: String,
    /// Profile picture URL, if one was uploaded
    #[serde(rename = "profileImageUrl", default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    /// Access role
    #[serde(default)]
    pub role: Role,
}

// ============================================================================
// Schedule parsing
// ============================================================================

/// Error returned when a local schedule string cannot be interpreted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid schedule '{input}': expected yyyy-MM-ddTHH:mm:ss")]
pub struct ScheduleParseError {
    input: String,
}

/// Parse a device-local `yyyy-MM-ddTHH:mm:ss` string into an absolute instant.
///
/// The offset is the device's UTC offset at entry time.
///
/// # Errors
///
/// Returns [`ScheduleParseError`] if the text does not match the format.
///
/// # Examples
///
/// ```
/// use chrono::{FixedOffset, TimeZone, Utc};
/// use rollcall_core::types::parse_local_schedule;
///
/// let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
/// let at = parse_local_schedule("2025-06-01T20:00:00", plus_two).unwrap();
/// assert_eq!(at, Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap());
/// ```
pub fn parse_local_schedule(
    text: &str,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, ScheduleParseError> {
    let err = || ScheduleParseError {
        input: text.to_string(),
    };
    let naive = NaiveDateTime::parse_from_str(text.trim(), LOCAL_SCHEDULE_FORMAT)
        .map_err(|_| err())?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(err)
}
