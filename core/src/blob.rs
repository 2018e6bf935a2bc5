//! Blob store port.
//!
//! Blobs are written once under a logical path and then read through the
//! retrieval URL the store hands back. A URL is only ever returned after the
//! upload is durable, which is what lets the asset pipeline link it into a
//! record without risking a dangling reference.

use crate::types::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`BlobStore`] methods.
pub type BlobFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BlobError>> + Send + 'a>>;

/// Logical location of a blob, e.g. `events/event_20250101_120000_ab12cd34.jpg`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobPath(String);

impl BlobPath {
    /// Folder holding event images.
    pub const EVENT_IMAGES: &'static str = "events";
    /// Folder holding profile images.
    pub const PROFILE_IMAGES: &'static str = "profile_images";

    /// Wrap a raw path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path of an event image with the given file name.
    #[must_use]
    pub fn event_image(file_name: &str) -> Self {
        Self(format!("{}/{file_name}", Self::EVENT_IMAGES))
    }

    /// Path of a user's profile image. One per user; re-uploads overwrite it.
    #[must_use]
    pub fn profile_image(user_id: &UserId) -> Self {
        Self(format!("{}/{user_id}.jpg", Self::PROFILE_IMAGES))
    }

    /// Borrow the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors that can occur during blob uploads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    /// Network or backend unavailability; safe to retry.
    #[error("Blob store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the content (quota, permissions, size).
    #[error("Upload rejected: {0}")]
    Rejected(String),
}

impl BlobError {
    /// Whether retrying the same upload may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Blob store abstraction.
pub trait BlobStore: Send + Sync {
    /// Upload `content` to `path` and return its durable retrieval URL.
    ///
    /// The future resolves only once the content is fully stored.
    fn upload(
        &self,
        path: &BlobPath,
        content: Vec<u8>,
        content_type: &str,
    ) -> BlobFuture<'_, String>;
}
