//! Asset publish pipeline.
//!
//! Uploads binary content to the blob store, then writes the resulting URL
//! into a document. The two steps are not atomic:
//!
//! - upload fails: no document is written
//! - upload succeeds, document write fails: the blob is left behind and
//!   reported as [`PublishError::OrphanedAsset`]; it is neither deleted nor
//!   retried
//!
//! A record therefore only ever references a URL that resolves.

use crate::retry::{RetryPolicy, retry_transient};
use chrono::{DateTime, Utc};
use rollcall_core::blob::{BlobError, BlobPath, BlobStore};
use rollcall_core::document::{DocumentError, DocumentPath, DocumentStore, encode};
use rollcall_core::environment::Clock;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Content type used for every upload.
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// How the blob path of an upload is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingPolicy {
    /// `events/event_{yyyyMMdd_HHmmss}_{suffix}.jpg`, unique per upload.
    Timestamped,
    /// A fixed path; a new upload replaces the previous blob.
    Fixed(BlobPath),
}

impl NamingPolicy {
    /// Resolve the blob path for an upload happening at `now`.
    #[must_use]
    pub fn resolve(&self, now: DateTime<Utc>) -> BlobPath {
        match self {
            Self::Timestamped => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                BlobPath::event_image(&timestamped_name(now, &suffix[..8]))
            }
            Self::Fixed(path) => path.clone(),
        }
    }
}

/// File name for a timestamped event image.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use rollcall_runtime::asset::timestamped_name;
///
/// let at = Utc.with_ymd_and_hms(2025, 6, 1, 18, 30, 5).unwrap();
/// assert_eq!(timestamped_name(at, "a1b2c3d4"), "event_20250601_183005_a1b2c3d4.jpg");
/// ```
#[must_use]
pub fn timestamped_name(now: DateTime<Utc>, suffix: &str) -> String {
    format!("event_{}_{suffix}.jpg", now.format("%Y%m%d_%H%M%S"))
}

/// A blob that was uploaded successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedAsset {
    /// Where the blob lives
    pub path: BlobPath,
    /// Resolvable download URL
    pub url: String,
}

/// How the linking write applies its body to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create or overwrite the whole document.
    Replace,
    /// Merge top-level fields into an existing document.
    Merge,
}

/// Asset pipeline failures.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The upload failed; nothing was written.
    #[error("Image upload failed: {0}")]
    UploadFailed(#[source] BlobError),

    /// The upload succeeded but the record write did not.
    #[error("{record} was not updated; uploaded image {url} is orphaned: {source}")]
    OrphanedAsset {
        /// Record that should have referenced the blob
        record: DocumentPath,
        /// Blob left behind
        path: BlobPath,
        /// Its URL
        url: String,
        /// Why the write failed
        #[source]
        source: DocumentError,
    },
}

/// Upload-then-link pipeline.
#[derive(Clone)]
pub struct AssetPipeline {
    blobs: Arc<dyn BlobStore>,
    documents: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl AssetPipeline {
    /// Create a pipeline. `retry` applies to uploads only.
    #[must_use]
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        documents: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            blobs,
            documents,
            clock,
            retry,
        }
    }

    /// Upload `content` under a path chosen by `naming`.
    ///
    /// Transient upload failures are retried with backoff.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::UploadFailed`] once retries are exhausted or
    /// the store rejects the content.
    pub async fn publish(
        &self,
        content: Vec<u8>,
        naming: &NamingPolicy,
    ) -> Result<PublishedAsset, PublishError> {
        let path = naming.resolve(self.clock.now());
        let size = content.len();

        let url = retry_transient(&self.retry, "upload_blob", || {
            self.blobs.upload(&path, content.clone(), IMAGE_CONTENT_TYPE)
        })
        .await
        .map_err(|error| {
            tracing::warn!(path = %path, %error, "Image upload failed");
            PublishError::UploadFailed(error)
        })?;

        tracing::debug!(path = %path, size, "Image uploaded");
        Ok(PublishedAsset { path, url })
    }

    /// Write `body` to `record` as the step after a successful publish.
    ///
    /// The write is attempted once. `body` is expected to carry the asset's
    /// URL; for [`WriteMode::Merge`] it must encode to a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::OrphanedAsset`] if the body cannot be encoded
    /// or the write fails.
    pub async fn link_to_record<T>(
        &self,
        record: &DocumentPath,
        asset: &PublishedAsset,
        body: &T,
        mode: WriteMode,
    ) -> Result<(), PublishError>
    where
        T: Serialize + Sync,
    {
        let result = match encode(body) {
            Ok(value) => self.write(record, value, mode).await,
            Err(error) => Err(error),
        };

        result.map_err(|source| {
            metrics::counter!("rollcall.assets.orphaned").increment(1);
            tracing::error!(
                record = %record,
                path = %asset.path,
                url = %asset.url,
                error = %source,
                "Record write failed after upload; asset orphaned"
            );
            PublishError::OrphanedAsset {
                record: record.clone(),
                path: asset.path.clone(),
                url: asset.url.clone(),
                source,
            }
        })
    }

    /// Publish `content`, build the record body from the new asset, and link it.
    ///
    /// Returns the body that was written.
    ///
    /// # Errors
    ///
    /// See [`AssetPipeline::publish`] and [`AssetPipeline::link_to_record`].
    pub async fn publish_and_link<T, F>(
        &self,
        content: Vec<u8>,
        naming: &NamingPolicy,
        record: &DocumentPath,
        mode: WriteMode,
        build: F,
    ) -> Result<T, PublishError>
    where
        T: Serialize + Send + Sync,
        F: FnOnce(&PublishedAsset) -> T,
    {
        let asset = self.publish(content, naming).await?;
        let body = build(&asset);
        self.link_to_record(record, &asset, &body, mode).await?;
        Ok(body)
    }

    async fn write(
        &self,
        record: &DocumentPath,
        value: Value,
        mode: WriteMode,
    ) -> Result<(), DocumentError> {
        match (mode, value) {
            (WriteMode::Replace, value) => self.documents.set(record, value).await,
            (WriteMode::Merge, Value::Object(fields)) => {
                self.documents.update(record, fields).await
            }
            (WriteMode::Merge, other) => Err(DocumentError::Serialization(format!(
                "merge body must be an object, got {other}"
            ))),
        }
    }
}
