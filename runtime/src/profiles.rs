//! Profile directory: the `users` collection.

use crate::asset::{AssetPipeline, NamingPolicy, PublishError, WriteMode};
use crate::retry::{RetryPolicy, retry_transient};
use rollcall_core::blob::BlobPath;
use rollcall_core::document::{DocumentError, DocumentPath, DocumentStore, encode};
use rollcall_core::types::{Role, UserId, UserProfile};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Profile failures.
#[derive(Error, Debug)]
pub enum ProfileError {
    /// No profile exists for the user.
    #[error("Profile not found: {0}")]
    NotFound(UserId),

    /// Username or email is blank.
    #[error("Username and email are required")]
    InvalidInput,

    /// Image upload or image-linking write failed.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Any other store failure.
    #[error("Profile store error: {0}")]
    Store(#[from] DocumentError),
}

/// Fields merged into a profile on update.
#[derive(Debug, Serialize)]
struct ProfileChanges {
    username: String,
    email: String,
    #[serde(rename = "profileImageUrl", skip_serializing_if = "Option::is_none")]
    profile_image_url: Option<String>,
}

/// Registers, loads and updates user profiles.
#[derive(Clone)]
pub struct ProfileDirectory {
    documents: Arc<dyn DocumentStore>,
    pipeline: AssetPipeline,
    retry: RetryPolicy,
}

impl ProfileDirectory {
    /// Create a directory.
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        pipeline: AssetPipeline,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            documents,
            pipeline,
            retry,
        }
    }

    /// Write the profile of a freshly signed-up user with role `user`.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Store`] on store failure.
    #[tracing::instrument(skip_all, fields(user_id = %user_id))]
    pub async fn register(
        &self,
        user_id: &UserId,
        username: &str,
        email: &str,
    ) -> Result<UserProfile, ProfileError> {
        let profile = UserProfile {
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            profile_image_url: None,
            role: Role::User,
        };
        let path = DocumentPath::user(user_id);
        let body = encode(&profile)?;
        retry_transient(&self.retry, "register_profile", || {
            self.documents.set(&path, body.clone())
        })
        .await?;

        tracing::info!("Profile registered");
        Ok(profile)
    }

    /// Load a profile.
    ///
    /// # Errors
    ///
    /// - [`ProfileError::NotFound`] if no profile exists
    /// - [`ProfileError::Store`] on store failure
    pub async fn load(&self, user_id: &UserId) -> Result<UserProfile, ProfileError> {
        let path = DocumentPath::user(user_id);
        retry_transient(&self.retry, "load_profile", || self.documents.get(&path))
            .await?
            .ok_or_else(|| ProfileError::NotFound(user_id.clone()))?
            .decode()
            .map_err(ProfileError::from)
    }

    /// Role of a user; decides admin routing.
    ///
    /// # Errors
    ///
    /// See [`ProfileDirectory::load`].
    pub async fn role(&self, user_id: &UserId) -> Result<Role, ProfileError> {
        Ok(self.load(user_id).await?.role)
    }

    /// Update username and email, optionally with a new profile image.
    ///
    /// Inputs are trimmed and must be non-empty. An image is uploaded to
    /// `profile_images/{userId}.jpg` first; the profile is only written once
    /// the upload succeeded.
    ///
    /// # Errors
    ///
    /// - [`ProfileError::InvalidInput`] for blank username or email
    /// - [`ProfileError::NotFound`] if no profile exists
    /// - [`ProfileError::Publish`] on upload or image-linking write failure
    /// - [`ProfileError::Store`] on other store failures
    #[tracing::instrument(skip_all, fields(user_id = %user_id, with_image = image.is_some()))]
    pub async fn update(
        &self,
        user_id: &UserId,
        username: &str,
        email: &str,
        image: Option<Vec<u8>>,
    ) -> Result<UserProfile, ProfileError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() {
            return Err(ProfileError::InvalidInput);
        }

        let mut profile = self.load(user_id).await?;
        let path = DocumentPath::user(user_id);

        let changes = match image {
            Some(image) => {
                let naming = NamingPolicy::Fixed(BlobPath::profile_image(user_id));
                self.pipeline
                    .publish_and_link(image, &naming, &path, WriteMode::Merge, |asset| {
                        ProfileChanges {
                            username: username.to_string(),
                            email: email.to_string(),
                            profile_image_url: Some(asset.url.clone()),
                        }
                    })
                    .await?
            }
            None => {
                let changes = ProfileChanges {
                    username: username.to_string(),
                    email: email.to_string(),
                    profile_image_url: None,
                };
                let Value::Object(fields) = encode(&changes)? else {
                    let error =
                        DocumentError::Serialization("profile changes are not an object".into());
                    return Err(error.into());
                };
                retry_transient(&self.retry, "update_profile", || {
                    self.documents.update(&path, fields.clone())
                })
                .await?;
                changes
            }
        };

        profile.username = changes.username;
        profile.email = changes.email;
        if changes.profile_image_url.is_some() {
            profile.profile_image_url = changes.profile_image_url;
        }
        tracing::info!("Profile updated");
        Ok(profile)
    }
}
