//! Event catalog: organizer-side event management.

use crate::asset::{AssetPipeline, NamingPolicy, PublishError, WriteMode};
use crate::projector::{LiveProjector, RosterSnapshot, Subscription};
use crate::retry::{RetryPolicy, retry_transient};
use rollcall_core::document::{
    CollectionPath, DocumentError, DocumentPath, DocumentStore, Query, encode,
};
use rollcall_core::types::{Event, EventDetails, EventId};
use std::sync::Arc;
use thiserror::Error;

/// Catalog failures.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The event does not exist.
    #[error("Event not found: {0}")]
    NotFound(EventId),

    /// An event image was required but the content is empty.
    #[error("Please select an image")]
    MissingImage,

    /// Image upload or image-linking write failed.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Any other store failure.
    #[error("Event store error: {0}")]
    Store(#[from] DocumentError),
}

/// Case-insensitive substring match on title or description.
///
/// Blank text matches nothing; an empty search box shows no results.
#[must_use]
pub fn matches_search(event: &Event, text: &str) -> bool {
    let needle = text.trim().to_lowercase();
    !needle.is_empty()
        && (event.title.to_lowercase().contains(&needle)
            || event.description.to_lowercase().contains(&needle))
}

/// Keep only the entries of `view` that match `text`.
#[must_use]
pub fn filter_view(view: &RosterSnapshot<Event>, text: &str) -> RosterSnapshot<Event> {
    RosterSnapshot {
        version: view.version,
        entries: view
            .entries
            .iter()
            .filter(|entry| matches_search(&entry.value, text))
            .cloned()
            .collect(),
    }
}

/// Creates, edits, deletes and lists events.
#[derive(Clone)]
pub struct EventCatalog {
    documents: Arc<dyn DocumentStore>,
    pipeline: AssetPipeline,
    projector: LiveProjector,
    retry: RetryPolicy,
}

impl EventCatalog {
    /// Create a catalog.
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        pipeline: AssetPipeline,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            projector: LiveProjector::new(Arc::clone(&documents)),
            documents,
            pipeline,
            retry,
        }
    }

    /// Create an event. The image is mandatory and uploaded first; if the
    /// upload fails no event document is written.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::MissingImage`] if `image` is empty; nothing is uploaded
    /// - [`CatalogError::Publish`] on upload or write failure
    #[tracing::instrument(skip_all, fields(title = %details.title))]
    pub async fn create(
        &self,
        details: EventDetails,
        image: Vec<u8>,
    ) -> Result<Event, CatalogError> {
        if image.is_empty() {
            return Err(CatalogError::MissingImage);
        }
        let id = EventId::generate();
        let path = DocumentPath::event(&id);

        let event = self
            .pipeline
            .publish_and_link(
                image,
                &NamingPolicy::Timestamped,
                &path,
                WriteMode::Replace,
                |asset| Event::from_details(id, details, Some(asset.url.clone())),
            )
            .await?;

        tracing::info!(event_id = %event.id, "Event created");
        Ok(event)
    }

    /// Replace every field of an event.
    ///
    /// Without `new_image` the current image URL is kept. With one, the image
    /// is uploaded first and the event stays untouched if that fails.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::NotFound`] if the event does not exist
    /// - [`CatalogError::MissingImage`] if `new_image` is present but empty
    /// - [`CatalogError::Publish`] on upload or image-linking write failure
    /// - [`CatalogError::Store`] on other store failures
    #[tracing::instrument(skip_all, fields(event_id = %id))]
    pub async fn edit(
        &self,
        id: &EventId,
        details: EventDetails,
        new_image: Option<Vec<u8>>,
    ) -> Result<Event, CatalogError> {
        if new_image.as_ref().is_some_and(Vec::is_empty) {
            return Err(CatalogError::MissingImage);
        }
        let current = self.get(id).await?;
        let path = DocumentPath::event(id);

        let event = match new_image {
            Some(image) => {
                self.pipeline
                    .publish_and_link(
                        image,
                        &NamingPolicy::Timestamped,
                        &path,
                        WriteMode::Replace,
                        |asset| Event::from_details(id.clone(), details, Some(asset.url.clone())),
                    )
                    .await?
            }
            None => {
                let event = Event::from_details(id.clone(), details, current.image_url);
                let body = encode(&event)?;
                retry_transient(&self.retry, "replace_event", || {
                    self.documents.set(&path, body.clone())
                })
                .await?;
                event
            }
        };

        tracing::info!("Event updated");
        Ok(event)
    }

    /// Delete an event and its attendance.
    ///
    /// The event document goes first. Collection deletion advances the roster
    /// version, so a check-in racing this call fails its append and then sees
    /// the event missing.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] if either deletion fails.
    #[tracing::instrument(skip_all, fields(event_id = %id))]
    pub async fn delete(&self, id: &EventId) -> Result<(), CatalogError> {
        let path = DocumentPath::event(id);
        retry_transient(&self.retry, "delete_event", || self.documents.delete(&path)).await?;

        let attendance = CollectionPath::attendance(id);
        let removed = retry_transient(&self.retry, "delete_attendance", || {
            self.documents.delete_collection(&attendance)
        })
        .await?;

        tracing::info!(removed, "Event deleted");
        Ok(())
    }

    /// Load one event.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::NotFound`] if the event does not exist
    /// - [`CatalogError::Store`] on store failure
    pub async fn get(&self, id: &EventId) -> Result<Event, CatalogError> {
        let path = DocumentPath::event(id);
        retry_transient(&self.retry, "load_event", || self.documents.get(&path))
            .await?
            .ok_or_else(|| CatalogError::NotFound(id.clone()))?
            .decode()
            .map_err(CatalogError::from)
    }

    /// All events in store order. Undecodable documents are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] on store failure.
    pub async fn list(&self) -> Result<Vec<Event>, CatalogError> {
        let query = Query::all(CollectionPath::events());
        let snapshot = retry_transient(&self.retry, "list_events", || {
            self.documents.query(&query)
        })
        .await?;
        Ok(RosterSnapshot::<Event>::from_snapshot(&snapshot)
            .entries
            .into_iter()
            .map(|entry| entry.value)
            .collect())
    }

    /// Events matching `text`, see [`matches_search`]. Blank text returns
    /// nothing without reading the store.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] on store failure.
    pub async fn search(&self, text: &str) -> Result<Vec<Event>, CatalogError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut events = self.list().await?;
        events.retain(|event| matches_search(event, text));
        Ok(events)
    }

    /// Watch the live event list.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] if the subscription cannot be opened.
    pub async fn watch<F>(&self, listener: F) -> Result<Subscription<Event>, CatalogError>
    where
        F: FnMut(Arc<RosterSnapshot<Event>>) + Send + 'static,
    {
        Ok(self
            .projector
            .subscribe(Query::all(CollectionPath::events()), listener)
            .await?)
    }

    /// Watch the live set of events matching `text`.
    ///
    /// Every change to the event list re-runs the filter, so edits that make
    /// an event match (or stop matching) show up without a new search. Blank
    /// text delivers empty views.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] if the subscription cannot be opened.
    pub async fn watch_search<F>(
        &self,
        text: &str,
        mut listener: F,
    ) -> Result<Subscription<Event>, CatalogError>
    where
        F: FnMut(Arc<RosterSnapshot<Event>>) + Send + 'static,
    {
        let text = text.to_string();
        self.watch(move |view| listener(Arc::new(filter_view(&view, &text))))
            .await
    }
}
