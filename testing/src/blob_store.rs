//! In-memory blob store with fault injection.

use rollcall_core::blob::{BlobError, BlobFuture, BlobPath, BlobStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// URL scheme prefix handed out by [`InMemoryBlobStore`].
const URL_PREFIX: &str = "memory://rollcall-bucket/";

#[derive(Debug, Default)]
struct State {
    blobs: HashMap<BlobPath, Vec<u8>>,
    failing_uploads: usize,
    rejecting: bool,
    attempts: usize,
}

/// Blob store held in memory.
///
/// URLs have the form `memory://rollcall-bucket/{path}` and are only handed
/// out after the bytes are stored, so [`InMemoryBlobStore::resolve`] on any
/// returned URL always succeeds.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBlobStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryBlobStore {
    /// Create an empty blob store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` uploads fail with [`BlobError::Unavailable`].
    pub fn fail_next_uploads(&self, count: usize) {
        self.lock().failing_uploads = count;
    }

    /// Reject every upload with [`BlobError::Rejected`] until reset.
    pub fn reject_uploads(&self, rejecting: bool) {
        self.lock().rejecting = rejecting;
    }

    /// Fetch the content behind a URL this store returned.
    #[must_use]
    pub fn resolve(&self, url: &str) -> Option<Vec<u8>> {
        let path = BlobPath::new(url.strip_prefix(URL_PREFIX)?);
        self.lock().blobs.get(&path).cloned()
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().blobs.len()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().blobs.is_empty()
    }

    /// Upload calls seen so far, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }
}

impl BlobStore for InMemoryBlobStore {
    fn upload(
        &self,
        path: &BlobPath,
        content: Vec<u8>,
        _content_type: &str,
    ) -> BlobFuture<'_, String> {
        let path = path.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut state = self.lock();
            state.attempts += 1;
            if state.rejecting {
                return Err(BlobError::Rejected(format!("{path} refused")));
            }
            if state.failing_uploads > 0 {
                state.failing_uploads -= 1;
                return Err(BlobError::Unavailable("injected upload failure".to_string()));
            }
            let url = format!("{URL_PREFIX}{path}");
            state.blobs.insert(path, content);
            Ok(url)
        })
    }
}
