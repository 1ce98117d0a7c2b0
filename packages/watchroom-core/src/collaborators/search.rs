//! Debounced external search.
//!
//! Each keystroke calls [`DebouncedSearch::search`]; a call supersedes every
//! call still waiting or in flight, so only the last term within the debounce
//! window reaches the provider.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{CollaboratorError, CollaboratorResult, ExternalVideo, VideoCatalog};

/// Default quiet period before a search is sent.
pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(500);

pub struct DebouncedSearch {
    catalog: Arc<dyn VideoCatalog>,
    delay: Duration,
    current: Mutex<CancellationToken>,
}

impl DebouncedSearch {
    pub fn new(catalog: Arc<dyn VideoCatalog>) -> Self {
        Self::with_delay(catalog, DEFAULT_SEARCH_DEBOUNCE)
    }

    pub fn with_delay(catalog: Arc<dyn VideoCatalog>, delay: Duration) -> Self {
        Self {
            catalog,
            delay,
            current: Mutex::new(CancellationToken::new()),
        }
    }

    /// Searches for `term` once the debounce window elapsed.
    ///
    /// An empty term clears results immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError::Cancelled`] when a newer call superseded this one.
    pub async fn search(&self, term: &str) -> CollaboratorResult<Vec<ExternalVideo>> {
        let token = {
            let mut current = self.current.lock();
            current.cancel();
            *current = CancellationToken::new();
            current.clone()
        };

        if term.trim().is_empty() {
            return Ok(Vec::new());
        }

        tokio::select! {
            _ = token.cancelled() => return Err(CollaboratorError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        tokio::select! {
            _ = token.cancelled() => Err(CollaboratorError::Cancelled),
            result = self.catalog.search_external_videos(term) => result,
        }
    }

    /// Cancels any pending search.
    pub fn cancel(&self) {
        self.current.lock().cancel();
    }
}
