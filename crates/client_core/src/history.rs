use std::{fmt, sync::Arc};

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::warn;

use shared::error::ApiError;
use storage::HistoryStore;

/// Observable view over the persisted search history. Ordering, the
/// move-to-front dedup, and the size cap are enforced by the store; this
/// type re-reads after every mutation and republishes.
pub struct SearchHistory {
    store: Arc<dyn HistoryStore>,
    entries: watch::Sender<Vec<String>>,
}

impl fmt::Debug for SearchHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchHistory")
            .field("entries", &*self.entries.borrow())
            .finish_non_exhaustive()
    }
}

impl SearchHistory {
    pub async fn load(store: Arc<dyn HistoryStore>) -> Result<Self, ApiError> {
        let initial = store.list_queries().await.map_err(store_error)?;
        let (entries, _) = watch::channel(initial);
        Ok(Self { store, entries })
    }

    /// Most-recent-first snapshot.
    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.entries.subscribe()
    }

    pub fn watch_stream(&self) -> WatchStream<Vec<String>> {
        WatchStream::new(self.entries.subscribe())
    }

    pub async fn add(&self, query: &str) -> Result<(), ApiError> {
        self.store.add_query(query).await.map_err(store_error)?;
        self.refresh().await
    }

    pub async fn remove(&self, query: &str) -> Result<(), ApiError> {
        self.store.remove_query(query).await.map_err(store_error)?;
        self.refresh().await
    }

    pub async fn clear(&self) -> Result<(), ApiError> {
        self.store.clear_queries().await.map_err(store_error)?;
        self.refresh().await
    }

    async fn refresh(&self) -> Result<(), ApiError> {
        let entries = self.store.list_queries().await.map_err(store_error)?;
        self.entries.send_replace(entries);
        Ok(())
    }
}

fn store_error(err: anyhow::Error) -> ApiError {
    warn!("history: store failure: {err}");
    ApiError::internal("search history store failure")
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
