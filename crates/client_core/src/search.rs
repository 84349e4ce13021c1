use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time,
};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

use shared::{
    domain::{Repo, SortField},
    error::ApiError,
};

use crate::{history::SearchHistory, ports::RepoBackend};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SearchStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error(String),
}

/// Live search session state. `sequence` rises on every submission;
/// a response may only land if the sequence it was issued under is
/// still current.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchState {
    pub query: String,
    pub language: Option<String>,
    pub sort: SortField,
    pub results: Vec<Repo>,
    pub sequence: u64,
    pub status: SearchStatus,
}

/// Debounced repository search with supersession.
///
/// Every query submission restarts the quiet-interval timer; only the
/// last submission before a quiet interval actually hits the backend.
/// Responses from superseded submissions are discarded even when they
/// resolve late.
pub struct SearchController {
    repos: Arc<dyn RepoBackend>,
    history: Arc<SearchHistory>,
    page_size: u32,
    debounce: Duration,
    state: watch::Sender<SearchState>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl SearchController {
    pub fn new(
        repos: Arc<dyn RepoBackend>,
        history: Arc<SearchHistory>,
        page_size: u32,
        debounce: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            repos,
            history,
            page_size,
            debounce,
            state,
            pending: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SearchState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }

    pub fn watch_stream(&self) -> WatchStream<SearchState> {
        WatchStream::new(self.state.subscribe())
    }

    /// Submits a query. A blank query clears the results and succeeds on
    /// the spot, with no timer and no network call. Anything else starts
    /// the debounce window, discarding a previously pending submission.
    pub async fn set_query(self: &Arc<Self>, query: &str) {
        let mut pending = self.pending.lock().await;
        if let Some(timer) = pending.take() {
            timer.abort();
        }

        if query.trim().is_empty() {
            self.state.send_modify(|state| {
                state.query = query.to_string();
                state.sequence += 1;
                state.results.clear();
                state.status = SearchStatus::Success;
            });
            debug!("search: blank query, results cleared");
            return;
        }

        self.state.send_modify(|state| {
            state.query = query.to_string();
            // Supersede whatever is in flight right away, not just when
            // the timer fires.
            state.sequence += 1;
        });

        let controller = Arc::clone(self);
        *pending = Some(tokio::spawn(async move {
            time::sleep(controller.debounce).await;
            controller.run_search().await;
        }));
    }

    /// Narrows results to one language (`None` lifts the filter) and
    /// resubmits the current query through the debounced path.
    pub async fn set_language_filter(self: &Arc<Self>, language: Option<String>) {
        self.state.send_modify(|state| state.language = language);
        self.resubmit().await;
    }

    pub async fn set_sort_order(self: &Arc<Self>, sort: SortField) {
        self.state.send_modify(|state| state.sort = sort);
        self.resubmit().await;
    }

    /// Records the query in the history, then submits it.
    pub async fn search_with_history(self: &Arc<Self>, query: &str) -> Result<(), ApiError> {
        if !query.trim().is_empty() {
            self.history.add(query.trim()).await?;
        }
        self.set_query(query).await;
        Ok(())
    }

    pub async fn clear_history(&self) -> Result<(), ApiError> {
        self.history.clear().await
    }

    pub async fn remove_history_entry(&self, query: &str) -> Result<(), ApiError> {
        self.history.remove(query).await
    }

    async fn resubmit(self: &Arc<Self>) {
        let query = self.state.borrow().query.clone();
        self.set_query(&query).await;
    }

    /// Claims a fresh sequence ticket, fetches page 1 for the effective
    /// query, and applies the outcome only if the ticket is still the
    /// newest one by the time the response arrives.
    async fn run_search(&self) {
        let mut ticket = 0;
        let mut effective = String::new();
        self.state.send_modify(|state| {
            state.sequence += 1;
            ticket = state.sequence;
            state.status = SearchStatus::Loading;
            effective = compose_query(&state.query, state.language.as_deref(), state.sort);
        });

        debug!("search: fetching \"{effective}\"");
        let outcome = self
            .repos
            .search_repos(&effective, None, 1, self.page_size)
            .await;

        self.state.send_modify(|state| {
            if state.sequence != ticket {
                debug!("search: discarding a superseded response");
                return;
            }
            match outcome {
                Ok(found) => {
                    state.results = found.items;
                    state.status = SearchStatus::Success;
                }
                Err(err) => {
                    warn!("search: fetch failed: {err}");
                    state.status = SearchStatus::Error(err.message);
                }
            }
        });
    }
}

/// Effective query string: trimmed raw text, an optional language
/// clause, and the sort clause.
fn compose_query(raw: &str, language: Option<&str>, sort: SortField) -> String {
    let mut query = raw.trim().to_string();
    if let Some(language) = language {
        let language = language.trim();
        if !language.is_empty() {
            query.push_str(" language:");
            query.push_str(language);
        }
    }
    query.push_str(" sort:");
    query.push_str(sort.as_str());
    query
}

#[cfg(test)]
#[path = "tests/search_tests.rs"]
mod tests;
