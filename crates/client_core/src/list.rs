use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

use shared::{
    domain::{Repo, SortField},
    error::ApiError,
};

use crate::{
    ports::{PageSource, RepoBackend},
    session::SessionManager,
};

/// Query behind the popular-repositories feed.
pub const POPULAR_QUERY: &str = "stars:>1000";

/// Accumulated list plus pagination cursor and loading/error state.
///
/// `page_number` only advances on a successful fetch. `items` is
/// append-only except on a fresh `load`, which clears it. A failed
/// initial load reports through `terminal_error`; a failed load-more
/// reports through `load_more_error` and leaves the data untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ListState<T> {
    pub items: Vec<T>,
    pub page_number: u32,
    pub has_more: bool,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub load_more_error: Option<String>,
    pub terminal_error: Option<String>,
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page_number: 0,
            has_more: false,
            is_loading: false,
            is_loading_more: false,
            load_more_error: None,
            terminal_error: None,
        }
    }
}

/// Drives one paginated feed: initial load, load-more, and retry after a
/// failed load-more. At most one fetch is outstanding at a time; calls
/// that arrive while one is in flight return immediately instead of
/// queueing.
pub struct PaginatedListController<T> {
    source: Arc<dyn PageSource<T>>,
    page_size: u32,
    state: watch::Sender<ListState<T>>,
    gate: Mutex<()>,
}

impl<T> PaginatedListController<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(source: Arc<dyn PageSource<T>>, page_size: u32) -> Self {
        let (state, _) = watch::channel(ListState::default());
        Self {
            source,
            page_size,
            state,
            gate: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ListState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListState<T>> {
        self.state.subscribe()
    }

    pub fn watch_stream(&self) -> WatchStream<ListState<T>> {
        WatchStream::new(self.state.subscribe())
    }

    /// Starts over from page 1, discarding anything already accumulated.
    pub async fn load(&self) {
        {
            let _claim = self.gate.lock().await;
            let busy = {
                let state = self.state.borrow();
                state.is_loading || state.is_loading_more
            };
            if busy {
                debug!("list: load ignored, a fetch is already in flight");
                return;
            }
            self.state.send_modify(|state| {
                state.items.clear();
                state.page_number = 1;
                state.has_more = false;
                state.is_loading = true;
                state.load_more_error = None;
                state.terminal_error = None;
            });
        }

        debug!("list: loading page 1");
        match self.source.fetch_page(1, self.page_size).await {
            Ok(page) => {
                let has_more = page.len() as u32 == self.page_size;
                self.state.send_modify(|state| {
                    state.items = page;
                    state.has_more = has_more;
                    state.is_loading = false;
                });
            }
            Err(err) => {
                warn!("list: initial load failed: {err}");
                self.state.send_modify(|state| {
                    state.is_loading = false;
                    state.terminal_error = Some(err.message);
                });
            }
        }
    }

    /// Fetches the next page and appends it. Refused unless the last
    /// fetch said there is more and nothing is currently in flight. On
    /// failure the cursor stays where it was so a retry re-requests the
    /// same page.
    pub async fn load_more(&self) {
        let next_page = {
            let _claim = self.gate.lock().await;
            let next_page = {
                let state = self.state.borrow();
                if !state.has_more || state.is_loading || state.is_loading_more {
                    None
                } else {
                    Some(state.page_number + 1)
                }
            };
            let Some(next_page) = next_page else {
                debug!("list: load_more ignored");
                return;
            };
            self.state.send_modify(|state| {
                state.is_loading_more = true;
                state.load_more_error = None;
            });
            next_page
        };

        debug!("list: loading page {next_page}");
        match self.source.fetch_page(next_page, self.page_size).await {
            Ok(page) => {
                let has_more = page.len() as u32 == self.page_size;
                self.state.send_modify(|state| {
                    state.items.extend(page);
                    state.page_number = next_page;
                    state.has_more = has_more;
                    state.is_loading_more = false;
                });
            }
            Err(err) => {
                warn!("list: page {next_page} failed: {err}");
                self.state.send_modify(|state| {
                    state.is_loading_more = false;
                    state.load_more_error = Some(err.message);
                });
            }
        }
    }

    /// Re-runs `load_more` after a failure. Does nothing unless a
    /// load-more error is actually pending.
    pub async fn retry(&self) {
        let failed = self.state.borrow().load_more_error.is_some();
        if !failed {
            return;
        }
        self.load_more().await;
    }
}

/// Pages through the preset popular-repositories search, most stars
/// first.
pub struct PopularRepos {
    repos: Arc<dyn RepoBackend>,
}

impl PopularRepos {
    pub fn new(repos: Arc<dyn RepoBackend>) -> Self {
        Self { repos }
    }
}

#[async_trait]
impl PageSource<Repo> for PopularRepos {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<Repo>, ApiError> {
        let found = self
            .repos
            .search_repos(POPULAR_QUERY, Some(SortField::Stars), page, per_page)
            .await?;
        Ok(found.items)
    }
}

/// Pages through the signed-in account's own repositories. Every fetch
/// goes through the session so a rejected token signs the user out.
pub struct AccountRepos {
    repos: Arc<dyn RepoBackend>,
    session: Arc<SessionManager>,
}

impl AccountRepos {
    pub fn new(repos: Arc<dyn RepoBackend>, session: Arc<SessionManager>) -> Self {
        Self { repos, session }
    }
}

#[async_trait]
impl PageSource<Repo> for AccountRepos {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<Repo>, ApiError> {
        let repos = Arc::clone(&self.repos);
        self.session
            .authorized(move |token| {
                Box::pin(async move { repos.account_repos(token, page, per_page).await })
            })
            .await
    }
}

#[cfg(test)]
#[path = "tests/list_tests.rs"]
mod tests;
