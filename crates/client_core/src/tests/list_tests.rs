use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
};

use async_trait::async_trait;
use tokio::sync::oneshot;

use shared::{
    domain::{Account, Repo, RepoId, RepoOwner, SortField},
    error::{ApiError, ErrorKind},
};
use storage::{SecretStore, AUTH_TOKEN_KEY};

use super::*;
use crate::{
    ports::{AuthBackend, RepoBackend},
    session::SessionStatus,
};

const PAGE_SIZE: u32 = 20;

fn full_page(start: u32) -> Vec<u32> {
    (start..start + PAGE_SIZE).collect()
}

struct ScriptedPages {
    calls: StdMutex<Vec<u32>>,
    script: StdMutex<VecDeque<Result<Vec<u32>, ApiError>>>,
}

impl ScriptedPages {
    fn new(script: Vec<Result<Vec<u32>, ApiError>>) -> Arc<Self> {
        Arc::new(Self {
            calls: StdMutex::new(Vec::new()),
            script: StdMutex::new(script.into()),
        })
    }

    fn pages_requested(&self) -> Vec<u32> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PageSource<u32> for ScriptedPages {
    async fn fetch_page(&self, page: u32, _per_page: u32) -> Result<Vec<u32>, ApiError> {
        self.calls.lock().expect("lock").push(page);
        self.script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Pages source that parks one chosen call until the test releases it,
/// so assertions can run while that fetch is in flight.
struct GatedPages {
    calls: AtomicUsize,
    gate_at: usize,
    started: StdMutex<Option<oneshot::Sender<()>>>,
    release: StdMutex<Option<oneshot::Receiver<()>>>,
    script: StdMutex<VecDeque<Result<Vec<u32>, ApiError>>>,
}

impl GatedPages {
    fn new(
        gate_at: usize,
        script: Vec<Result<Vec<u32>, ApiError>>,
    ) -> (Arc<Self>, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let source = Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate_at,
            started: StdMutex::new(Some(started_tx)),
            release: StdMutex::new(Some(release_rx)),
            script: StdMutex::new(script.into()),
        });
        (source, started_rx, release_tx)
    }
}

#[async_trait]
impl PageSource<u32> for GatedPages {
    async fn fetch_page(&self, _page: u32, _per_page: u32) -> Result<Vec<u32>, ApiError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if index == self.gate_at {
            if let Some(started) = self.started.lock().expect("lock").take() {
                let _ = started.send(());
            }
            let release = self.release.lock().expect("lock").take();
            if let Some(release) = release {
                let _ = release.await;
            }
        }
        self.script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn controller(source: Arc<dyn PageSource<u32>>) -> PaginatedListController<u32> {
    PaginatedListController::new(source, PAGE_SIZE)
}

#[tokio::test]
async fn initial_load_fills_the_first_page() {
    let source = ScriptedPages::new(vec![Ok(full_page(1))]);
    let list = controller(source.clone());

    list.load().await;

    let state = list.state();
    assert_eq!(state.items, full_page(1));
    assert_eq!(state.page_number, 1);
    assert!(state.has_more);
    assert!(!state.is_loading);
    assert!(state.terminal_error.is_none());
    assert_eq!(source.pages_requested(), vec![1]);
}

#[tokio::test]
async fn a_short_first_page_means_no_more_pages() {
    let source = ScriptedPages::new(vec![Ok(vec![1, 2, 3])]);
    let list = controller(source);

    list.load().await;

    let state = list.state();
    assert_eq!(state.items.len(), 3);
    assert!(!state.has_more);
}

#[tokio::test]
async fn load_more_appends_and_advances_the_cursor() {
    let source = ScriptedPages::new(vec![Ok(full_page(1)), Ok(vec![100, 101, 102, 103, 104])]);
    let list = controller(source.clone());

    list.load().await;
    list.load_more().await;

    let state = list.state();
    assert_eq!(state.items.len(), 25);
    assert_eq!(state.items[..20], full_page(1)[..]);
    assert_eq!(state.items[20..], [100, 101, 102, 103, 104]);
    assert_eq!(state.page_number, 2);
    assert!(!state.has_more);
    assert!(!state.is_loading_more);
    assert_eq!(source.pages_requested(), vec![1, 2]);
}

#[tokio::test]
async fn initial_load_failure_is_terminal_until_a_fresh_load() {
    let source = ScriptedPages::new(vec![
        Err(ApiError::network("backend unreachable")),
        Ok(full_page(1)),
    ]);
    let list = controller(source.clone());

    list.load().await;

    let state = list.state();
    assert!(state.items.is_empty());
    assert!(!state.has_more);
    assert!(!state.is_loading);
    assert_eq!(state.terminal_error.as_deref(), Some("backend unreachable"));

    list.load().await;

    let state = list.state();
    assert_eq!(state.items, full_page(1));
    assert!(state.terminal_error.is_none());
    assert_eq!(source.pages_requested(), vec![1, 1]);
}

#[tokio::test]
async fn load_more_failure_rolls_back_and_retry_reissues_the_same_page() {
    let source = ScriptedPages::new(vec![
        Ok(full_page(1)),
        Err(ApiError::network("connection reset")),
        Ok(vec![100, 101, 102, 103, 104]),
    ]);
    let list = controller(source.clone());

    list.load().await;
    let before = list.state();
    list.load_more().await;

    let failed = list.state();
    assert_eq!(failed.items, before.items);
    assert_eq!(failed.page_number, before.page_number);
    assert!(failed.has_more);
    assert!(!failed.is_loading_more);
    assert_eq!(failed.load_more_error.as_deref(), Some("connection reset"));

    list.retry().await;

    let state = list.state();
    assert_eq!(state.items.len(), 25);
    assert_eq!(state.page_number, 2);
    assert!(state.load_more_error.is_none());
    // The retry hits page 2 again, not page 3.
    assert_eq!(source.pages_requested(), vec![1, 2, 2]);
}

#[tokio::test]
async fn retry_without_a_pending_failure_does_nothing() {
    let source = ScriptedPages::new(vec![Ok(full_page(1))]);
    let list = controller(source.clone());

    list.load().await;
    let before = list.state();
    list.retry().await;

    assert_eq!(list.state(), before);
    assert_eq!(source.pages_requested(), vec![1]);
}

#[tokio::test]
async fn load_more_is_refused_without_more_pages() {
    let source = ScriptedPages::new(vec![Ok(vec![1, 2, 3])]);
    let list = controller(source.clone());

    // Nothing loaded yet.
    list.load_more().await;
    assert!(source.pages_requested().is_empty());

    // Loaded, but the short page exhausted the feed.
    list.load().await;
    list.load_more().await;
    assert_eq!(source.pages_requested(), vec![1]);
}

#[tokio::test]
async fn calls_during_an_initial_load_are_ignored() {
    let (source, started, release) = GatedPages::new(0, vec![Ok(full_page(1))]);
    let list = Arc::new(controller(source.clone()));

    let in_flight = {
        let list = Arc::clone(&list);
        tokio::spawn(async move { list.load().await })
    };
    started.await.expect("fetch started");

    let during = list.state();
    assert!(during.is_loading);

    list.load().await;
    list.load_more().await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(list.state(), during);

    release.send(()).expect("release");
    in_flight.await.expect("join");
    assert_eq!(list.state().items, full_page(1));
}

#[tokio::test]
async fn calls_during_a_load_more_are_ignored() {
    let (source, started, release) =
        GatedPages::new(1, vec![Ok(full_page(1)), Ok(vec![100, 101])]);
    let list = Arc::new(controller(source.clone()));

    list.load().await;

    let in_flight = {
        let list = Arc::clone(&list);
        tokio::spawn(async move { list.load_more().await })
    };
    started.await.expect("fetch started");

    let during = list.state();
    assert!(during.is_loading_more);

    list.load().await;
    list.load_more().await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert_eq!(list.state(), during);

    release.send(()).expect("release");
    in_flight.await.expect("join");

    let state = list.state();
    assert_eq!(state.items.len(), 22);
    assert_eq!(state.page_number, 2);
}

#[tokio::test]
async fn a_fresh_load_replaces_everything_accumulated() {
    let source = ScriptedPages::new(vec![
        Ok(full_page(1)),
        Ok(full_page(100)),
        Ok(vec![900, 901, 902]),
    ]);
    let list = controller(source.clone());

    list.load().await;
    list.load_more().await;
    assert_eq!(list.state().items.len(), 40);

    list.load().await;

    let state = list.state();
    assert_eq!(state.items, vec![900, 901, 902]);
    assert_eq!(state.page_number, 1);
    assert!(!state.has_more);
    assert_eq!(source.pages_requested(), vec![1, 2, 1]);
}

// Source wiring below: the popular feed hits the search endpoint with
// its preset query, and the account feed goes through the session.

fn repo(id: i64) -> Repo {
    Repo {
        id: RepoId(id),
        name: format!("repo-{id}"),
        full_name: format!("owner/repo-{id}"),
        description: None,
        owner: RepoOwner {
            login: "owner".into(),
            avatar_url: None,
        },
        stargazers_count: 1200,
        watchers_count: 1200,
        forks_count: 30,
        language: Some("Rust".into()),
        html_url: format!("https://github.com/owner/repo-{id}"),
        default_branch: Some("main".into()),
        topics: Vec::new(),
    }
}

#[derive(Default)]
struct RecordingRepos {
    search_calls: StdMutex<Vec<(String, Option<SortField>, u32, u32)>>,
    account_calls: StdMutex<Vec<(String, u32, u32)>>,
    account_script: StdMutex<VecDeque<Result<Vec<Repo>, ApiError>>>,
}

#[async_trait]
impl RepoBackend for RecordingRepos {
    async fn search_repos(
        &self,
        query: &str,
        sort: Option<SortField>,
        page: u32,
        per_page: u32,
    ) -> Result<shared::protocol::SearchPage, ApiError> {
        self.search_calls
            .lock()
            .expect("lock")
            .push((query.to_string(), sort, page, per_page));
        Ok(shared::protocol::SearchPage {
            total_count: 2,
            incomplete_results: false,
            items: vec![repo(1), repo(2)],
        })
    }

    async fn account_repos(
        &self,
        token: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Repo>, ApiError> {
        self.account_calls
            .lock()
            .expect("lock")
            .push((token.to_string(), page, per_page));
        self.account_script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(vec![repo(10)]))
    }

    async fn repo_details(&self, _owner: &str, _name: &str) -> Result<Repo, ApiError> {
        Ok(repo(3))
    }

    async fn create_issue(
        &self,
        _token: &str,
        _owner: &str,
        _name: &str,
        _draft: &shared::protocol::IssueRequest,
    ) -> Result<shared::protocol::IssueRecord, ApiError> {
        Err(ApiError::internal("not under test"))
    }
}

struct NoAuth;

#[async_trait]
impl AuthBackend for NoAuth {
    async fn verify_identity(&self, _token: &str) -> Result<Account, ApiError> {
        Err(ApiError::internal("not under test"))
    }

    async fn exchange_code(&self, _code: &str) -> Result<String, ApiError> {
        Err(ApiError::internal("not under test"))
    }
}

#[derive(Default)]
struct SeededSecrets {
    values: StdMutex<HashMap<String, String>>,
}

impl SeededSecrets {
    fn with_token(token: &str) -> Arc<Self> {
        let store = Self::default();
        store
            .values
            .lock()
            .expect("lock")
            .insert(AUTH_TOKEN_KEY.to_string(), token.to_string());
        Arc::new(store)
    }
}

#[async_trait]
impl SecretStore for SeededSecrets {
    async fn get_secret(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.values.lock().expect("lock").get(key).cloned())
    }

    async fn set_secret(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values
            .lock()
            .expect("lock")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_secret(&self, key: &str) -> anyhow::Result<()> {
        self.values.lock().expect("lock").remove(key);
        Ok(())
    }
}

async fn restored_session(secrets: Arc<SeededSecrets>) -> Arc<SessionManager> {
    let session = Arc::new(SessionManager::new(
        Arc::new(NoAuth) as Arc<dyn AuthBackend>,
        secrets,
    ));
    session.restore().await.expect("restore");
    session
}

#[tokio::test]
async fn popular_source_uses_the_preset_query_sorted_by_stars() {
    let repos = Arc::new(RecordingRepos::default());
    let source = PopularRepos::new(Arc::clone(&repos) as Arc<dyn RepoBackend>);

    let items = source.fetch_page(3, PAGE_SIZE).await.expect("fetch");

    assert_eq!(items.len(), 2);
    assert_eq!(
        repos.search_calls.lock().expect("lock").as_slice(),
        &[(POPULAR_QUERY.to_string(), Some(SortField::Stars), 3, PAGE_SIZE)]
    );
}

#[tokio::test]
async fn account_source_passes_the_session_token() {
    let repos = Arc::new(RecordingRepos::default());
    let session = restored_session(SeededSecrets::with_token("token-abc")).await;
    let source = AccountRepos::new(Arc::clone(&repos) as Arc<dyn RepoBackend>, session);

    let items = source.fetch_page(2, PAGE_SIZE).await.expect("fetch");

    assert_eq!(items.len(), 1);
    assert_eq!(
        repos.account_calls.lock().expect("lock").as_slice(),
        &[("token-abc".to_string(), 2, PAGE_SIZE)]
    );
}

#[tokio::test]
async fn account_source_rejection_signs_the_session_out() {
    let repos = Arc::new(RecordingRepos::default());
    repos
        .account_script
        .lock()
        .expect("lock")
        .push_back(Err(ApiError::auth("token rejected")));
    let secrets = SeededSecrets::with_token("token-abc");
    let session = restored_session(Arc::clone(&secrets)).await;
    let source = AccountRepos::new(
        Arc::clone(&repos) as Arc<dyn RepoBackend>,
        Arc::clone(&session),
    );

    let err = source.fetch_page(1, PAGE_SIZE).await.expect_err("rejected");

    assert_eq!(err.kind, ErrorKind::Auth);
    assert_eq!(session.state().status, SessionStatus::Unauthenticated);
    assert!(secrets
        .values
        .lock()
        .expect("lock")
        .get(AUTH_TOKEN_KEY)
        .is_none());
}

#[tokio::test]
async fn account_source_without_a_session_fails_fast() {
    let repos = Arc::new(RecordingRepos::default());
    let session = Arc::new(SessionManager::new(
        Arc::new(NoAuth) as Arc<dyn AuthBackend>,
        Arc::new(SeededSecrets::default()) as Arc<dyn SecretStore>,
    ));
    let source = AccountRepos::new(Arc::clone(&repos) as Arc<dyn RepoBackend>, session);

    let err = source.fetch_page(1, PAGE_SIZE).await.expect_err("refused");

    assert_eq!(err.kind, ErrorKind::Auth);
    assert!(repos.account_calls.lock().expect("lock").is_empty());
}
