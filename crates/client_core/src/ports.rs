use async_trait::async_trait;
use shared::{
    domain::{Account, Repo, SortField},
    error::ApiError,
    protocol::{IssueRecord, IssueRequest, SearchPage},
};

/// Backend operations that establish or verify an identity.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Fetches the account behind `token`, proving the token is live.
    async fn verify_identity(&self, token: &str) -> Result<Account, ApiError>;

    /// Trades an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, ApiError>;
}

/// Repository reads and writes against the backend.
#[async_trait]
pub trait RepoBackend: Send + Sync {
    async fn search_repos(
        &self,
        query: &str,
        sort: Option<SortField>,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, ApiError>;

    async fn account_repos(
        &self,
        token: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Repo>, ApiError>;

    async fn repo_details(&self, owner: &str, name: &str) -> Result<Repo, ApiError>;

    async fn create_issue(
        &self,
        token: &str,
        owner: &str,
        name: &str,
        draft: &IssueRequest,
    ) -> Result<IssueRecord, ApiError>;
}

/// One page of an ordered feed. List controllers stay generic over this
/// so popular repos and the signed-in account's repos share one pager.
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<T>, ApiError>;
}
