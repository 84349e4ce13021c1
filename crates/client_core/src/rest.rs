use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use shared::{
    domain::{Account, Repo, SortField},
    error::ApiError,
    protocol::{
        AccessTokenRequest, AccessTokenResponse, BackendErrorBody, IssueRecord, IssueRequest,
        SearchPage,
    },
};

use crate::{
    config::{ClientConfig, OauthConfig},
    ports::{AuthBackend, RepoBackend},
};

const USER_AGENT: &str = "mygithubos-client/0.1";
const API_ACCEPT: &str = "application/vnd.github+json";

/// Production implementation of both backend ports over a GitHub-style
/// REST API. HTTP statuses, rate-limit headers, and transport failures
/// all land in the shared error taxonomy here so callers never see a
/// raw transport error.
pub struct RestBackend {
    http: Client,
    api_base: String,
    oauth_base: String,
    oauth: OauthConfig,
}

impl RestBackend {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            oauth_base: config.oauth_base.trim_end_matches('/').to_string(),
            oauth: config.oauth.clone(),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.api_base))
            .header("User-Agent", USER_AGENT)
            .header("Accept", API_ACCEPT)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{path}", self.api_base))
            .header("User-Agent", USER_AGENT)
            .header("Accept", API_ACCEPT)
    }

    /// Non-success statuses become `ApiError`s. A 403 that exhausted the
    /// rate limit is reported as `RateLimited`, not `Auth`, so it never
    /// tears down the session.
    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let rate_limited = status == StatusCode::FORBIDDEN
            && response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|value| value.to_str().ok())
                == Some("0");

        let message = response
            .json::<BackendErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| format!("request failed with status {status}"));

        if rate_limited {
            return Err(ApiError::rate_limited(message));
        }
        Err(ApiError::from_status(status.as_u16(), message))
    }

    fn transport_error(err: reqwest::Error) -> ApiError {
        if err.is_timeout() || err.is_connect() {
            return ApiError::network(format!("backend unreachable: {err}"));
        }
        if err.is_decode() {
            return ApiError::internal(format!("malformed backend response: {err}"));
        }
        ApiError::network(err.to_string())
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        response.json().await.map_err(Self::transport_error)
    }
}

#[async_trait]
impl AuthBackend for RestBackend {
    async fn verify_identity(&self, token: &str) -> Result<Account, ApiError> {
        let response = self
            .get("/user")
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::transport_error)?;
        let response = Self::check(response).await?;
        Self::read_json(response).await
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ApiError> {
        let request = AccessTokenRequest {
            client_id: self.oauth.client_id.clone(),
            client_secret: self.oauth.client_secret.clone(),
            code: code.to_string(),
            redirect_uri: Some(self.oauth.redirect_uri.clone()),
        };

        // The exchange endpoint lives on the OAuth host, not the API
        // host, and reports failures as 200 responses with error fields.
        let response = self
            .http
            .post(format!("{}/login/oauth/access_token", self.oauth_base))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .form(&request)
            .send()
            .await
            .map_err(Self::transport_error)?;
        let response = Self::check(response).await?;
        let body: AccessTokenResponse = Self::read_json(response).await?;

        match body.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                let reason = body
                    .error_description
                    .or(body.error)
                    .unwrap_or_else(|| "token exchange failed".to_string());
                Err(ApiError::auth(reason))
            }
        }
    }
}

#[async_trait]
impl RepoBackend for RestBackend {
    async fn search_repos(
        &self,
        query: &str,
        sort: Option<SortField>,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, ApiError> {
        debug!("rest: searching repositories, page {page}");
        let mut request = self
            .get("/search/repositories")
            .query(&[("q", query)])
            .query(&[("page", page), ("per_page", per_page)]);
        if let Some(sort) = sort {
            request = request.query(&[("sort", sort.as_str()), ("order", "desc")]);
        }

        let response = request.send().await.map_err(Self::transport_error)?;
        let response = Self::check(response).await?;
        Self::read_json(response).await
    }

    async fn account_repos(
        &self,
        token: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Repo>, ApiError> {
        debug!("rest: listing own repositories, page {page}");
        let response = self
            .get("/user/repos")
            .bearer_auth(token)
            .query(&[("page", page), ("per_page", per_page)])
            .query(&[("sort", "updated")])
            .send()
            .await
            .map_err(Self::transport_error)?;
        let response = Self::check(response).await?;
        Self::read_json(response).await
    }

    async fn repo_details(&self, owner: &str, name: &str) -> Result<Repo, ApiError> {
        let response = self
            .get(&format!("/repos/{owner}/{name}"))
            .send()
            .await
            .map_err(Self::transport_error)?;
        let response = Self::check(response).await?;
        Self::read_json(response).await
    }

    async fn create_issue(
        &self,
        token: &str,
        owner: &str,
        name: &str,
        draft: &IssueRequest,
    ) -> Result<IssueRecord, ApiError> {
        let response = self
            .post(&format!("/repos/{owner}/{name}/issues"))
            .bearer_auth(token)
            .json(draft)
            .send()
            .await
            .map_err(Self::transport_error)?;
        let response = Self::check(response).await?;
        Self::read_json(response).await
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
