use std::time::Duration;

use shared::error::ApiError;
use url::Url;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// OAuth application settings for the authorization-code flow.
#[derive(Debug, Clone)]
pub struct OauthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
}

impl Default for OauthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "mygithubos://oauth/callback".into(),
            scope: "repo,user".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base: String,
    pub oauth_base: String,
    pub oauth: OauthConfig,
    pub page_size: u32,
    pub debounce: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".into(),
            oauth_base: "https://github.com".into(),
            oauth: OauthConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

impl ClientConfig {
    /// Builds the browser URL that starts the authorization-code flow.
    pub fn authorize_url(&self, state: &str) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.oauth_base)?.join("/login/oauth/authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.oauth.client_id)
            .append_pair("redirect_uri", &self.oauth.redirect_uri)
            .append_pair("scope", &self.oauth.scope)
            .append_pair("state", state);
        Ok(url)
    }
}

/// Pulls the authorization code out of the redirect URL the provider
/// called back with.
pub fn extract_code(redirect_url: &str) -> Result<String, ApiError> {
    let url = Url::parse(redirect_url)
        .map_err(|err| ApiError::validation(format!("invalid redirect url: {err}")))?;

    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ApiError::validation("redirect url carries no authorization code"))
}
