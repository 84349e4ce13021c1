use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};
use zeroize::Zeroize;

use shared::{domain::Account, error::ApiError};
use storage::{SecretStore, AUTH_TOKEN_KEY};

use crate::ports::AuthBackend;

/// Where the session currently stands. `Unknown` lasts until `restore`
/// has consulted the secret store once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Unknown,
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub token: Option<String>,
    pub status: SessionStatus,
    pub account: Option<Account>,
}

/// Owns the bearer token and the authenticated/unauthenticated state.
///
/// Login, logout, and rejection-triggered clears all run under one lock so
/// the persisted token and the in-memory state can never drift apart.
/// Reads (`token`, `state`) go through the watch cell and never block.
pub struct SessionManager {
    auth: Arc<dyn AuthBackend>,
    secrets: Arc<dyn SecretStore>,
    state: watch::Sender<SessionState>,
    auth_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthBackend>, secrets: Arc<dyn SecretStore>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            auth,
            secrets,
            state,
            auth_lock: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn watch_stream(&self) -> WatchStream<SessionState> {
        WatchStream::new(self.state.subscribe())
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Current token, if any. Never performs I/O.
    pub fn token(&self) -> Option<String> {
        self.state.borrow().token.clone()
    }

    /// Loads a previously persisted token. A stored token is trusted until
    /// a later verifying call says otherwise; no stored token means
    /// unauthenticated.
    pub async fn restore(&self) -> Result<(), ApiError> {
        let _guard = self.auth_lock.lock().await;

        let stored = self.secrets.get_secret(AUTH_TOKEN_KEY).await.map_err(|err| {
            warn!("session: failed to read the stored token: {err}");
            ApiError::internal("could not read the stored token")
        })?;

        match stored {
            Some(token) => {
                info!("session: restored a persisted token");
                self.publish(Some(token), SessionStatus::Authenticated, None);
            }
            None => self.publish(None, SessionStatus::Unauthenticated, None),
        }
        Ok(())
    }

    /// Verifies `token` against the identity endpoint and, only on success,
    /// persists it. On any failure the token is dropped from memory and the
    /// secret store, and the error is returned to the caller.
    pub async fn login(&self, token: String) -> Result<Account, ApiError> {
        let _guard = self.auth_lock.lock().await;

        self.publish(Some(token.clone()), SessionStatus::Unauthenticated, None);

        match self.auth.verify_identity(&token).await {
            Ok(account) => {
                if let Err(err) = self.secrets.set_secret(AUTH_TOKEN_KEY, &token).await {
                    warn!("session: failed to persist the token: {err}");
                    self.publish(None, SessionStatus::Unauthenticated, None);
                    return Err(ApiError::internal("could not persist the session token"));
                }
                info!("session: authenticated as {}", account.login);
                self.publish(
                    Some(token),
                    SessionStatus::Authenticated,
                    Some(account.clone()),
                );
                Ok(account)
            }
            Err(err) => {
                let mut token = token;
                token.zeroize();
                self.publish(None, SessionStatus::Unauthenticated, None);
                if let Err(remove_err) = self.secrets.remove_secret(AUTH_TOKEN_KEY).await {
                    warn!("session: failed to clear the stored token: {remove_err}");
                }
                warn!("session: login rejected ({:?})", err.kind);
                Err(err)
            }
        }
    }

    /// Trades an authorization code for a token, then runs the normal
    /// login path on it.
    pub async fn complete_oauth(&self, code: &str) -> Result<Account, ApiError> {
        info!("session: exchanging authorization code");
        let token = self.auth.exchange_code(code).await?;
        self.login(token).await
    }

    /// Drops the session from memory and the secret store. Safe to call
    /// when already signed out.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let _guard = self.auth_lock.lock().await;

        self.publish(None, SessionStatus::Unauthenticated, None);
        self.secrets.remove_secret(AUTH_TOKEN_KEY).await.map_err(|err| {
            warn!("session: failed to clear the stored token: {err}");
            ApiError::internal("could not clear the stored token")
        })?;

        info!("session: logged out");
        Ok(())
    }

    /// Re-validates the current token against the identity endpoint.
    /// Without a token this answers `false` with no network call. A
    /// rejected token clears the session; a transport failure is returned
    /// as an error rather than a verdict.
    pub async fn is_authenticated(&self) -> Result<bool, ApiError> {
        let Some(token) = self.token() else {
            return Ok(false);
        };

        match self.auth.verify_identity(&token).await {
            Ok(account) => {
                let _guard = self.auth_lock.lock().await;
                // A logout that landed while we were verifying wins.
                let still_current = self.state.borrow().token.as_deref() == Some(token.as_str());
                if still_current {
                    self.publish(Some(token), SessionStatus::Authenticated, Some(account));
                }
                Ok(still_current)
            }
            Err(err) if err.is_auth() => {
                self.clear_if_current(&token).await;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Runs a token-bearing call. Absent a token the call is refused
    /// outright. When the backend rejects the token mid-call, the session
    /// is cleared before the error is handed back, so every caller gets
    /// the same sign-out behavior without wiring it up themselves.
    pub async fn authorized<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        F: for<'a> FnOnce(&'a str) -> BoxFuture<'a, Result<T, ApiError>>,
    {
        let Some(token) = self.token() else {
            return Err(ApiError::auth("not signed in"));
        };

        match op(&token).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_auth() => {
                self.clear_if_current(&token).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Clears the session, but only if `rejected` is still the live token.
    /// A login that completed while the failing call was in flight installs
    /// a fresh token, and that fresh session must survive.
    async fn clear_if_current(&self, rejected: &str) {
        let _guard = self.auth_lock.lock().await;

        let still_current = self.state.borrow().token.as_deref() == Some(rejected);
        if !still_current {
            return;
        }

        self.publish(None, SessionStatus::Unauthenticated, None);
        if let Err(err) = self.secrets.remove_secret(AUTH_TOKEN_KEY).await {
            warn!("session: failed to clear the stored token: {err}");
        }
        warn!("session: token rejected by the backend, session cleared");
    }

    fn publish(&self, token: Option<String>, status: SessionStatus, account: Option<Account>) {
        self.state.send_modify(|state| {
            if let Some(old) = state.token.as_mut() {
                old.zeroize();
            }
            state.token = token;
            state.status = status;
            state.account = account;
        });
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
