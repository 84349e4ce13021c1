use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use shared::{
    error::ApiError,
    protocol::{IssueRecord, IssueRequest},
};

use crate::{ports::RepoBackend, session::SessionManager};

#[derive(Debug, Clone, Default)]
pub enum ComposeStatus {
    #[default]
    Idle,
    Submitting,
    Submitted(IssueRecord),
    Error(String),
}

/// Submission state for opening an issue on a repository. One submission
/// at a time; a blank title is refused before anything leaves the
/// process.
pub struct IssueComposer {
    repos: Arc<dyn RepoBackend>,
    session: Arc<SessionManager>,
    state: watch::Sender<ComposeStatus>,
    gate: Mutex<()>,
}

impl IssueComposer {
    pub fn new(repos: Arc<dyn RepoBackend>, session: Arc<SessionManager>) -> Self {
        let (state, _) = watch::channel(ComposeStatus::default());
        Self {
            repos,
            session,
            state,
            gate: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ComposeStatus {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ComposeStatus> {
        self.state.subscribe()
    }

    pub fn watch_stream(&self) -> WatchStream<ComposeStatus> {
        WatchStream::new(self.state.subscribe())
    }

    pub async fn submit(
        &self,
        owner: &str,
        repo: &str,
        draft: IssueRequest,
    ) -> Result<IssueRecord, ApiError> {
        {
            let _claim = self.gate.lock().await;
            if matches!(*self.state.borrow(), ComposeStatus::Submitting) {
                return Err(ApiError::validation("a submission is already in progress"));
            }
            if draft.title.trim().is_empty() {
                let err = ApiError::validation("an issue needs a title");
                self.state.send_replace(ComposeStatus::Error(err.message.clone()));
                return Err(err);
            }
            self.state.send_replace(ComposeStatus::Submitting);
        }

        let repos = Arc::clone(&self.repos);
        let owner = owner.to_string();
        let repo = repo.to_string();
        let outcome = self
            .session
            .authorized(move |token| {
                Box::pin(async move { repos.create_issue(token, &owner, &repo, &draft).await })
            })
            .await;

        match outcome {
            Ok(record) => {
                info!("issues: created issue #{}", record.number);
                self.state.send_replace(ComposeStatus::Submitted(record.clone()));
                Ok(record)
            }
            Err(err) => {
                warn!("issues: submission failed: {err}");
                self.state.send_replace(ComposeStatus::Error(err.message.clone()));
                Err(err)
            }
        }
    }

    pub fn reset(&self) {
        self.state.send_replace(ComposeStatus::Idle);
    }
}

#[cfg(test)]
#[path = "tests/issues_tests.rs"]
mod tests;
