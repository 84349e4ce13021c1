pub mod config;
pub mod history;
pub mod issues;
pub mod list;
pub mod ports;
pub mod rest;
pub mod search;
pub mod session;

pub use config::{ClientConfig, OauthConfig};
pub use history::SearchHistory;
pub use issues::{ComposeStatus, IssueComposer};
pub use list::{AccountRepos, ListState, PaginatedListController, PopularRepos};
pub use ports::{AuthBackend, PageSource, RepoBackend};
pub use rest::RestBackend;
pub use search::{SearchController, SearchState, SearchStatus};
pub use session::{SessionManager, SessionState, SessionStatus};
