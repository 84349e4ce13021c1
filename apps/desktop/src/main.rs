use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::extract_code, AccountRepos, ClientConfig, IssueComposer, OauthConfig,
    PaginatedListController, PopularRepos, RepoBackend, RestBackend, SearchController,
    SearchHistory, SearchStatus, SessionManager,
};
use shared::{
    domain::{Account, Repo, SortField},
    protocol::IssueRequest,
};
use storage::{PreferenceStore, Storage, LANGUAGE_PREF_KEY};
use tracing::debug;

mod config;

use config::{load_settings, prepare_database_url, Settings};

#[derive(Parser, Debug)]
#[command(name = "desktop", about = "GitHub repository browser console")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with a personal access token.
    Login {
        #[arg(long)]
        token: String,
    },
    /// Print the browser URL that starts the OAuth sign-in flow.
    OauthUrl,
    /// Finish the OAuth flow with the redirect URL the browser landed on.
    OauthComplete { redirect_url: String },
    /// Re-check the stored token and show the signed-in account.
    Whoami,
    /// Sign out and forget the stored token.
    Logout,
    /// Browse popular repositories page by page.
    Popular {
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// List the signed-in account's repositories.
    MyRepos {
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Search repositories, recording the query in the local history.
    Search {
        query: String,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        sort: Option<String>,
    },
    /// Show or edit the recent-search history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Show details for one repository, given as owner/name.
    Repo {
        repo: String,
        #[arg(long)]
        json: bool,
    },
    /// Open an issue on a repository, given as owner/name.
    Issue {
        repo: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: Option<String>,
    },
    /// Show or set the app language preference (zh, en, or system).
    Lang { value: Option<String> },
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    List,
    Remove { query: String },
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    debug!(%database_url, "using local store");
    let storage = Arc::new(
        Storage::new(&database_url)
            .await
            .context("opening the local store failed")?,
    );

    let client_config = client_config(&settings);
    let backend = Arc::new(RestBackend::new(&client_config));
    let session = Arc::new(SessionManager::new(backend.clone(), storage.clone()));

    match cli.command {
        Command::Login { token } => {
            let account = session.login(token).await?;
            println!("signed in as {}", describe_account(&account));
        }
        Command::OauthUrl => {
            if settings.client_id.is_empty() {
                bail!(
                    "no OAuth client id configured; set GITHUB_CLIENT_ID or client_id in client.toml"
                );
            }
            let state = format!(
                "{:x}",
                SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos()
            );
            let url = client_config.authorize_url(&state)?;
            println!("{url}");
            println!("after approving, finish with: desktop oauth-complete <redirect-url>");
        }
        Command::OauthComplete { redirect_url } => {
            let code = extract_code(&redirect_url)?;
            let account = session.complete_oauth(&code).await?;
            println!("signed in as {}", describe_account(&account));
        }
        Command::Whoami => {
            session.restore().await?;
            if session.token().is_none() {
                println!("not signed in");
            } else if session.is_authenticated().await? {
                match session.state().account {
                    Some(account) => println!("{}", describe_account(&account)),
                    None => println!("signed in"),
                }
            } else {
                println!("the stored token was rejected; sign in again");
            }
        }
        Command::Logout => {
            session.restore().await?;
            session.logout().await?;
            println!("signed out");
        }
        Command::Popular { pages } => {
            let source = Arc::new(PopularRepos::new(backend));
            let list = PaginatedListController::new(source, settings.page_size);
            run_list(&list, pages).await?;
        }
        Command::MyRepos { pages } => {
            session.restore().await?;
            let source = Arc::new(AccountRepos::new(backend, session.clone()));
            let list = PaginatedListController::new(source, settings.page_size);
            run_list(&list, pages).await?;
        }
        Command::Search {
            query,
            language,
            sort,
        } => {
            run_search(backend, storage, &settings, query, language, sort).await?;
        }
        Command::History { action } => {
            let history = SearchHistory::load(storage).await?;
            match action {
                HistoryAction::List => {
                    let entries = history.entries();
                    if entries.is_empty() {
                        println!("(no recent searches)");
                    }
                    for (index, query) in entries.iter().enumerate() {
                        println!("{:>2}. {query}", index + 1);
                    }
                }
                HistoryAction::Remove { query } => {
                    history.remove(&query).await?;
                    println!("removed");
                }
                HistoryAction::Clear => {
                    history.clear().await?;
                    println!("cleared");
                }
            }
        }
        Command::Repo { repo, json } => {
            let (owner, name) = split_repo(&repo)?;
            let details = backend.repo_details(owner, name).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                print_repo_details(&details);
            }
        }
        Command::Issue { repo, title, body } => {
            session.restore().await?;
            let (owner, name) = split_repo(&repo)?;
            let composer = IssueComposer::new(backend, session.clone());
            let record = composer
                .submit(owner, name, IssueRequest { title, body })
                .await?;
            println!("created issue #{} ({})", record.number, record.state);
        }
        Command::Lang { value } => match value {
            Some(language) => {
                parse_language_pref(&language)?;
                storage.set_preference(LANGUAGE_PREF_KEY, &language).await?;
                println!("app language set to {language}");
            }
            None => {
                let current = storage
                    .get_preference(LANGUAGE_PREF_KEY)
                    .await?
                    .unwrap_or_else(|| "system".to_string());
                println!("{current}");
            }
        },
    }

    Ok(())
}

fn client_config(settings: &Settings) -> ClientConfig {
    ClientConfig {
        api_base: settings.api_base.clone(),
        oauth_base: settings.oauth_base.clone(),
        oauth: OauthConfig {
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            redirect_uri: settings.redirect_uri.clone(),
            scope: settings.scope.clone(),
        },
        page_size: settings.page_size,
        debounce: Duration::from_millis(settings.debounce_ms),
    }
}

fn describe_account(account: &Account) -> String {
    match &account.name {
        Some(name) => format!("{} ({name})", account.login),
        None => account.login.clone(),
    }
}

fn split_repo(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => Ok((owner, name)),
        _ => bail!("expected owner/name, got '{raw}'"),
    }
}

fn print_repos(repos: &[Repo]) {
    for repo in repos {
        let language = repo.language.as_deref().unwrap_or("-");
        println!(
            "{}  stars={} language={}",
            repo.full_name, repo.stargazers_count, language
        );
    }
}

fn print_repo_details(repo: &Repo) {
    println!(
        "{}  stars={} forks={} language={}",
        repo.full_name,
        repo.stargazers_count,
        repo.forks_count,
        repo.language.as_deref().unwrap_or("-")
    );
    if let Some(description) = &repo.description {
        println!("{description}");
    }
    println!("{}", repo.html_url);
}

async fn run_list(list: &PaginatedListController<Repo>, pages: u32) -> Result<()> {
    list.load().await;
    let mut state = list.state();
    if let Some(message) = &state.terminal_error {
        bail!("loading failed: {message}");
    }
    print_repos(&state.items);
    let mut shown = state.items.len();

    for _ in 1..pages {
        if !state.has_more {
            break;
        }
        list.load_more().await;
        state = list.state();
        if let Some(message) = &state.load_more_error {
            bail!("loading more failed: {message}");
        }
        print_repos(&state.items[shown..]);
        shown = state.items.len();
    }

    if !state.has_more {
        println!("(end of results)");
    }
    Ok(())
}

async fn run_search(
    backend: Arc<RestBackend>,
    storage: Arc<Storage>,
    settings: &Settings,
    query: String,
    language: Option<String>,
    sort: Option<String>,
) -> Result<()> {
    let query = query.trim().to_string();
    if query.is_empty() {
        bail!("the query must not be blank");
    }

    let history = Arc::new(SearchHistory::load(storage).await?);
    let controller = Arc::new(SearchController::new(
        backend,
        history,
        settings.page_size,
        Duration::from_millis(settings.debounce_ms),
    ));

    if language.is_some() {
        controller.set_language_filter(language).await;
    }
    if let Some(sort) = sort {
        controller.set_sort_order(parse_sort(&sort)?).await;
    }

    let mut rx = controller.subscribe();
    let base = controller.state().sequence;
    controller.search_with_history(&query).await?;

    // The submission bumps the sequence once and its fetch once more.
    let outcome = tokio::time::timeout(
        Duration::from_secs(20),
        rx.wait_for(|s| {
            s.sequence >= base + 2
                && matches!(s.status, SearchStatus::Success | SearchStatus::Error(_))
        }),
    )
    .await
    .context("the search timed out")?
    .context("the search controller went away")?
    .clone();

    if let SearchStatus::Error(message) = &outcome.status {
        bail!("search failed: {message}");
    }
    if outcome.results.is_empty() {
        println!("no matches");
    } else {
        print_repos(&outcome.results);
    }
    Ok(())
}

fn parse_sort(raw: &str) -> Result<SortField> {
    if raw.eq_ignore_ascii_case("updated") {
        Ok(SortField::Updated)
    } else if raw.eq_ignore_ascii_case("stars") {
        Ok(SortField::Stars)
    } else {
        bail!("unknown sort order '{raw}', expected 'stars' or 'updated'")
    }
}

fn parse_language_pref(raw: &str) -> Result<()> {
    match raw {
        "zh" | "en" | "system" => Ok(()),
        _ => bail!("unknown language '{raw}', expected 'zh', 'en', or 'system'"),
    }
}
