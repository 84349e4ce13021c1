use anyhow::Result;
use clap::{Parser, Subcommand};
use storage::{
    HistoryStore, PreferenceStore, SecretStore, Storage, AUTH_TOKEN_KEY, LANGUAGE_PREF_KEY,
};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/client.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the store opens and its schema is reachable.
    Check,
    /// Report whether a sign-in token is stored, masked.
    ShowToken,
    /// Delete the stored sign-in token.
    ClearToken,
    /// List recorded searches with their timestamps.
    History,
    /// Remove one recorded search.
    RemoveQuery { query: String },
    /// Forget all recorded searches.
    ClearHistory,
    /// Show a stored preference; defaults to the app language slot.
    GetPref { key: Option<String> },
    /// Set a stored preference.
    SetPref { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Check => {
            storage.health_check().await?;
            println!("store ok");
        }
        Command::ShowToken => match storage.get_secret(AUTH_TOKEN_KEY).await? {
            Some(token) => println!("token present: {}", mask(&token)),
            None => println!("no token stored"),
        },
        Command::ClearToken => {
            storage.remove_secret(AUTH_TOKEN_KEY).await?;
            println!("token cleared");
        }
        Command::History => {
            let rows = storage.list_history_rows().await?;
            if rows.is_empty() {
                println!("(no recorded searches)");
            }
            for row in rows {
                println!(
                    "{}  {}",
                    row.searched_at.format("%Y-%m-%d %H:%M:%S"),
                    row.query
                );
            }
        }
        Command::RemoveQuery { query } => {
            storage.remove_query(&query).await?;
            println!("removed");
        }
        Command::ClearHistory => {
            storage.clear_queries().await?;
            println!("history cleared");
        }
        Command::GetPref { key } => {
            let key = key.unwrap_or_else(|| LANGUAGE_PREF_KEY.to_string());
            match storage.get_preference(&key).await? {
                Some(value) => println!("{key}={value}"),
                None => println!("{key} is not set"),
            }
        }
        Command::SetPref { key, value } => {
            storage.set_preference(&key, &value).await?;
            println!("{key}={value}");
        }
    }

    Ok(())
}

fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "****".into();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
