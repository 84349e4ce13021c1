use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base: String,
    pub oauth_base: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
    pub database_url: String,
    pub page_size: u32,
    pub debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".into(),
            oauth_base: "https://github.com".into(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "mygithubos://oauth/callback".into(),
            scope: "repo,user".into(),
            database_url: "sqlite://./data/client.db".into(),
            page_size: 20,
            debounce_ms: 300,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("client.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("api_base") {
                settings.api_base = v.clone();
            }
            if let Some(v) = file_cfg.get("oauth_base") {
                settings.oauth_base = v.clone();
            }
            if let Some(v) = file_cfg.get("client_id") {
                settings.client_id = v.clone();
            }
            if let Some(v) = file_cfg.get("client_secret") {
                settings.client_secret = v.clone();
            }
            if let Some(v) = file_cfg.get("redirect_uri") {
                settings.redirect_uri = v.clone();
            }
            if let Some(v) = file_cfg.get("scope") {
                settings.scope = v.clone();
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
            if let Some(v) = file_cfg.get("page_size") {
                if let Ok(parsed) = v.parse::<u32>() {
                    settings.page_size = parsed;
                }
            }
            if let Some(v) = file_cfg.get("debounce_ms") {
                if let Ok(parsed) = v.parse::<u64>() {
                    settings.debounce_ms = parsed;
                }
            }
        }
    }

    if let Ok(v) = std::env::var("GITHUB_API_BASE") {
        settings.api_base = v;
    }
    if let Ok(v) = std::env::var("APP__API_BASE") {
        settings.api_base = v;
    }

    if let Ok(v) = std::env::var("GITHUB_OAUTH_BASE") {
        settings.oauth_base = v;
    }
    if let Ok(v) = std::env::var("APP__OAUTH_BASE") {
        settings.oauth_base = v;
    }

    if let Ok(v) = std::env::var("GITHUB_CLIENT_ID") {
        settings.client_id = v;
    }
    if let Ok(v) = std::env::var("APP__CLIENT_ID") {
        settings.client_id = v;
    }

    if let Ok(v) = std::env::var("GITHUB_CLIENT_SECRET") {
        settings.client_secret = v;
    }
    if let Ok(v) = std::env::var("APP__CLIENT_SECRET") {
        settings.client_secret = v;
    }

    if let Ok(v) = std::env::var("APP__REDIRECT_URI") {
        settings.redirect_uri = v;
    }
    if let Ok(v) = std::env::var("APP__SCOPE") {
        settings.scope = v;
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Ok(v) = std::env::var("APP__PAGE_SIZE") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.page_size = parsed;
        }
    }
    if let Ok(v) = std::env::var("APP__DEBOUNCE_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.debounce_ms = parsed;
        }
    }

    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
