use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Secret slot holding the bearer token for the active session.
pub const AUTH_TOKEN_KEY: &str = "auth_token";
/// Preference slot holding the UI language override (`zh`, `en`, `system`).
pub const LANGUAGE_PREF_KEY: &str = "app_language";
/// Upper bound on retained search-history entries; oldest evicted first.
pub const HISTORY_CAP: usize = 10;

/// Key/value slot for opaque credentials. Each call is a single statement
/// or transaction, so callers may treat the store as atomic per call.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, key: &str) -> Result<Option<String>>;
    async fn set_secret(&self, key: &str, value: &str) -> Result<()>;
    async fn remove_secret(&self, key: &str) -> Result<()>;
}

/// Bounded most-recent-first query history. `add_query` front-inserts,
/// deduplicates by moving an existing entry to the front, and trims to
/// [`HISTORY_CAP`] in one transaction.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn list_queries(&self) -> Result<Vec<String>>;
    async fn add_query(&self, query: &str) -> Result<()>;
    async fn remove_query(&self, query: &str) -> Result<()>;
    async fn clear_queries(&self) -> Result<()>;
}

/// Small key/value store for user preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_preference(&self, key: &str) -> Result<Option<String>>;
    async fn set_preference(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub query: String,
    pub searched_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// History rows with their timestamps, most recent first. The
    /// [`HistoryStore`] trait exposes only the query strings; this is for
    /// operator tooling.
    pub async fn list_history_rows(&self) -> Result<Vec<HistoryRow>> {
        let rows = sqlx::query("SELECT query, searched_at FROM search_history ORDER BY id DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| HistoryRow {
                query: r.get::<String, _>(0),
                searched_at: r.get::<DateTime<Utc>, _>(1),
            })
            .collect())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
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

#[async_trait]
impl SecretStore for Storage {
    async fn get_secret(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM secrets WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn set_secret(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO secrets (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_secret(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM secrets WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for Storage {
    async fn list_queries(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT query FROM search_history ORDER BY id DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }

    async fn add_query(&self, query: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM search_history WHERE query = ?")
            .bind(query)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO search_history (query) VALUES (?)")
            .bind(query)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM search_history WHERE id NOT IN (
                SELECT id FROM search_history ORDER BY id DESC LIMIT ?
             )",
        )
        .bind(HISTORY_CAP as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_query(&self, query: &str) -> Result<()> {
        sqlx::query("DELETE FROM search_history WHERE query = ?")
            .bind(query)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_queries(&self) -> Result<()> {
        sqlx::query("DELETE FROM search_history")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for Storage {
    async fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM preferences WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO preferences (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
