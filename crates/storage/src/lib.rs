use anyhow::{Context, Result};
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
use tracing::debug;

const MEMORY_DATABASE_URL: &str = "sqlite::memory:";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMarker {
    pub name: String,
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database gets its own empty database.
        let max_connections = if database_url.starts_with(MEMORY_DATABASE_URL) {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Returns the marker if it exists and has not expired at `now`.
    /// Expired markers are deleted on sight.
    pub async fn marker(&self, name: &str, now: DateTime<Utc>) -> Result<Option<StoredMarker>> {
        let row = sqlx::query("SELECT name, value, expires_at FROM suppression_markers WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read marker '{name}'"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let marker = StoredMarker {
            name: row.try_get::<String, _>(0)?,
            value: row.try_get::<String, _>(1)?,
            expires_at: row.try_get::<DateTime<Utc>, _>(2)?,
        };

        if marker.expires_at <= now {
            debug!(
                "storage: marker expired name={} expires_at={}",
                marker.name, marker.expires_at
            );
            self.clear_marker(name).await?;
            return Ok(None);
        }

        Ok(Some(marker))
    }

    pub async fn set_marker(
        &self,
        name: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO suppression_markers (name, value, expires_at)
             VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET value=excluded.value, expires_at=excluded.expires_at, created_at=CURRENT_TIMESTAMP",
        )
        .bind(name)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write marker '{name}'"))?;
        Ok(())
    }

    pub async fn clear_marker(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM suppression_markers WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to clear marker '{name}'"))?;
        Ok(())
    }

    pub async fn purge_expired_markers(&self, now: DateTime<Utc>) -> Result<u64> {
        let rows = sqlx::query("SELECT name, expires_at FROM suppression_markers")
            .fetch_all(&self.pool)
            .await?;

        let mut purged = 0;
        for row in rows {
            let name: String = row.try_get(0)?;
            let expires_at: DateTime<Utc> = row.try_get(1)?;
            if expires_at <= now {
                self.clear_marker(&name).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    pub async fn view_settings(&self, view_uid: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT settings_json FROM view_settings WHERE view_uid = ?")
            .bind(view_uid)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read settings for view '{view_uid}'"))?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn save_view_settings(&self, view_uid: &str, settings_json: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO view_settings (view_uid, settings_json)
             VALUES (?, ?)
             ON CONFLICT(view_uid) DO UPDATE SET settings_json=excluded.settings_json, updated_at=CURRENT_TIMESTAMP",
        )
        .bind(view_uid)
        .bind(settings_json)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save settings for view '{view_uid}'"))?;
        Ok(())
    }

    pub async fn clear_view_settings(&self, view_uid: &str) -> Result<()> {
        sqlx::query("DELETE FROM view_settings WHERE view_uid = ?")
            .bind(view_uid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with(MEMORY_DATABASE_URL) || !database_url.starts_with("sqlite:") {
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

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
