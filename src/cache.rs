//! Local cache of computed views (stats summaries, recent lists), keyed by
//! string and evicted by regex pattern after writes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

#[async_trait]
pub trait ViewCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Like [`ViewCache::get`], but entries stored more than `max_age` ago
    /// read as missing.
    async fn get_fresh(&self, key: &str, max_age: Duration) -> Result<Option<Value>>;

    async fn put(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove every entry whose key matches `pattern` (a regex). Returns how
    /// many entries were removed.
    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct SqliteCache {
    pool: Pool,
}

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = resolve_cache_url(database_url)?;
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid cache database URL: {}", normalized))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Normalize a cache URL to `sqlite://<path>[?query]`, expanding `~/` and
/// creating the directory the database file lives in. In-memory and
/// non-SQLite URLs pass through.
fn resolve_cache_url(url: &str) -> Result<String> {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return Ok(url.to_string());
    };
    if rest.starts_with(":memory") {
        return Ok(url.to_string());
    }

    let location = rest.strip_prefix("//").unwrap_or(rest);
    let (file, query) = match location.split_once('?') {
        Some((file, query)) => (file, Some(query)),
        None => (location, None),
    };
    if file.is_empty() {
        return Ok(url.to_string());
    }

    let file = match (file.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(under_home), Ok(home)) => Path::new(&home).join(under_home),
        _ => PathBuf::from(file),
    };
    if let Some(dir) = file.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
    }

    Ok(match query {
        Some(query) => format!("sqlite://{}?{}", file.display(), query),
        None => format!("sqlite://{}", file.display()),
    })
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

impl SqliteCache {
    /// Open (creating if needed) and migrate the cache database.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Entry together with the time it was stored.
    #[instrument(skip_all)]
    pub async fn get_with_age(&self, key: &str) -> Result<Option<(Value, DateTime<Utc>)>> {
        let row = sqlx::query("SELECT value, stored_at FROM view_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.get("value");
        let stored_at: DateTime<Utc> = row.get("stored_at");
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt cache entry for key {}", key))?;
        Ok(Some((value, stored_at)))
    }

    pub async fn len(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM view_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

#[async_trait]
impl ViewCache for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get_with_age(key).await?.map(|(value, _)| value))
    }

    async fn get_fresh(&self, key: &str, max_age: Duration) -> Result<Option<Value>> {
        let Some((value, stored_at)) = self.get_with_age(key).await? else {
            return Ok(None);
        };
        // entries stamped in the future (clock change) count as age zero
        let age = (Utc::now() - stored_at).to_std().unwrap_or(Duration::ZERO);
        if age > max_age {
            debug!(key, age_secs = age.as_secs(), "cache entry expired");
            return Ok(None);
        }
        Ok(Some(value))
    }

    #[instrument(skip_all)]
    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO view_cache (key, value, stored_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, stored_at = excluded.stored_at",
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let re = Regex::new(pattern)
            .with_context(|| format!("invalid cache key pattern: {}", pattern))?;
        let mut tx = self.pool.begin().await?;
        let keys: Vec<String> = sqlx::query_scalar("SELECT key FROM view_cache")
            .fetch_all(&mut *tx)
            .await?;
        let mut removed = 0;
        for key in keys.iter().filter(|k| re.is_match(k)) {
            removed += sqlx::query("DELETE FROM view_cache WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        debug!(pattern, removed, "cache entries invalidated");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn setup_cache() -> (tempfile::TempDir, SqliteCache) {
        let td = tempdir().unwrap();
        let url = format!("sqlite://{}/nested/cache.db", td.path().display());
        let cache = SqliteCache::open(&url).await.unwrap();
        (td, cache)
    }

    #[tokio::test]
    async fn put_get_overwrite() {
        let (_td, cache) = setup_cache().await;
        assert!(cache.get("stats:all").await.unwrap().is_none());

        cache.put("stats:all", &json!({ "total": 3 })).await.unwrap();
        cache.put("stats:all", &json!({ "total": 4 })).await.unwrap();
        assert_eq!(cache.get("stats:all").await.unwrap(), Some(json!({ "total": 4 })));
        assert_eq!(cache.len().await.unwrap(), 1);

        let (_, stored_at) = cache.get_with_age("stats:all").await.unwrap().unwrap();
        assert!(stored_at <= Utc::now());
    }

    #[tokio::test]
    async fn invalidate_by_pattern() {
        let (_td, cache) = setup_cache().await;
        for key in ["stats:all", "stats:since:2025-06-15", "walks:recent", "feedings:recent"] {
            cache.put(key, &json!(key)).await.unwrap();
        }

        assert_eq!(cache.invalidate_pattern("^stats:").await.unwrap(), 2);
        assert!(cache.get("stats:all").await.unwrap().is_none());
        assert!(cache.get("walks:recent").await.unwrap().is_some());

        assert_eq!(cache.invalidate_pattern("^(walks|feedings):").await.unwrap(), 2);
        assert_eq!(cache.len().await.unwrap(), 0);
        assert_eq!(cache.invalidate_pattern("^stats:").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn old_entries_read_as_missing() {
        let (_td, cache) = setup_cache().await;
        cache.put("stats:all", &json!({ "total": 1 })).await.unwrap();
        assert!(cache
            .get_fresh("stats:all", Duration::from_secs(60))
            .await
            .unwrap()
            .is_some());

        sqlx::query("UPDATE view_cache SET stored_at = ?")
            .bind(Utc::now() - chrono::Duration::minutes(5))
            .execute(&cache.pool)
            .await
            .unwrap();
        assert!(cache
            .get_fresh("stats:all", Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
        assert!(cache.get("stats:all").await.unwrap().is_some());
        assert!(cache.get_fresh("missing", Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_pattern_is_an_error() {
        let (_td, cache) = setup_cache().await;
        assert!(cache.invalidate_pattern("(unclosed").await.is_err());
    }

    #[test]
    fn cache_url_passthrough_and_rebuild() {
        assert_eq!(resolve_cache_url("sqlite::memory:").unwrap(), "sqlite::memory:");
        assert_eq!(resolve_cache_url("postgres://x").unwrap(), "postgres://x");
        let td = tempdir().unwrap();
        let url = format!("sqlite:{}/a/b.db?mode=rwc", td.path().display());
        let rebuilt = resolve_cache_url(&url).unwrap();
        assert!(rebuilt.starts_with("sqlite://"));
        assert!(rebuilt.ends_with("/a/b.db?mode=rwc"));
        assert!(td.path().join("a").is_dir());
    }

    #[tokio::test]
    async fn unusable_cache_directory_is_reported() {
        let td = tempdir().unwrap();
        std::fs::write(td.path().join("blocker"), "not a directory").unwrap();
        let url = format!("sqlite://{}/blocker/cache.db", td.path().display());

        let err = resolve_cache_url(&url).unwrap_err();
        assert!(err.to_string().contains("failed to create cache directory"), "{err:#}");
        assert!(SqliteCache::open(&url).await.is_err());
    }
}
