//! SQLite fingerprint cache store

use async_trait::async_trait;
use skymirror_domain::{CacheError, CacheStore, Destination, FingerprintCache};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const RATE_LIMIT_KEY: &str = "source_rate_limited_until";

/// SQLite-backed cache store
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    /// Open (or create) the database at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&db_url)
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mirrored_posts (
                source_id TEXT NOT NULL,
                destination TEXT NOT NULL,
                native_id TEXT NOT NULL,
                posted_at TEXT NOT NULL,
                PRIMARY KEY (source_id, destination)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?;

        Ok(())
    }
}

fn parse_destination(value: &str) -> Result<Destination, CacheError> {
    match value {
        "twitter" => Ok(Destination::Twitter),
        "mastodon" => Ok(Destination::Mastodon),
        other => Err(CacheError::Serialization(format!(
            "unknown destination '{}'",
            other
        ))),
    }
}

fn parse_time(value: &str) -> Result<OffsetDateTime, CacheError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| CacheError::Serialization(e.to_string()))
}

fn format_time(value: OffsetDateTime) -> Result<String, CacheError> {
    value
        .format(&Rfc3339)
        .map_err(|e| CacheError::Serialization(e.to_string()))
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn load(&self) -> Result<FingerprintCache, CacheError> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT source_id, destination, native_id, posted_at FROM mirrored_posts",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?;

        let mut cache = FingerprintCache::new();
        for (source_id, destination, native_id, posted_at) in rows {
            cache.record_post(
                &source_id,
                parse_destination(&destination)?,
                &native_id,
                parse_time(&posted_at)?,
            );
        }

        let until: Option<(String,)> = sqlx::query_as("SELECT value FROM cache_meta WHERE key = ?")
            .bind(RATE_LIMIT_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;
        cache.source_rate_limited_until = until.map(|(v,)| parse_time(&v)).transpose()?;

        Ok(cache)
    }

    async fn save(&self, cache: &FingerprintCache) -> Result<(), CacheError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM mirrored_posts")
            .execute(&mut *tx)
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        for (source_id, entry) in &cache.posts {
            let posted_at = format_time(entry.timestamp)?;
            for (destination, native_id) in &entry.destinations {
                sqlx::query(
                    r#"
                    INSERT INTO mirrored_posts (source_id, destination, native_id, posted_at)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(source_id)
                .bind(destination.as_str())
                .bind(native_id)
                .bind(&posted_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| CacheError::Database(e.to_string()))?;
            }
        }

        match cache.source_rate_limited_until {
            Some(until) => {
                sqlx::query(
                    r#"
                    INSERT INTO cache_meta (key, value) VALUES (?, ?)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value
                    "#,
                )
                .bind(RATE_LIMIT_KEY)
                .bind(format_time(until)?)
                .execute(&mut *tx)
                .await
                .map_err(|e| CacheError::Database(e.to_string()))?;
            }
            None => {
                sqlx::query("DELETE FROM cache_meta WHERE key = ?")
                    .bind(RATE_LIMIT_KEY)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        Ok(())
    }
}
