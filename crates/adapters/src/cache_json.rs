//! JSON file fingerprint cache store

use async_trait::async_trait;
use skymirror_domain::{CacheError, CacheStore, FingerprintCache};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Cache kept as one JSON document, replaced atomically on save
#[derive(Debug, Clone)]
pub struct JsonCacheStore {
    path: PathBuf,
}

impl JsonCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CacheStore for JsonCacheStore {
    async fn load(&self) -> Result<FingerprintCache, CacheError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No cache file yet, starting empty");
                return Ok(FingerprintCache::new());
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(FingerprintCache::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            CacheError::Serialization(format!("{}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, cache: &FingerprintCache) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(cache)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), entries = cache.len(), "Saved cache");
        Ok(())
    }
}
