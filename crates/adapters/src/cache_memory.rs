//! In-memory cache store for testing and dry runs

use async_trait::async_trait;
use skymirror_domain::{CacheError, CacheStore, FingerprintCache};
use std::sync::RwLock;

/// In-memory cache store implementation
pub struct InMemoryCacheStore {
    cache: RwLock<FingerprintCache>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::with_cache(FingerprintCache::new())
    }

    pub fn with_cache(cache: FingerprintCache) -> Self {
        Self {
            cache: RwLock::new(cache),
        }
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn load(&self) -> Result<FingerprintCache, CacheError> {
        let cache = self
            .cache
            .read()
            .map_err(|e| CacheError::Database(e.to_string()))?;
        Ok(cache.clone())
    }

    async fn save(&self, cache: &FingerprintCache) -> Result<(), CacheError> {
        let mut stored = self
            .cache
            .write()
            .map_err(|e| CacheError::Database(e.to_string()))?;
        *stored = cache.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skymirror_domain::Destination;
    use time::OffsetDateTime;

    #[tokio::test]
    async fn test_save_then_load() {
        let store = InMemoryCacheStore::new();
        assert!(store.load().await.unwrap().is_empty());

        let mut cache = FingerprintCache::new();
        cache.record_post("cid", Destination::Mastodon, "m1", OffsetDateTime::now_utc());
        store.save(&cache).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.native_id("cid", Destination::Mastodon), Some("m1"));
    }
}
