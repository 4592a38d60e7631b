//! skymirror adapters crate
//!
//! This crate contains infrastructure adapters implementing the domain ports:
//! - `bluesky`: Bluesky XRPC feed source and session persistence
//! - `twitter`: X API v2 poster
//! - `mastodon`: Mastodon REST poster
//! - `cache`: JSON-file, SQLite and in-memory fingerprint cache stores
//! - `stub`: offline feed replay and stub poster

mod cache_json;
mod cache_memory;
mod cache_sqlite;
mod http;
mod media;

pub mod bluesky;
pub mod mastodon;
pub mod stub;
pub mod twitter;

/// Re-exports for cache stores
pub mod cache {
    pub use crate::cache_json::JsonCacheStore;
    pub use crate::cache_memory::InMemoryCacheStore;
    pub use crate::cache_sqlite::SqliteCacheStore;
}
