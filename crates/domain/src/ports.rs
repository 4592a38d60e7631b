//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the domain and external systems.
//! Adapters implement these traits to connect to real infrastructure.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::cache::FingerprintCache;
use crate::feed::FeedViewPost;
use crate::model::{Destination, MediaItem, MediaKind, PostRequest, RateLimitStatus};

/// Error type for feed source operations
#[derive(Debug, PartialEq, Error)]
pub enum FeedSourceError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, reset at: {0:?}")]
    RateLimited(Option<OffsetDateTime>),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Decode error: {0}")]
    Decode(String),
}

/// One page of the author feed
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    /// Decoded entries, newest first
    pub entries: Vec<FeedViewPost>,
    /// Content ids of entries that could not be decoded
    pub undecodable: Vec<String>,
    /// Continuation token for older entries, absent at the end of the feed
    pub cursor: Option<String>,
}

/// Port for reading the account's own timeline
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch one page of an actor's author feed, newest first.
    /// `cursor` continues from the page that returned it.
    async fn fetch_feed(&self, actor: &str, cursor: Option<&str>)
    -> Result<FeedPage, FeedSourceError>;

    /// Last rate-limit figures reported by the source
    fn rate_limit(&self) -> Option<RateLimitStatus>;
}

/// Port for finding the author of a post the feed did not hydrate
#[async_trait]
pub trait ReplyAuthorResolver: Send + Sync {
    /// Handle of the author of the post at `uri`, if it still exists
    async fn resolve_author(&self, uri: &str) -> Result<Option<String>, FeedSourceError>;
}

/// Error type for posting operations
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Content too long: {0}")]
    TooLong(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Media error: {0}")]
    Media(String),
}

/// Error type for delete operations
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("Post not found")]
    NotFound,
    #[error("Rate limited")]
    RateLimited,
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("API error: {0}")]
    Api(String),
}

/// Port for one destination network
#[async_trait]
pub trait CrossPoster: Send + Sync {
    /// Which network this poster writes to
    fn destination(&self) -> Destination;

    /// Check if this poster is enabled
    fn is_enabled(&self) -> bool;

    /// Maximum length of a single message
    fn max_chars(&self) -> usize;

    /// Maximum length of a media description
    fn alt_text_limit(&self) -> usize;

    /// Upload one media item, returning the destination media handle
    async fn upload_media(&self, item: &MediaItem, kind: MediaKind)
    -> Result<String, PublishError>;

    /// Create one message, returning its native id
    async fn create_post(&self, request: &PostRequest) -> Result<String, PublishError>;

    /// Delete a message by native id
    async fn delete_post(&self, native_id: &str) -> Result<(), DeleteError>;

    /// Share an already mirrored message (retweet, boost)
    async fn repost(&self, native_id: &str) -> Result<(), PublishError>;

    /// Withdraw a share made with [`CrossPoster::repost`]
    async fn undo_repost(&self, native_id: &str) -> Result<(), DeleteError>;

    /// Last rate-limit figures reported by the destination
    fn rate_limit(&self) -> Option<RateLimitStatus>;
}

/// Error type for cache store operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Database error: {0}")]
    Database(String),
}

/// Port for persisting the fingerprint cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read the whole cache; a missing store is an empty cache
    async fn load(&self) -> Result<FingerprintCache, CacheError>;

    /// Persist the whole cache
    async fn save(&self, cache: &FingerprintCache) -> Result<(), CacheError>;
}

/// Port for time/clock operations (enables deterministic testing)
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> OffsetDateTime;
}

/// Real clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}
