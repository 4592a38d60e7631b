//! Offline source and poster for replaying a saved feed

use async_trait::async_trait;
use skymirror_domain::{
    CrossPoster, DeleteError, Destination, FeedPage, FeedSource, FeedSourceError, MediaItem,
    MediaKind, PostRequest, PublishError, RateLimitStatus, ReplyAuthorResolver,
};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::bluesky::decode_feed_document;

/// Feed source that reads a saved `getAuthorFeed` response from disk
#[derive(Debug, Clone)]
pub struct FixtureFeedSource {
    path: PathBuf,
}

impl FixtureFeedSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<FeedPage, FeedSourceError> {
        let body = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            FeedSourceError::Api(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        decode_feed_document(&body)
    }
}

#[async_trait]
impl FeedSource for FixtureFeedSource {
    /// The fixture is a single page; any cursor reads past its end
    async fn fetch_feed(
        &self,
        _actor: &str,
        cursor: Option<&str>,
    ) -> Result<FeedPage, FeedSourceError> {
        if cursor.is_some() {
            return Ok(FeedPage::default());
        }
        let mut page = self.read().await?;
        page.cursor = None;
        Ok(page)
    }

    fn rate_limit(&self) -> Option<RateLimitStatus> {
        None
    }
}

#[async_trait]
impl ReplyAuthorResolver for FixtureFeedSource {
    /// Only posts present in the fixture can be resolved
    async fn resolve_author(&self, uri: &str) -> Result<Option<String>, FeedSourceError> {
        let page = self.read().await?;
        Ok(page
            .entries
            .into_iter()
            .find(|entry| entry.post.uri == uri)
            .map(|entry| entry.post.author.handle))
    }
}

/// Poster that accepts everything and hands out sequential ids
pub struct StubPoster {
    destination: Destination,
    max_chars: usize,
    created: Mutex<Vec<PostRequest>>,
    deleted: Mutex<Vec<String>>,
    reposted: Mutex<Vec<String>>,
}

impl StubPoster {
    pub fn new(destination: Destination, max_chars: usize) -> Self {
        Self {
            destination,
            max_chars,
            created: Mutex::new(vec![]),
            deleted: Mutex::new(vec![]),
            reposted: Mutex::new(vec![]),
        }
    }

    /// Requests accepted so far
    pub fn created(&self) -> Vec<PostRequest> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Native ids deleted so far
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Native ids currently shared
    pub fn reposted(&self) -> Vec<String> {
        self.reposted.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CrossPoster for StubPoster {
    fn destination(&self) -> Destination {
        self.destination
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn max_chars(&self) -> usize {
        self.max_chars
    }

    fn alt_text_limit(&self) -> usize {
        1000
    }

    async fn upload_media(&self, item: &MediaItem, _kind: MediaKind) -> Result<String, PublishError> {
        Ok(format!("stub-media-{}", item.url))
    }

    async fn create_post(&self, request: &PostRequest) -> Result<String, PublishError> {
        if request.text.chars().count() > self.max_chars {
            return Err(PublishError::TooLong(format!(
                "{} characters",
                request.text.chars().count()
            )));
        }

        let mut created = self
            .created
            .lock()
            .map_err(|e| PublishError::Api(e.to_string()))?;
        created.push(request.clone());
        let id = format!("stub-{}-{}", self.destination, created.len());
        tracing::info!(destination = %self.destination, id = %id, text = %request.text, "Stub post created");
        Ok(id)
    }

    async fn delete_post(&self, native_id: &str) -> Result<(), DeleteError> {
        self.deleted
            .lock()
            .map_err(|e| DeleteError::Api(e.to_string()))?
            .push(native_id.to_string());
        tracing::info!(destination = %self.destination, id = %native_id, "Stub post deleted");
        Ok(())
    }

    async fn repost(&self, native_id: &str) -> Result<(), PublishError> {
        self.reposted
            .lock()
            .map_err(|e| PublishError::Api(e.to_string()))?
            .push(native_id.to_string());
        tracing::info!(destination = %self.destination, id = %native_id, "Stub repost created");
        Ok(())
    }

    async fn undo_repost(&self, native_id: &str) -> Result<(), DeleteError> {
        let mut reposted = self
            .reposted
            .lock()
            .map_err(|e| DeleteError::Api(e.to_string()))?;
        let before = reposted.len();
        reposted.retain(|id| id != native_id);
        if reposted.len() == before {
            return Err(DeleteError::NotFound);
        }
        tracing::info!(destination = %self.destination, id = %native_id, "Stub repost undone");
        Ok(())
    }

    fn rate_limit(&self) -> Option<RateLimitStatus> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skymirror_domain::Visibility;
    use tempfile::TempDir;

    const FEED: &str = r#"{
        "feed": [
            {
                "post": {
                    "uri": "at://did:plc:me/app.bsky.feed.post/1",
                    "cid": "bafy1",
                    "author": {"did": "did:plc:me", "handle": "me.bsky.social"},
                    "record": {"text": "Hi", "createdAt": "2024-05-01T10:00:00.000Z"}
                }
            },
            { "post": { "cid": "bafy-broken" } }
        ]
    }"#;

    #[tokio::test]
    async fn test_fixture_source_decodes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(&path, FEED).unwrap();
        let source = FixtureFeedSource::new(&path);

        let page = source.fetch_feed("anyone", None).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.undecodable, vec!["bafy-broken".to_string()]);
        assert!(page.cursor.is_none());
        let past_end = source.fetch_feed("anyone", Some("more")).await.unwrap();
        assert!(past_end.entries.is_empty());

        let author = source
            .resolve_author("at://did:plc:me/app.bsky.feed.post/1")
            .await
            .unwrap();
        assert_eq!(author.as_deref(), Some("me.bsky.social"));
        assert_eq!(source.resolve_author("at://elsewhere").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_fixture_is_an_error() {
        let source = FixtureFeedSource::new("/nonexistent/feed.json");
        assert!(source.fetch_feed("me", None).await.is_err());
    }

    #[tokio::test]
    async fn test_stub_poster_enforces_length() {
        let poster = StubPoster::new(Destination::Twitter, 5);
        let mut request = PostRequest {
            text: "short".to_string(),
            reply_to: None,
            quote_of: None,
            media_ids: vec![],
            reply_settings: None,
            visibility: Visibility::Public,
            idempotency_key: "k".to_string(),
        };

        assert_eq!(poster.create_post(&request).await.unwrap(), "stub-twitter-1");

        request.text = "too long".to_string();
        assert!(matches!(
            poster.create_post(&request).await,
            Err(PublishError::TooLong(_))
        ));

        poster.delete_post("stub-twitter-1").await.unwrap();
        assert_eq!(poster.created().len(), 1);
        assert_eq!(poster.deleted(), vec!["stub-twitter-1".to_string()]);
    }

    #[tokio::test]
    async fn test_stub_poster_reposts() {
        let poster = StubPoster::new(Destination::Mastodon, 500);

        poster.repost("stub-mastodon-1").await.unwrap();
        assert_eq!(poster.reposted(), vec!["stub-mastodon-1".to_string()]);

        poster.undo_repost("stub-mastodon-1").await.unwrap();
        assert!(poster.reposted().is_empty());
        assert!(matches!(
            poster.undo_repost("stub-mastodon-1").await,
            Err(DeleteError::NotFound)
        ));
    }
}
