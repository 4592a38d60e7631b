//! Bluesky XRPC read adapter for the account's author feed

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use skymirror_domain::feed::{FeedViewPost, ProfileRef};
use skymirror_domain::{FeedPage, FeedSource, FeedSourceError, RateLimitStatus, ReplyAuthorResolver};
use tokio::sync::Mutex;

use super::session::{Session, SessionFile};
use crate::http::{self, RateLimitTracker};

const AUTH_ERRORS: &[&str] = &[
    "ExpiredToken",
    "InvalidToken",
    "AuthenticationRequired",
    "AccountTakedown",
];

/// Connection settings for the source account
#[derive(Debug, Clone)]
pub struct BlueskyConfig {
    /// PDS or entryway base URL
    pub service_url: String,
    pub handle: String,
    /// Entries requested per feed fetch
    pub feed_limit: u32,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            service_url: "https://bsky.social".to_string(),
            handle: String::new(),
            feed_limit: 50,
        }
    }
}

/// Author feed source backed by the Bluesky XRPC API.
///
/// The session is established lazily on the first call, so a run that
/// never reaches the network never logs in.
pub struct BlueskyFeedSource {
    client: Client,
    config: BlueskyConfig,
    password: SecretString,
    session_file: Option<SessionFile>,
    session: Mutex<Option<Session>>,
    rate_limit: RateLimitTracker,
}

impl BlueskyFeedSource {
    pub fn new(config: BlueskyConfig, password: SecretString, session_file: Option<SessionFile>) -> Self {
        Self {
            client: http::client(),
            config,
            password,
            session_file,
            session: Mutex::new(None),
            rate_limit: RateLimitTracker::default(),
        }
    }

    fn xrpc(&self, method: &str) -> String {
        format!(
            "{}/xrpc/{}",
            self.config.service_url.trim_end_matches('/'),
            method
        )
    }

    async fn access_token(&self) -> Result<String, FeedSourceError> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            return Ok(existing.access_jwt.clone());
        }
        let established = self.establish_session().await?;
        let token = established.access_jwt.clone();
        *session = Some(established);
        Ok(token)
    }

    /// Refresh the saved session, or log in with the app password
    async fn establish_session(&self) -> Result<Session, FeedSourceError> {
        if let Some(file) = &self.session_file {
            if let Some(saved) = file.read().await {
                tracing::info!("Refreshing saved Bluesky session");
                match self.refresh_session(&saved.refresh_jwt).await {
                    Ok(session) => {
                        self.save_session(&session).await;
                        return Ok(session);
                    }
                    Err(FeedSourceError::Auth(reason)) => {
                        tracing::info!(reason = %reason, "Saved session rejected");
                        file.remove().await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::info!(handle = %self.config.handle, "Creating new Bluesky session");
        let session = self.create_session().await?;
        self.save_session(&session).await;
        Ok(session)
    }

    async fn save_session(&self, session: &Session) {
        if let Some(file) = &self.session_file {
            if let Err(e) = file.write(session).await {
                tracing::warn!(path = %file.path().display(), error = %e, "Failed to save session");
            }
        }
    }

    async fn create_session(&self) -> Result<Session, FeedSourceError> {
        let response = self
            .client
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&serde_json::json!({
                "identifier": self.config.handle,
                "password": self.password.expose_secret(),
            }))
            .send()
            .await
            .map_err(|e| FeedSourceError::Network(e.to_string()))?;

        self.check(response)
            .await?
            .json()
            .await
            .map_err(|e| FeedSourceError::Decode(e.to_string()))
    }

    async fn refresh_session(&self, refresh_jwt: &str) -> Result<Session, FeedSourceError> {
        let response = self
            .client
            .post(self.xrpc("com.atproto.server.refreshSession"))
            .bearer_auth(refresh_jwt)
            .send()
            .await
            .map_err(|e| FeedSourceError::Network(e.to_string()))?;

        self.check(response)
            .await?
            .json()
            .await
            .map_err(|e| FeedSourceError::Decode(e.to_string()))
    }

    /// GET an XRPC query; a rejected token is renewed once
    async fn authorized_get(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<Response, FeedSourceError> {
        let token = self.access_token().await?;
        match self.get(method, query, &token).await {
            Err(FeedSourceError::Auth(reason)) => {
                tracing::info!(reason = %reason, "Access token rejected, renewing session");
                *self.session.lock().await = None;
                let token = self.access_token().await?;
                self.get(method, query, &token).await
            }
            result => result,
        }
    }

    async fn get(
        &self,
        method: &str,
        query: &[(&str, &str)],
        token: &str,
    ) -> Result<Response, FeedSourceError> {
        let response = self
            .client
            .get(self.xrpc(method))
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| FeedSourceError::Network(e.to_string()))?;

        self.check(response).await
    }

    /// Record rate-limit headers and map XRPC error responses
    async fn check(&self, response: Response) -> Result<Response, FeedSourceError> {
        let headers = response.headers();
        let reset_at = http::unix_reset(headers, "ratelimit-reset");
        self.rate_limit
            .record(http::remaining(headers, "ratelimit-remaining"), reset_at);

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedSourceError::RateLimited(reset_at));
        }

        let body: XrpcError = response.json().await.unwrap_or_default();
        if body.error == "RateLimitExceeded" {
            return Err(FeedSourceError::RateLimited(reset_at));
        }
        if status == StatusCode::UNAUTHORIZED || AUTH_ERRORS.contains(&body.error.as_str()) {
            return Err(FeedSourceError::Auth(format!("{} {}", body.error, body.message)));
        }

        Err(FeedSourceError::Api(format!(
            "{}: {} {}",
            status, body.error, body.message
        )))
    }
}

#[derive(Debug, Default, Deserialize)]
struct XrpcError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct AuthorFeedResponse {
    #[serde(default)]
    feed: Vec<Value>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct GetPostsResponse {
    #[serde(default)]
    posts: Vec<PostAuthor>,
}

#[derive(Deserialize)]
struct PostAuthor {
    author: ProfileRef,
}

/// Decode a saved `getAuthorFeed` response body
pub(crate) fn decode_feed_document(body: &str) -> Result<FeedPage, FeedSourceError> {
    let document: AuthorFeedResponse =
        serde_json::from_str(body).map_err(|e| FeedSourceError::Decode(e.to_string()))?;
    Ok(decode_feed(document))
}

/// Decode entries one by one so a single odd entry cannot sink the page
fn decode_feed(document: AuthorFeedResponse) -> FeedPage {
    let mut page = FeedPage {
        cursor: document.cursor,
        ..Default::default()
    };
    for raw in document.feed {
        let cid = raw
            .pointer("/post/cid")
            .and_then(Value::as_str)
            .map(str::to_string);
        match serde_json::from_value::<FeedViewPost>(raw) {
            Ok(entry) => page.entries.push(entry),
            Err(e) => {
                tracing::warn!(cid = ?cid, error = %e, "Skipping undecodable feed entry");
                if let Some(cid) = cid {
                    page.undecodable.push(cid);
                }
            }
        }
    }
    page
}

#[async_trait]
impl FeedSource for BlueskyFeedSource {
    async fn fetch_feed(
        &self,
        actor: &str,
        cursor: Option<&str>,
    ) -> Result<FeedPage, FeedSourceError> {
        let limit = self.config.feed_limit.to_string();
        let mut query = vec![("actor", actor), ("limit", limit.as_str())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let response = self
            .authorized_get("app.bsky.feed.getAuthorFeed", &query)
            .await?;

        let body: AuthorFeedResponse = response
            .json()
            .await
            .map_err(|e| FeedSourceError::Decode(e.to_string()))?;

        Ok(decode_feed(body))
    }

    fn rate_limit(&self) -> Option<RateLimitStatus> {
        self.rate_limit.get()
    }
}

#[async_trait]
impl ReplyAuthorResolver for BlueskyFeedSource {
    async fn resolve_author(&self, uri: &str) -> Result<Option<String>, FeedSourceError> {
        let response = self
            .authorized_get("app.bsky.feed.getPosts", &[("uris", uri)])
            .await?;

        let body: GetPostsResponse = response
            .json()
            .await
            .map_err(|e| FeedSourceError::Decode(e.to_string()))?;

        Ok(body.posts.into_iter().next().map(|p| p.author.handle))
    }
}
