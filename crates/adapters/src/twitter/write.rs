//! X API v2 write adapter for mirrored tweets

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use skymirror_domain::{
    CrossPoster, DeleteError, Destination, MediaItem, MediaKind, PostRequest, PublishError,
    RateLimitStatus, ReplySettings,
};
use tokio::sync::OnceCell;

use super::TwitterConfig;
use crate::http::{self, RateLimitTracker};

const ALT_TEXT_LIMIT: usize = 1000;

/// Tweets on behalf of the configured user
pub struct TwitterPoster {
    pub(super) client: Client,
    pub(super) user_token: SecretString,
    pub(super) config: TwitterConfig,
    pub(super) rate_limit: RateLimitTracker,
    /// Numeric id of the token's user, looked up on first retweet
    user_id: OnceCell<String>,
}

impl TwitterPoster {
    pub fn new(user_token: SecretString, config: TwitterConfig) -> Self {
        Self {
            client: http::client(),
            user_token,
            config,
            rate_limit: RateLimitTracker::default(),
            user_id: OnceCell::new(),
        }
    }

    /// Create a disabled poster that refuses every call
    pub fn disabled() -> Self {
        Self::new(
            SecretString::new("".into()),
            TwitterConfig {
                enabled: false,
                ..TwitterConfig::default()
            },
        )
    }

    pub(super) fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    pub(super) fn bearer(&self) -> String {
        format!("Bearer {}", self.user_token.expose_secret())
    }

    async fn user_id(&self) -> Result<&str, PublishError> {
        let id = self
            .user_id
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .get(self.url("/2/users/me"))
                    .header("Authorization", self.bearer())
                    .send()
                    .await
                    .map_err(|e| PublishError::Network(e.to_string()))?;

                let me: UserResponse = self
                    .check(response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| PublishError::Api(e.to_string()))?;
                tracing::debug!(user_id = %me.data.id, "Resolved Twitter user");
                Ok::<_, PublishError>(me.data.id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Map the response to a delete-style result
    async fn check_delete(&self, response: Response) -> Result<(), DeleteError> {
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DeleteError::NotFound);
        }

        match self.check(response).await {
            Ok(_) => Ok(()),
            Err(PublishError::RateLimited) => Err(DeleteError::RateLimited),
            Err(PublishError::Auth(reason)) => Err(DeleteError::Auth(reason)),
            Err(e) => Err(DeleteError::Api(e.to_string())),
        }
    }

    /// Record rate-limit headers and map error responses
    pub(super) async fn check(&self, response: Response) -> Result<Response, PublishError> {
        let headers = response.headers();
        self.rate_limit.record(
            http::remaining(headers, "x-rate-limit-remaining"),
            http::unix_reset(headers, "x-rate-limit-reset"),
        );

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => Err(PublishError::Auth(format!("invalid user token: {}", body))),
            StatusCode::TOO_MANY_REQUESTS => Err(PublishError::RateLimited),
            StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN
                if body.to_lowercase().contains("too long") =>
            {
                Err(PublishError::TooLong(body))
            }
            _ => Err(PublishError::Api(format!("{}: {}", status, body))),
        }
    }
}

#[derive(Serialize)]
struct CreateTweetRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<TweetReply<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quote_tweet_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<TweetMedia<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_settings: Option<ReplySettings>,
}

#[derive(Serialize)]
struct TweetReply<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Serialize)]
struct TweetMedia<'a> {
    media_ids: &'a [String],
}

impl<'a> From<&'a PostRequest> for CreateTweetRequest<'a> {
    fn from(request: &'a PostRequest) -> Self {
        Self {
            text: &request.text,
            reply: request.reply_to.as_deref().map(|id| TweetReply {
                in_reply_to_tweet_id: id,
            }),
            quote_tweet_id: request.quote_of.as_deref(),
            media: (!request.media_ids.is_empty()).then_some(TweetMedia {
                media_ids: &request.media_ids,
            }),
            reply_settings: request.reply_settings,
        }
    }
}

#[derive(Deserialize)]
struct CreateTweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
}

#[derive(Deserialize)]
struct UserResponse {
    data: UserData,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
}

#[derive(Serialize)]
struct RetweetRequest<'a> {
    tweet_id: &'a str,
}

#[async_trait]
impl CrossPoster for TwitterPoster {
    fn destination(&self) -> Destination {
        Destination::Twitter
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn max_chars(&self) -> usize {
        self.config.max_chars
    }

    fn alt_text_limit(&self) -> usize {
        ALT_TEXT_LIMIT
    }

    async fn upload_media(&self, item: &MediaItem, kind: MediaKind) -> Result<String, PublishError> {
        if !self.config.enabled {
            return Err(PublishError::Api("Twitter poster is disabled".to_string()));
        }

        let media = crate::media::download(&self.client, &item.url, kind).await?;
        let media_id = match kind {
            MediaKind::Image => self.upload_image(&media).await?,
            MediaKind::Video => self.upload_video(&media).await?,
        };

        if kind == MediaKind::Image && !item.alt.is_empty() {
            self.set_alt_text(&media_id, &item.alt).await?;
        }

        Ok(media_id)
    }

    async fn create_post(&self, request: &PostRequest) -> Result<String, PublishError> {
        if !self.config.enabled {
            return Err(PublishError::Api("Twitter poster is disabled".to_string()));
        }

        let response = self
            .client
            .post(self.url("/2/tweets"))
            .header("Authorization", self.bearer())
            .json(&CreateTweetRequest::from(request))
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let tweet: CreateTweetResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| PublishError::Api(e.to_string()))?;

        tracing::debug!(tweet_id = %tweet.data.id, "Tweet created");
        Ok(tweet.data.id)
    }

    async fn delete_post(&self, native_id: &str) -> Result<(), DeleteError> {
        if !self.config.enabled {
            return Err(DeleteError::Api("Twitter poster is disabled".to_string()));
        }

        let response = self
            .client
            .delete(self.url(&format!("/2/tweets/{}", native_id)))
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| DeleteError::Api(e.to_string()))?;

        self.check_delete(response).await
    }

    async fn repost(&self, native_id: &str) -> Result<(), PublishError> {
        if !self.config.enabled {
            return Err(PublishError::Api("Twitter poster is disabled".to_string()));
        }

        let user_id = self.user_id().await?;
        let response = self
            .client
            .post(self.url(&format!("/2/users/{}/retweets", user_id)))
            .header("Authorization", self.bearer())
            .json(&RetweetRequest { tweet_id: native_id })
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        self.check(response).await?;
        tracing::debug!(tweet_id = %native_id, "Retweeted");
        Ok(())
    }

    async fn undo_repost(&self, native_id: &str) -> Result<(), DeleteError> {
        if !self.config.enabled {
            return Err(DeleteError::Api("Twitter poster is disabled".to_string()));
        }

        let user_id = self.user_id().await.map_err(|e| match e {
            PublishError::RateLimited => DeleteError::RateLimited,
            PublishError::Auth(reason) => DeleteError::Auth(reason),
            e => DeleteError::Api(e.to_string()),
        })?;
        let response = self
            .client
            .delete(self.url(&format!("/2/users/{}/retweets/{}", user_id, native_id)))
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| DeleteError::Api(e.to_string()))?;

        self.check_delete(response).await
    }

    fn rate_limit(&self) -> Option<RateLimitStatus> {
        self.rate_limit.get()
    }
}
