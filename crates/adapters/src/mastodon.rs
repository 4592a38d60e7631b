//! Mastodon REST destination adapter

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use skymirror_domain::{
    CrossPoster, DeleteError, Destination, MediaItem, MediaKind, PostRequest, PublishError,
    RateLimitStatus,
};
use std::time::Duration;

use crate::http::{self, RateLimitTracker};

const ALT_TEXT_LIMIT: usize = 1500;
const MAX_MEDIA_POLLS: usize = 20;
const MEDIA_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Mastodon poster settings
#[derive(Debug, Clone)]
pub struct MastodonConfig {
    /// Base URL of the account's instance, e.g. `https://mastodon.social`
    pub instance_url: String,
    /// Account name on the instance, used for permalinks
    pub handle: String,
    pub max_chars: usize,
    pub enabled: bool,
}

impl Default for MastodonConfig {
    fn default() -> Self {
        Self {
            instance_url: String::new(),
            handle: String::new(),
            max_chars: 500,
            enabled: true,
        }
    }
}

/// Posts statuses with an application access token
pub struct MastodonPoster {
    client: Client,
    access_token: SecretString,
    config: MastodonConfig,
    rate_limit: RateLimitTracker,
    media_poll_interval: Duration,
}

impl MastodonPoster {
    pub fn new(access_token: SecretString, config: MastodonConfig) -> Self {
        Self {
            client: http::client(),
            access_token,
            config,
            rate_limit: RateLimitTracker::default(),
            media_poll_interval: MEDIA_POLL_INTERVAL,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.instance_url.trim_end_matches('/'), path)
    }

    fn permalink(&self, status_id: &str) -> String {
        format!(
            "{}/@{}/{}",
            self.config.instance_url.trim_end_matches('/'),
            self.config.handle.trim_start_matches('@'),
            status_id
        )
    }

    /// Record rate-limit headers and map error responses
    async fn check(&self, response: Response) -> Result<Response, PublishError> {
        let headers = response.headers();
        self.rate_limit.record(
            http::remaining(headers, "x-ratelimit-remaining"),
            http::rfc3339_reset(headers, "x-ratelimit-reset"),
        );

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<MastodonError>(&body)
            .map(|e| e.error)
            .unwrap_or(body);

        match status {
            StatusCode::UNAUTHORIZED => Err(PublishError::Auth(message)),
            StatusCode::TOO_MANY_REQUESTS => Err(PublishError::RateLimited),
            StatusCode::UNPROCESSABLE_ENTITY
                if message.to_lowercase().contains("character limit") =>
            {
                Err(PublishError::TooLong(message))
            }
            _ => Err(PublishError::Api(format!("{}: {}", status, message))),
        }
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

    /// Wait until an asynchronously processed attachment has a URL
    async fn wait_for_media(&self, media_id: &str) -> Result<(), PublishError> {
        for _ in 0..MAX_MEDIA_POLLS {
            tokio::time::sleep(self.media_poll_interval).await;

            let response = self
                .client
                .get(self.url(&format!("/api/v1/media/{}", media_id)))
                .bearer_auth(self.access_token.expose_secret())
                .send()
                .await
                .map_err(|e| PublishError::Network(e.to_string()))?;

            if response.status() == StatusCode::PARTIAL_CONTENT {
                continue;
            }

            let attachment: Attachment = self
                .check(response)
                .await?
                .json()
                .await
                .map_err(|e| PublishError::Media(e.to_string()))?;
            if attachment.url.is_some() {
                return Ok(());
            }
        }

        Err(PublishError::Media(format!(
            "attachment {} still processing after {} checks",
            media_id, MAX_MEDIA_POLLS
        )))
    }
}

#[derive(Deserialize)]
struct MastodonError {
    error: String,
}

#[derive(Serialize)]
struct StatusRequest<'a> {
    status: &'a str,
    visibility: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_reply_to_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_ids: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct StatusResponse {
    id: String,
}

#[derive(Deserialize)]
struct Attachment {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[async_trait]
impl CrossPoster for MastodonPoster {
    fn destination(&self) -> Destination {
        Destination::Mastodon
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
            return Err(PublishError::Api("Mastodon poster is disabled".to_string()));
        }

        let media = crate::media::download(&self.client, &item.url, kind).await?;
        let file_name = media.file_name();
        let part = Part::bytes(media.bytes)
            .file_name(file_name)
            .mime_str(&media.mime_type)
            .map_err(|e| PublishError::Media(e.to_string()))?;

        let mut form = Form::new().part("file", part);
        if !item.alt.is_empty() {
            form = form.text("description", item.alt.clone());
        }

        let response = self
            .client
            .post(self.url("/api/v2/media"))
            .bearer_auth(self.access_token.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let processing = response.status() == StatusCode::ACCEPTED;
        let attachment: Attachment = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| PublishError::Media(e.to_string()))?;

        if processing || attachment.url.is_none() {
            tracing::debug!(media_id = %attachment.id, "Attachment processing");
            self.wait_for_media(&attachment.id).await?;
        }

        Ok(attachment.id)
    }

    async fn create_post(&self, request: &PostRequest) -> Result<String, PublishError> {
        if !self.config.enabled {
            return Err(PublishError::Api("Mastodon poster is disabled".to_string()));
        }

        let body = StatusRequest {
            status: &request.text,
            visibility: request.visibility.as_str(),
            in_reply_to_id: request.reply_to.as_deref(),
            media_ids: (!request.media_ids.is_empty()).then_some(request.media_ids.as_slice()),
        };

        let response = self
            .client
            .post(self.url("/api/v1/statuses"))
            .bearer_auth(self.access_token.expose_secret())
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let status: StatusResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| PublishError::Api(e.to_string()))?;

        tracing::debug!(status_id = %status.id, url = %self.permalink(&status.id), "Status created");
        Ok(status.id)
    }

    async fn delete_post(&self, native_id: &str) -> Result<(), DeleteError> {
        if !self.config.enabled {
            return Err(DeleteError::Api("Mastodon poster is disabled".to_string()));
        }

        let response = self
            .client
            .delete(self.url(&format!("/api/v1/statuses/{}", native_id)))
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| DeleteError::Api(e.to_string()))?;

        self.check_delete(response).await
    }

    async fn repost(&self, native_id: &str) -> Result<(), PublishError> {
        if !self.config.enabled {
            return Err(PublishError::Api("Mastodon poster is disabled".to_string()));
        }

        let response = self
            .client
            .post(self.url(&format!("/api/v1/statuses/{}/reblog", native_id)))
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        self.check(response).await?;
        tracing::debug!(status_id = %native_id, "Status boosted");
        Ok(())
    }

    async fn undo_repost(&self, native_id: &str) -> Result<(), DeleteError> {
        if !self.config.enabled {
            return Err(DeleteError::Api("Mastodon poster is disabled".to_string()));
        }

        let response = self
            .client
            .post(self.url(&format!("/api/v1/statuses/{}/unreblog", native_id)))
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| DeleteError::Api(e.to_string()))?;

        self.check_delete(response).await
    }

    fn rate_limit(&self) -> Option<RateLimitStatus> {
        self.rate_limit.get()
    }
}
