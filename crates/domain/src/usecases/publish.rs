//! Publish use case - posts one rendered message with bounded retries

use crate::{
    model::{DeleteOutcome, Media, MediaItem, OutboundPost, PostOutcome, PostRequest},
    ports::{CrossPoster, DeleteError, PublishError},
    usecases::render::{idempotency_key, split_text, truncate_alt_text},
};

/// Configuration for the publish use case
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Extra attempts after the first one fails
    pub max_retries: u32,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Result of creating one message, retries included
enum Attempt {
    Created(String),
    RateLimited,
    TooLong,
    Failed(String),
}

/// Use case for posting to and deleting from one destination
pub struct PublishUseCase<'a, P: CrossPoster + ?Sized> {
    poster: &'a P,
    config: PublishConfig,
}

impl<'a, P: CrossPoster + ?Sized> PublishUseCase<'a, P> {
    pub fn new(poster: &'a P, config: PublishConfig) -> Self {
        Self { poster, config }
    }

    /// Post one message, falling back to a thread when it is too long.
    ///
    /// Only authentication failures are returned as errors; everything else
    /// is reported through the outcome.
    pub async fn publish(&self, post: &OutboundPost) -> Result<PostOutcome, PublishError> {
        if post.text.trim().is_empty() && post.media.is_none() {
            return Ok(PostOutcome::Skipped("no text and no media".to_string()));
        }

        let media_ids = match self.upload_media(&post.media).await {
            Ok(ids) => ids,
            Err(PublishError::RateLimited) => return Ok(PostOutcome::RateLimited),
            Err(e @ PublishError::Auth(_)) => return Err(e),
            Err(e) => return Ok(PostOutcome::Failed(format!("media upload failed: {}", e))),
        };

        let request = PostRequest {
            text: post.text.clone(),
            reply_to: post.reply_to.clone(),
            quote_of: post.quote_of.clone(),
            media_ids,
            reply_settings: post.reply_settings,
            visibility: post.visibility,
            idempotency_key: idempotency_key(&post.source_id, post.destination, 0),
        };

        match self.create_with_retry(post, &request).await? {
            Attempt::Created(id) => Ok(PostOutcome::Posted(id)),
            Attempt::RateLimited => Ok(PostOutcome::RateLimited),
            Attempt::Failed(reason) => Ok(PostOutcome::Failed(reason)),
            Attempt::TooLong => {
                tracing::info!(
                    source_id = %post.source_id,
                    destination = %post.destination,
                    "Message too long, posting as thread"
                );
                self.publish_thread(post, request).await
            }
        }
    }

    /// Post the text as a chain of replies; the last message's id is canonical.
    ///
    /// A thread that breaks after its first message is reported as
    /// incomplete so the messages already out are not posted again.
    async fn publish_thread(
        &self,
        post: &OutboundPost,
        first: PostRequest,
    ) -> Result<PostOutcome, PublishError> {
        let chunks = split_text(&post.text, self.poster.max_chars());
        if chunks.is_empty() {
            return Ok(PostOutcome::Failed("nothing to post".to_string()));
        }

        let total = chunks.len();
        let mut posted: Vec<String> = Vec::with_capacity(total);

        for (index, chunk) in chunks.into_iter().enumerate() {
            let request = match posted.last() {
                None => PostRequest {
                    text: chunk,
                    ..first.clone()
                },
                Some(previous) => PostRequest {
                    text: chunk,
                    reply_to: Some(previous.clone()),
                    quote_of: None,
                    media_ids: vec![],
                    reply_settings: None,
                    visibility: first.visibility,
                    idempotency_key: idempotency_key(&post.source_id, post.destination, index),
                },
            };

            let outcome = match self.create_with_retry(post, &request).await? {
                Attempt::Created(id) => {
                    posted.push(id);
                    continue;
                }
                Attempt::RateLimited if posted.is_empty() => return Ok(PostOutcome::RateLimited),
                Attempt::RateLimited => "rate limited".to_string(),
                Attempt::TooLong => "chunk still too long".to_string(),
                Attempt::Failed(reason) => reason,
            };

            let reason = format!(
                "thread stopped at message {} of {}: {}",
                index + 1,
                total,
                outcome
            );
            return Ok(match posted.pop() {
                Some(native_id) => PostOutcome::Incomplete { native_id, reason },
                None => PostOutcome::Failed(reason),
            });
        }

        match posted.pop() {
            Some(last) => Ok(PostOutcome::Posted(last)),
            None => Ok(PostOutcome::Failed("nothing to post".to_string())),
        }
    }

    async fn create_with_retry(
        &self,
        post: &OutboundPost,
        request: &PostRequest,
    ) -> Result<Attempt, PublishError> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.poster.create_post(request).await {
                Ok(id) => return Ok(Attempt::Created(id)),
                Err(PublishError::RateLimited) => {
                    tracing::warn!(
                        source_id = %post.source_id,
                        destination = %post.destination,
                        "Rate limited, skipping"
                    );
                    return Ok(Attempt::RateLimited);
                }
                Err(e @ PublishError::Auth(_)) => return Err(e),
                Err(PublishError::TooLong(_)) => return Ok(Attempt::TooLong),
                Err(e) => {
                    tracing::warn!(
                        source_id = %post.source_id,
                        destination = %post.destination,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Post attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Ok(Attempt::Failed(last_error))
    }

    async fn upload_media(&self, media: &Media) -> Result<Vec<String>, PublishError> {
        let limit = self.poster.alt_text_limit();
        let mut ids = Vec::new();
        for (kind, item) in media.items() {
            let item = MediaItem {
                url: item.url.clone(),
                alt: truncate_alt_text(&item.alt, limit),
            };
            ids.push(self.poster.upload_media(&item, kind).await?);
        }
        Ok(ids)
    }

    /// Share an already mirrored message with the same retry rules as posting
    pub async fn repost(&self, native_id: &str) -> Result<PostOutcome, PublishError> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.poster.repost(native_id).await {
                Ok(()) => return Ok(PostOutcome::Posted(native_id.to_string())),
                Err(PublishError::RateLimited) => return Ok(PostOutcome::RateLimited),
                Err(e @ PublishError::Auth(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        native_id = %native_id,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Repost attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Ok(PostOutcome::Failed(last_error))
    }

    /// Delete one mirrored message; a missing message counts as deleted
    pub async fn delete(&self, native_id: &str) -> Result<DeleteOutcome, DeleteError> {
        delete_outcome(self.poster.delete_post(native_id).await)
    }

    /// Withdraw a repost; a repost that is already gone counts as withdrawn
    pub async fn undo_repost(&self, native_id: &str) -> Result<DeleteOutcome, DeleteError> {
        delete_outcome(self.poster.undo_repost(native_id).await)
    }
}

fn delete_outcome(result: Result<(), DeleteError>) -> Result<DeleteOutcome, DeleteError> {
    match result {
        Ok(()) => Ok(DeleteOutcome::Deleted),
        Err(DeleteError::NotFound) => Ok(DeleteOutcome::NotFound),
        Err(DeleteError::RateLimited) => Ok(DeleteOutcome::RateLimited),
        Err(e @ DeleteError::Auth(_)) => Err(e),
        Err(DeleteError::Api(reason)) => Ok(DeleteOutcome::Failed(reason)),
    }
}
