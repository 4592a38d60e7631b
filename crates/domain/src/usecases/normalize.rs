//! Normalization use case - turns raw feed entries into post intents

use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::{
    feed::{FacetFeature, FeedViewPost, PROFILE_BASE_URL, parse_quoted_record},
    model::{Media, MediaItem, MentionMode, PostIntent, SkipReason},
    policy::{PolicyEvaluator, allowed_reply},
    ports::{FeedSourceError, ReplyAuthorResolver},
};

/// Why normalization produced no intent
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Skip(#[from] SkipReason),
    /// The source refused a lookup in a way that must stop the run
    #[error("source lookup failed: {0}")]
    Source(FeedSourceError),
}

/// Configuration for the normalizer
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Handle of the mirrored account
    pub handle: String,
    pub mentions: MentionMode,
    /// Service hosting the account's blobs (video downloads)
    pub blob_base_url: String,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            handle: String::new(),
            mentions: MentionMode::Strip,
            blob_base_url: "https://bsky.social".to_string(),
        }
    }
}

/// Converts one feed entry into a [`PostIntent`] or a skip decision
pub struct Normalizer {
    config: NormalizerConfig,
    policy: PolicyEvaluator,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig, policy: PolicyEvaluator) -> Self {
        Self { config, policy }
    }

    /// Normalize a feed entry; checks short-circuit on the first failure
    pub async fn normalize<R>(
        &self,
        entry: &FeedViewPost,
        time_limit: OffsetDateTime,
        resolver: &R,
    ) -> Result<PostIntent, NormalizeError>
    where
        R: ReplyAuthorResolver + ?Sized,
    {
        let post = &entry.post;
        let record = &post.record;
        let own_handle = self.config.handle.as_str();

        if post.author.handle != own_handle {
            return Err(SkipReason::NotOwnPost(post.author.handle.clone()).into());
        }

        let is_repost = entry.is_repost();
        let raw_created_at = entry.raw_timestamp();
        let created_at = parse_source_timestamp(raw_created_at)
            .ok_or_else(|| SkipReason::BadTimestamp(raw_created_at.to_string()))?;

        let langs = record.langs.clone().unwrap_or_default();
        let destinations = self.policy.eligible_destinations(&langs, &record.text);

        let (text, vetoed_by) = self.policy.remove_ignored_tags(&record.text);
        if let Some(tag) = vetoed_by {
            return Err(SkipReason::IgnoredTag(tag).into());
        }
        if destinations.is_empty() {
            return Err(SkipReason::NoEligibleDestination.into());
        }

        let text = strip_hashtags(&text);
        let text = self.resolve_facets(entry, text)?;
        let (mut text, quoted_post, quote_url) = self.resolve_quote(entry, text)?;

        let reply_to_post = match &record.reply {
            Some(reply) => {
                let parent_author = match entry
                    .reply
                    .as_ref()
                    .and_then(|r| r.parent.author.as_ref())
                {
                    Some(author) => Some(author.handle.clone()),
                    None => match resolver.resolve_author(&reply.parent.uri).await {
                        Ok(author) => author,
                        Err(
                            error @ (FeedSourceError::Auth(_) | FeedSourceError::RateLimited(_)),
                        ) => return Err(NormalizeError::Source(error)),
                        Err(error) => {
                            tracing::warn!(
                                source_id = %post.cid,
                                parent = %reply.parent.uri,
                                error = %error,
                                "Reply parent lookup failed"
                            );
                            None
                        }
                    },
                };

                match parent_author {
                    None => return Err(SkipReason::UnresolvedReply.into()),
                    Some(author) if author != own_handle => {
                        return Err(SkipReason::ReplyToOther(author).into());
                    }
                    Some(_) => Some(reply.parent.cid.clone()),
                }
            }
            None => None,
        };

        if created_at <= time_limit {
            return Err(SkipReason::OutsideTimeWindow.into());
        }

        let media = self.extract_media(entry);

        if let Some(external) = post.embed.as_ref().and_then(|e| e.external()) {
            if !record.text.contains(&external.uri) && !text.contains(&external.uri) {
                text.push('\n');
                text.push_str(&external.uri);
            }
        }

        let intent = PostIntent {
            source_id: post.cid.clone(),
            text,
            created_at,
            is_repost,
            visibility: self.policy.visibility_for(reply_to_post.is_some()),
            reply_to_post,
            quoted_post,
            quote_url,
            media,
            allowed_reply: allowed_reply(post.threadgate.as_ref()),
            destinations,
        };

        tracing::debug!(source_id = %intent.source_id, intent = ?intent, "Normalized post");

        Ok(intent)
    }

    /// Expand link labels, then render mentions per the configured mode.
    ///
    /// Facet offsets address the original record text, so spans are read from
    /// there and replaced wherever they appear in the working text.
    fn resolve_facets(&self, entry: &FeedViewPost, mut text: String) -> Result<String, SkipReason> {
        let record = &entry.post.record;
        let Some(facets) = record.facets.as_ref() else {
            return Ok(text);
        };

        let span = |start: usize, end: usize| -> Result<&str, SkipReason> {
            record.text.get(start..end).ok_or_else(|| {
                SkipReason::MalformedFacet(format!("byte range {}..{} is not valid", start, end))
            })
        };

        for facet in facets {
            if let Some(FacetFeature::Link { uri }) = facet.features.first() {
                let label = span(facet.index.byte_start, facet.index.byte_end)?;
                if !label.is_empty() {
                    text = text.replace(label, uri);
                }
            }
        }

        for facet in facets {
            let Some(FacetFeature::Mention { did }) = facet.features.first() else {
                continue;
            };
            let mention = span(facet.index.byte_start, facet.index.byte_end)?;
            if mention.is_empty() {
                continue;
            }
            match self.config.mentions {
                MentionMode::Skip => return Err(SkipReason::ContainsMention),
                MentionMode::Strip => {
                    text = text.replace(mention, mention.trim_start_matches('@'));
                }
                MentionMode::Url => {
                    text = text.replace(mention, &format!("{}/{}", PROFILE_BASE_URL, did));
                }
                MentionMode::Ignore => {}
            }
        }

        Ok(text)
    }

    #[allow(clippy::type_complexity)]
    fn resolve_quote(
        &self,
        entry: &FeedViewPost,
        text: String,
    ) -> Result<(String, Option<String>, Option<String>), SkipReason> {
        let Some(record) = entry.post.embed.as_ref().and_then(|e| e.quoted_record()) else {
            return Ok((text, None, None));
        };

        let quoted =
            parse_quoted_record(record).map_err(|e| SkipReason::UnparseableQuote(e.to_string()))?;

        let own_handle = self.config.handle.as_str();
        if !self
            .policy
            .should_crosspost_quote(&quoted.handle, own_handle, quoted.is_open)
        {
            return Err(SkipReason::QuoteNotAllowed(quoted.handle));
        }

        // Self-quotes are rendered natively downstream
        let text = if quoted.handle == own_handle {
            text.replace(&quoted.url, "").trim().to_string()
        } else {
            text
        };

        Ok((text, Some(quoted.cid), Some(quoted.url)))
    }

    fn extract_media(&self, entry: &FeedViewPost) -> Media {
        let post = &entry.post;

        if let Some(images) = post.embed.as_ref().and_then(|e| e.images()) {
            if !images.is_empty() {
                return Media::Image(
                    images
                        .iter()
                        .map(|image| MediaItem {
                            url: image.fullsize.clone(),
                            alt: image.alt.clone(),
                        })
                        .collect(),
                );
            }
        }

        if let Some((blob, alt)) = post.record.embed.as_ref().and_then(|e| e.video()) {
            let url = format!(
                "{}/xrpc/com.atproto.sync.getBlob?did={}&cid={}",
                self.config.blob_base_url.trim_end_matches('/'),
                post.author.did,
                blob.reference.link
            );
            return Media::Video(MediaItem {
                url,
                alt: alt.unwrap_or_default().to_string(),
            });
        }

        Media::None
    }
}

/// Parse a source timestamp, ignoring sub-second and timezone suffixes
pub fn parse_source_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let base = raw.split('.').next().unwrap_or(raw);
    let base = base.get(..19).unwrap_or(base);
    PrimitiveDateTime::parse(
        base,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    )
    .ok()
    .map(PrimitiveDateTime::assume_utc)
}

/// Remove hashtag words, keeping line structure
pub fn strip_hashtags(text: &str) -> String {
    text.lines()
        .map(|line| {
            line.split_whitespace()
                .filter(|word| !word.starts_with('#'))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AllowedReply, Destination, Visibility, VisibilitySetting};
    use crate::policy::{DestinationRules, PolicyConfig};
    use crate::ports::FeedSourceError;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use time::Duration;
    use time::macros::datetime;

    const ME: &str = "me.bsky.social";

    struct FakeResolver {
        handle: Option<String>,
    }

    #[async_trait]
    impl ReplyAuthorResolver for FakeResolver {
        async fn resolve_author(&self, _uri: &str) -> Result<Option<String>, FeedSourceError> {
            Ok(self.handle.clone())
        }
    }

    /// Resolver whose lookups always fail with the given error
    struct FailingResolver(fn() -> FeedSourceError);

    #[async_trait]
    impl ReplyAuthorResolver for FailingResolver {
        async fn resolve_author(&self, _uri: &str) -> Result<Option<String>, FeedSourceError> {
            Err((self.0)())
        }
    }

    fn skip(reason: SkipReason) -> Result<PostIntent, NormalizeError> {
        Err(NormalizeError::Skip(reason))
    }

    fn no_resolver() -> FakeResolver {
        FakeResolver { handle: None }
    }

    fn enabled(ignore_tags: &[&str]) -> DestinationRules {
        DestinationRules {
            enabled: true,
            langs: vec![],
            ignore_tags: ignore_tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn normalizer(mentions: MentionMode) -> Normalizer {
        Normalizer::new(
            NormalizerConfig {
                handle: ME.to_string(),
                mentions,
                ..Default::default()
            },
            PolicyEvaluator::new(PolicyConfig {
                twitter: enabled(&["#nsfw"]),
                mastodon: enabled(&[]),
                quote_posts: true,
                visibility: VisibilitySetting::Hybrid,
            }),
        )
    }

    fn time_limit() -> OffsetDateTime {
        datetime!(2024-05-01 00:00 UTC)
    }

    fn raw_entry(text: &str) -> Value {
        json!({
            "post": {
                "uri": "at://did:plc:me/app.bsky.feed.post/3kself",
                "cid": "bafyself",
                "author": {"did": "did:plc:me", "handle": ME},
                "record": {
                    "text": text,
                    "createdAt": "2024-05-01T10:00:00.123Z",
                    "langs": ["en"]
                },
                "indexedAt": "2024-05-01T10:00:01.000Z"
            }
        })
    }

    fn entry(value: Value) -> FeedViewPost {
        serde_json::from_value(value).expect("valid feed entry")
    }

    /// Byte range of `needle` in `text`
    fn range(text: &str, needle: &str) -> (usize, usize) {
        let start = text.find(needle).unwrap();
        (start, start + needle.len())
    }

    fn with_facet(mut value: Value, needle: &str, feature: Value) -> Value {
        let text = value["post"]["record"]["text"].as_str().unwrap().to_string();
        let (start, end) = range(&text, needle);
        let facets = value["post"]["record"]
            .as_object_mut()
            .unwrap()
            .entry("facets")
            .or_insert_with(|| json!([]));
        facets.as_array_mut().unwrap().push(json!({
            "index": {"byteStart": start, "byteEnd": end},
            "features": [feature]
        }));
        value
    }

    fn mention(value: Value, needle: &str) -> Value {
        with_facet(
            value,
            needle,
            json!({"$type": "app.bsky.richtext.facet#mention", "did": "did:plc:alice"}),
        )
    }

    #[tokio::test]
    async fn test_plain_post_becomes_intent() {
        let n = normalizer(MentionMode::Strip);
        let intent = n
            .normalize(&entry(raw_entry("Hello world")), time_limit(), &no_resolver())
            .await
            .unwrap();

        assert_eq!(intent.source_id, "bafyself");
        assert_eq!(intent.text, "Hello world");
        assert_eq!(intent.created_at, datetime!(2024-05-01 10:00 UTC));
        assert!(!intent.is_repost);
        assert_eq!(intent.visibility, Visibility::Public);
        assert_eq!(intent.allowed_reply, AllowedReply::All);
        assert_eq!(intent.media, Media::None);
        assert_eq!(
            intent.destinations,
            [Destination::Twitter, Destination::Mastodon].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn test_third_party_post_is_skipped() {
        let mut value = raw_entry("Not mine");
        value["post"]["author"]["handle"] = json!("alice.bsky.social");

        let result = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await;

        assert_eq!(
            result,
            skip(SkipReason::NotOwnPost("alice.bsky.social".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_is_skipped() {
        let mut value = raw_entry("Hello");
        value["post"]["record"]["createdAt"] = json!("yesterday");

        let result = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await;

        assert!(matches!(
            result,
            Err(NormalizeError::Skip(SkipReason::BadTimestamp(_)))
        ));
    }

    #[tokio::test]
    async fn test_repost_uses_repost_time() {
        let mut value = raw_entry("Hello again");
        value["post"]["record"]["createdAt"] = json!("2024-01-01T00:00:00Z");
        value["reason"] = json!({
            "$type": "app.bsky.feed.defs#reasonRepost",
            "indexedAt": "2024-05-01T11:30:00.000Z"
        });

        let intent = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await
            .unwrap();

        assert!(intent.is_repost);
        assert_eq!(intent.created_at, datetime!(2024-05-01 11:30 UTC));
    }

    #[tokio::test]
    async fn test_old_post_is_outside_window() {
        let mut value = raw_entry("Old news");
        value["post"]["record"]["createdAt"] = json!("2024-04-01T00:00:00Z");

        let result = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await;

        assert_eq!(result, skip(SkipReason::OutsideTimeWindow));
    }

    #[tokio::test]
    async fn test_ignore_tag_vetoes_every_destination() {
        let text = "Hello @alice.bsky.social check this out #nsfw";
        let value = mention(raw_entry(text), "@alice.bsky.social");

        let result = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await;

        assert_eq!(result, skip(SkipReason::IgnoredTag("#nsfw".to_string())));
    }

    #[tokio::test]
    async fn test_hashtags_are_stripped() {
        let intent = normalizer(MentionMode::Strip)
            .normalize(
                &entry(raw_entry("Sunset #photo\nover the sea #nature")),
                time_limit(),
                &no_resolver(),
            )
            .await
            .unwrap();

        assert_eq!(intent.text, "Sunset\nover the sea");
    }

    #[tokio::test]
    async fn test_mention_strip_removes_sigil() {
        let value = mention(raw_entry("Hi @alice.bsky.social!"), "@alice.bsky.social");

        let intent = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await
            .unwrap();

        assert_eq!(intent.text, "Hi alice.bsky.social!");
    }

    #[tokio::test]
    async fn test_mention_url_uses_profile_link() {
        let value = mention(raw_entry("Hi @alice.bsky.social!"), "@alice.bsky.social");

        let intent = normalizer(MentionMode::Url)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await
            .unwrap();

        assert_eq!(intent.text, "Hi https://bsky.app/profile/did:plc:alice!");
        assert!(!intent.text.contains('@'));
    }

    #[tokio::test]
    async fn test_mention_skip_drops_post() {
        let value = mention(raw_entry("Hi @alice.bsky.social!"), "@alice.bsky.social");

        let result = normalizer(MentionMode::Skip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await;

        assert_eq!(result, skip(SkipReason::ContainsMention));
    }

    #[tokio::test]
    async fn test_link_label_is_expanded() {
        let value = with_facet(
            raw_entry("Read example.com/articl... now"),
            "example.com/articl...",
            json!({
                "$type": "app.bsky.richtext.facet#link",
                "uri": "https://example.com/article/42"
            }),
        );

        let intent = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await
            .unwrap();

        assert_eq!(intent.text, "Read https://example.com/article/42 now");
    }

    #[tokio::test]
    async fn test_link_expansion_survives_earlier_hashtag() {
        // Offsets point into the original text, before hashtag stripping
        let value = with_facet(
            raw_entry("#news Read example.com/a..."),
            "example.com/a...",
            json!({"$type": "app.bsky.richtext.facet#link", "uri": "https://example.com/abc"}),
        );

        let intent = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await
            .unwrap();

        assert_eq!(intent.text, "Read https://example.com/abc");
    }

    #[tokio::test]
    async fn test_malformed_facet_skips_post() {
        let mut value = raw_entry("short");
        value["post"]["record"]["facets"] = json!([{
            "index": {"byteStart": 2, "byteEnd": 99},
            "features": [{"$type": "app.bsky.richtext.facet#link", "uri": "https://x"}]
        }]);

        let result = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await;

        assert!(matches!(
            result,
            Err(NormalizeError::Skip(SkipReason::MalformedFacet(_)))
        ));
    }

    fn quoting(mut value: Value, handle: &str, labels: Value) -> Value {
        value["post"]["embed"] = json!({
            "$type": "app.bsky.embed.record#view",
            "record": {
                "$type": "app.bsky.embed.record#viewRecord",
                "uri": "at://did:plc:q/app.bsky.feed.post/3kquoted",
                "cid": "bafyquoted",
                "author": {"did": "did:plc:q", "handle": handle, "labels": labels}
            }
        });
        value
    }

    #[tokio::test]
    async fn test_self_quote_removes_permalink() {
        let text = "See this https://bsky.app/profile/me.bsky.social/post/3kquoted";
        let value = quoting(raw_entry(text), ME, json!([]));

        let intent = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await
            .unwrap();

        assert_eq!(intent.text, "See this");
        assert_eq!(intent.quoted_post.as_deref(), Some("bafyquoted"));
        assert_eq!(
            intent.quote_url.as_deref(),
            Some("https://bsky.app/profile/me.bsky.social/post/3kquoted")
        );
    }

    #[tokio::test]
    async fn test_quote_of_closed_account_is_skipped() {
        let value = quoting(
            raw_entry("Look"),
            "private.bsky.social",
            json!([{"val": "!no-unauthenticated"}]),
        );

        let result = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await;

        assert_eq!(
            result,
            skip(SkipReason::QuoteNotAllowed("private.bsky.social".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unparseable_quote_is_skipped() {
        let mut value = raw_entry("Look");
        value["post"]["embed"] = json!({
            "$type": "app.bsky.embed.record#view",
            "record": {"$type": "app.bsky.embed.record#viewBlocked", "uri": "at://x"}
        });

        let result = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await;

        assert!(matches!(
            result,
            Err(NormalizeError::Skip(SkipReason::UnparseableQuote(_)))
        ));
    }

    fn replying(mut value: Value, parent_author: Option<&str>) -> Value {
        value["post"]["record"]["reply"] = json!({
            "parent": {"uri": "at://did:plc:x/app.bsky.feed.post/3kparent", "cid": "bafyparent"},
            "root": {"uri": "at://did:plc:x/app.bsky.feed.post/3kroot", "cid": "bafyroot"}
        });
        if let Some(handle) = parent_author {
            value["reply"] = json!({
                "parent": {"author": {"did": "did:plc:x", "handle": handle}}
            });
        }
        value
    }

    #[tokio::test]
    async fn test_reply_to_self_is_unlisted() {
        let value = replying(raw_entry("More thoughts"), Some(ME));

        let intent = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await
            .unwrap();

        assert_eq!(intent.reply_to_post.as_deref(), Some("bafyparent"));
        assert_eq!(intent.visibility, Visibility::Unlisted);
    }

    #[tokio::test]
    async fn test_reply_to_other_is_skipped() {
        let value = replying(raw_entry("@bob nice"), Some("bob.bsky.social"));

        let result = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await;

        assert_eq!(
            result,
            skip(SkipReason::ReplyToOther("bob.bsky.social".to_string()))
        );
    }

    #[tokio::test]
    async fn test_reply_author_falls_back_to_resolver() {
        let value = replying(raw_entry("Continued"), None);

        let resolved = FakeResolver {
            handle: Some(ME.to_string()),
        };
        let intent = normalizer(MentionMode::Strip)
            .normalize(&entry(value.clone()), time_limit(), &resolved)
            .await
            .unwrap();
        assert_eq!(intent.reply_to_post.as_deref(), Some("bafyparent"));

        let result = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await;
        assert_eq!(result, skip(SkipReason::UnresolvedReply));
    }

    #[tokio::test]
    async fn test_reply_lookup_refusals_are_not_skips() {
        let value = replying(raw_entry("Continued"), None);
        let n = normalizer(MentionMode::Strip);

        let limited = FailingResolver(|| FeedSourceError::RateLimited(None));
        let result = n.normalize(&entry(value.clone()), time_limit(), &limited).await;
        assert_eq!(
            result,
            Err(NormalizeError::Source(FeedSourceError::RateLimited(None)))
        );

        let denied = FailingResolver(|| FeedSourceError::Auth("expired".to_string()));
        let result = n.normalize(&entry(value.clone()), time_limit(), &denied).await;
        assert!(matches!(
            result,
            Err(NormalizeError::Source(FeedSourceError::Auth(_)))
        ));

        let broken = FailingResolver(|| FeedSourceError::Network("reset".to_string()));
        let result = n.normalize(&entry(value), time_limit(), &broken).await;
        assert_eq!(result, skip(SkipReason::UnresolvedReply));
    }

    #[tokio::test]
    async fn test_images_and_external_link() {
        let mut value = raw_entry("Pictures");
        value["post"]["embed"] = json!({
            "$type": "app.bsky.embed.images#view",
            "images": [
                {"thumb": "t1", "fullsize": "https://cdn/1.jpg", "alt": "one"},
                {"thumb": "t2", "fullsize": "https://cdn/2.jpg", "alt": ""}
            ]
        });

        let intent = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await
            .unwrap();

        match intent.media {
            Media::Image(images) => {
                assert_eq!(images.len(), 2);
                assert_eq!(images[0].url, "https://cdn/1.jpg");
                assert_eq!(images[0].alt, "one");
            }
            other => panic!("expected images, got {:?}", other),
        }

        let mut value = raw_entry("Worth a read");
        value["post"]["embed"] = json!({
            "$type": "app.bsky.embed.external#view",
            "external": {"uri": "https://example.com/post", "title": "t", "description": "d"}
        });
        let intent = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await
            .unwrap();
        assert_eq!(intent.text, "Worth a read\nhttps://example.com/post");
    }

    #[tokio::test]
    async fn test_video_descriptor_from_blob() {
        let mut value = raw_entry("Clip");
        value["post"]["record"]["embed"] = json!({
            "$type": "app.bsky.embed.video",
            "video": {"$type": "blob", "ref": {"$link": "bafyvideo"}, "mimeType": "video/mp4"},
            "alt": "a clip"
        });

        let intent = normalizer(MentionMode::Strip)
            .normalize(&entry(value), time_limit(), &no_resolver())
            .await
            .unwrap();

        assert_eq!(
            intent.media,
            Media::Video(MediaItem {
                url: "https://bsky.social/xrpc/com.atproto.sync.getBlob?did=did:plc:me&cid=bafyvideo"
                    .to_string(),
                alt: "a clip".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_language_excluded_everywhere_is_skipped() {
        let n = Normalizer::new(
            NormalizerConfig {
                handle: ME.to_string(),
                ..Default::default()
            },
            PolicyEvaluator::new(PolicyConfig {
                twitter: DestinationRules {
                    enabled: true,
                    langs: vec!["fr".to_string()],
                    ignore_tags: vec![],
                },
                ..Default::default()
            }),
        );

        let result = n
            .normalize(&entry(raw_entry("Hello")), time_limit(), &no_resolver())
            .await;

        assert_eq!(result, skip(SkipReason::NoEligibleDestination));
    }

    #[test]
    fn test_parse_source_timestamp_variants() {
        let expected = datetime!(2024-05-01 10:00 UTC);
        assert_eq!(parse_source_timestamp("2024-05-01T10:00:00.123Z"), Some(expected));
        assert_eq!(parse_source_timestamp("2024-05-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_source_timestamp("2024-05-01T10:00:00+02:00"), Some(expected));
        assert_eq!(parse_source_timestamp("not a date"), None);
        assert!(parse_source_timestamp("2024-05-01T10:00:00Z").unwrap() > expected - Duration::seconds(1));
    }
}
