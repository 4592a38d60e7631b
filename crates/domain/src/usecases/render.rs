//! Rendering use case - turns an intent into destination-specific messages

use sha2::{Digest, Sha256};

use crate::{
    cache::FingerprintCache,
    model::{Destination, OutboundPost, PostIntent, ReplySettings},
};

/// Why an intent cannot be rendered for one destination this run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderSkip {
    #[error("parent post {0} was not mirrored to this destination")]
    ParentNotMirrored(String),
}

/// Renderer for one destination
pub struct Renderer {
    destination: Destination,
}

impl Renderer {
    pub fn new(destination: Destination) -> Self {
        Self { destination }
    }

    /// Resolve the intent's references against the cache.
    ///
    /// Replies thread under the mirrored parent; quotes are native on
    /// Twitter when the quoted post was mirrored, otherwise the permalink
    /// is appended to the text.
    pub fn render(
        &self,
        intent: &PostIntent,
        cache: &FingerprintCache,
    ) -> Result<OutboundPost, RenderSkip> {
        let reply_to = match intent.reply_to_post.as_deref() {
            Some(parent) => Some(
                cache
                    .native_id(parent, self.destination)
                    .ok_or_else(|| RenderSkip::ParentNotMirrored(parent.to_string()))?
                    .to_string(),
            ),
            None => None,
        };

        let native_quote = match (self.destination, intent.quoted_post.as_deref()) {
            (Destination::Twitter, Some(quoted)) => cache
                .native_id(quoted, self.destination)
                .map(str::to_string),
            _ => None,
        };

        let text = match (&native_quote, intent.quote_url.as_deref()) {
            (None, Some(url)) => append_line(&intent.text, url),
            _ => intent.text.clone(),
        };

        let reply_settings = match self.destination {
            Destination::Twitter => ReplySettings::from_allowed(intent.allowed_reply),
            Destination::Mastodon => None,
        };

        Ok(OutboundPost {
            source_id: intent.source_id.clone(),
            destination: self.destination,
            text,
            reply_to,
            quote_of: native_quote,
            media: intent.media.clone(),
            reply_settings,
            visibility: intent.visibility,
        })
    }
}

fn append_line(text: &str, line: &str) -> String {
    if text.contains(line) {
        text.to_string()
    } else if text.is_empty() {
        line.to_string()
    } else {
        format!("{}\n{}", text, line)
    }
}

/// Greedy word-wrap into chunks of at most `max_chars` characters.
///
/// A single word longer than the limit gets a chunk of its own.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current.is_empty() {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + word_len + 1 <= max_chars {
            current.push(' ');
            current.push_str(word);
            current_len += word_len + 1;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Truncate a media description, marking the cut with an ellipsis
pub fn truncate_alt_text(alt: &str, limit: usize) -> String {
    if alt.chars().count() <= limit {
        return alt.to_string();
    }
    let kept: String = alt.chars().take(limit.saturating_sub(4)).collect();
    format!("{}...", kept)
}

/// Stable key identifying one message of one mirrored post
pub fn idempotency_key(source_id: &str, destination: Destination, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(destination.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(chunk_index.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AllowedReply, Media, Visibility};
    use std::collections::BTreeSet;
    use time::macros::datetime;

    fn intent(text: &str) -> PostIntent {
        PostIntent {
            source_id: "bafychild".to_string(),
            text: text.to_string(),
            created_at: datetime!(2024-05-01 10:00 UTC),
            is_repost: false,
            reply_to_post: None,
            quoted_post: None,
            quote_url: None,
            media: Media::None,
            visibility: Visibility::Public,
            allowed_reply: AllowedReply::Following,
            destinations: BTreeSet::from([Destination::Twitter, Destination::Mastodon]),
        }
    }

    #[test]
    fn test_split_281_chars_into_two() {
        // Forty "wordNN " units fill 280 chars; one more char makes 281
        let words: Vec<String> = (0..50).map(|i| format!("word{:02}", i)).collect();
        let text = words.join(" ");
        let text = &text[..281];
        assert_eq!(text.chars().count(), 281);

        let chunks = split_text(text, 280);

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !c.is_empty() && c.chars().count() <= 280));
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_split_short_text_is_single_chunk() {
        assert_eq!(split_text("hello world", 280), vec!["hello world"]);
        assert!(split_text("   ", 280).is_empty());
    }

    #[test]
    fn test_split_long_word_stands_alone() {
        let long = "x".repeat(20);
        let text = format!("a {} b", long);

        let chunks = split_text(&text, 10);

        assert_eq!(chunks, vec!["a".to_string(), long, "b".to_string()]);
    }

    #[test]
    fn test_split_counts_chars_not_bytes() {
        let text = "é".repeat(5) + " " + &"ü".repeat(4);
        assert_eq!(split_text(&text, 10).len(), 1);
    }

    #[test]
    fn test_truncate_alt_text() {
        assert_eq!(truncate_alt_text("short", 10), "short");
        let truncated = truncate_alt_text(&"a".repeat(1200), 1000);
        assert_eq!(truncated.chars().count(), 999);
        assert!(truncated.starts_with(&"a".repeat(996)));
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_idempotency_key_is_stable_and_distinct() {
        let a = idempotency_key("cid", Destination::Mastodon, 0);
        assert_eq!(a, idempotency_key("cid", Destination::Mastodon, 0));
        assert_ne!(a, idempotency_key("cid", Destination::Mastodon, 1));
        assert_ne!(a, idempotency_key("cid", Destination::Twitter, 0));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_reply_threads_under_mirrored_parent() {
        let mut cache = FingerprintCache::new();
        cache.record_post(
            "bafyparent",
            Destination::Twitter,
            "tw-parent",
            datetime!(2024-05-01 09:00 UTC),
        );
        let mut reply = intent("More");
        reply.reply_to_post = Some("bafyparent".to_string());

        let twitter = Renderer::new(Destination::Twitter).render(&reply, &cache).unwrap();
        assert_eq!(twitter.reply_to.as_deref(), Some("tw-parent"));
        assert_eq!(twitter.reply_settings, Some(ReplySettings::Following));

        let mastodon = Renderer::new(Destination::Mastodon).render(&reply, &cache);
        assert_eq!(
            mastodon,
            Err(RenderSkip::ParentNotMirrored("bafyparent".to_string()))
        );
    }

    #[test]
    fn test_quote_rendering_per_destination() {
        let url = "https://bsky.app/profile/me.bsky.social/post/3kq";
        let mut cache = FingerprintCache::new();
        cache.record_post(
            "bafyquoted",
            Destination::Twitter,
            "tw-quoted",
            datetime!(2024-05-01 09:00 UTC),
        );
        let mut quote = intent("See this");
        quote.quoted_post = Some("bafyquoted".to_string());
        quote.quote_url = Some(url.to_string());

        let twitter = Renderer::new(Destination::Twitter).render(&quote, &cache).unwrap();
        assert_eq!(twitter.quote_of.as_deref(), Some("tw-quoted"));
        assert_eq!(twitter.text, "See this");

        let mastodon = Renderer::new(Destination::Mastodon).render(&quote, &cache).unwrap();
        assert_eq!(mastodon.quote_of, None);
        assert_eq!(mastodon.text, format!("See this\n{}", url));
        assert_eq!(mastodon.reply_settings, None);
    }
}
