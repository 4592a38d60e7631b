//! Domain models and value objects

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use time::OffsetDateTime;

/// A network the account's posts are mirrored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Twitter,
    Mastodon,
}

impl Destination {
    pub const ALL: [Destination; 2] = [Destination::Twitter, Destination::Mastodon];

    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Twitter => "twitter",
            Destination::Mastodon => "mastodon",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audience of a mirrored post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
            Visibility::Direct => "direct",
        }
    }
}

/// Configured visibility policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VisibilitySetting {
    Public,
    Unlisted,
    Private,
    Direct,
    /// Replies are unlisted, top-level posts public
    #[default]
    Hybrid,
}

impl std::str::FromStr for VisibilitySetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "public" => Ok(VisibilitySetting::Public),
            "unlisted" => Ok(VisibilitySetting::Unlisted),
            "private" => Ok(VisibilitySetting::Private),
            "direct" => Ok(VisibilitySetting::Direct),
            "hybrid" => Ok(VisibilitySetting::Hybrid),
            other => Err(format!("invalid visibility: {}", other)),
        }
    }
}

/// How mention facets are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MentionMode {
    /// Leave the mention text untouched
    Ignore,
    /// Drop any post that mentions someone
    Skip,
    /// Remove the `@` sigil
    #[default]
    Strip,
    /// Replace the mention with a profile URL
    Url,
}

impl std::str::FromStr for MentionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ignore" => Ok(MentionMode::Ignore),
            "skip" => Ok(MentionMode::Skip),
            "strip" => Ok(MentionMode::Strip),
            "url" => Ok(MentionMode::Url),
            other => Err(format!("invalid mention mode: {}", other)),
        }
    }
}

/// Who may reply to the source post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllowedReply {
    All,
    None,
    Following,
    Mentioned,
    Unknown,
}

/// One image or video to attach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    pub alt: String,
}

/// Media attached to a post; at most one kind per post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum Media {
    #[default]
    None,
    Image(Vec<MediaItem>),
    Video(MediaItem),
}

impl Media {
    pub fn is_none(&self) -> bool {
        matches!(self, Media::None)
    }

    /// Items with their kind, in attachment order
    pub fn items(&self) -> Vec<(MediaKind, &MediaItem)> {
        match self {
            Media::None => vec![],
            Media::Image(images) => images.iter().map(|i| (MediaKind::Image, i)).collect(),
            Media::Video(video) => vec![(MediaKind::Video, video)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// Canonical, destination-agnostic description of a post to mirror
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostIntent {
    /// Content identifier of the source post
    pub source_id: String,
    /// Normalized body with facets resolved
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub is_repost: bool,
    /// Source id of the parent post, for replies
    pub reply_to_post: Option<String>,
    /// Source id of the quoted post
    pub quoted_post: Option<String>,
    /// Permalink used when the quote cannot be rendered natively
    pub quote_url: Option<String>,
    pub media: Media,
    pub visibility: Visibility,
    pub allowed_reply: AllowedReply,
    pub destinations: BTreeSet<Destination>,
}

/// Why the normalizer produced no intent for a feed entry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    #[error("authored by another account ({0})")]
    NotOwnPost(String),
    #[error("unparseable creation time '{0}'")]
    BadTimestamp(String),
    #[error("no destination is eligible")]
    NoEligibleDestination,
    #[error("contains ignored tag '{0}'")]
    IgnoredTag(String),
    #[error("contains a mention and mentions are skipped")]
    ContainsMention,
    #[error("malformed facet: {0}")]
    MalformedFacet(String),
    #[error("cannot parse quoted post: {0}")]
    UnparseableQuote(String),
    #[error("quotes {0}, which is not crossposted")]
    QuoteNotAllowed(String),
    #[error("cannot resolve the account being replied to")]
    UnresolvedReply,
    #[error("replies to another account ({0})")]
    ReplyToOther(String),
    #[error("older than the time limit")]
    OutsideTimeWindow,
}

/// Restriction on who can reply, as understood by the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplySettings {
    MentionedUsers,
    Following,
}

impl ReplySettings {
    /// Map the source reply gate onto the most faithful destination setting
    pub fn from_allowed(allowed: AllowedReply) -> Option<Self> {
        match allowed {
            AllowedReply::None | AllowedReply::Mentioned => Some(ReplySettings::MentionedUsers),
            AllowedReply::Following => Some(ReplySettings::Following),
            AllowedReply::All | AllowedReply::Unknown => None,
        }
    }
}

/// Single message sent to a destination
#[derive(Debug, Clone, PartialEq)]
pub struct PostRequest {
    pub text: String,
    pub reply_to: Option<String>,
    pub quote_of: Option<String>,
    pub media_ids: Vec<String>,
    pub reply_settings: Option<ReplySettings>,
    pub visibility: Visibility,
    /// Stable key for destinations that deduplicate retried requests
    pub idempotency_key: String,
}

/// Fully resolved post for one destination, before media upload
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundPost {
    pub source_id: String,
    pub destination: Destination,
    pub text: String,
    pub reply_to: Option<String>,
    pub quote_of: Option<String>,
    pub media: Media,
    pub reply_settings: Option<ReplySettings>,
    pub visibility: Visibility,
}

/// Result of posting one intent to one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Posted(String),
    /// A thread broke after some messages went out; the id is the last one posted
    Incomplete { native_id: String, reason: String },
    /// Nothing worth sending
    Skipped(String),
    RateLimited,
    Failed(String),
}

/// Result of deleting one mirrored post
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    RateLimited,
    Failed(String),
}

impl DeleteOutcome {
    /// Whether the cache mapping may be dropped
    pub fn is_confirmed(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted | DeleteOutcome::NotFound)
    }
}

/// Remaining calls as last reported by a network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub remaining: u64,
    pub reset_at: Option<OffsetDateTime>,
}

/// Counters for a single run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub posted: usize,
    /// Reposts mirrored as retweets or boosts
    pub reposted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub deleted: usize,
    /// The source network asked us to back off; nothing else was attempted
    pub source_rate_limited: bool,
}

impl RunSummary {
    /// Whether the run changed nothing and hit no trouble
    pub fn is_empty(&self) -> bool {
        self.posted == 0
            && self.reposted == 0
            && self.failed == 0
            && self.rate_limited == 0
            && self.deleted == 0
    }
}
