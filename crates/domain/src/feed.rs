//! Raw author-feed entries as returned by the source network
//!
//! These types mirror the `app.bsky.feed.getAuthorFeed` response closely and
//! are deliberately lenient: optional data defaults instead of failing, and
//! unknown union members decode into catch-all variants. Turning them into
//! something postable is the normalizer's job.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Base URL used to build public permalinks to source posts and profiles
pub const PROFILE_BASE_URL: &str = "https://bsky.app/profile";

/// Label that marks an account as hidden from logged-out viewers
pub const NO_UNAUTHENTICATED_LABEL: &str = "!no-unauthenticated";

/// One entry of the author feed
#[derive(Debug, Clone, Deserialize)]
pub struct FeedViewPost {
    pub post: PostView,
    #[serde(default)]
    pub reply: Option<ReplyContext>,
    #[serde(default)]
    pub reason: Option<FeedReason>,
}

impl FeedViewPost {
    /// Whether the entry shows up in the feed because it was reposted
    pub fn is_repost(&self) -> bool {
        self.reason
            .as_ref()
            .is_some_and(|reason| reason.indexed_at.is_some())
    }

    /// Time the entry entered the feed: repost time for reposts, else creation time
    pub fn raw_timestamp(&self) -> &str {
        match self.reason.as_ref().and_then(|r| r.indexed_at.as_deref()) {
            Some(indexed_at) => indexed_at,
            None => self.post.record.created_at.as_str(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileRef,
    pub record: PostRecord,
    #[serde(default)]
    pub embed: Option<EmbedView>,
    #[serde(default)]
    pub threadgate: Option<ThreadgateView>,
    #[serde(default)]
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRef {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub val: String,
}

/// The post record as written by the author
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    pub created_at: String,
    #[serde(default)]
    pub langs: Option<Vec<String>>,
    #[serde(default)]
    pub facets: Option<Vec<Facet>>,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    #[serde(default)]
    pub embed: Option<RecordEmbed>,
}

/// Byte-addressed annotation on the record text
#[derive(Debug, Clone, Deserialize)]
pub struct Facet {
    pub index: ByteSlice,
    #[serde(default)]
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
    #[serde(other)]
    Unknown,
}

/// Hydrated embed attached to the post view
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum EmbedView {
    #[serde(rename = "app.bsky.embed.images#view")]
    Images { images: Vec<ImageView> },
    #[serde(rename = "app.bsky.embed.video#view")]
    Video {
        cid: String,
        #[serde(default)]
        alt: Option<String>,
    },
    #[serde(rename = "app.bsky.embed.external#view")]
    External { external: ExternalView },
    #[serde(rename = "app.bsky.embed.record#view")]
    Record { record: Value },
    #[serde(rename = "app.bsky.embed.recordWithMedia#view")]
    RecordWithMedia { record: Value, media: Box<EmbedView> },
    #[serde(other)]
    Unknown,
}

impl EmbedView {
    /// The quoted record payload, if this embed quotes another post
    pub fn quoted_record(&self) -> Option<&Value> {
        match self {
            EmbedView::Record { record } | EmbedView::RecordWithMedia { record, .. } => {
                Some(record)
            }
            _ => None,
        }
    }

    /// Images attached directly or nested in a record-with-media embed
    pub fn images(&self) -> Option<&[ImageView]> {
        match self {
            EmbedView::Images { images } => Some(images),
            EmbedView::RecordWithMedia { media, .. } => media.images(),
            _ => None,
        }
    }

    pub fn external(&self) -> Option<&ExternalView> {
        match self {
            EmbedView::External { external } => Some(external),
            EmbedView::RecordWithMedia { media, .. } => media.external(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageView {
    #[serde(default)]
    pub thumb: String,
    pub fullsize: String,
    #[serde(default)]
    pub alt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalView {
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Embed as stored in the record (unhydrated blob references)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum RecordEmbed {
    #[serde(rename = "app.bsky.embed.video")]
    Video {
        video: BlobRef,
        #[serde(default)]
        alt: Option<String>,
    },
    #[serde(rename = "app.bsky.embed.recordWithMedia")]
    RecordWithMedia { media: Box<RecordEmbed> },
    #[serde(other)]
    Other,
}

impl RecordEmbed {
    /// Video blob and alt text, direct or nested
    pub fn video(&self) -> Option<(&BlobRef, Option<&str>)> {
        match self {
            RecordEmbed::Video { video, alt } => Some((video, alt.as_deref())),
            RecordEmbed::RecordWithMedia { media } => media.video(),
            RecordEmbed::Other => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlobRef {
    #[serde(rename = "ref")]
    pub reference: CidLink,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CidLink {
    #[serde(rename = "$link")]
    pub link: String,
}

/// Reply reference inside the record
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyRef {
    pub parent: StrongRef,
    pub root: StrongRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// Hydrated reply context attached to a feed entry
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyContext {
    pub parent: ReplyParentView,
}

/// Parent of a reply; not-found and blocked parents carry no author
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyParentView {
    #[serde(default)]
    pub author: Option<ProfileRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedReason {
    #[serde(rename = "$type", default)]
    pub kind: String,
    #[serde(default)]
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadgateView {
    #[serde(default)]
    pub record: Option<ThreadgateRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadgateRecord {
    #[serde(default)]
    pub allow: Option<Vec<ThreadgateRule>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadgateRule {
    #[serde(rename = "$type", default)]
    pub kind: String,
}

/// Structured view of a quoted post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedPost {
    pub handle: String,
    pub cid: String,
    pub uri: String,
    /// Public permalink to the quoted post
    pub url: String,
    /// Whether logged-out viewers may see the quoted account
    pub is_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuoteParseError {
    #[error("quoted record has an unexpected shape: {0}")]
    UnexpectedShape(String),
    #[error("quoted record is missing {0}")]
    MissingField(&'static str),
}

#[derive(Deserialize)]
struct ViewRecord {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    cid: Option<String>,
    #[serde(default)]
    author: Option<ViewAuthor>,
}

#[derive(Deserialize)]
struct ViewAuthor {
    #[serde(default)]
    handle: Option<String>,
    #[serde(default)]
    labels: Vec<Label>,
}

/// The quoted record arrives either as the view record itself or wrapped in
/// a `{ "record": <view record> }` mapping (record-with-media embeds).
#[derive(Deserialize)]
#[serde(untagged)]
enum QuotedRecordShape {
    Wrapped { record: ViewRecord },
    Direct(ViewRecord),
}

/// Parse the quoted-record payload of a record or record-with-media embed
pub fn parse_quoted_record(value: &Value) -> Result<QuotedPost, QuoteParseError> {
    let shape = QuotedRecordShape::deserialize(value)
        .map_err(|e| QuoteParseError::UnexpectedShape(e.to_string()))?;

    let view = match shape {
        QuotedRecordShape::Wrapped { record } => record,
        QuotedRecordShape::Direct(record) => record,
    };

    let author = view.author.ok_or(QuoteParseError::MissingField("author"))?;
    let handle = non_empty(author.handle).ok_or(QuoteParseError::MissingField("author handle"))?;
    let cid = non_empty(view.cid).ok_or(QuoteParseError::MissingField("cid"))?;
    let uri = non_empty(view.uri).ok_or(QuoteParseError::MissingField("uri"))?;

    let is_open = !author
        .labels
        .iter()
        .any(|label| label.val == NO_UNAUTHENTICATED_LABEL);

    let url = post_url(&handle, &uri);

    Ok(QuotedPost {
        handle,
        cid,
        uri,
        url,
        is_open,
    })
}

/// Build a public permalink from an author handle and an `at://` post URI
pub fn post_url(handle: &str, uri: &str) -> String {
    let rkey = uri.rsplit('/').next().unwrap_or(uri);
    format!("{}/{}/post/{}", PROFILE_BASE_URL, handle, rkey)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
