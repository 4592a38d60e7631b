//! Bluesky (AT Protocol) source adapters

mod read;
mod session;

pub(crate) use read::decode_feed_document;
pub use read::{BlueskyConfig, BlueskyFeedSource};
pub use session::{Session, SessionFile};
