//! Fingerprint cache: source post → mirrored post identifiers

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use time::OffsetDateTime;

use crate::model::Destination;

const REPOST_KEY_PREFIX: &str = "repost:";

/// Cache key remembering a repost of `source_id`
pub fn repost_key(source_id: &str) -> String {
    format!("{}{}", REPOST_KEY_PREFIX, source_id)
}

/// The reposted source id, when `key` was built by [`repost_key`]
pub fn reposted_source(key: &str) -> Option<&str> {
    key.strip_prefix(REPOST_KEY_PREFIX)
}

/// Everything remembered between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintCache {
    #[serde(default)]
    pub posts: BTreeMap<String, CacheEntry>,
    /// The source network asked us not to call it before this time
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub source_rate_limited_until: Option<OffsetDateTime>,
}

/// Mirrored identifiers for one source post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default)]
    pub destinations: BTreeMap<Destination, String>,
    /// Source timestamp of the post (repost time for reposts)
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Native id of a source post on a destination, if it was mirrored there
    pub fn native_id(&self, source_id: &str, destination: Destination) -> Option<&str> {
        self.posts
            .get(source_id)?
            .destinations
            .get(&destination)
            .map(String::as_str)
    }

    /// Record a successful post; an existing mapping is never overwritten
    pub fn record_post(
        &mut self,
        source_id: &str,
        destination: Destination,
        native_id: &str,
        timestamp: OffsetDateTime,
    ) {
        let entry = self
            .posts
            .entry(source_id.to_string())
            .or_insert_with(|| CacheEntry {
                destinations: BTreeMap::new(),
                timestamp,
            });
        entry
            .destinations
            .entry(destination)
            .or_insert_with(|| native_id.to_string());
    }

    /// Forget one destination mapping; the entry goes once nothing is left.
    /// Returns true when the whole entry was removed.
    pub fn remove_destination(&mut self, source_id: &str, destination: Destination) -> bool {
        let Some(entry) = self.posts.get_mut(source_id) else {
            return false;
        };
        entry.destinations.remove(&destination);
        if entry.destinations.is_empty() {
            self.posts.remove(source_id);
            return true;
        }
        false
    }

    /// Cached posts newer than `horizon` that the latest fetch no longer shows
    pub fn deletion_set(&self, observed: &HashSet<String>, horizon: OffsetDateTime) -> Vec<String> {
        self.posts
            .iter()
            .filter(|(source_id, entry)| {
                entry.timestamp > horizon && !observed.contains(source_id.as_str())
            })
            .map(|(source_id, _)| source_id.clone())
            .collect()
    }

    /// Drop entries older than the cutoff, returning how many went
    pub fn prune_older_than(&mut self, cutoff: OffsetDateTime) -> usize {
        let before = self.posts.len();
        self.posts.retain(|_, entry| entry.timestamp >= cutoff);
        before - self.posts.len()
    }

    pub fn is_source_rate_limited(&self, now: OffsetDateTime) -> bool {
        self.source_rate_limited_until
            .is_some_and(|until| until > now)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}
