//! Per-destination eligibility rules

use std::collections::BTreeSet;

use crate::feed::ThreadgateView;
use crate::model::{AllowedReply, Destination, Visibility, VisibilitySetting};

const FOLLOWING_RULE: &str = "app.bsky.feed.threadgate#followingRule";
const MENTION_RULE: &str = "app.bsky.feed.threadgate#mentionRule";

/// Rules for a single destination
#[derive(Debug, Clone, Default)]
pub struct DestinationRules {
    /// Destination is switched on globally
    pub enabled: bool,
    /// Languages to mirror; empty means all
    pub langs: Vec<String>,
    /// Posts containing any of these are never mirrored
    pub ignore_tags: Vec<String>,
}

/// Policy configuration
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    pub twitter: DestinationRules,
    pub mastodon: DestinationRules,
    /// Mirror quotes of other accounts' posts
    pub quote_posts: bool,
    pub visibility: VisibilitySetting,
}

/// Outcome of checking one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Disabled,
    LanguageExcluded,
    IgnoredTag(String),
}

/// Stateless evaluator for destination rules
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    config: PolicyConfig,
}

impl PolicyEvaluator {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    fn rules(&self, destination: Destination) -> &DestinationRules {
        match destination {
            Destination::Twitter => &self.config.twitter,
            Destination::Mastodon => &self.config.mastodon,
        }
    }

    /// Check one destination against the post's languages and text
    pub fn evaluate(&self, destination: Destination, langs: &[String], text: &str) -> Eligibility {
        let rules = self.rules(destination);
        if !rules.enabled {
            return Eligibility::Disabled;
        }
        if !language_allowed(&rules.langs, langs) {
            return Eligibility::LanguageExcluded;
        }
        if let Some(tag) = rules.ignore_tags.iter().find(|tag| text.contains(tag.as_str())) {
            return Eligibility::IgnoredTag(tag.clone());
        }
        Eligibility::Eligible
    }

    /// Destinations for which the post passes every rule
    pub fn eligible_destinations(&self, langs: &[String], text: &str) -> BTreeSet<Destination> {
        Destination::ALL
            .into_iter()
            .filter(|d| self.evaluate(*d, langs, text) == Eligibility::Eligible)
            .collect()
    }

    /// Remove every ignore tag of every destination from the text.
    ///
    /// Returns the cleaned text and the first tag found. A found tag vetoes
    /// the post for all destinations, not only the one that listed it.
    pub fn remove_ignored_tags(&self, text: &str) -> (String, Option<String>) {
        let mut found = None;
        let mut cleaned = text.to_string();
        for tag in self
            .config
            .twitter
            .ignore_tags
            .iter()
            .chain(self.config.mastodon.ignore_tags.iter())
            .filter(|tag| !tag.is_empty())
        {
            if cleaned.contains(tag.as_str()) {
                found.get_or_insert_with(|| tag.clone());
                cleaned = cleaned.replace(tag.as_str(), "").trim().to_string();
            }
        }
        (cleaned, found)
    }

    /// Quotes of the account's own posts are always mirrored; quotes of
    /// others only when enabled and the quoted account is publicly visible.
    pub fn should_crosspost_quote(&self, quoted_handle: &str, own_handle: &str, is_open: bool) -> bool {
        quoted_handle == own_handle || (self.config.quote_posts && is_open)
    }

    pub fn visibility_for(&self, is_reply: bool) -> Visibility {
        match self.config.visibility {
            VisibilitySetting::Hybrid if is_reply => Visibility::Unlisted,
            VisibilitySetting::Hybrid => Visibility::Public,
            VisibilitySetting::Public => Visibility::Public,
            VisibilitySetting::Unlisted => Visibility::Unlisted,
            VisibilitySetting::Private => Visibility::Private,
            VisibilitySetting::Direct => Visibility::Direct,
        }
    }
}

/// Reply restriction derived from the first threadgate rule
pub fn allowed_reply(threadgate: Option<&ThreadgateView>) -> AllowedReply {
    let Some(threadgate) = threadgate else {
        return AllowedReply::All;
    };
    // A gate without an allow list only hides replies
    let Some(allow) = threadgate.record.as_ref().and_then(|r| r.allow.as_ref()) else {
        return AllowedReply::All;
    };
    match allow.first() {
        None => AllowedReply::None,
        Some(rule) if rule.kind == FOLLOWING_RULE => AllowedReply::Following,
        Some(rule) if rule.kind == MENTION_RULE => AllowedReply::Mentioned,
        Some(_) => AllowedReply::Unknown,
    }
}

fn language_allowed(allowed: &[String], post_langs: &[String]) -> bool {
    if allowed.is_empty() || post_langs.is_empty() {
        return true;
    }
    post_langs.iter().any(|lang| {
        allowed.iter().any(|wanted| {
            lang.eq_ignore_ascii_case(wanted)
                || lang
                    .to_ascii_lowercase()
                    .starts_with(&format!("{}-", wanted.to_ascii_lowercase()))
        })
    })
}
