//! Configuration loading and management

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use skymirror_adapters::bluesky::BlueskyConfig;
use skymirror_adapters::mastodon::MastodonConfig;
use skymirror_adapters::twitter::TwitterConfig;
use skymirror_domain::policy::{DestinationRules, PolicyConfig};
use skymirror_domain::usecases::{NormalizerConfig, PublishConfig, RunLoopConfig};
use skymirror_domain::{MentionMode, VisibilitySetting};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub bluesky: BlueskySection,

    #[serde(default)]
    pub crosspost: CrosspostSection,

    #[serde(default)]
    pub twitter: TwitterSection,

    #[serde(default)]
    pub mastodon: MastodonSection,
}

/// Where the fingerprint cache lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Json,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub cache_backend: CacheBackend,

    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default = "default_true")]
    pub dry_run: bool,

    #[serde(default = "default_post_time_limit_hours")]
    pub post_time_limit_hours: u32,

    #[serde(default = "default_cache_retention_days")]
    pub cache_retention_days: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueskySection {
    #[serde(default = "default_service_url")]
    pub service_url: String,

    #[serde(default)]
    pub handle: String,

    #[serde(default = "default_app_password_env")]
    pub app_password_env: String,

    #[serde(default = "default_feed_limit")]
    pub feed_limit: u32,

    #[serde(default = "default_max_feed_pages")]
    pub max_feed_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrosspostSection {
    #[serde(default)]
    pub mentions: MentionMode,

    #[serde(default)]
    pub visibility: VisibilitySetting,

    #[serde(default = "default_true")]
    pub quote_posts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_twitter_token_env")]
    pub user_token_env: String,

    #[serde(default = "default_twitter_base_url")]
    pub base_url: String,

    #[serde(default = "default_twitter_max_chars")]
    pub max_chars: usize,

    #[serde(default)]
    pub langs: Vec<String>,

    #[serde(default)]
    pub ignore_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastodonSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_mastodon_token_env")]
    pub access_token_env: String,

    #[serde(default)]
    pub instance_url: String,

    #[serde(default)]
    pub handle: String,

    #[serde(default = "default_mastodon_max_chars")]
    pub max_chars: usize,

    #[serde(default)]
    pub langs: Vec<String>,

    #[serde(default)]
    pub ignore_tags: Vec<String>,
}

// Default value functions
fn default_cache_path() -> PathBuf {
    PathBuf::from("./skymirror-cache.json")
}

fn default_session_path() -> PathBuf {
    PathBuf::from("./skymirror-session.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_post_time_limit_hours() -> u32 {
    12
}

fn default_cache_retention_days() -> u32 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_service_url() -> String {
    "https://bsky.social".to_string()
}

fn default_app_password_env() -> String {
    "BSKY_APP_PASSWORD".to_string()
}

fn default_feed_limit() -> u32 {
    50
}

fn default_max_feed_pages() -> u32 {
    10
}

fn default_twitter_token_env() -> String {
    "TWITTER_USER_TOKEN".to_string()
}

fn default_twitter_base_url() -> String {
    "https://api.twitter.com".to_string()
}

fn default_twitter_max_chars() -> usize {
    280
}

fn default_mastodon_token_env() -> String {
    "MASTODON_ACCESS_TOKEN".to_string()
}

fn default_mastodon_max_chars() -> usize {
    500
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_backend: CacheBackend::default(),
            cache_path: default_cache_path(),
            session_path: default_session_path(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            dry_run: default_true(),
            post_time_limit_hours: default_post_time_limit_hours(),
            cache_retention_days: default_cache_retention_days(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for BlueskySection {
    fn default() -> Self {
        Self {
            service_url: default_service_url(),
            handle: String::new(),
            app_password_env: default_app_password_env(),
            feed_limit: default_feed_limit(),
            max_feed_pages: default_max_feed_pages(),
        }
    }
}

impl Default for CrosspostSection {
    fn default() -> Self {
        Self {
            mentions: MentionMode::default(),
            visibility: VisibilitySetting::default(),
            quote_posts: default_true(),
        }
    }
}

impl Default for TwitterSection {
    fn default() -> Self {
        Self {
            enabled: false,
            user_token_env: default_twitter_token_env(),
            base_url: default_twitter_base_url(),
            max_chars: default_twitter_max_chars(),
            langs: vec![],
            ignore_tags: vec![],
        }
    }
}

impl Default for MastodonSection {
    fn default() -> Self {
        Self {
            enabled: false,
            access_token_env: default_mastodon_token_env(),
            instance_url: String::new(),
            handle: String::new(),
            max_chars: default_mastodon_max_chars(),
            langs: vec![],
            ignore_tags: vec![],
        }
    }
}

/// Read a secret from the environment variable named in the config
pub fn load_secret(env_var: &str, purpose: &str) -> Result<SecretString> {
    if env_var.is_empty() {
        anyhow::bail!("No environment variable configured for {}", purpose);
    }

    let value = std::env::var(env_var)
        .with_context(|| format!("Environment variable {} ({}) is not set", env_var, purpose))?;
    if value.trim().is_empty() {
        anyhow::bail!("Environment variable {} ({}) is empty", env_var, purpose);
    }

    Ok(SecretString::new(value.trim().into()))
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        let default_path = PathBuf::from("./config.toml");
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SKYMIRROR")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            twitter: DestinationRules {
                enabled: self.twitter.enabled,
                langs: self.twitter.langs.clone(),
                ignore_tags: self.twitter.ignore_tags.clone(),
            },
            mastodon: DestinationRules {
                enabled: self.mastodon.enabled,
                langs: self.mastodon.langs.clone(),
                ignore_tags: self.mastodon.ignore_tags.clone(),
            },
            quote_posts: self.crosspost.quote_posts,
            visibility: self.crosspost.visibility,
        }
    }

    pub fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            handle: self.bluesky.handle.clone(),
            mentions: self.crosspost.mentions,
            blob_base_url: self.bluesky.service_url.clone(),
        }
    }

    pub fn run_loop_config(&self, dry_run: bool) -> RunLoopConfig {
        RunLoopConfig {
            handle: self.bluesky.handle.clone(),
            post_time_limit_hours: self.general.post_time_limit_hours,
            cache_retention_days: self.general.cache_retention_days,
            max_feed_pages: self.bluesky.max_feed_pages,
            dry_run,
            publish: PublishConfig {
                max_retries: self.general.max_retries,
            },
        }
    }

    pub fn bluesky_config(&self) -> BlueskyConfig {
        BlueskyConfig {
            service_url: self.bluesky.service_url.clone(),
            handle: self.bluesky.handle.clone(),
            feed_limit: self.bluesky.feed_limit,
        }
    }

    pub fn twitter_config(&self) -> TwitterConfig {
        TwitterConfig {
            base_url: self.twitter.base_url.clone(),
            max_chars: self.twitter.max_chars,
            enabled: self.twitter.enabled,
        }
    }

    pub fn mastodon_config(&self) -> MastodonConfig {
        MastodonConfig {
            instance_url: self.mastodon.instance_url.clone(),
            handle: self.mastodon.handle.clone(),
            max_chars: self.mastodon.max_chars,
            enabled: self.mastodon.enabled,
        }
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        r##"# skymirror configuration
# Secrets are read from the environment variables named below.

[general]
cache_backend = "json"  # json, sqlite, memory
cache_path = "./skymirror-cache.json"
session_path = "./skymirror-session.json"
log_level = "info"
log_format = "text"  # text, json
dry_run = true
# Only posts newer than this are mirrored or deleted
post_time_limit_hours = 12
cache_retention_days = 30
max_retries = 3

[bluesky]
service_url = "https://bsky.social"
handle = "example.bsky.social"
app_password_env = "BSKY_APP_PASSWORD"
feed_limit = 50
# Older pages are read until one reaches past post_time_limit_hours
max_feed_pages = 10

[crosspost]
mentions = "strip"  # ignore, skip, strip, url
visibility = "hybrid"  # public, unlisted, private, direct, hybrid
quote_posts = true

[twitter]
enabled = false
user_token_env = "TWITTER_USER_TOKEN"
base_url = "https://api.twitter.com"
max_chars = 280
langs = []  # empty mirrors every language
ignore_tags = ["#nox"]

[mastodon]
enabled = false
access_token_env = "MASTODON_ACCESS_TOKEN"
instance_url = "https://mastodon.social"
handle = "example"
max_chars = 500
langs = []
ignore_tags = ["#nomastodon"]
"##
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_toml_parses() {
        let config: AppConfig = toml::from_str(&AppConfig::example_toml()).unwrap();

        assert_eq!(config.general.cache_backend, CacheBackend::Json);
        assert!(config.general.dry_run);
        assert_eq!(config.bluesky.handle, "example.bsky.social");
        assert_eq!(config.crosspost.mentions, MentionMode::Strip);
        assert_eq!(config.crosspost.visibility, VisibilitySetting::Hybrid);
        assert_eq!(config.twitter.ignore_tags, vec!["#nox".to_string()]);
        assert_eq!(config.mastodon.max_chars, 500);
    }

    #[test]
    fn test_defaults_for_empty_file() {
        let config: AppConfig = toml::from_str("").unwrap();

        assert_eq!(config.general.post_time_limit_hours, 12);
        assert_eq!(config.general.max_retries, 3);
        assert_eq!(config.bluesky.feed_limit, 50);
        assert_eq!(config.bluesky.max_feed_pages, 10);
        assert!(config.crosspost.quote_posts);
        assert!(!config.twitter.enabled);
        assert_eq!(config.twitter.max_chars, 280);
    }

    #[test]
    fn test_domain_conversion() {
        let config: AppConfig = toml::from_str(
            r#"
            [bluesky]
            handle = "me.bsky.social"
            service_url = "https://pds.example"

            [crosspost]
            mentions = "url"
            visibility = "unlisted"
            quote_posts = false

            [twitter]
            enabled = true
            langs = ["en"]
            "#,
        )
        .unwrap();

        let policy = config.policy_config();
        assert!(policy.twitter.enabled);
        assert_eq!(policy.twitter.langs, vec!["en".to_string()]);
        assert!(!policy.mastodon.enabled);
        assert!(!policy.quote_posts);
        assert_eq!(policy.visibility, VisibilitySetting::Unlisted);

        let normalizer = config.normalizer_config();
        assert_eq!(normalizer.handle, "me.bsky.social");
        assert_eq!(normalizer.mentions, MentionMode::Url);
        assert_eq!(normalizer.blob_base_url, "https://pds.example");

        let run = config.run_loop_config(false);
        assert!(!run.dry_run);
        assert_eq!(run.publish.max_retries, 3);
        assert_eq!(run.max_feed_pages, 10);
    }

    #[test]
    fn test_load_secret() {
        assert!(load_secret("", "twitter").is_err());
        assert!(load_secret("SKYMIRROR_TEST_SURELY_UNSET_VAR", "twitter").is_err());
    }
}
