//! Run command - one mirroring pass

use anyhow::{Context, Result, bail};
use skymirror_adapters::{
    bluesky::{BlueskyFeedSource, SessionFile},
    cache::{InMemoryCacheStore, JsonCacheStore, SqliteCacheStore},
    mastodon::MastodonPoster,
    stub::{FixtureFeedSource, StubPoster},
    twitter::TwitterPoster,
};
use skymirror_domain::{
    CacheStore, CrossPoster, Destination, FeedSource, ReplyAuthorResolver, RunSummary,
    SystemClock,
    policy::PolicyEvaluator,
    usecases::{Normalizer, RunLoop},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::args::RunArgs;
use crate::config::{AppConfig, CacheBackend, load_secret};

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;

    if config.bluesky.handle.trim().is_empty() {
        bail!("bluesky.handle is not configured");
    }

    let dry_run = !args.live && (args.dry_run || config.general.dry_run);
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", run_id = %run_id);

    async move {
        tracing::info!(
            handle = %config.bluesky.handle,
            dry_run = dry_run,
            fixture = ?args.fixture,
            cache_backend = ?config.general.cache_backend,
            "Starting skymirror run"
        );

        let cache_store = build_cache_store(&config).await?;

        let summary = match &args.fixture {
            Some(fixture) => {
                let source = Arc::new(FixtureFeedSource::new(fixture));
                let posters = stub_posters(&config);
                run_with(source, posters, cache_store, &config, dry_run).await?
            }
            None => {
                let password = load_secret(&config.bluesky.app_password_env, "bluesky")?;
                let source = Arc::new(BlueskyFeedSource::new(
                    config.bluesky_config(),
                    password,
                    Some(SessionFile::new(&config.general.session_path)),
                ));
                let posters = build_posters(&config, dry_run)?;
                run_with(source, posters, cache_store, &config, dry_run).await?
            }
        };

        if summary.source_rate_limited {
            tracing::info!("Source asked us to back off; nothing was mirrored");
        } else if summary.is_empty() {
            tracing::info!("Nothing new to mirror");
        }

        tracing::info!("skymirror run completed");
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await
}

async fn run_with<S>(
    source: Arc<S>,
    posters: Vec<Arc<dyn CrossPoster>>,
    cache_store: Arc<dyn CacheStore>,
    config: &AppConfig,
    dry_run: bool,
) -> Result<RunSummary>
where
    S: FeedSource + ReplyAuthorResolver + 'static,
{
    let policy = PolicyEvaluator::new(config.policy_config());
    let normalizer = Normalizer::new(config.normalizer_config(), policy);

    let run_loop = RunLoop::new(
        source,
        posters,
        cache_store,
        Arc::new(SystemClock),
        normalizer,
        config.run_loop_config(dry_run),
    );

    run_loop.run_once().await.context("Run failed")
}

async fn build_cache_store(config: &AppConfig) -> Result<Arc<dyn CacheStore>> {
    let path = &config.general.cache_path;
    let store: Arc<dyn CacheStore> = match config.general.cache_backend {
        CacheBackend::Json => Arc::new(JsonCacheStore::new(path)),
        CacheBackend::Sqlite => Arc::new(
            SqliteCacheStore::new(path)
                .await
                .with_context(|| format!("Failed to open SQLite cache {}", path.display()))?,
        ),
        CacheBackend::Memory => {
            tracing::warn!("In-memory cache: mirrored posts are forgotten when the run ends");
            Arc::new(InMemoryCacheStore::new())
        }
    };
    Ok(store)
}

/// Real posters for enabled destinations.
///
/// A dry run never calls a destination, so missing credentials only
/// downgrade that destination to a stub.
fn build_posters(config: &AppConfig, dry_run: bool) -> Result<Vec<Arc<dyn CrossPoster>>> {
    let mut posters: Vec<Arc<dyn CrossPoster>> = vec![];

    if config.twitter.enabled {
        match load_secret(&config.twitter.user_token_env, "twitter") {
            Ok(token) => posters.push(Arc::new(TwitterPoster::new(token, config.twitter_config()))),
            Err(e) if dry_run => {
                tracing::warn!(error = %e, "Twitter credentials missing, using stub for dry run");
                posters.push(Arc::new(StubPoster::new(
                    Destination::Twitter,
                    config.twitter.max_chars,
                )));
            }
            Err(e) => return Err(e),
        }
    }

    if config.mastodon.enabled {
        if config.mastodon.instance_url.trim().is_empty() {
            bail!("mastodon.instance_url is not configured");
        }
        match load_secret(&config.mastodon.access_token_env, "mastodon") {
            Ok(token) => posters.push(Arc::new(MastodonPoster::new(token, config.mastodon_config()))),
            Err(e) if dry_run => {
                tracing::warn!(error = %e, "Mastodon credentials missing, using stub for dry run");
                posters.push(Arc::new(StubPoster::new(
                    Destination::Mastodon,
                    config.mastodon.max_chars,
                )));
            }
            Err(e) => return Err(e),
        }
    }

    if posters.is_empty() {
        tracing::warn!("No destination is enabled; only the feed will be read");
    }

    Ok(posters)
}

fn stub_posters(config: &AppConfig) -> Vec<Arc<dyn CrossPoster>> {
    let mut posters: Vec<Arc<dyn CrossPoster>> = vec![];
    if config.twitter.enabled {
        posters.push(Arc::new(StubPoster::new(
            Destination::Twitter,
            config.twitter.max_chars,
        )));
    }
    if config.mastodon.enabled {
        posters.push(Arc::new(StubPoster::new(
            Destination::Mastodon,
            config.mastodon.max_chars,
        )));
    }
    posters
}
