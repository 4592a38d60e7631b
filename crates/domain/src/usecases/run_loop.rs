//! Run loop use case - one fetch, delete and publish pass over the feed

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::{
    cache::{FingerprintCache, repost_key, reposted_source},
    feed::FeedViewPost,
    model::{DeleteOutcome, Destination, PostIntent, PostOutcome, RunSummary, SkipReason},
    ports::{
        CacheError, CacheStore, Clock, CrossPoster, FeedSource, FeedSourceError,
        ReplyAuthorResolver,
    },
    usecases::{
        normalize::{NormalizeError, Normalizer, parse_source_timestamp},
        publish::{PublishConfig, PublishUseCase},
        render::Renderer,
    },
};

/// Back-off used when the source rate-limits without a reset time
const DEFAULT_SOURCE_BACKOFF_MINUTES: i64 = 15;

/// Configuration for the run loop
#[derive(Debug, Clone)]
pub struct RunLoopConfig {
    /// Account whose feed is mirrored
    pub handle: String,
    /// Only posts newer than this many hours are mirrored or deleted
    pub post_time_limit_hours: u32,
    /// Cache entries older than this are forgotten
    pub cache_retention_days: u32,
    /// Upper bound on feed pages read per run
    pub max_feed_pages: u32,
    /// Dry run mode (don't call destinations or write the cache)
    pub dry_run: bool,
    pub publish: PublishConfig,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            handle: String::new(),
            post_time_limit_hours: 12,
            cache_retention_days: 30,
            max_feed_pages: 10,
            dry_run: true,
            publish: PublishConfig::default(),
        }
    }
}

/// Feed entries fetched in one run
struct FeedWindow {
    entries: Vec<FeedViewPost>,
    undecodable: Vec<String>,
    /// Only cached posts newer than this can be judged missing from the feed
    deletion_horizon: OffsetDateTime,
}

/// Per-run state shared by the publish and delete steps
struct RunState {
    cache: FingerprintCache,
    summary: RunSummary,
    rate_limited: BTreeSet<Destination>,
}

/// Run loop orchestrator
pub struct RunLoop<S, St, Cl>
where
    S: FeedSource + ReplyAuthorResolver + ?Sized,
    St: CacheStore + ?Sized,
    Cl: Clock + ?Sized,
{
    source: Arc<S>,
    posters: Vec<Arc<dyn CrossPoster>>,
    cache_store: Arc<St>,
    clock: Arc<Cl>,
    normalizer: Normalizer,
    config: RunLoopConfig,
}

impl<S, St, Cl> RunLoop<S, St, Cl>
where
    S: FeedSource + ReplyAuthorResolver + ?Sized,
    St: CacheStore + ?Sized,
    Cl: Clock + ?Sized,
{
    pub fn new(
        source: Arc<S>,
        posters: Vec<Arc<dyn CrossPoster>>,
        cache_store: Arc<St>,
        clock: Arc<Cl>,
        normalizer: Normalizer,
        config: RunLoopConfig,
    ) -> Self {
        Self {
            source,
            posters,
            cache_store,
            clock,
            normalizer,
            config,
        }
    }

    fn poster(&self, destination: Destination) -> Option<&Arc<dyn CrossPoster>> {
        self.posters
            .iter()
            .find(|p| p.destination() == destination && p.is_enabled())
    }

    /// Run one complete pass: deletions first, then new posts
    pub async fn run_once(&self) -> Result<RunSummary, RunLoopError> {
        let cache = self.cache_store.load().await?;
        let now = self.clock.now();
        let mut state = RunState {
            cache,
            summary: RunSummary::default(),
            rate_limited: BTreeSet::new(),
        };

        if state.cache.is_source_rate_limited(now) {
            tracing::info!(
                until = ?state.cache.source_rate_limited_until,
                "Source is rate limited, skipping run"
            );
            state.summary.source_rate_limited = true;
            return Ok(state.summary);
        }

        let time_limit = now - Duration::hours(i64::from(self.config.post_time_limit_hours));

        tracing::info!(handle = %self.config.handle, "Fetching feed");

        let feed = match self.fetch_window(time_limit, now).await {
            Ok(feed) => feed,
            Err(FeedSourceError::RateLimited(reset_at)) => {
                return self.back_off(state, reset_at, now).await;
            }
            Err(e @ FeedSourceError::Auth(_)) => return Err(RunLoopError::Auth(e.to_string())),
            Err(e) => return Err(RunLoopError::Source(e)),
        };
        state.cache.source_rate_limited_until = None;

        tracing::info!(
            count = feed.entries.len(),
            undecodable = feed.undecodable.len(),
            "Fetched feed"
        );

        let observed = self.observed_ids(&feed);

        if let Err(e) = self
            .apply_deletions(&mut state, &observed, feed.deletion_horizon)
            .await
        {
            return self.abort(&state.cache, e).await;
        }

        for entry in &feed.entries {
            let intent = match self
                .normalizer
                .normalize(entry, time_limit, self.source.as_ref())
                .await
            {
                Ok(intent) => intent,
                Err(NormalizeError::Skip(reason)) => {
                    log_skip(&entry.post.cid, &reason);
                    state.summary.skipped += 1;
                    continue;
                }
                Err(NormalizeError::Source(FeedSourceError::RateLimited(reset_at))) => {
                    return self.back_off(state, reset_at, now).await;
                }
                Err(NormalizeError::Source(e @ FeedSourceError::Auth(_))) => {
                    return self
                        .abort(&state.cache, RunLoopError::Auth(e.to_string()))
                        .await;
                }
                Err(NormalizeError::Source(e)) => {
                    return self.abort(&state.cache, RunLoopError::Source(e)).await;
                }
            };

            for destination in &intent.destinations {
                if let Err(e) = self.mirror(&mut state, &intent, *destination).await {
                    return self.abort(&state.cache, e).await;
                }
            }
        }

        let retention_cutoff =
            now - Duration::days(i64::from(self.config.cache_retention_days));
        let pruned = state.cache.prune_older_than(retention_cutoff.min(time_limit));
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired cache entries");
        }

        self.persist(&state.cache).await?;
        self.log_rate_limits();

        let summary = state.summary;
        tracing::info!(
            posted = summary.posted,
            reposted = summary.reposted,
            deleted = summary.deleted,
            skipped = summary.skipped,
            failed = summary.failed,
            rate_limited = summary.rate_limited,
            "Run complete"
        );

        Ok(summary)
    }

    /// Read feed pages until they reach back past the time limit.
    ///
    /// When the page budget runs out first, deletions are limited to the
    /// span the fetched pages actually cover.
    async fn fetch_window(
        &self,
        time_limit: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<FeedWindow, FeedSourceError> {
        let mut window = FeedWindow {
            entries: vec![],
            undecodable: vec![],
            deletion_horizon: time_limit,
        };
        let mut oldest: Option<OffsetDateTime> = None;
        let mut cursor: Option<String> = None;
        let max_pages = self.config.max_feed_pages.max(1);

        for page_number in 1..=max_pages {
            let page = self
                .source
                .fetch_feed(&self.config.handle, cursor.as_deref())
                .await?;

            let page_oldest = page.entries.iter().filter_map(entry_timestamp).min();
            if let Some(t) = page_oldest {
                oldest = Some(oldest.map_or(t, |o| o.min(t)));
            }
            window.entries.extend(page.entries);
            window.undecodable.extend(page.undecodable);
            cursor = page.cursor;

            if cursor.is_none() || page_oldest.is_some_and(|t| t <= time_limit) {
                return Ok(window);
            }
            tracing::debug!(page = page_number, "Feed continues inside the time window");
        }

        window.deletion_horizon = oldest.map_or(now, |o| o.max(time_limit));
        tracing::warn!(
            pages = max_pages,
            horizon = %window.deletion_horizon,
            "Feed page limit reached, deletions limited to the fetched span"
        );
        Ok(window)
    }

    /// Cache keys the feed still vouches for
    fn observed_ids(&self, feed: &FeedWindow) -> HashSet<String> {
        let mut observed: HashSet<String> = feed.undecodable.iter().cloned().collect();
        for entry in &feed.entries {
            if entry.post.author.handle != self.config.handle {
                continue;
            }
            if entry.is_repost() {
                observed.insert(repost_key(&entry.post.cid));
            }
            observed.insert(entry.post.cid.clone());
        }
        observed
    }

    /// Mirror one intent to one destination
    async fn mirror(
        &self,
        state: &mut RunState,
        intent: &PostIntent,
        destination: Destination,
    ) -> Result<(), RunLoopError> {
        let Some(poster) = self.poster(destination) else {
            return Ok(());
        };

        if intent.is_repost {
            let earlier = state
                .cache
                .posts
                .get(&intent.source_id)
                .filter(|entry| entry.timestamp < intent.created_at)
                .and_then(|entry| entry.destinations.get(&destination))
                .cloned();
            if let Some(original_id) = earlier {
                return self
                    .mirror_repost(state, intent, destination, poster, &original_id)
                    .await;
            }
        }

        if state.cache.native_id(&intent.source_id, destination).is_some() {
            tracing::debug!(
                source_id = %intent.source_id,
                destination = %destination,
                "Already mirrored"
            );
            return Ok(());
        }

        if state.rate_limited.contains(&destination) {
            state.summary.rate_limited += 1;
            return Ok(());
        }

        let outbound = match Renderer::new(destination).render(intent, &state.cache) {
            Ok(outbound) => outbound,
            Err(reason) => {
                tracing::info!(
                    source_id = %intent.source_id,
                    destination = %destination,
                    reason = %reason,
                    "Skipping destination"
                );
                state.summary.skipped += 1;
                return Ok(());
            }
        };

        if self.config.dry_run {
            tracing::info!(
                source_id = %intent.source_id,
                destination = %destination,
                text = %outbound.text,
                reply_to = ?outbound.reply_to,
                media = outbound.media.items().len(),
                "[DRY RUN] Would publish"
            );
            return Ok(());
        }

        let usecase = PublishUseCase::new(poster.as_ref(), self.config.publish.clone());
        let outcome = usecase
            .publish(&outbound)
            .await
            .map_err(|e| RunLoopError::Auth(e.to_string()))?;

        match outcome {
            PostOutcome::Posted(native_id) => {
                tracing::info!(
                    source_id = %intent.source_id,
                    destination = %destination,
                    native_id = %native_id,
                    "Published"
                );
                state
                    .cache
                    .record_post(&intent.source_id, destination, &native_id, intent.created_at);
                state.summary.posted += 1;
            }
            PostOutcome::Incomplete { native_id, reason } => {
                tracing::error!(
                    source_id = %intent.source_id,
                    destination = %destination,
                    native_id = %native_id,
                    error = %reason,
                    "Thread left incomplete"
                );
                state
                    .cache
                    .record_post(&intent.source_id, destination, &native_id, intent.created_at);
                state.summary.failed += 1;
            }
            PostOutcome::Skipped(reason) => {
                tracing::info!(
                    source_id = %intent.source_id,
                    destination = %destination,
                    reason = %reason,
                    "Skipping destination"
                );
                state.summary.skipped += 1;
            }
            PostOutcome::RateLimited => {
                state.rate_limited.insert(destination);
                state.summary.rate_limited += 1;
            }
            PostOutcome::Failed(reason) => {
                tracing::error!(
                    source_id = %intent.source_id,
                    destination = %destination,
                    error = %reason,
                    "Failed to publish"
                );
                state.summary.failed += 1;
            }
        }
        Ok(())
    }

    /// Share the destination's mirror of a post the account reposted
    async fn mirror_repost(
        &self,
        state: &mut RunState,
        intent: &PostIntent,
        destination: Destination,
        poster: &Arc<dyn CrossPoster>,
        original_id: &str,
    ) -> Result<(), RunLoopError> {
        let key = repost_key(&intent.source_id);
        if state.cache.native_id(&key, destination).is_some() {
            tracing::debug!(
                source_id = %intent.source_id,
                destination = %destination,
                "Repost already mirrored"
            );
            return Ok(());
        }

        if state.rate_limited.contains(&destination) {
            state.summary.rate_limited += 1;
            return Ok(());
        }

        if self.config.dry_run {
            tracing::info!(
                source_id = %intent.source_id,
                destination = %destination,
                native_id = %original_id,
                "[DRY RUN] Would repost"
            );
            return Ok(());
        }

        let usecase = PublishUseCase::new(poster.as_ref(), self.config.publish.clone());
        let outcome = usecase
            .repost(original_id)
            .await
            .map_err(|e| RunLoopError::Auth(e.to_string()))?;

        match outcome {
            PostOutcome::Posted(native_id) => {
                tracing::info!(
                    source_id = %intent.source_id,
                    destination = %destination,
                    native_id = %native_id,
                    "Reposted"
                );
                state
                    .cache
                    .record_post(&key, destination, &native_id, intent.created_at);
                state.summary.reposted += 1;
            }
            PostOutcome::RateLimited => {
                state.rate_limited.insert(destination);
                state.summary.rate_limited += 1;
            }
            PostOutcome::Failed(reason)
            | PostOutcome::Skipped(reason)
            | PostOutcome::Incomplete { reason, .. } => {
                tracing::error!(
                    source_id = %intent.source_id,
                    destination = %destination,
                    error = %reason,
                    "Failed to repost"
                );
                state.summary.failed += 1;
            }
        }
        Ok(())
    }

    /// Delete mirrors of cached posts the feed no longer shows
    async fn apply_deletions(
        &self,
        state: &mut RunState,
        observed: &HashSet<String>,
        horizon: OffsetDateTime,
    ) -> Result<(), RunLoopError> {
        for key in state.cache.deletion_set(observed, horizon) {
            let mirrors: Vec<(Destination, String)> = state
                .cache
                .posts
                .get(&key)
                .map(|entry| {
                    entry
                        .destinations
                        .iter()
                        .map(|(d, id)| (*d, id.clone()))
                        .collect()
                })
                .unwrap_or_default();
            let is_repost = reposted_source(&key).is_some();

            for (destination, native_id) in mirrors {
                let Some(poster) = self.poster(destination) else {
                    tracing::debug!(
                        source_id = %key,
                        destination = %destination,
                        "Destination disabled, keeping mirror"
                    );
                    continue;
                };
                if state.rate_limited.contains(&destination) {
                    continue;
                }

                if self.config.dry_run {
                    tracing::info!(
                        source_id = %key,
                        destination = %destination,
                        native_id = %native_id,
                        "[DRY RUN] Would delete"
                    );
                    continue;
                }

                let usecase = PublishUseCase::new(poster.as_ref(), self.config.publish.clone());
                let result = if is_repost {
                    usecase.undo_repost(&native_id).await
                } else {
                    usecase.delete(&native_id).await
                };
                let outcome = result.map_err(|e| RunLoopError::Auth(e.to_string()))?;

                if outcome.is_confirmed() {
                    tracing::info!(
                        source_id = %key,
                        destination = %destination,
                        native_id = %native_id,
                        outcome = ?outcome,
                        "Deleted mirror"
                    );
                    state.cache.remove_destination(&key, destination);
                    state.summary.deleted += 1;
                    continue;
                }

                match outcome {
                    DeleteOutcome::RateLimited => {
                        tracing::warn!(
                            source_id = %key,
                            destination = %destination,
                            "Rate limited, deletion postponed"
                        );
                        state.rate_limited.insert(destination);
                        state.summary.rate_limited += 1;
                    }
                    DeleteOutcome::Failed(reason) => {
                        tracing::error!(
                            source_id = %key,
                            destination = %destination,
                            error = %reason,
                            "Failed to delete"
                        );
                        state.summary.failed += 1;
                    }
                    DeleteOutcome::Deleted | DeleteOutcome::NotFound => {}
                }
            }
        }
        Ok(())
    }

    /// Remember the source's back-off and end the run successfully
    async fn back_off(
        &self,
        mut state: RunState,
        reset_at: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> Result<RunSummary, RunLoopError> {
        let until = reset_at.unwrap_or(now + Duration::minutes(DEFAULT_SOURCE_BACKOFF_MINUTES));
        tracing::warn!(until = %until, "Source rate limited, backing off");
        state.cache.source_rate_limited_until = Some(until);
        self.persist(&state.cache).await?;
        state.summary.source_rate_limited = true;
        Ok(state.summary)
    }

    async fn persist(&self, cache: &FingerprintCache) -> Result<(), RunLoopError> {
        if self.config.dry_run {
            tracing::debug!("[DRY RUN] Cache not written");
            return Ok(());
        }
        self.cache_store.save(cache).await?;
        Ok(())
    }

    /// Keep whatever was confirmed so far, then fail the run
    async fn abort(
        &self,
        cache: &FingerprintCache,
        error: RunLoopError,
    ) -> Result<RunSummary, RunLoopError> {
        if let Err(save_error) = self.persist(cache).await {
            tracing::error!(error = %save_error, "Failed to save cache while aborting");
        }
        Err(error)
    }

    fn log_rate_limits(&self) {
        if let Some(status) = self.source.rate_limit() {
            tracing::info!(
                network = "bluesky",
                remaining = status.remaining,
                reset_at = ?status.reset_at,
                "Rate limit"
            );
        }
        for poster in &self.posters {
            if let Some(status) = poster.rate_limit() {
                tracing::info!(
                    network = %poster.destination(),
                    remaining = status.remaining,
                    reset_at = ?status.reset_at,
                    "Rate limit"
                );
            }
        }
    }
}

fn entry_timestamp(entry: &FeedViewPost) -> Option<OffsetDateTime> {
    parse_source_timestamp(entry.raw_timestamp())
}

fn log_skip(source_id: &str, reason: &SkipReason) {
    match reason {
        SkipReason::NotOwnPost(_) | SkipReason::OutsideTimeWindow => {
            tracing::debug!(source_id = %source_id, reason = %reason, "Skipping post");
        }
        SkipReason::MalformedFacet(_)
        | SkipReason::UnparseableQuote(_)
        | SkipReason::BadTimestamp(_) => {
            tracing::warn!(source_id = %source_id, reason = %reason, "Skipping post");
        }
        _ => {
            tracing::info!(source_id = %source_id, reason = %reason, "Skipping post");
        }
    }
}

/// Errors from the run loop
#[derive(Debug, thiserror::Error)]
pub enum RunLoopError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Feed source error: {0}")]
    Source(FeedSourceError),
    #[error("Authentication error: {0}")]
    Auth(String),
}
