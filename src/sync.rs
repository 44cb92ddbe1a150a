//! Sync Engine - reconciles GitHub stars with FreshRSS subscriptions
//!
//! A pass authenticates with FreshRSS, reads both sides, computes a
//! [`SyncPlan`] and executes it with bounded concurrency. Fatal problems
//! (authentication, enumeration) abort the pass with an error; failures of
//! individual add/remove actions are recorded in the [`SyncSummary`] and never
//! stop sibling actions.

use crate::config::Config;
use crate::discovery::{ReleaseFeedFilter, Repo, StarredRepoSource, StarredSet, SubscriptionSet};
use crate::feed::{AtomFeedProber, FeedProber};
use crate::freshrss::{FreshRssClient, SubscriptionStore};
use crate::github::GitHubClient;
use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Category release feeds are filed under unless configured otherwise
pub const DEFAULT_CATEGORY: &str = "Github";

/// Kind of change applied to a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    Add,
    Remove,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Add => write!(f, "add"),
            SyncAction::Remove => write!(f, "remove"),
        }
    }
}

/// Outcome of a single planned action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    Added { feed_url: String },
    Removed { feed_url: String },
    /// The feed has no entries yet, so it is not published
    SkippedNoEntries { feed_url: String },
    Failed {
        feed_url: String,
        action: SyncAction,
        error: String,
    },
    Cancelled { feed_url: String },
}

impl SyncResult {
    pub fn feed_url(&self) -> &str {
        match self {
            SyncResult::Added { feed_url }
            | SyncResult::Removed { feed_url }
            | SyncResult::SkippedNoEntries { feed_url }
            | SyncResult::Failed { feed_url, .. }
            | SyncResult::Cancelled { feed_url } => feed_url,
        }
    }
}

/// The diff between starred repositories and existing subscriptions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Starred repositories without a subscription, sorted by feed URL
    pub additions: Vec<Repo>,
    /// Release feeds no longer starred, sorted
    pub removals: Vec<String>,
    /// Feeds present on both sides
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn compute(starred: &StarredSet, existing: &SubscriptionSet) -> Self {
        let mut additions: Vec<Repo> = starred
            .iter()
            .filter(|(feed_url, _)| !existing.contains(feed_url))
            .map(|(_, repo)| repo.clone())
            .collect();
        additions.sort_by(|a, b| a.feed_url.cmp(&b.feed_url));

        let mut removals: Vec<String> = existing
            .iter()
            .filter(|feed_url| !starred.contains_key(*feed_url))
            .cloned()
            .collect();
        removals.sort();

        let unchanged = starred.len() - additions.len();

        Self {
            additions,
            removals,
            unchanged,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Results from a complete reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub starred_repositories: usize,
    pub existing_subscriptions: usize,
    pub foreign_subscriptions: usize,
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub duration: Duration,
    pub results: Vec<SyncResult>,
}

impl SyncSummary {
    fn compile(
        starred: &StarredSet,
        existing: &SubscriptionSet,
        unchanged: usize,
        results: Vec<SyncResult>,
        duration: Duration,
    ) -> Self {
        let mut summary = Self {
            starred_repositories: starred.len(),
            existing_subscriptions: existing.len(),
            foreign_subscriptions: existing.foreign_count(),
            unchanged,
            duration,
            ..Default::default()
        };

        for result in &results {
            match result {
                SyncResult::Added { .. } => summary.added += 1,
                SyncResult::Removed { .. } => summary.removed += 1,
                SyncResult::SkippedNoEntries { .. } => summary.skipped += 1,
                SyncResult::Failed { .. } => summary.failed += 1,
                SyncResult::Cancelled { .. } => summary.cancelled += 1,
            }
        }

        summary.results = results;
        summary
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncResult> {
        self.results
            .iter()
            .filter(|result| matches!(result, SyncResult::Failed { .. }))
    }
}

enum Task<'a> {
    Add(&'a Repo),
    Remove(&'a str),
}

impl Task<'_> {
    fn feed_url(&self) -> &str {
        match self {
            Task::Add(repo) => &repo.feed_url,
            Task::Remove(feed_url) => feed_url,
        }
    }

    fn action(&self) -> SyncAction {
        match self {
            Task::Add(_) => SyncAction::Add,
            Task::Remove(_) => SyncAction::Remove,
        }
    }
}

/// Applies a [`SyncPlan`] against a subscription store
#[derive(Debug, Clone)]
pub struct Reconciler {
    max_parallel: usize,
    category: String,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(4, DEFAULT_CATEGORY)
    }
}

impl Reconciler {
    pub fn new(max_parallel: usize, category: impl Into<String>) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            category: category.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_parallel(), config.freshrss.category.clone())
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Diff both sides and apply the result
    ///
    /// Expects `store` to be authenticated. Every planned action is attempted
    /// exactly once; at most `max_parallel` run at a time. Once `cancel` fires,
    /// actions that have not finished resolve as [`SyncResult::Cancelled`].
    pub async fn reconcile<S, P>(
        &self,
        store: &S,
        prober: &P,
        starred: &StarredSet,
        existing: &SubscriptionSet,
        cancel: &CancellationToken,
    ) -> SyncSummary
    where
        S: SubscriptionStore + ?Sized,
        P: FeedProber + ?Sized,
    {
        let start_time = Instant::now();
        let plan = SyncPlan::compute(starred, existing);

        info!(
            "Reconciling {} starred repositories against {} release subscriptions: {} to add, {} to remove, {} unchanged",
            starred.len(),
            existing.len(),
            plan.additions.len(),
            plan.removals.len(),
            plan.unchanged
        );

        let results = self.execute(&plan, store, prober, cancel).await;

        SyncSummary::compile(starred, existing, plan.unchanged, results, start_time.elapsed())
    }

    /// Run every action in `plan` and wait for all of them
    pub async fn execute<S, P>(
        &self,
        plan: &SyncPlan,
        store: &S,
        prober: &P,
        cancel: &CancellationToken,
    ) -> Vec<SyncResult>
    where
        S: SubscriptionStore + ?Sized,
        P: FeedProber + ?Sized,
    {
        let semaphore = Semaphore::new(self.max_parallel);

        let tasks = plan
            .additions
            .iter()
            .map(Task::Add)
            .chain(plan.removals.iter().map(|feed_url| Task::Remove(feed_url)));

        let mut futures: FuturesUnordered<_> = tasks
            .map(|task| self.run_task(task, store, prober, &semaphore, cancel))
            .collect();

        let mut results = Vec::with_capacity(plan.additions.len() + plan.removals.len());
        while let Some(result) = futures.next().await {
            debug!("Action completed: {:?}", result);
            results.push(result);
        }

        results
    }

    async fn run_task<S, P>(
        &self,
        task: Task<'_>,
        store: &S,
        prober: &P,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
    ) -> SyncResult
    where
        S: SubscriptionStore + ?Sized,
        P: FeedProber + ?Sized,
    {
        let feed_url = task.feed_url().to_string();

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SyncResult::Cancelled { feed_url },
            permit = semaphore.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    return SyncResult::Failed {
                        feed_url,
                        action: task.action(),
                        error: e.to_string(),
                    }
                }
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Cancelled {} of {}", task.action(), feed_url);
                SyncResult::Cancelled { feed_url }
            }
            result = self.perform(&task, store, prober) => result,
        }
    }

    async fn perform<S, P>(&self, task: &Task<'_>, store: &S, prober: &P) -> SyncResult
    where
        S: SubscriptionStore + ?Sized,
        P: FeedProber + ?Sized,
    {
        match *task {
            Task::Add(repo) => {
                let feed_url = repo.feed_url.clone();

                if !prober.has_entries(&repo.feed_url).await {
                    warn!("Feed {} has no entries and so will not be published", feed_url);
                    return SyncResult::SkippedNoEntries { feed_url };
                }

                match store
                    .add_subscription(&repo.feed_url, &repo.name, &self.category)
                    .await
                {
                    Ok(()) => SyncResult::Added { feed_url },
                    Err(e) => {
                        error!("Error publishing feed {} to FreshRSS: {:#}", feed_url, e);
                        SyncResult::Failed {
                            feed_url,
                            action: SyncAction::Add,
                            error: format!("{:#}", e),
                        }
                    }
                }
            }
            Task::Remove(feed_url) => {
                info!("Removing feed {} as it is no longer starred", feed_url);

                match store.remove_subscription(feed_url).await {
                    Ok(()) => SyncResult::Removed {
                        feed_url: feed_url.to_string(),
                    },
                    Err(e) => {
                        error!("Error removing feed {} from FreshRSS: {:#}", feed_url, e);
                        SyncResult::Failed {
                            feed_url: feed_url.to_string(),
                            action: SyncAction::Remove,
                            error: format!("{:#}", e),
                        }
                    }
                }
            }
        }
    }
}

/// The main sync engine: gathers both sides and hands them to the [`Reconciler`]
pub struct SyncEngine<G, P, S> {
    source: G,
    prober: P,
    store: S,
    reconciler: Reconciler,
    release_feeds: ReleaseFeedFilter,
}

impl SyncEngine<GitHubClient, AtomFeedProber, FreshRssClient> {
    /// Build the production engine from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let source = GitHubClient::new(config).context("Failed to create GitHub client")?;
        let prober = AtomFeedProber::new(config.http_timeout())?;
        let store = FreshRssClient::new(config)?;
        let release_feeds = ReleaseFeedFilter::for_web_root(&config.github_web_root()?)?;

        Ok(Self::new(source, prober, store, Reconciler::from_config(config))
            .with_release_feed_filter(release_feeds))
    }
}

impl<G, P, S> SyncEngine<G, P, S>
where
    G: StarredRepoSource,
    P: FeedProber,
    S: SubscriptionStore,
{
    pub fn new(source: G, prober: P, store: S, reconciler: Reconciler) -> Self {
        Self {
            source,
            prober,
            store,
            reconciler,
            release_feeds: ReleaseFeedFilter::github().clone(),
        }
    }

    /// Recognize release feeds of another web root (GitHub Enterprise)
    pub fn with_release_feed_filter(mut self, release_feeds: ReleaseFeedFilter) -> Self {
        self.release_feeds = release_feeds;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn source(&self) -> &G {
        &self.source
    }

    /// Authenticate and read both sides; every failure here is fatal to the pass
    ///
    /// Cancelling `cancel` abandons whichever request is in flight.
    pub async fn gather(&self, cancel: &CancellationToken) -> Result<(StarredSet, SubscriptionSet)> {
        let start_time = Instant::now();

        unless_cancelled(cancel, self.store.authenticate())
            .await
            .context("Could not authenticate with FreshRSS")?;

        info!("Querying existing feeds in FreshRSS...");
        let feeds = unless_cancelled(cancel, self.store.list_subscriptions())
            .await
            .context("Error getting list of existing feeds from FreshRSS")?;
        let existing = SubscriptionSet::from_feeds_matching(feeds, &self.release_feeds);
        info!(
            "Queried {} release feeds in FreshRSS ({} other subscriptions left alone) in {:.2}s",
            existing.len(),
            existing.foreign_count(),
            start_time.elapsed().as_secs_f64()
        );

        let starred = unless_cancelled(cancel, self.source.list_starred_repos())
            .await
            .context("Could not get starred repositories from GitHub")?;
        info!(
            "Queried {} starred repositories in GitHub in {:.2}s",
            starred.len(),
            start_time.elapsed().as_secs_f64()
        );

        Ok((starred, existing))
    }

    /// Run a complete pass
    pub async fn run_sync(&self, cancel: &CancellationToken) -> Result<SyncSummary> {
        let start_time = Instant::now();
        info!("Starting reconciliation pass");

        let (starred, existing) = self.gather(cancel).await?;

        let mut summary = self
            .reconciler
            .reconcile(&self.store, &self.prober, &starred, &existing, cancel)
            .await;
        summary.duration = start_time.elapsed();

        info!(
            "FreshRSS feeds synced with GitHub in {:.2}s: {} added, {} removed, {} skipped, {} failed, {} unchanged",
            summary.duration.as_secs_f64(),
            summary.added,
            summary.removed,
            summary.skipped,
            summary.failed,
            summary.unchanged
        );
        if summary.cancelled > 0 {
            warn!("{} actions were cancelled before completion", summary.cancelled);
        }

        Ok(summary)
    }

    /// Compute what a pass would do without changing anything
    pub async fn dry_run(&self, cancel: &CancellationToken) -> Result<SyncPlan> {
        info!("Running dry-run analysis");
        let (starred, existing) = self.gather(cancel).await?;
        Ok(SyncPlan::compute(&starred, &existing))
    }
}

async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    request: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("Reconciliation pass cancelled"),
        result = request => result,
    }
}
