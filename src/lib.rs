//! starfeed - GitHub stars to FreshRSS release feed synchronization
//!
//! starfeed subscribes a FreshRSS instance to the release Atom feed of every
//! repository you starred on GitHub, and unsubscribes feeds of repositories
//! you have since unstarred.
//!
//! ## Core Features
//!
//! - **Stateless Reconciliation**: every pass diffs GitHub stars against FreshRSS
//! - **Safe Removal**: subscriptions that are not GitHub release feeds are never touched
//! - **Bounded Concurrency**: add/remove actions run in parallel under a configurable limit
//! - **Daemon Mode**: periodic passes with graceful shutdown
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and environment overrides
//! - [`discovery`]: Starred repositories and feed-keyed sets
//! - [`github`]: GitHub API integration and authentication
//! - [`feed`]: Atom feed probing
//! - [`freshrss`]: FreshRSS subscription management
//! - [`sync`]: The reconciler and sync engine

pub mod config;
pub mod daemon;
pub mod discovery;
pub mod feed;
pub mod freshrss;
pub mod github;
pub mod health;
pub mod sync;

pub use config::Config;
pub use daemon::Daemon;
pub use discovery::{Repo, StarredRepoSource, StarredSet, SubscriptionSet};
pub use feed::{AtomFeedProber, FeedProber};
pub use freshrss::{FreshRssClient, SubscriptionStore};
pub use github::GitHubClient;
pub use health::HealthCheck;
pub use sync::{Reconciler, SyncEngine, SyncPlan, SyncResult, SyncSummary};
