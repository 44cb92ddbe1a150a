//! Starred repository discovery and the feed-keyed sets reconciled each pass
//!
//! Both sides of a reconciliation are keyed by release feed URL. The starred
//! side comes from a [`StarredRepoSource`]; the subscription side is wrapped in
//! [`SubscriptionSet`], whose constructor drops every feed that does not look
//! like a GitHub release feed so that unrelated subscriptions can never be
//! scheduled for removal.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::config::DEFAULT_GITHUB_WEB_ROOT;

/// Path suffix GitHub serves release Atom feeds under
pub const RELEASES_FEED_SUFFIX: &str = "/releases.atom";

/// A starred repository and its release feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    /// Repository name, used as the subscription title
    pub name: String,

    /// Web URL, e.g. "https://github.com/tokio-rs/tokio"
    pub html_url: String,

    /// Release feed derived from `html_url`
    pub feed_url: String,
}

impl Repo {
    pub fn new(name: impl Into<String>, html_url: impl Into<String>) -> Self {
        let html_url = html_url.into();
        let feed_url = release_feed_url(&html_url);
        Self {
            name: name.into(),
            html_url,
            feed_url,
        }
    }
}

/// Release feed URL for a repository web URL
pub fn release_feed_url(html_url: &str) -> String {
    format!("{}{}", html_url.trim_end_matches('/'), RELEASES_FEED_SUFFIX)
}

/// Recognizes release feed URLs of a single GitHub web root
///
/// Owner and repository segments are limited to ASCII word characters, dots
/// and hyphens. Anything else is a foreign subscription.
#[derive(Debug, Clone)]
pub struct ReleaseFeedFilter {
    web_root: String,
    pattern: Regex,
}

impl ReleaseFeedFilter {
    /// Filter for feeds under `web_root`, e.g. "https://ghe.example.com"
    pub fn for_web_root(web_root: &str) -> Result<Self> {
        let web_root = web_root.trim_end_matches('/').to_string();
        let pattern = Regex::new(&format!(
            r"^{}/[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+/releases\.atom$",
            regex::escape(&web_root)
        ))
        .with_context(|| format!("Invalid release feed pattern for {}", web_root))?;

        Ok(Self { web_root, pattern })
    }

    /// Filter for github.com
    pub fn github() -> &'static Self {
        static GITHUB: OnceLock<ReleaseFeedFilter> = OnceLock::new();
        GITHUB.get_or_init(|| Self {
            web_root: DEFAULT_GITHUB_WEB_ROOT.to_string(),
            pattern: Regex::new(r"^https://github\.com/[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+/releases\.atom$")
                .expect("release feed pattern is valid"),
        })
    }

    pub fn web_root(&self) -> &str {
        &self.web_root
    }

    pub fn matches(&self, feed_url: &str) -> bool {
        self.pattern.is_match(feed_url)
    }
}

/// Whether a feed URL has the shape of a github.com release feed
pub fn is_release_feed(feed_url: &str) -> bool {
    ReleaseFeedFilter::github().matches(feed_url)
}

/// Starred repositories keyed by release feed URL
pub type StarredSet = HashMap<String, Repo>;

/// Build a [`StarredSet`]; later duplicates of the same feed win
pub fn starred_set(repos: impl IntoIterator<Item = Repo>) -> StarredSet {
    repos
        .into_iter()
        .map(|repo| (repo.feed_url.clone(), repo))
        .collect()
}

/// Existing subscriptions that are candidates for reconciliation
///
/// Only release feeds survive construction. Foreign subscriptions are counted
/// but never stored.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    feeds: HashSet<String>,
    foreign: usize,
}

impl SubscriptionSet {
    /// Keep github.com release feeds, drop (and count) everything else
    pub fn from_feeds(feeds: impl IntoIterator<Item = String>) -> Self {
        Self::from_feeds_matching(feeds, ReleaseFeedFilter::github())
    }

    /// Keep feeds accepted by `filter`, drop (and count) everything else
    pub fn from_feeds_matching(
        feeds: impl IntoIterator<Item = String>,
        filter: &ReleaseFeedFilter,
    ) -> Self {
        let mut set = Self::default();
        for feed in feeds {
            if filter.matches(&feed) {
                set.feeds.insert(feed);
            } else {
                tracing::debug!("Ignoring foreign subscription: {}", feed);
                set.foreign += 1;
            }
        }
        set
    }

    pub fn contains(&self, feed_url: &str) -> bool {
        self.feeds.contains(feed_url)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.feeds.iter()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Number of subscriptions dropped by the release feed filter
    pub fn foreign_count(&self) -> usize {
        self.foreign
    }
}

/// Source of the user's starred repositories
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StarredRepoSource: Send + Sync {
    /// Every starred repository, keyed by release feed URL
    async fn list_starred_repos(&self) -> Result<StarredSet>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_url_derivation() {
        let repo = Repo::new("tokio", "https://github.com/tokio-rs/tokio");
        assert_eq!(repo.feed_url, "https://github.com/tokio-rs/tokio/releases.atom");

        let trailing = Repo::new("tokio", "https://github.com/tokio-rs/tokio/");
        assert_eq!(trailing.feed_url, repo.feed_url);
    }

    #[test]
    fn test_release_feed_shape() {
        assert!(is_release_feed("https://github.com/tokio-rs/tokio/releases.atom"));
        assert!(is_release_feed("https://github.com/some.org/my_repo.rs/releases.atom"));

        assert!(!is_release_feed("https://example.com/feed.xml"));
        assert!(!is_release_feed("http://github.com/tokio-rs/tokio/releases.atom"));
        assert!(!is_release_feed("https://github.com/tokio-rs/tokio/commits.atom"));
        assert!(!is_release_feed("https://github.com/tokio-rs/releases.atom"));
        assert!(!is_release_feed("https://github.com/a/b/c/releases.atom"));
        assert!(!is_release_feed("https://github.com/a b/c/releases.atom"));
        assert!(!is_release_feed("https://github.com/a/b/releases.atom?x=1"));
        assert!(!is_release_feed("https://github.com/ünïcode/repo/releases.atom"));
        assert!(!is_release_feed("https://github.com/owner/répo/releases.atom"));
        assert!(!is_release_feed("https://ghe.example.com/o/r/releases.atom"));
    }

    #[test]
    fn test_enterprise_filter() {
        let filter = ReleaseFeedFilter::for_web_root("https://ghe.example.com/").unwrap();
        assert_eq!(filter.web_root(), "https://ghe.example.com");

        assert!(filter.matches("https://ghe.example.com/o/r/releases.atom"));
        assert!(!filter.matches("https://github.com/o/r/releases.atom"));
        assert!(!filter.matches("https://gheXexample.com/o/r/releases.atom"));
        assert!(!filter.matches("https://ghe.example.com.evil.io/o/r/releases.atom"));

        let feed = Repo::new("r", "https://ghe.example.com/o/r").feed_url;
        let set = SubscriptionSet::from_feeds_matching(
            vec![feed.clone(), "https://github.com/o/r/releases.atom".to_string()],
            &filter,
        );
        assert!(set.contains(&feed));
        assert_eq!(set.foreign_count(), 1);
    }

    #[test]
    fn test_github_filter_agrees_with_web_root_filter() {
        let built = ReleaseFeedFilter::for_web_root(DEFAULT_GITHUB_WEB_ROOT).unwrap();
        for url in [
            "https://github.com/tokio-rs/tokio/releases.atom",
            "https://github.com/ünïcode/repo/releases.atom",
            "https://github.com/a/b/c/releases.atom",
        ] {
            assert_eq!(built.matches(url), is_release_feed(url), "{}", url);
        }
    }

    #[test]
    fn test_subscription_set_drops_foreign_feeds() {
        let set = SubscriptionSet::from_feeds(vec![
            "https://github.com/a/b/releases.atom".to_string(),
            "https://example.com/feed.xml".to_string(),
            "https://blog.rust-lang.org/feed.xml".to_string(),
        ]);

        assert_eq!(set.len(), 1);
        assert_eq!(set.foreign_count(), 2);
        assert!(set.contains("https://github.com/a/b/releases.atom"));
        assert!(!set.contains("https://example.com/feed.xml"));
    }

    #[test]
    fn test_starred_set_is_keyed_by_feed() {
        let set = starred_set(vec![
            Repo::new("tokio", "https://github.com/tokio-rs/tokio"),
            Repo::new("serde", "https://github.com/serde-rs/serde"),
        ]);

        assert_eq!(set.len(), 2);
        assert_eq!(
            set["https://github.com/serde-rs/serde/releases.atom"].name,
            "serde"
        );
    }
}
