//! Common test utilities and helpers for starfeed tests
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use starfeed::discovery::{starred_set, Repo, StarredSet};
use starfeed::{FeedProber, StarredRepoSource, SubscriptionStore};

/// Environment variables the binary reads; cleared for CLI tests
pub const STARFEED_ENV_VARS: &[&str] = &[
    "STARFEED_GITHUB_API_TOKEN",
    "STARFEED_FRESHRSS_URL",
    "STARFEED_FRESHRSS_USER",
    "STARFEED_FRESHRSS_API_TOKEN",
    "STARFEED_DEBUG_MODE",
    "STARFEED_SINGLE_RUN_MODE",
    "STARFEED_HTTP_TIMEOUT",
];

/// Test configuration helper
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("starfeed");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        Self {
            temp_dir,
            config_dir,
        }
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        let config_path = self.config_dir.join("config.yml");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    /// A config with GitHub set but FreshRSS missing
    pub fn create_minimal_config(&self) -> PathBuf {
        let pid_file = self.temp_dir.path().join("starfeed.pid");
        let config_content = format!(
            r#"
github:
  auth_method: "token"
  token: "ghp_test"
  api_url: "http://127.0.0.1:1"
daemon:
  interval: "1h"
  pid_file: "{}"
"#,
            pid_file.display()
        );
        self.create_test_config(&config_content)
    }
}

/// Starred set built from `owner/name` pairs
pub fn starred(names: &[&str]) -> StarredSet {
    starred_set(names.iter().map(|full_name| {
        let name = full_name.rsplit('/').next().unwrap_or(full_name);
        Repo::new(name, format!("https://github.com/{}", full_name))
    }))
}

pub fn feed(full_name: &str) -> String {
    format!("https://github.com/{}/releases.atom", full_name)
}

/// In-memory subscription store that tracks how many calls run at once
#[derive(Default)]
pub struct FakeStore {
    pub subscriptions: Mutex<HashSet<String>>,
    pub added: Mutex<Vec<(String, String, String)>>,
    pub removed: Mutex<Vec<String>>,
    pub fail_on: HashSet<String>,
    pub delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeStore {
    pub fn with_subscriptions(feeds: impl IntoIterator<Item = String>) -> Self {
        Self {
            subscriptions: Mutex::new(feeds.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, feed_url: impl Into<String>) -> Self {
        self.fail_on.insert(feed_url.into());
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn added_feeds(&self) -> Vec<String> {
        let mut feeds: Vec<_> = self
            .added
            .lock()
            .unwrap()
            .iter()
            .map(|(feed_url, _, _)| feed_url.clone())
            .collect();
        feeds.sort();
        feeds
    }

    pub fn removed_feeds(&self) -> Vec<String> {
        let mut feeds = self.removed.lock().unwrap().clone();
        feeds.sort();
        feeds
    }

    async fn track<T>(&self, feed_url: &str, apply: impl FnOnce() -> T) -> Result<T> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on.contains(feed_url) {
            bail!("FreshRSS returned an HTTP error code 500");
        }
        Ok(apply())
    }
}

#[async_trait]
impl SubscriptionStore for FakeStore {
    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<HashSet<String>> {
        Ok(self.subscriptions.lock().unwrap().clone())
    }

    async fn add_subscription(&self, feed_url: &str, display_name: &str, category: &str) -> Result<()> {
        self.track(feed_url, || {
            self.subscriptions.lock().unwrap().insert(feed_url.to_string());
            self.added.lock().unwrap().push((
                feed_url.to_string(),
                display_name.to_string(),
                category.to_string(),
            ));
        })
        .await
    }

    async fn remove_subscription(&self, feed_url: &str) -> Result<()> {
        self.track(feed_url, || {
            self.subscriptions.lock().unwrap().remove(feed_url);
            self.removed.lock().unwrap().push(feed_url.to_string());
        })
        .await
    }
}

/// Prober answering from a fixed set of feeds that have entries
#[derive(Default)]
pub struct FakeProber {
    pub with_entries: HashSet<String>,
    pub probes: AtomicUsize,
}

impl FakeProber {
    pub fn new(feeds: impl IntoIterator<Item = String>) -> Self {
        Self {
            with_entries: feeds.into_iter().collect(),
            probes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FeedProber for FakeProber {
    async fn has_entries(&self, feed_url: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.with_entries.contains(feed_url)
    }
}

/// Starred repositories that can change between passes
#[derive(Default)]
pub struct FakeSource {
    pub starred: Mutex<StarredSet>,
    /// Never answer, like a GitHub page walk stuck on a slow request
    pub hang: bool,
}

impl FakeSource {
    pub fn new(starred: StarredSet) -> Self {
        Self {
            starred: Mutex::new(starred),
            hang: false,
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn set(&self, starred: StarredSet) {
        *self.starred.lock().unwrap() = starred;
    }
}

#[async_trait]
impl StarredRepoSource for FakeSource {
    async fn list_starred_repos(&self) -> Result<StarredSet> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(self.starred.lock().unwrap().clone())
    }
}
