//! Atom feed probing
//!
//! A release feed is only worth subscribing to once it has at least one entry.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Duration;
use tracing::{debug, error};

/// Tells whether a feed currently has entries
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedProber: Send + Sync {
    /// Never fails: unreachable or malformed feeds count as empty
    async fn has_entries(&self, feed_url: &str) -> bool;
}

/// Fetches feeds over HTTP and inspects the Atom document
#[derive(Clone)]
pub struct AtomFeedProber {
    client: reqwest::Client,
}

impl AtomFeedProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("starfeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client for feed probing")?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, feed_url: &str) -> Result<String> {
        let response = self
            .client
            .get(feed_url)
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("feed returned HTTP {}", status);
        }

        response.text().await.context("failed to read response body")
    }
}

#[async_trait]
impl FeedProber for AtomFeedProber {
    async fn has_entries(&self, feed_url: &str) -> bool {
        let body = match self.fetch(feed_url).await {
            Ok(body) => body,
            Err(e) => {
                error!("Error fetching Atom feed {}: {:#}", feed_url, e);
                return false;
            }
        };

        match count_entries(&body) {
            Ok(entries) => {
                debug!("Feed {} has {} entries", feed_url, entries);
                entries > 0
            }
            Err(e) => {
                error!("Error parsing Atom feed {}: {:#}", feed_url, e);
                false
            }
        }
    }
}

/// Count `<entry>` children of an Atom `<feed>` root
pub fn count_entries(xml: &str) -> Result<usize> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut saw_feed = false;
    let mut entries = 0;

    loop {
        match reader.read_event().context("malformed XML")? {
            Event::Start(element) => {
                let name = element.local_name();
                if depth == 0 {
                    if name.as_ref() != b"feed" {
                        bail!(
                            "root element is <{}>, expected <feed>",
                            String::from_utf8_lossy(name.as_ref())
                        );
                    }
                    saw_feed = true;
                } else if depth == 1 && name.as_ref() == b"entry" {
                    entries += 1;
                }
                depth += 1;
            }
            Event::Empty(element) => {
                let name = element.local_name();
                if depth == 0 {
                    if name.as_ref() != b"feed" {
                        bail!("root element is not <feed>");
                    }
                    saw_feed = true;
                } else if depth == 1 && name.as_ref() == b"entry" {
                    entries += 1;
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_feed {
        bail!("document has no <feed> element");
    }

    Ok(entries)
}
