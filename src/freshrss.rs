//! FreshRSS subscription management over the Google Reader compatible API

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::Config;

/// Remote store of feed subscriptions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Obtain the session token every other call depends on
    async fn authenticate(&self) -> Result<()>;

    /// Feed URLs of every current subscription
    async fn list_subscriptions(&self) -> Result<HashSet<String>>;

    /// Subscribe to a feed and file it under `category` with a display name
    async fn add_subscription(&self, feed_url: &str, display_name: &str, category: &str) -> Result<()>;

    /// Unsubscribe from a feed
    async fn remove_subscription(&self, feed_url: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuickAddResponse {
    #[serde(default)]
    num_results: u32,
    stream_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionList {
    #[serde(default)]
    subscriptions: Vec<Subscription>,
}

/// A subscription as listed by FreshRSS
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Stream id, e.g. "feed/42"
    #[serde(default)]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// FreshRSS API client
pub struct FreshRssClient {
    client: reqwest::Client,
    base_url: String,
    user: String,
    api_token: String,
    auth_token: RwLock<Option<String>>,
}

impl fmt::Debug for FreshRssClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreshRssClient")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl FreshRssClient {
    /// Create a client from validated configuration
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .freshrss
            .url
            .clone()
            .context("freshrss.url is not configured")?;
        let user = config
            .freshrss
            .user
            .clone()
            .context("freshrss.user is not configured")?;
        let api_token = config
            .freshrss
            .api_token
            .clone()
            .context("freshrss.api_token is not configured")?;

        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("starfeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client for FreshRSS")?;

        Ok(Self::with_client(client, base_url, user, api_token))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        user: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            api_token: api_token.into(),
            auth_token: RwLock::new(None),
        }
    }

    /// Convenience constructor with a plain timeout-bound client
    pub fn connect(
        base_url: impl Into<String>,
        user: impl Into<String>,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for FreshRSS")?;
        Ok(Self::with_client(client, base_url, user, api_token))
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/greader.php/{}", self.base_url, path)
    }

    fn auth_header(&self) -> Result<String> {
        let guard = self
            .auth_token
            .read()
            .map_err(|_| anyhow!("FreshRSS auth token lock poisoned"))?;
        match guard.as_deref() {
            Some(token) => Ok(format!("GoogleLogin auth={}", token)),
            None => bail!("Not authenticated with FreshRSS"),
        }
    }

    /// POST a form, optionally authenticated, returning the body of a 200/201 response
    async fn post_form(&self, url: &str, form: &[(&str, &str)], authenticated: bool) -> Result<String> {
        let mut request = self.client.post(url).form(form);
        if authenticated {
            request = request.header(reqwest::header::AUTHORIZATION, self.auth_header()?);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to FreshRSS failed: {}", url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read FreshRSS response body")?;

        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            debug!("FreshRSS error response: {}", body);
            bail!("FreshRSS returned an HTTP error code {}", status.as_u16());
        }

        Ok(body)
    }

    /// Every subscription with its stream id and title
    pub async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        let url = self.api_url("reader/api/0/subscription/list?output=json");
        let body = self.post_form(&url, &[], true).await?;

        let list: SubscriptionList =
            serde_json::from_str(&body).context("Failed to parse FreshRSS subscription list")?;
        Ok(list.subscriptions)
    }

    async fn edit_subscription(&self, form: &[(&str, &str)]) -> Result<()> {
        let url = self.api_url("reader/api/0/subscription/edit");
        self.post_form(&url, form, true).await?;
        Ok(())
    }
}

/// Extract the token from a ClientLogin response (`SID=..\nAuth=..\n`)
pub fn parse_auth_response(body: &str) -> Option<String> {
    body.lines()
        .filter_map(|line| line.trim().strip_prefix("Auth="))
        .filter(|token| !token.is_empty())
        .last()
        .map(str::to_string)
}

#[async_trait]
impl SubscriptionStore for FreshRssClient {
    async fn authenticate(&self) -> Result<()> {
        let url = self.api_url("accounts/ClientLogin");
        debug!("Authenticating with FreshRSS at {}", url);

        let body = self
            .post_form(&url, &[("Email", self.user.as_str()), ("Passwd", self.api_token.as_str())], false)
            .await
            .context("FreshRSS authentication request failed")?;

        let token = parse_auth_response(&body).context("Unable to parse FreshRSS auth response")?;

        *self
            .auth_token
            .write()
            .map_err(|_| anyhow!("FreshRSS auth token lock poisoned"))? = Some(token);

        info!("Authenticated with FreshRSS as {}", self.user);
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<HashSet<String>> {
        let subscriptions = self.subscriptions().await?;
        Ok(subscriptions.into_iter().map(|s| s.url).collect())
    }

    async fn add_subscription(&self, feed_url: &str, display_name: &str, category: &str) -> Result<()> {
        let url = self.api_url("reader/api/0/subscription/quickadd");
        let body = self.post_form(&url, &[("quickadd", feed_url)], true).await?;

        let added: QuickAddResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Unable to parse FreshRSS quickadd response: {}", e);
            anyhow!("Failed to parse FreshRSS quickadd response: {}", e)
        })?;

        let stream_id = added
            .stream_id
            .filter(|id| !id.is_empty())
            .with_context(|| format!("FreshRSS did not return a stream id ({} results)", added.num_results))?;

        let label = format!("user/{}/label/{}", self.user, category);
        self.edit_subscription(&[
            ("ac", "edit"),
            ("s", stream_id.as_str()),
            ("t", display_name),
            ("a", label.as_str()),
        ])
        .await
        .context("Failed to add feed to category")?;

        info!("Added feed {} to FreshRSS", feed_url);
        Ok(())
    }

    async fn remove_subscription(&self, feed_url: &str) -> Result<()> {
        let stream = format!("feed/{}", feed_url);
        self.edit_subscription(&[("ac", "unsubscribe"), ("s", stream.as_str())])
            .await?;

        info!("Removed feed {} from FreshRSS", feed_url);
        Ok(())
    }
}
