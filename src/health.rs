//! System health checks for starfeed
//!
//! Preflight checks verifying the configuration and both remote services
//! before running a pass.

use crate::freshrss::{FreshRssClient, SubscriptionStore};
use crate::{Config, GitHubClient};

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Configuration completeness
    pub config: CheckResult,
    /// GitHub authentication status
    pub github_auth: CheckResult,
    /// FreshRSS authentication status
    pub freshrss_auth: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub async fn run(config: &Config) -> Self {
        Self {
            config: Self::check_config(config),
            github_auth: Self::check_github_auth(config).await,
            freshrss_auth: Self::check_freshrss_auth(config).await,
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.config.passed && self.github_auth.passed && self.freshrss_auth.passed
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        [&self.config, &self.github_auth, &self.freshrss_auth]
            .into_iter()
            .filter(|r| r.is_warning)
            .collect()
    }

    fn check_config(config: &Config) -> CheckResult {
        match config.validate() {
            Ok(()) if config.sync.max_parallel == 0 => CheckResult::warning_with_details(
                "Configuration is valid",
                "sync.max_parallel is 0; passes run one action at a time",
            ),
            Ok(()) => CheckResult::ok_with_details(
                "Configuration is valid",
                format!(
                    "FreshRSS: {}, interval: {}, max parallel: {}",
                    config.freshrss.url.as_deref().unwrap_or_default(),
                    config.daemon.interval,
                    config.max_parallel()
                ),
            ),
            Err(e) => CheckResult::error_with_details("Configuration is incomplete", e.to_string()),
        }
    }

    /// Check GitHub authentication
    async fn check_github_auth(config: &Config) -> CheckResult {
        let client = match GitHubClient::new(config) {
            Ok(client) => client,
            Err(e) => {
                return CheckResult::error_with_details(
                    "GitHub authentication not configured",
                    format!("{:#}", e),
                )
            }
        };

        match client.login().await {
            Ok(login) => CheckResult::ok_with_details(
                "GitHub authentication successful",
                format!("Username: {} ({:?})", login, client.strategy()),
            ),
            Err(e) => CheckResult::error_with_details(
                "GitHub authentication failed",
                format!("{:#}", e),
            ),
        }
    }

    /// Check FreshRSS credentials with a ClientLogin round trip
    async fn check_freshrss_auth(config: &Config) -> CheckResult {
        let client = match FreshRssClient::new(config) {
            Ok(client) => client,
            Err(e) => {
                return CheckResult::error_with_details(
                    "FreshRSS not configured",
                    format!("{:#}", e),
                )
            }
        };

        match client.authenticate().await {
            Ok(()) => CheckResult::ok_with_details(
                "FreshRSS authentication successful",
                format!(
                    "User: {}",
                    config.freshrss.user.as_deref().unwrap_or_default()
                ),
            ),
            Err(e) => CheckResult::error_with_details(
                "FreshRSS authentication failed",
                format!("{:#}", e),
            ),
        }
    }

    /// Get all checks for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 3] {
        [
            ("Configuration", &self.config),
            ("GitHub Authentication", &self.github_auth),
            ("FreshRSS Authentication", &self.freshrss_auth),
        ]
    }
}
