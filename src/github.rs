use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use octocrab::models::Repository;
use octocrab::Octocrab;
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery::{Repo, StarredRepoSource, StarredSet};

/// GitHub client wrapper with authentication management
#[derive(Clone)]
pub struct GitHubClient {
    client: Octocrab,
    strategy: AuthStrategy,
}

/// GitHub authentication strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Token from the config file or STARFEED_GITHUB_API_TOKEN
    ConfiguredToken,
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use GITHUB_TOKEN environment variable
    EnvironmentToken,
}

impl GitHubClient {
    /// Create a new GitHub client with automatic authentication
    pub fn new(config: &Config) -> Result<Self> {
        let (strategy, token) = Self::detect_authentication(config)?;

        info!("Using GitHub authentication strategy: {:?}", strategy);

        let client = Self::build_client(token, config.github.api_url.as_deref())?;

        Ok(Self { client, strategy })
    }

    fn build_client(token: String, base_uri: Option<&str>) -> Result<Octocrab> {
        let mut builder = Octocrab::builder();
        if let Some(base_uri) = base_uri {
            builder = builder
                .base_uri(base_uri)
                .with_context(|| format!("Invalid GitHub API base URI: {}", base_uri))?;
        }
        builder
            .personal_token(token)
            .build()
            .context("Failed to create GitHub client")
    }

    /// Create a client against a custom API root (GitHub Enterprise, tests)
    pub fn with_base_uri(token: String, base_uri: &str) -> Result<Self> {
        let client = Self::build_client(token, Some(base_uri))?;

        Ok(Self {
            client,
            strategy: AuthStrategy::ConfiguredToken,
        })
    }

    pub fn strategy(&self) -> &AuthStrategy {
        &self.strategy
    }

    /// Detect and obtain GitHub authentication
    fn detect_authentication(config: &Config) -> Result<(AuthStrategy, String)> {
        let configured = config
            .github
            .token
            .clone()
            .filter(|token| !token.is_empty());

        match config.github.auth_method.as_str() {
            "auto" => {
                if let Some(token) = configured {
                    Ok((AuthStrategy::ConfiguredToken, token))
                } else if let Ok(token) = Self::try_github_cli() {
                    Ok((AuthStrategy::GitHubCLI, token))
                } else if let Ok(token) = Self::try_environment_token() {
                    Ok((AuthStrategy::EnvironmentToken, token))
                } else {
                    Err(anyhow!(
                        "No GitHub authentication found. Please either:\n\
                         1. Set STARFEED_GITHUB_API_TOKEN or github.token in the config\n\
                         2. Install and authenticate GitHub CLI: gh auth login\n\
                         3. Set GITHUB_TOKEN environment variable"
                    ))
                }
            }
            "gh_cli" => {
                let token = Self::try_github_cli()
                    .context("GitHub CLI authentication failed. Run: gh auth login")?;
                Ok((AuthStrategy::GitHubCLI, token))
            }
            "token" => match configured {
                Some(token) => Ok((AuthStrategy::ConfiguredToken, token)),
                None => {
                    let token = Self::try_environment_token()
                        .context("No GitHub token configured and GITHUB_TOKEN is not set")?;
                    Ok((AuthStrategy::EnvironmentToken, token))
                }
            },
            other => Err(anyhow!("Unknown auth method: {}", other)),
        }
    }

    /// Try to get token from GitHub CLI
    fn try_github_cli() -> Result<String> {
        debug!("Attempting GitHub CLI authentication");

        let token_output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .context("GitHub CLI (gh) is not installed")?;

        if !token_output.status.success() {
            return Err(anyhow!(
                "Failed to retrieve token from GitHub CLI: {}",
                String::from_utf8_lossy(&token_output.stderr)
            ));
        }

        let token = String::from_utf8(token_output.stdout)
            .context("GitHub CLI token is not valid UTF-8")?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(anyhow!("GitHub CLI returned empty token"));
        }

        debug!("Successfully obtained token from GitHub CLI");
        Ok(token)
    }

    /// Try to get token from environment variable
    fn try_environment_token() -> Result<String> {
        debug!("Attempting environment variable authentication");

        let token = env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;

        if token.is_empty() {
            return Err(anyhow!("GITHUB_TOKEN is empty"));
        }

        if !token.starts_with("ghp_")
            && !token.starts_with("gho_")
            && !token.starts_with("ghs_")
            && !token.starts_with("github_pat_")
        {
            warn!("GITHUB_TOKEN doesn't look like a valid GitHub token");
        }

        Ok(token)
    }

    /// Login of the token owner
    pub async fn login(&self) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct Login {
            login: String,
        }

        let user: Login = self
            .client
            .get("/user", None::<&()>)
            .await
            .context("Failed to get current user information. Check your authentication.")?;
        Ok(user.login)
    }

    /// Every repository starred by the authenticated user, following pagination links
    pub async fn list_starred_repositories(&self) -> Result<Vec<Repository>> {
        debug!("Fetching starred repositories");

        let mut page = self
            .client
            .current()
            .list_repos_starred_by_authenticated_user()
            .per_page(100)
            .send()
            .await
            .context("Failed to fetch starred repositories")?;

        let mut repositories = page.take_items();
        let mut page_number = 1;

        while let Some(next) = self
            .client
            .get_page::<Repository>(&page.next)
            .await
            .with_context(|| format!("Failed to fetch starred repositories page {}", page_number + 1))?
        {
            page_number += 1;
            debug!("Fetched starred repositories page {}", page_number);
            page = next;
            repositories.extend(page.take_items());
        }

        info!("Found {} starred repositories", repositories.len());
        Ok(repositories)
    }
}

/// Convert an octocrab repository into a [`Repo`], if it has a web URL
pub fn repo_from_model(repo: &Repository) -> Option<Repo> {
    repo.html_url
        .as_ref()
        .map(|url| Repo::new(repo.name.clone(), url.as_str()))
}

#[async_trait]
impl StarredRepoSource for GitHubClient {
    async fn list_starred_repos(&self) -> Result<StarredSet> {
        let repositories = self.list_starred_repositories().await?;

        let mut starred = StarredSet::with_capacity(repositories.len());
        for repository in &repositories {
            match repo_from_model(repository) {
                Some(repo) => {
                    starred.insert(repo.feed_url.clone(), repo);
                }
                None => warn!("Skipping starred repository without html_url: {}", repository.name),
            }
        }

        Ok(starred)
    }
}
