use anyhow::{anyhow, bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables recognised on top of the YAML file
pub const GITHUB_TOKEN_ENV: &str = "STARFEED_GITHUB_API_TOKEN";
pub const FRESHRSS_URL_ENV: &str = "STARFEED_FRESHRSS_URL";
pub const FRESHRSS_USER_ENV: &str = "STARFEED_FRESHRSS_USER";
pub const FRESHRSS_TOKEN_ENV: &str = "STARFEED_FRESHRSS_API_TOKEN";
pub const DEBUG_MODE_ENV: &str = "STARFEED_DEBUG_MODE";
pub const SINGLE_RUN_MODE_ENV: &str = "STARFEED_SINGLE_RUN_MODE";
pub const HTTP_TIMEOUT_ENV: &str = "STARFEED_HTTP_TIMEOUT";

pub const DEFAULT_GITHUB_WEB_ROOT: &str = "https://github.com";

/// Main configuration structure for starfeed
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// GitHub authentication settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// FreshRSS instance settings
    #[serde(default)]
    pub freshrss: FreshRssConfig,

    /// Reconciliation behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token"

    /// Personal access token, takes precedence over GITHUB_TOKEN
    #[serde(default)]
    pub token: Option<String>,

    /// API root for GitHub Enterprise; api.github.com when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

/// FreshRSS configuration
#[derive(Deserialize, Serialize, Clone)]
pub struct FreshRssConfig {
    /// Base URL of the FreshRSS instance, e.g. "https://rss.example.com"
    #[serde(default)]
    pub url: Option<String>,

    /// FreshRSS user name
    #[serde(default)]
    pub user: Option<String>,

    /// API password configured in the FreshRSS profile
    #[serde(default)]
    pub api_token: Option<String>,

    /// Category new release feeds are filed under
    #[serde(default = "default_category")]
    pub category: String,
}

/// Reconciliation configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Maximum simultaneous requests against FreshRSS and feed hosts
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// Time between reconciliation passes
    #[serde(default = "default_interval")]
    pub interval: String, // "24h"

    /// Exit after the first pass
    #[serde(default)]
    pub single_run: bool,

    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Log file location
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "full", "pretty"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_category() -> String {
    "Github".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_parallel() -> usize {
    4
}
fn default_timeout() -> u64 {
    10
}
fn default_interval() -> String {
    "24h".to_string()
}
fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/starfeed.pid", runtime_dir)
    } else {
        "/tmp/starfeed.pid".to_string()
    }
}

fn default_log_file() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/starfeed/daemon.log", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/starfeed/daemon.log", home)
    } else {
        "/tmp/starfeed-daemon.log".to_string()
    }
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            auth_method: default_auth_method(),
            token: None,
            api_url: None,
        }
    }
}

impl Default for FreshRssConfig {
    fn default() -> Self {
        Self {
            url: None,
            user: None,
            api_token: None,
            category: default_category(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            timeout: default_timeout(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            single_run: false,
            pid_file: default_pid_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

// Tokens stay out of logs and panic messages.
impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("auth_method", &self.auth_method)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl fmt::Debug for FreshRssConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreshRssConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("category", &self.category)
            .finish()
    }
}

/// Source of environment overrides, swappable in tests
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads overrides from the process environment
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.is_empty())
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        let mut config = if config_path.exists() {
            Self::read(&config_path)?
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            config
        };

        config.apply_env(&ProcessEnv);
        Ok(config)
    }

    /// Load configuration from a specific file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env(&ProcessEnv);
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("starfeed").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.daemon.pid_file = shellexpand::full(&self.daemon.pid_file)
            .context("Failed to expand pid_file path")?
            .into_owned();

        self.daemon.log_file = shellexpand::full(&self.daemon.log_file)
            .context("Failed to expand log_file path")?
            .into_owned();

        Ok(())
    }

    /// Overlay STARFEED_* environment variables onto the loaded file
    pub fn apply_env(&mut self, env: &dyn EnvSource) {
        if let Some(token) = env.get(GITHUB_TOKEN_ENV) {
            self.github.token = Some(token);
        }
        if let Some(url) = env.get(FRESHRSS_URL_ENV) {
            self.freshrss.url = Some(url);
        }
        if let Some(user) = env.get(FRESHRSS_USER_ENV) {
            self.freshrss.user = Some(user);
        }
        if let Some(token) = env.get(FRESHRSS_TOKEN_ENV) {
            self.freshrss.api_token = Some(token);
        }
        if env.get(DEBUG_MODE_ENV).as_deref() == Some("true") {
            self.logging.level = "debug".to_string();
        }
        if env.get(SINGLE_RUN_MODE_ENV).as_deref() == Some("true") {
            self.daemon.single_run = true;
        }
        // Invalid or non-positive timeouts keep the configured value
        if let Some(secs) = env
            .get(HTTP_TIMEOUT_ENV)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
        {
            self.sync.timeout = secs;
        }
    }

    /// Check that everything a reconciliation pass needs is present
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.freshrss.url.as_deref().map_or(true, str::is_empty) {
            missing.push("freshrss.url");
        }
        if self.freshrss.user.as_deref().map_or(true, str::is_empty) {
            missing.push("freshrss.user");
        }
        if self.freshrss.api_token.as_deref().map_or(true, str::is_empty) {
            missing.push("freshrss.api_token");
        }
        if !missing.is_empty() {
            bail!(
                "Missing required configuration: {} (set them in the config file or via {}, {}, {})",
                missing.join(", "),
                FRESHRSS_URL_ENV,
                FRESHRSS_USER_ENV,
                FRESHRSS_TOKEN_ENV
            );
        }

        if self.sync.timeout == 0 {
            bail!("sync.timeout must be greater than zero");
        }

        self.daemon_interval()?;
        self.github_web_root()?;
        Ok(())
    }

    /// Web root repositories live under, derived from `github.api_url`
    ///
    /// `https://api.github.com` and an unset API URL map to
    /// `https://github.com`; an Enterprise API root such as
    /// `https://ghe.example.com/api/v3` maps to `https://ghe.example.com`.
    pub fn github_web_root(&self) -> Result<String> {
        let Some(api_url) = self.github.api_url.as_deref() else {
            return Ok(DEFAULT_GITHUB_WEB_ROOT.to_string());
        };

        let url = reqwest::Url::parse(api_url)
            .with_context(|| format!("Invalid github.api_url: {}", api_url))?;
        let host = url
            .host_str()
            .with_context(|| format!("github.api_url has no host: {}", api_url))?;
        let host = host.strip_prefix("api.").unwrap_or(host);

        Ok(match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        })
    }

    /// HTTP request timeout for all outbound calls
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.timeout)
    }

    /// Concurrency limit for a pass, never below one
    pub fn max_parallel(&self) -> usize {
        self.sync.max_parallel.max(1)
    }

    /// Parsed interval between daemon passes
    pub fn daemon_interval(&self) -> Result<Duration> {
        let secs = parse_duration(&self.daemon.interval)
            .with_context(|| format!("Invalid daemon interval: {:?}", self.daemon.interval))?;
        if secs == 0 {
            return Err(anyhow!("Daemon interval must be greater than zero"));
        }
        Ok(Duration::from_secs(secs))
    }
}

/// Parse duration strings like "30m", "1h", "2d" into seconds
pub fn parse_duration(duration_str: &str) -> Result<u64> {
    let duration_str = duration_str.trim().to_lowercase();

    let (value, unit, kind) = if let Some(value) = duration_str.strip_suffix('s') {
        (value, 1, "seconds")
    } else if let Some(value) = duration_str.strip_suffix('m') {
        (value, 60, "minutes")
    } else if let Some(value) = duration_str.strip_suffix('h') {
        (value, 3600, "hours")
    } else if let Some(value) = duration_str.strip_suffix('d') {
        (value, 86400, "days")
    } else {
        return duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30m', '1h', '2d'");
    };

    value
        .parse::<u64>()
        .with_context(|| format!("Invalid {} value", kind))?
        .checked_mul(unit)
        .with_context(|| format!("Duration too large: {}", duration_str))
}
