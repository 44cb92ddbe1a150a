use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use starfeed::daemon::is_daemon_running;
use starfeed::discovery::ReleaseFeedFilter;
use starfeed::{Config, Daemon, HealthCheck, StarredRepoSource, SubscriptionStore, SyncEngine, SyncResult};

#[derive(Parser)]
#[command(name = "starfeed")]
#[command(about = "Keep FreshRSS release-feed subscriptions in sync with your GitHub stars")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single reconciliation pass
    Sync {
        /// Show what would change without touching FreshRSS
        #[arg(long)]
        dry_run: bool,
    },

    /// List starred repositories and their release feeds
    List,

    /// List FreshRSS subscriptions, marking the ones starfeed manages
    Subscriptions,

    /// Run as daemon
    Daemon {
        #[command(subcommand)]
        daemon_command: DaemonCommands,
    },

    /// System health check and diagnostics
    Doctor,
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the periodic reconciliation daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop running daemon
    Stop,

    /// Show daemon status
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // Forking must happen before the async runtime starts its threads
    #[cfg(unix)]
    if let Commands::Daemon {
        daemon_command: DaemonCommands::Start { foreground: false },
    } = &cli.command
    {
        if is_daemon_running(&config)? {
            println!("⚠️  Daemon is already running!");
            println!("   Use 'starfeed daemon stop' to stop it first");
            return Ok(());
        }
        config.validate()?;

        println!("🚀 Starting starfeed daemon in the background");
        println!("   PID file: {}", config.daemon.pid_file);
        println!("   Log file: {}", config.daemon.log_file);
        println!("   Interval: {}", config.daemon.interval);
        Daemon::new(config.clone())?.daemonize()?;
    }

    init_logging(cli.verbose, &config)?;
    info!("Starting starfeed v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Sync { dry_run } => cmd_sync(dry_run, &config).await,
        Commands::List => cmd_list(&config).await,
        Commands::Subscriptions => cmd_subscriptions(&config).await,
        Commands::Daemon { daemon_command } => cmd_daemon(daemon_command, config).await,
        Commands::Doctor => cmd_doctor(&config).await,
    }
}

/// Initialize logging based on verbosity level and configuration
fn init_logging(verbose: bool, config: &Config) -> Result<()> {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let layer = fmt::layer().with_ansi(config.logging.color);
    let registry = tracing_subscriber::registry().with(filter);

    match config.logging.format.as_str() {
        "pretty" => registry.with(layer.pretty()).init(),
        "full" => registry.with(layer).init(),
        _ => registry.with(layer.compact()).init(),
    }

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Cancel the token on Ctrl+C so a one-shot pass stops promptly
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt signal, shutting down...");
            token.cancel();
        }
    });
    cancel
}

/// Run one reconciliation pass
async fn cmd_sync(dry_run: bool, config: &Config) -> Result<()> {
    let engine = SyncEngine::from_config(config)?;

    if dry_run {
        println!("🔍 Dry run mode - computing changes");
        let plan = engine.dry_run(&cancel_on_ctrl_c()).await?;

        for repo in &plan.additions {
            println!("   📥 Would add (if it has releases): {} ({})", repo.feed_url, repo.name);
        }
        for feed_url in &plan.removals {
            println!("   🗑️  Would remove: {}", feed_url);
        }

        println!("\n📈 Summary:");
        println!("   📥 Feeds to add: {}", plan.additions.len());
        println!("   🗑️  Feeds to remove: {}", plan.removals.len());
        println!("   ✅ Unchanged feeds: {}", plan.unchanged);
        return Ok(());
    }

    let cancel = cancel_on_ctrl_c();
    let summary = engine.run_sync(&cancel).await?;

    println!("\n🎉 Synchronization Complete!");
    println!("   ⭐ Starred repositories: {}", summary.starred_repositories);
    println!("   📥 Added: {}", summary.added);
    println!("   🗑️  Removed: {}", summary.removed);
    println!("   ⏭️  Skipped (no releases): {}", summary.skipped);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   ✅ Unchanged: {}", summary.unchanged);
    println!("   🔒 Other subscriptions left alone: {}", summary.foreign_subscriptions);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.failed > 0 {
        println!("\n🔍 Failed Operations:");
        for result in summary.failures() {
            if let SyncResult::Failed { feed_url, action, error } = result {
                println!("   ❌ {} {}: {}", action, feed_url, error);
            }
        }
    }

    if summary.cancelled > 0 {
        bail!("Pass interrupted: {} actions cancelled", summary.cancelled);
    }

    Ok(())
}

/// List starred repositories
async fn cmd_list(config: &Config) -> Result<()> {
    let github_client = starfeed::GitHubClient::new(config)?;
    let starred = github_client.list_starred_repos().await?;

    let mut repos: Vec<_> = starred.values().collect();
    repos.sort_by(|a, b| a.html_url.cmp(&b.html_url));

    println!("Starred repositories ({}):", repos.len());
    for repo in repos {
        println!("  ⭐ {}", repo.name);
        println!("     🔗 {}", repo.html_url);
        println!("     📰 {}", repo.feed_url);
    }

    Ok(())
}

/// List FreshRSS subscriptions
async fn cmd_subscriptions(config: &Config) -> Result<()> {
    config.validate()?;
    let store = starfeed::FreshRssClient::new(config)?;
    let release_feeds = ReleaseFeedFilter::for_web_root(&config.github_web_root()?)?;
    store.authenticate().await?;

    let mut subscriptions = store.subscriptions().await?;
    subscriptions.sort_by(|a, b| a.url.cmp(&b.url));

    println!("FreshRSS subscriptions ({}):", subscriptions.len());
    for subscription in subscriptions {
        let marker = if release_feeds.matches(&subscription.url) {
            "📰"
        } else {
            "🔒"
        };
        println!("  {} {} ({})", marker, subscription.url, subscription.title);
    }
    println!("\n📰 managed release feed   🔒 left untouched");

    Ok(())
}

/// Handle daemon commands
async fn cmd_daemon(daemon_command: DaemonCommands, config: Config) -> Result<()> {
    match daemon_command {
        DaemonCommands::Start { foreground } => {
            if foreground {
                if is_daemon_running(&config)? {
                    println!("⚠️  Daemon is already running!");
                    println!("   Use 'starfeed daemon stop' to stop it first");
                    return Ok(());
                }
                println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
            }

            #[cfg(not(unix))]
            if !foreground {
                println!("❌ Background daemon mode not supported on this platform");
                println!("   Use --foreground to run in foreground mode");
                return Ok(());
            }

            let mut daemon = Daemon::new(config)?;
            daemon.run().await?;
        }

        DaemonCommands::Stop => {
            println!("🛑 Stopping starfeed daemon...");

            if !is_daemon_running(&config)? {
                println!("⚠️  No daemon appears to be running");
                return Ok(());
            }

            Daemon::new(config)?.stop()?;
            println!("✅ Daemon stop signal sent");
        }

        DaemonCommands::Status => {
            println!("📊 starfeed Daemon Status");

            if is_daemon_running(&config)? {
                println!("   🟢 Status: Running");
                println!("   🔄 Interval: {}", config.daemon.interval);
                if !config.daemon.log_file.is_empty() {
                    println!("   📄 Log file: {}", config.daemon.log_file);
                }
            } else {
                println!("   🔴 Status: Not running");
                println!("   💡 Use 'starfeed daemon start' to start the daemon");
            }
        }
    }

    Ok(())
}

/// System health check and diagnostics
async fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config).await;
    print_health_report(&health);
    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    use starfeed::health::CheckResult;

    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 starfeed System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
        if !health.warnings().is_empty() {
            println!("⚠️  {} warnings", health.warnings().len());
        }
    }
}
