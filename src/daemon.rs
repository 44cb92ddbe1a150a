//! Daemon Infrastructure - Background service for periodic reconciliation
//!
//! This module runs reconciliation passes on a fixed interval with PID file
//! management and graceful shutdown. A failed pass is logged and retried on
//! the next tick; shutdown signals cancel the pass in flight.

use crate::sync::{SyncEngine, SyncSummary};
use crate::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Daemon state and control
pub struct Daemon {
    config: Arc<Config>,
    shutdown: CancellationToken,
    pid_file_path: Option<PathBuf>,
    stats: PassStats,
}

/// Counters for the passes run by this process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassStats {
    pub total_passes: u64,
    pub successful_passes: u64,
    pub failed_passes: u64,
}

impl PassStats {
    fn record(&mut self, outcome: &Result<SyncSummary>) {
        self.total_passes += 1;
        match outcome {
            Ok(_) => self.successful_passes += 1,
            Err(_) => self.failed_passes += 1,
        }
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let pid_file_path = if !config.daemon.pid_file.is_empty() {
            let expanded_path = shellexpand::full(&config.daemon.pid_file)
                .context("Failed to expand PID file path")?;
            Some(PathBuf::from(expanded_path.as_ref()))
        } else {
            None
        };

        Ok(Self {
            config,
            shutdown: CancellationToken::new(),
            pid_file_path,
            stats: PassStats::default(),
        })
    }

    /// Token cancelled on shutdown; clones observe the same signal
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> &PassStats {
        &self.stats
    }

    /// Start the daemon in the foreground
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting starfeed daemon");

        self.config.validate()?;
        self.write_pid_file().context("Failed to write PID file")?;

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            Self::wait_for_shutdown_signal().await;
            info!("Shutdown signal received, stopping daemon...");
            shutdown.cancel();
        });

        let result = self.daemon_loop().await;

        self.cleanup().context("Failed to cleanup daemon")?;

        result
    }

    /// Start the daemon as a background service (Unix platforms)
    #[cfg(unix)]
    pub fn daemonize(&self) -> Result<()> {
        use daemonize::Daemonize;

        let log_file = if !self.config.daemon.log_file.is_empty() {
            let expanded_path = shellexpand::full(&self.config.daemon.log_file)
                .context("Failed to expand log file path")?;
            let path = PathBuf::from(expanded_path.as_ref());
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            Some(fs::File::create(&path).context("Failed to create log file")?)
        } else {
            None
        };

        let mut daemonize = Daemonize::new();

        if let Some(pid_path) = &self.pid_file_path {
            daemonize = daemonize.pid_file(pid_path);
        }

        if let Some(log_file) = log_file {
            daemonize = daemonize.stdout(log_file.try_clone()?).stderr(log_file);
        }

        daemonize.start().context("Failed to daemonize process")?;

        info!("starfeed daemon started as background service");
        Ok(())
    }

    /// Stop a running daemon by sending a shutdown signal
    pub fn stop(&self) -> Result<()> {
        info!("Sending shutdown signal to daemon");

        let Some(pid_file) = &self.pid_file_path else {
            warn!("No PID file configured, cannot stop daemon");
            return Ok(());
        };

        if !pid_file.exists() {
            warn!("PID file not found, daemon may not be running");
            return Ok(());
        }

        let pid = read_pid(pid_file)?;

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                .context("Failed to send SIGTERM to daemon process")?;
        }

        #[cfg(not(unix))]
        {
            warn!("Daemon stop not implemented for this platform");
        }

        info!("Shutdown signal sent to daemon process {}", pid);
        Ok(())
    }

    /// Main daemon loop - a pass immediately, then one per interval
    async fn daemon_loop(&mut self) -> Result<()> {
        let pass_interval = self
            .config
            .daemon_interval()
            .context("Failed to parse daemon sync interval")?;
        let mut interval_timer = interval(pass_interval);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Daemon loop started with interval: {:?}", pass_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received in daemon loop");
                    break;
                }

                _ = interval_timer.tick() => {
                    debug!("Starting scheduled reconciliation pass");
                    let pass_start = Instant::now();

                    let outcome = self.run_pass().await;
                    self.stats.record(&outcome);

                    match &outcome {
                        Ok(summary) => self.log_pass_success(summary, pass_start.elapsed()),
                        Err(e) => self.log_pass_failure(e),
                    }

                    if self.config.daemon.single_run {
                        info!("Running in single run mode, exiting...");
                        break;
                    }

                    info!("Next pass in {:?}", pass_interval);
                }
            }
        }

        info!("Daemon loop exiting");
        Ok(())
    }

    /// Engines are rebuilt per pass so every pass authenticates afresh
    async fn run_pass(&self) -> Result<SyncSummary> {
        let engine = SyncEngine::from_config(&self.config)?;
        engine.run_sync(&self.shutdown).await
    }

    /// Wait for shutdown signals (SIGTERM, SIGINT, Ctrl+C)
    async fn wait_for_shutdown_signal() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => debug!("Ctrl+C received"),
                        _ = terminate.recv() => debug!("SIGTERM received"),
                    }
                    return;
                }
                Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
            }
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        debug!("Ctrl+C received");
    }

    /// Write PID file for daemon process management
    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    /// Remove PID file and perform cleanup
    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                info!("PID file removed: {}", pid_file.display());
            }
        }

        info!(
            "Daemon cleanup completed after {} passes ({} successful, {} failed)",
            self.stats.total_passes, self.stats.successful_passes, self.stats.failed_passes
        );
        Ok(())
    }

    fn log_pass_success(&self, summary: &SyncSummary, duration: Duration) {
        info!(
            "Pass completed in {:.2}s: {} starred, {} added, {} removed, {} skipped, {} failed",
            duration.as_secs_f64(),
            summary.starred_repositories,
            summary.added,
            summary.removed,
            summary.skipped,
            summary.failed
        );
    }

    fn log_pass_failure(&self, error: &anyhow::Error) {
        error!("Reconciliation pass failed: {:#}", error);
    }
}

fn read_pid(pid_file: &Path) -> Result<u32> {
    let pid_str = fs::read_to_string(pid_file).context("Failed to read PID file")?;
    pid_str.trim().parse().context("Invalid PID in PID file")
}

#[cfg(unix)]
fn process_alive(pid: u32, pid_file: &Path) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal;
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(Errno::ESRCH) => {
            // Stale PID file
            let _ = fs::remove_file(pid_file);
            false
        }
        Err(_) => true,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32, _pid_file: &Path) -> bool {
    true
}

/// Check if daemon is currently running by checking PID file
pub fn is_daemon_running(config: &Config) -> Result<bool> {
    if config.daemon.pid_file.is_empty() {
        return Ok(false);
    }

    let expanded_path =
        shellexpand::full(&config.daemon.pid_file).context("Failed to expand PID file path")?;
    let pid_file = PathBuf::from(expanded_path.as_ref());

    if !pid_file.exists() {
        return Ok(false);
    }

    let pid = read_pid(&pid_file)?;
    Ok(process_alive(pid, &pid_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tempfile::tempdir;

    #[test]
    fn test_daemon_creation() {
        let temp_dir = tempdir().unwrap();
        let mut config = Config::default();
        config.daemon.pid_file = temp_dir.path().join("starfeed.pid").to_string_lossy().to_string();

        let daemon = Daemon::new(config).unwrap();
        assert_eq!(daemon.stats(), &PassStats::default());
        assert!(!daemon.shutdown_token().is_cancelled());
    }

    #[test]
    fn test_no_pid_file_means_not_running() {
        let temp_dir = tempdir().unwrap();
        let mut config = Config::default();
        config.daemon.pid_file = temp_dir.path().join("test.pid").to_string_lossy().to_string();

        assert!(!is_daemon_running(&config).unwrap());

        config.daemon.pid_file = String::new();
        assert!(!is_daemon_running(&config).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_own_pid_is_running() {
        let temp_dir = tempdir().unwrap();
        let pid_file = temp_dir.path().join("self.pid");
        fs::write(&pid_file, std::process::id().to_string()).unwrap();

        let mut config = Config::default();
        config.daemon.pid_file = pid_file.to_string_lossy().to_string();

        assert!(is_daemon_running(&config).unwrap());
    }

    #[test]
    fn test_invalid_pid_file() {
        let temp_dir = tempdir().unwrap();
        let pid_file = temp_dir.path().join("bad.pid");
        fs::write(&pid_file, "not-a-pid").unwrap();

        let mut config = Config::default();
        config.daemon.pid_file = pid_file.to_string_lossy().to_string();

        assert!(is_daemon_running(&config).is_err());
    }

    #[test]
    fn test_pass_stats() {
        let mut stats = PassStats::default();
        stats.record(&Ok(SyncSummary::default()));
        stats.record(&Err(anyhow!("auth failed")));
        stats.record(&Ok(SyncSummary::default()));

        assert_eq!(stats.total_passes, 3);
        assert_eq!(stats.successful_passes, 2);
        assert_eq!(stats.failed_passes, 1);
    }

    #[tokio::test]
    async fn test_run_rejects_incomplete_config() {
        let temp_dir = tempdir().unwrap();
        let mut config = Config::default();
        config.daemon.pid_file = temp_dir.path().join("d.pid").to_string_lossy().to_string();

        let mut daemon = Daemon::new(config).unwrap();
        assert!(daemon.run().await.is_err());
        assert!(!temp_dir.path().join("d.pid").exists());
    }
}
