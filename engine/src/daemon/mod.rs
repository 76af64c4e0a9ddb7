//! Daemon lifecycle management
//!
//! This module provides the `DaemonManager` for running Vigil as a
//! long-lived process. It handles:
//! - PID file management (`<data_dir>/vigil.pid`)
//! - Daemon start/stop/status operations
//! - The scheduler loop that runs one staleness tick per interval
//! - The webhook server
//! - Graceful shutdown on SIGTERM
//!
//! Only one daemon runs per data directory. A PID file whose process no
//! longer exists is treated as stale and replaced.
//!
//! # Examples
//!
//! ```no_run
//! use vigil_engine::app::App;
//! use vigil_engine::config::Config;
//! use vigil_engine::daemon::DaemonManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! let manager = DaemonManager::new(&config)?;
//! manager.start()?;
//!
//! let app = App::build(config).await?;
//! manager.run(app).await?;
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};

use crate::app::App;
use crate::config::Config;
use crate::db::CheckInStore;
use crate::monitor::StalenessMonitor;
use crate::server::{self, ServerState};
use sdk::errors::EngineError;

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// How long shutdown waits for the server to drain
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `stop` waits for the daemon process to exit; covers the server
/// drain plus the default event-handler drain
const STOP_TIMEOUT: Duration = Duration::from_secs(45);

/// Daemon status information
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    /// Whether the daemon is currently running
    pub is_running: bool,

    /// Process ID if running
    pub pid: Option<u32>,

    /// Path to the PID file
    pub pid_file: PathBuf,
}

/// Daemon manager for lifecycle operations
///
/// # Graceful Shutdown
///
/// On SIGTERM (sent by `vigil stop`) the daemon:
/// 1. Lets the current tick finish and starts no new one
/// 2. Stops the webhook server, waiting up to 30 seconds for requests
/// 3. Closes the event bus
/// 4. Flushes the SQLite WAL and closes the pool
/// 5. Removes the PID file
pub struct DaemonManager {
    /// Path to the PID file
    pid_file: PathBuf,

    /// Flips to `true` once shutdown is requested
    shutdown: Arc<watch::Sender<bool>>,
}

impl DaemonManager {
    /// Creates a new daemon manager
    pub fn new(config: &Config) -> Result<Self> {
        let pid_file = Self::get_pid_file_path(config);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            pid_file,
            shutdown: Arc::new(shutdown),
        })
    }

    /// Claims the PID file and installs the SIGTERM handler
    ///
    /// # Errors
    ///
    /// `DaemonAlreadyRunning` if another live process holds the PID file.
    pub fn start(&self) -> Result<()> {
        if self.is_daemon_running()? {
            return Err(EngineError::DaemonAlreadyRunning);
        }

        self.write_pid_file()?;

        let _signal_handle = Self::setup_signal_handler(Arc::clone(&self.shutdown));
        tracing::info!("SIGTERM signal handler installed");

        Ok(())
    }

    /// Runs the scheduler and webhook server until shutdown is signaled
    pub async fn run(&self, app: App) -> Result<()> {
        let server_handle = if app.config.server.enabled {
            Some(self.spawn_server(&app).await?)
        } else {
            tracing::info!("Webhook server disabled");
            None
        };

        run_scheduler(
            Arc::clone(&app.monitor),
            Arc::clone(&app.store),
            app.config.monitor.interval(),
            self.shutdown.subscribe(),
        )
        .await;

        self.graceful_shutdown(app, server_handle).await
    }

    async fn spawn_server(&self, app: &App) -> Result<JoinHandle<()>> {
        let listener = TcpListener::bind(&app.config.server.bind_addr)
            .await
            .map_err(|e| {
                EngineError::Network(format!(
                    "Failed to bind {}: {}",
                    app.config.server.bind_addr, e
                ))
            })?;

        let state = ServerState {
            bus: Arc::clone(&app.bus),
            gateway: Arc::clone(&app.gateway),
        };
        let mut shutdown_rx = self.shutdown.subscribe();

        Ok(tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
                tracing::info!("Webhook server shutting down gracefully");
            };
            if let Err(e) = server::serve(listener, state, shutdown).await {
                tracing::error!("Webhook server error: {}", e);
            }
        }))
    }

    /// Stops the daemon
    ///
    /// Sends SIGTERM to the PID on file and waits for the process to exit.
    pub async fn stop(config: &Config) -> Result<()> {
        let pid_file = Self::get_pid_file_path(config);

        let _pid = Self::read_pid_file(&pid_file)?;

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            tracing::info!("Sending SIGTERM to daemon process {}", _pid);
            kill(Pid::from_raw(_pid as i32), Signal::SIGTERM).map_err(|e| {
                EngineError::Io(std::io::Error::other(format!(
                    "Failed to send SIGTERM: {}",
                    e
                )))
            })?;
        }

        #[cfg(windows)]
        {
            return Err(EngineError::Config(
                "Daemon stop not yet implemented for Windows".to_string(),
            ));
        }

        #[cfg(unix)]
        {
            tracing::info!("Waiting for daemon to shut down gracefully");
            let wait_result = timeout(STOP_TIMEOUT, async {
                while Self::is_process_running(_pid) {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
            .await;

            if wait_result.is_err() {
                tracing::warn!("Daemon did not stop within {} seconds", STOP_TIMEOUT.as_secs());
            } else {
                tracing::info!("Daemon stopped successfully");
            }

            if pid_file.exists() {
                fs::remove_file(&pid_file).map_err(EngineError::Io)?;
            }

            Ok(())
        }
    }

    /// Gets the daemon status
    pub fn status(config: &Config) -> Result<DaemonStatus> {
        let pid_file = Self::get_pid_file_path(config);

        let (is_running, pid) = match Self::read_pid_file(&pid_file) {
            Ok(pid) if Self::is_process_running(pid) => (true, Some(pid)),
            // Stale PID file, or none at all
            _ => (false, None),
        };

        Ok(DaemonStatus {
            is_running,
            pid,
            pid_file,
        })
    }

    /// Signals the daemon to shut down
    pub fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutdown_signaled(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn pid_file_path(&self) -> &PathBuf {
        &self.pid_file
    }

    async fn graceful_shutdown(
        &self,
        app: App,
        server_handle: Option<JoinHandle<()>>,
    ) -> Result<()> {
        tracing::info!("Starting graceful shutdown");
        self.signal_shutdown();

        if let Some(handle) = server_handle {
            match timeout(DRAIN_TIMEOUT, handle).await {
                Ok(_) => tracing::info!("Webhook server stopped"),
                Err(_) => tracing::warn!("Timeout waiting for webhook server - proceeding"),
            }
        }

        if let Err(e) = app.shutdown().await {
            tracing::error!("Failed to close check-in store cleanly: {:#}", e);
        }

        if self.pid_file.exists() {
            match fs::remove_file(&self.pid_file) {
                Ok(_) => tracing::info!("PID file removed successfully"),
                Err(e) => tracing::error!("Failed to remove PID file: {}", e),
            }
        }

        tracing::info!("Graceful shutdown completed");
        Ok(())
    }

    /// Sets up SIGTERM and Ctrl-C handling for graceful shutdown
    #[cfg(unix)]
    pub fn setup_signal_handler(shutdown: Arc<watch::Sender<bool>>) -> JoinHandle<()> {
        use tokio::signal::unix::{signal, SignalKind};

        tokio::spawn(async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::error!("Failed to create SIGTERM handler: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = tokio::signal::ctrl_c() => tracing::info!("Received interrupt"),
            }
            shutdown.send_replace(true);
        })
    }

    #[cfg(windows)]
    pub fn setup_signal_handler(shutdown: Arc<watch::Sender<bool>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received interrupt");
                shutdown.send_replace(true);
            }
        })
    }

    fn is_daemon_running(&self) -> Result<bool> {
        if !self.pid_file.exists() {
            return Ok(false);
        }

        let pid = Self::read_pid_file(&self.pid_file)?;

        if Self::is_process_running(pid) {
            Ok(true)
        } else {
            fs::remove_file(&self.pid_file).map_err(EngineError::Io)?;
            Ok(false)
        }
    }

    fn write_pid_file(&self) -> Result<()> {
        let pid = std::process::id();

        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).map_err(EngineError::Io)?;
        }

        fs::write(&self.pid_file, pid.to_string()).map_err(EngineError::Io)?;

        tracing::info!("Wrote PID {} to {:?}", pid, self.pid_file);

        Ok(())
    }

    fn read_pid_file(pid_file: &Path) -> Result<u32> {
        let content = fs::read_to_string(pid_file).map_err(EngineError::Io)?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| EngineError::Config(format!("Invalid PID in file: {}", e)))
    }

    fn is_process_running(_pid: u32) -> bool {
        #[cfg(unix)]
        {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;

            // Signal 0 only checks that the process exists
            kill(Pid::from_raw(_pid as i32), None).is_ok()
        }

        #[cfg(windows)]
        {
            false
        }
    }

    /// Data directory is already ~-expanded by config validation
    fn get_pid_file_path(config: &Config) -> PathBuf {
        config.core.data_dir.join("vigil.pid")
    }
}

impl Drop for DaemonManager {
    fn drop(&mut self) {
        if self.pid_file.exists() {
            if let Err(e) = fs::remove_file(&self.pid_file) {
                tracing::warn!("Failed to remove PID file on drop: {}", e);
            }
        }
    }
}

/// Run one tick per `interval` until shutdown
///
/// Ticks run inline, so they never overlap; a tick that overruns the
/// interval makes the scheduler skip the missed slots. Expired records are
/// purged before each tick.
pub async fn run_scheduler(
    monitor: Arc<StalenessMonitor>,
    store: Arc<dyn CheckInStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(interval_secs = interval.as_secs(), "Scheduler started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let now = Utc::now();
                match store.purge_expired(now).await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "Purged expired check-ins"),
                    Err(e) => tracing::warn!("Purge failed: {}", e),
                }
                monitor.run_tick_at(now).await;
            }
        }
    }

    tracing::info!("Scheduler stopped");
}
