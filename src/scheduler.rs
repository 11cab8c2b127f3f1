//! Automatic backup timer
//!
//! [`BackupScheduler`] runs one tokio task that sleeps for the configured
//! interval and then creates an [`Auto`](crate::BackupKind::Auto) backup.
//! The task re-reads the catalog each time it arms, so a change to
//! `autoBackup` or `backupInterval` takes effect immediately: the pending
//! timer is dropped and a new one (or none) is started.
//!
//! ```text
//!            settings change / reconfigure
//!        ┌──────────────────────────────────┐
//!        ▼                                  │
//!   ┌──────────┐  autoBackup  ┌─────────┐   │   ┌────────┐
//!   │ Disabled │ ───────────► │  Armed  │ ──┴─► │ Firing │
//!   └──────────┘              └─────────┘ timer └────────┘
//!        ▲                         ▲               │
//!        └──── autoBackup off ─────┴───────────────┘
//! ```
//!
//! Settings written by another process (a `patchvault settings` call next
//! to a running daemon) are picked up by re-reading the catalog every
//! [`SETTINGS_POLL_INTERVAL`], and `autoBackup` is checked once more under
//! the catalog lock right before a backup is taken.
//!
//! Catalog reads and backups run on the blocking pool and go through the
//! same manager lock as manual operations. A failed auto backup is logged
//! and the timer is re-armed.

use crate::manager::BackupManager;
use crate::types::BackupSettings;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How often the scheduler re-reads the catalog for outside changes
pub const SETTINGS_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// What the scheduler is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Auto backup is off, or the scheduler has stopped
    Disabled,
    /// Waiting for the interval to elapse
    Armed(Duration),
    /// An auto backup is being created
    Firing,
}

/// Handle to the background auto-backup task
///
/// Dropping the handle aborts the task. Use [`shutdown`](Self::shutdown) to
/// let an in-flight backup finish first.
pub struct BackupScheduler {
    state: Arc<RwLock<SchedulerState>>,
    reconfigure: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl BackupScheduler {
    /// Start the scheduler for `manager`
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(manager: BackupManager) -> Self {
        let state = Arc::new(RwLock::new(SchedulerState::Disabled));
        let reconfigure = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run(
            manager,
            state.clone(),
            reconfigure.clone(),
            shutdown_rx,
        ));

        Self {
            state,
            reconfigure,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Current state of the timer loop
    pub fn state(&self) -> SchedulerState {
        *self.state.read()
    }

    /// Drop the pending timer and re-arm from the current settings
    ///
    /// Settings changed through [`BackupManager::update_settings`] already
    /// do this; the call is for callers that want to restart the interval.
    pub fn reconfigure(&self) {
        self.reconfigure.notify_one();
    }

    /// Stop the loop and wait for it to exit
    ///
    /// A backup that is already being created runs to completion.
    pub async fn shutdown(mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }
        *self.state.write() = SchedulerState::Disabled;
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for BackupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupScheduler")
            .field("state", &self.state())
            .field("running", &self.handle.is_some())
            .finish()
    }
}

/// Why the loop woke up before its timer
enum Wake {
    Elapsed,
    Poll,
    Rearm,
    Stop,
}

/// Re-read the catalog off the async threads
///
/// Changed settings are published on the manager's watch channel.
async fn refresh(manager: &BackupManager) {
    let worker = manager.clone();
    match tokio::task::spawn_blocking(move || worker.refresh()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to re-read backup catalog: {}", e),
        Err(e) => error!("Catalog refresh task panicked: {}", e),
    }
}

async fn run(
    manager: BackupManager,
    state: Arc<RwLock<SchedulerState>>,
    reconfigure: Arc<Notify>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut settings_rx = manager.subscribe_settings();
    let mut poll = tokio::time::interval_at(
        Instant::now() + SETTINGS_POLL_INTERVAL,
        SETTINGS_POLL_INTERVAL,
    );
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Backup scheduler started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Publishes anything changed on disk, then takes the latest value
        refresh(&manager).await;
        let settings: BackupSettings = settings_rx.borrow_and_update().clone();
        let deadline = if settings.auto_backup {
            let interval = settings.interval();
            *state.write() = SchedulerState::Armed(interval);
            debug!("Auto backup armed for {:?}", interval);
            Some(Instant::now() + interval)
        } else {
            *state.write() = SchedulerState::Disabled;
            debug!("Auto backup disabled");
            None
        };

        let wake = loop {
            let wake = tokio::select! {
                _ = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => Wake::Elapsed,
                changed = settings_rx.changed() => match changed {
                    Ok(()) => Wake::Rearm,
                    Err(_) => Wake::Stop,
                },
                _ = reconfigure.notified() => Wake::Rearm,
                _ = shutdown_rx.changed() => Wake::Stop,
                _ = poll.tick() => Wake::Poll,
            };

            // A poll that finds new settings wakes the loop through the channel
            match wake {
                Wake::Poll => refresh(&manager).await,
                other => break other,
            }
        };

        match wake {
            Wake::Rearm | Wake::Poll => continue,
            Wake::Stop => break,
            Wake::Elapsed => {}
        }

        *state.write() = SchedulerState::Firing;
        let worker = manager.clone();
        match tokio::task::spawn_blocking(move || worker.create_scheduled()).await {
            Ok(Ok(Some(backup))) => info!(
                "Auto backup {} created ({} files)",
                backup.id,
                backup.file_count()
            ),
            Ok(Ok(None)) => debug!("Auto backup turned off before it fired"),
            Ok(Err(e)) => error!("Auto backup failed: {}", e),
            Err(e) => error!("Auto backup task panicked: {}", e),
        }
    }

    *state.write() = SchedulerState::Disabled;
    info!("Backup scheduler stopped");
}
