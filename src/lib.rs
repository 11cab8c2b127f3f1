//! # Patchvault - Backup and restore for patched game files
//!
//! Patchvault snapshots the game's `.npk` resource packs before patches are
//! installed, so any change can be rolled back to a known-good state.
//!
//! ## Overview
//!
//! - Create full-copy backups of every tracked file under the game root
//! - Restore a backup, after proving every stored file is still intact
//! - Keep only the newest `maxBackups` backups, deleting older ones
//! - Take automatic backups on a timer that follows the saved settings
//!
//! ## Architecture
//!
//! - **Hashing**: Each stored file is fingerprinted with SHA-256; restore
//!   re-hashes the stored copy and refuses to run if any digest differs
//! - **Catalog**: A JSON document (`<data dir>/backup/backup.json`) listing
//!   every backup and the settings, rewritten atomically after each change
//! - **Manager**: Creates, restores and prunes backups under one lock,
//!   shared through a lock file with other processes on the same data dir
//! - **Scheduler**: A tokio task that fires auto backups and re-arms whenever
//!   the settings change
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use patchvault::{BackupKind, BackupManager};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = BackupManager::open(
//!     PathBuf::from("./game"),      // Game root, contains imagepack2/
//!     PathBuf::from("./patcher"),   // Holds the catalog and backup store
//! )?;
//!
//! let backup = manager.create("Before HUD patch", BackupKind::Manual)?;
//! println!("Created backup: {}", backup.id);
//!
//! // Install patches...
//!
//! let result = manager.restore(&backup)?;
//! println!("Restored {} files", result.files_restored);
//! # Ok(())
//! # }
//! ```
//!
//! ## Automatic Backups
//!
//! ```rust,no_run
//! use patchvault::{BackupManager, BackupScheduler};
//! use std::path::PathBuf;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = BackupManager::open(PathBuf::from("./game"), PathBuf::from("./patcher"))?;
//! let scheduler = BackupScheduler::start(manager.clone());
//!
//! // Turning auto backup off cancels the pending timer
//! let mut settings = manager.settings();
//! settings.auto_backup = false;
//! manager.update_settings(settings)?;
//!
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Layout
//!
//! Backups are plain directory copies, one per backup ID, under
//! `<data dir>/<backupPath>`. Nothing is deduplicated or compressed; the
//! `compressionEnabled` setting is stored but not applied.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] with a [`VaultError`]. Integrity
//! failures ([`VaultError::Integrity`]) name the corrupted file and are never
//! worth retrying.
//!
//! ## Module Organization
//!
//! - [`manager`]: Backup creation, restore, retention and settings
//! - [`scheduler`]: Automatic backup timer
//! - [`catalog`]: Catalog persistence and retention policy
//! - [`source`]: File enumeration and restore targets
//! - [`types`]: Catalog records and reports
//! - [`utils`]: Hashing and file helpers
//! - [`error`]: Error types and handling

pub mod catalog;
pub mod error;
pub mod manager;
pub mod scheduler;
pub mod source;
pub mod types;
pub mod utils;

pub use catalog::{apply_retention, BackupCatalog, CatalogLock};
pub use error::{Result, VaultError};
pub use manager::{BackupManager, VaultBuilder};
pub use scheduler::{BackupScheduler, SchedulerState, SETTINGS_POLL_INTERVAL};
pub use source::{NpkEnumerator, RootResolver, SourceEnumerator, SourceFile, TargetResolver};
pub use types::*;
