//! Backup manager
//!
//! [`BackupManager`] is the entry point for every backup operation. It owns
//! the catalog and coordinates the other pieces:
//!
//! - **Source enumerator**: lists the tracked files under the game root
//! - **Hashing**: fingerprints each stored copy and re-checks it on restore
//! - **Catalog**: records backups and settings, persisted after each change
//! - **Target resolver**: decides where restored files land
//!
//! ## Thread Safety
//!
//! `BackupManager` is a cheap `Clone` handle. All clones share one
//! exclusive lock that is held for the whole of every create, restore and
//! settings update, so the scheduler and user-triggered calls never
//! interleave their catalog updates or their filesystem work.
//!
//! The same calls also hold the catalog's file lock and re-read
//! `backup.json` before acting, so separate processes on one data directory
//! (a running `daemon` and a one-shot `create`) see each other's backups
//! and settings. Read-only calls re-read the file without the file lock.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use patchvault::{BackupKind, VaultBuilder};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = VaultBuilder::new().build(
//!     PathBuf::from("C:/Games/DNF"),
//!     PathBuf::from("C:/Tools/patcher"),
//! )?;
//!
//! let backup = manager.create("Before installing UI patch", BackupKind::Manual)?;
//! // ... install patches ...
//! manager.restore(&backup)?;
//! # Ok(())
//! # }
//! ```

use crate::catalog::{apply_retention, BackupCatalog, CatalogLock};
use crate::error::{Result, VaultError};
use crate::source::{NpkEnumerator, RootResolver, SourceEnumerator, TargetResolver};
use crate::types::*;
use crate::utils;
use chrono::{DateTime, Local, Utc};
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace, warn};

/// Creates, restores and prunes backups of the tracked game files
///
/// # Examples
///
/// ```rust,no_run
/// use patchvault::{BackupKind, VaultBuilder};
/// use std::path::PathBuf;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = VaultBuilder::new()
///     .tracked_subdir("imagepack2")
///     .game_version("2.4.1")
///     .build(PathBuf::from("./game"), PathBuf::from("./data"))?;
///
/// for backup in manager.list_backups() {
///     println!("{}", backup.display_format());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BackupManager {
    inner: Arc<Inner>,
}

struct Inner {
    /// Paths and filters
    config: VaultConfig,
    /// Lists files to back up
    enumerator: Box<dyn SourceEnumerator>,
    /// Maps restored files onto the live tree
    resolver: Box<dyn TargetResolver>,
    /// The single guard over catalog and store
    catalog: Mutex<BackupCatalog>,
    /// Publishes settings after each successful update
    settings_tx: watch::Sender<BackupSettings>,
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("config", &self.inner.config)
            .field("catalog", &*self.inner.catalog.lock())
            .finish()
    }
}

impl BackupManager {
    /// Open the manager for a game root and data directory with default settings
    ///
    /// Equivalent to `VaultBuilder::new().build(root_path, data_dir)`.
    pub fn open(root_path: PathBuf, data_dir: PathBuf) -> Result<Self> {
        VaultBuilder::new().build(root_path, data_dir)
    }

    /// Create a backup of every tracked file
    ///
    /// The files are copied into a hidden staging directory inside the store
    /// and renamed to `<store>/<ID>` only once every file has been copied and
    /// hashed. The new catalog, including retention, is persisted before the
    /// call returns; evicted backup directories are removed afterwards.
    ///
    /// # Arguments
    ///
    /// * `description` - Free text; empty means the kind's default description
    /// * `kind` - Whether the user or the scheduler asked for this backup
    ///
    /// # Errors
    ///
    /// - [`VaultError::WalkDir`] / [`VaultError::FileIo`] if reading the source
    ///   tree or writing the snapshot fails; nothing is left behind in the store
    /// - [`VaultError::Persistence`] if the catalog cannot be written; the new
    ///   snapshot is removed again and the catalog is unchanged
    ///
    /// Failing to delete an evicted backup directory is logged and does not
    /// fail the call.
    #[instrument(skip(self))]
    pub fn create(&self, description: &str, kind: BackupKind) -> Result<Backup> {
        let (mut catalog, _lock) = self.lock_catalog()?;
        self.create_locked(&mut catalog, description, kind)
    }

    /// Create an [`Auto`](BackupKind::Auto) backup if auto backup is still on
    ///
    /// The setting is checked against the catalog on disk while the lock is
    /// held, so turning auto backup off from another process wins over a
    /// timer that was already armed. Returns `None` when skipped.
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create).
    #[instrument(skip(self))]
    pub fn create_scheduled(&self) -> Result<Option<Backup>> {
        let (mut catalog, _lock) = self.lock_catalog()?;
        if !catalog.settings().auto_backup {
            debug!("Auto backup is off in the catalog, skipping");
            return Ok(None);
        }
        self.create_locked(&mut catalog, "", BackupKind::Auto).map(Some)
    }

    fn create_locked(&self, catalog: &mut BackupCatalog, description: &str, kind: BackupKind) -> Result<Backup> {
        let description = if description.trim().is_empty() {
            kind.default_description().to_string()
        } else {
            description.to_string()
        };

        let start = Instant::now();
        let settings = catalog.settings().clone();
        let store = self.store_path_for(&settings);
        fs::create_dir_all(&store).map_err(|e| VaultError::file_io(&store, e))?;

        let now = Local::now();
        let id = unique_backup_id(catalog, &store, now);
        debug!("Creating backup {} in {:?}", id, store);

        // Dropping the TempDir on any error below removes the partial copy
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&store)
            .map_err(|e| VaultError::file_io(&store, e))?;
        let files = self.copy_tracked_files(staging.path())?;

        let backup_dir = store.join(&id);
        fs::rename(staging.path(), &backup_dir).map_err(|e| VaultError::file_io(&backup_dir, e))?;

        let backup = Backup {
            id,
            timestamp: now.with_timezone(&Utc),
            description,
            files,
            kind,
            game_version: self.inner.config.game_version.clone(),
        };

        let mut next = catalog.database().clone();
        next.backups.push(backup.clone());
        let (kept, evicted) = apply_retention(next.backups, settings.max_backups.max(1));
        next.backups = kept;

        if let Err(e) = catalog.persist(&next) {
            if let Err(cleanup) = fs::remove_dir_all(&backup_dir) {
                warn!(
                    "Failed to remove unrecorded backup directory {:?}: {}",
                    backup_dir, cleanup
                );
            }
            return Err(e);
        }
        catalog.replace(next);

        for old in &evicted {
            let old_dir = store.join(&old.id);
            match fs::remove_dir_all(&old_dir) {
                Ok(()) => debug!("Evicted backup {}", old.id),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Evicted backup {} had no directory", old.id)
                }
                Err(e) => warn!(
                    "Failed to delete evicted backup directory {:?}: {}",
                    old_dir, e
                ),
            }
        }

        info!(
            "Created {} backup {} in {}ms ({} files, {}, {} evicted)",
            backup.kind,
            backup.id,
            start.elapsed().as_millis(),
            backup.file_count(),
            utils::format_bytes(backup.total_size()),
            evicted.len()
        );

        Ok(backup)
    }

    /// Restore every file of a backup into the live tree
    ///
    /// Restore runs in two passes. First every stored file is re-hashed and
    /// compared with its recorded digest; only when all of them match does
    /// the second pass copy them back, overwriting live files. A corrupted
    /// backup therefore never touches the target tree.
    ///
    /// The current live state is not backed up first; restoring is a
    /// deliberate rollback.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Integrity`] naming the first corrupted file in catalog order
    /// - [`VaultError::FileIo`] if a stored file is missing or unreadable, or a
    ///   live file cannot be written
    #[instrument(skip(self, backup), fields(backup_id = %backup.id))]
    pub fn restore(&self, backup: &Backup) -> Result<RestoreResult> {
        let (catalog, _lock) = self.lock_catalog()?;
        let start = Instant::now();
        let backup_dir = self.store_path_for(catalog.settings()).join(&backup.id);
        info!("Restoring backup {} ({} files)", backup.id, backup.file_count());

        let verified = verify_stored_files(&backup_dir, &backup.files)?;
        debug!("Verified {} stored files", verified.len());

        let mut bytes_written = 0u64;
        for (stored, relative) in &verified {
            let target = self.inner.resolver.resolve(relative);
            bytes_written += utils::copy_file(stored, &target)?;
            trace!("Restored {:?}", relative);
        }

        let result = RestoreResult {
            backup_id: backup.id.clone(),
            files_restored: verified.len(),
            bytes_written,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Restored backup {} in {}ms ({} files, {})",
            result.backup_id,
            result.duration_ms,
            result.files_restored,
            utils::format_bytes(result.bytes_written)
        );
        Ok(result)
    }

    /// Restore the backup with this ID or unique ID prefix
    pub fn restore_by_id(&self, id: &str) -> Result<RestoreResult> {
        let backup = self.get_backup(id)?;
        self.restore(&backup)
    }

    /// Check every stored file of a backup without restoring anything
    ///
    /// Unlike [`restore`](Self::restore) this never fails on a bad file; the
    /// report lists the status of each one.
    #[instrument(skip(self, backup), fields(backup_id = %backup.id))]
    pub fn verify_backup(&self, backup: &Backup) -> Result<VerificationReport> {
        let (catalog, _lock) = self.lock_catalog()?;
        let start = Instant::now();
        let backup_dir = self.store_path_for(catalog.settings()).join(&backup.id);

        let file_checks: Vec<FileCheck> = backup
            .files
            .par_iter()
            .map(|file| {
                let status = match verify_stored_file(&backup_dir, file) {
                    Ok(_) => FileStatus::Valid,
                    Err(VaultError::Integrity { actual, .. }) => FileStatus::Corrupted { actual },
                    Err(e) => FileStatus::Unreadable { reason: e.to_string() },
                };
                FileCheck {
                    path: file.path.clone(),
                    expected: file.hash.clone(),
                    status,
                }
            })
            .collect();

        let report = VerificationReport {
            backup_id: backup.id.clone(),
            file_checks,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        if report.is_valid() {
            debug!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        Ok(report)
    }

    /// All backups in creation order
    pub fn list_backups(&self) -> Vec<Backup> {
        self.read_catalog().backups().to_vec()
    }

    /// Look up a backup by ID or unique ID prefix
    pub fn get_backup(&self, id: &str) -> Result<Backup> {
        self.read_catalog().find(id).cloned()
    }

    /// Current settings
    pub fn settings(&self) -> BackupSettings {
        self.read_catalog().settings().clone()
    }

    /// Re-read the catalog from disk
    ///
    /// Settings that another process changed are published to
    /// [`subscribe_settings`](Self::subscribe_settings) receivers.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Persistence`] if the catalog cannot be read; the
    ///   cached copy stays in use
    pub fn refresh(&self) -> Result<()> {
        let mut catalog = self.inner.catalog.lock();
        self.sync(&mut catalog)
    }

    /// Replace the settings, persist them and notify subscribers
    ///
    /// A new `maxBackups` is enforced at the next create. Changing
    /// `backupPath` is refused while backups exist, since they would be left
    /// behind in the old store.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidConfiguration`] if the settings fail validation
    /// - [`VaultError::Persistence`] if the catalog cannot be written; the
    ///   previous settings stay in effect
    #[instrument(skip(self))]
    pub fn update_settings(&self, settings: BackupSettings) -> Result<()> {
        settings.validate()?;

        {
            let (mut catalog, _lock) = self.lock_catalog()?;
            if settings.backup_path != catalog.settings().backup_path && !catalog.backups().is_empty() {
                return Err(VaultError::invalid_config(format!(
                    "cannot move the backup store from '{}' to '{}' while {} backups exist",
                    catalog.settings().backup_path,
                    settings.backup_path,
                    catalog.backups().len()
                )));
            }

            let mut next = catalog.database().clone();
            next.settings = settings.clone();
            catalog.persist(&next)?;
            catalog.replace(next);
        }

        info!(
            "Updated settings: auto_backup={}, interval={}s, max_backups={}",
            settings.auto_backup, settings.backup_interval, settings.max_backups
        );
        self.inner.settings_tx.send_replace(settings);
        Ok(())
    }

    /// Receive every settings change
    ///
    /// Changes made through [`update_settings`](Self::update_settings) are
    /// sent at once; changes written by another process are sent when this
    /// handle next re-reads the catalog.
    pub fn subscribe_settings(&self) -> watch::Receiver<BackupSettings> {
        self.inner.settings_tx.subscribe()
    }

    /// Directory holding the files of `backup`
    pub fn backup_dir(&self, backup: &Backup) -> PathBuf {
        self.store_path().join(&backup.id)
    }

    /// Root of the backup store
    pub fn store_path(&self) -> PathBuf {
        let settings = self.settings();
        self.store_path_for(&settings)
    }

    /// Location of the catalog file
    pub fn catalog_path(&self) -> PathBuf {
        self.inner.catalog.lock().path().to_path_buf()
    }

    /// Paths and filters this manager was built with
    pub fn config(&self) -> &VaultConfig {
        &self.inner.config
    }

    /// Take the in-process guard and the file lock, then re-read the catalog
    fn lock_catalog(&self) -> Result<(MutexGuard<'_, BackupCatalog>, CatalogLock)> {
        let mut catalog = self.inner.catalog.lock();
        let file_lock = catalog.lock()?;
        self.sync(&mut catalog)?;
        Ok((catalog, file_lock))
    }

    /// In-process guard over a freshly re-read catalog, for read-only calls
    fn read_catalog(&self) -> MutexGuard<'_, BackupCatalog> {
        let mut catalog = self.inner.catalog.lock();
        if let Err(e) = self.sync(&mut catalog) {
            warn!("Using cached catalog: {}", e);
        }
        catalog
    }

    fn sync(&self, catalog: &mut BackupCatalog) -> Result<()> {
        if catalog.reload()? {
            let settings = catalog.settings();
            self.inner.settings_tx.send_if_modified(|current| {
                if current == settings {
                    return false;
                }
                debug!("Settings changed on disk");
                *current = settings.clone();
                true
            });
        }
        Ok(())
    }

    fn store_path_for(&self, settings: &BackupSettings) -> PathBuf {
        self.inner.config.data_dir.join(&settings.backup_path)
    }

    /// Copy and hash every tracked file into `staging`
    fn copy_tracked_files(&self, staging: &Path) -> Result<Vec<BackupFile>> {
        let config = &self.inner.config;
        let sources = self.inner.enumerator.enumerate(&config.source_dir())?;
        let mut files = Vec::with_capacity(sources.len());

        for source in sources {
            let relative = utils::make_relative(&source.path, &config.root_path)?;
            let stored = staging.join(&relative);
            let size = utils::copy_file(&source.path, &stored)?;
            // Hash the stored copy so the digest describes exactly what was kept
            let hash = utils::hash_file_content(&stored)?;

            trace!("Backed up {:?} ({} bytes)", relative, size);
            files.push(BackupFile {
                path: utils::portable_path(&relative),
                hash,
                size,
            });
        }

        Ok(files)
    }
}

/// `backup_YYYYMMDD_HHMMSS`, suffixed `_2`, `_3`, ... when already taken
fn unique_backup_id(catalog: &BackupCatalog, store: &Path, now: DateTime<Local>) -> String {
    let base = format!("backup_{}", now.format("%Y%m%d_%H%M%S"));
    let taken = |id: &str| catalog.backups().iter().any(|b| b.id == id) || store.join(id).exists();

    if !taken(&base) {
        return base;
    }
    (2u32..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

/// Re-hash one stored file and compare with its record
///
/// Returns the stored path and the relative destination path.
fn verify_stored_file(backup_dir: &Path, file: &BackupFile) -> Result<(PathBuf, PathBuf)> {
    let relative = utils::catalog_path_to_relative(&file.path)?;
    let stored = backup_dir.join(&relative);
    let actual = utils::hash_file_content(&stored)?;

    if !actual.eq_ignore_ascii_case(&file.hash) {
        return Err(VaultError::Integrity {
            path: file.path.clone(),
            expected: file.hash.clone(),
            actual,
        });
    }
    Ok((stored, relative))
}

/// Verify every file, reporting the first failure in catalog order
fn verify_stored_files(backup_dir: &Path, files: &[BackupFile]) -> Result<Vec<(PathBuf, PathBuf)>> {
    let checks: Vec<Result<(PathBuf, PathBuf)>> = files
        .par_iter()
        .map(|file| verify_stored_file(backup_dir, file))
        .collect();

    checks.into_iter().collect()
}

/// Builder for [`BackupManager`]
///
/// # Default Values
///
/// - `tracked_subdir`: `imagepack2`
/// - `tracked_extension`: `npk`
/// - `game_version`: `1.0.0`
/// - enumerator: [`NpkEnumerator`] for the tracked extension
/// - resolver: [`RootResolver`] on the game root
///
/// # Examples
///
/// ```rust,no_run
/// use patchvault::VaultBuilder;
/// use std::path::PathBuf;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = VaultBuilder::new()
///     .tracked_subdir("imagepack2")
///     .tracked_extension("npk")
///     .build(PathBuf::from("./game"), PathBuf::from("./data"))?;
/// # Ok(())
/// # }
/// ```
pub struct VaultBuilder {
    tracked_subdir: PathBuf,
    tracked_extension: String,
    game_version: String,
    enumerator: Option<Box<dyn SourceEnumerator>>,
    resolver: Option<Box<dyn TargetResolver>>,
}

impl std::fmt::Debug for VaultBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultBuilder")
            .field("tracked_subdir", &self.tracked_subdir)
            .field("tracked_extension", &self.tracked_extension)
            .field("game_version", &self.game_version)
            .field("custom_enumerator", &self.enumerator.is_some())
            .field("custom_resolver", &self.resolver.is_some())
            .finish()
    }
}

impl VaultBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            tracked_subdir: PathBuf::from(VaultConfig::DEFAULT_TRACKED_SUBDIR),
            tracked_extension: VaultConfig::DEFAULT_TRACKED_EXTENSION.to_string(),
            game_version: VaultConfig::DEFAULT_GAME_VERSION.to_string(),
            enumerator: None,
            resolver: None,
        }
    }

    /// Subdirectory of the game root to back up
    ///
    /// An empty path backs up the whole root.
    pub fn tracked_subdir(mut self, subdir: impl Into<PathBuf>) -> Self {
        self.tracked_subdir = subdir.into();
        self
    }

    /// Extension of tracked files, without the dot
    pub fn tracked_extension(mut self, extension: impl Into<String>) -> Self {
        self.tracked_extension = extension.into();
        self
    }

    /// Version string recorded in new backups
    pub fn game_version(mut self, version: impl Into<String>) -> Self {
        self.game_version = version.into();
        self
    }

    /// Replace the default file enumerator
    pub fn enumerator(mut self, enumerator: Box<dyn SourceEnumerator>) -> Self {
        self.enumerator = Some(enumerator);
        self
    }

    /// Replace the default target resolver
    pub fn resolver(mut self, resolver: Box<dyn TargetResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Load the catalog and build the manager
    ///
    /// # Arguments
    ///
    /// * `root_path` - Game root; recorded paths are relative to it
    /// * `data_dir` - Holds `backup/backup.json` and the backup store
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidConfiguration`] if the tracked extension is empty
    ///   or the tracked subdirectory escapes the root
    /// - [`VaultError::Persistence`] if an existing catalog cannot be read
    pub fn build(self, root_path: PathBuf, data_dir: PathBuf) -> Result<BackupManager> {
        let extension = self.tracked_extension.trim_start_matches('.').to_string();
        if extension.is_empty() {
            return Err(VaultError::invalid_config("tracked extension must not be empty"));
        }
        if self.tracked_subdir.is_absolute()
            || self
                .tracked_subdir
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(VaultError::invalid_config(format!(
                "tracked subdirectory must be inside the game root, got {:?}",
                self.tracked_subdir
            )));
        }

        let mut config = VaultConfig::new(root_path.clone(), data_dir);
        config.tracked_subdir = self.tracked_subdir;
        config.tracked_extension = extension.clone();
        config.game_version = self.game_version;

        let catalog = BackupCatalog::load(config.catalog_path())?;
        let (settings_tx, _) = watch::channel(catalog.settings().clone());

        info!(
            "Opened backup catalog {:?} ({} backups) for {:?}",
            catalog.path(),
            catalog.backups().len(),
            config.source_dir()
        );

        Ok(BackupManager {
            inner: Arc::new(Inner {
                enumerator: self
                    .enumerator
                    .unwrap_or_else(|| Box::new(NpkEnumerator::new(extension))),
                resolver: self
                    .resolver
                    .unwrap_or_else(|| Box::new(RootResolver::new(root_path))),
                config,
                catalog: Mutex::new(catalog),
                settings_tx,
            }),
        })
    }
}

impl Default for VaultBuilder {
    fn default() -> Self {
        Self::new()
    }
}
