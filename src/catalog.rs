//! Durable backup catalog
//!
//! The catalog is a single JSON document holding every known backup and the
//! backup settings:
//!
//! ```text
//! <data dir>/
//! ├── backup/
//! │   └── backup.json        # {"backups": [...], "settings": {...}}
//! └── <backupPath>/          # backup store, "backups" by default
//!     └── <backup ID>/
//!         └── imagepack2/... # verbatim copies of the tracked files
//! ```
//!
//! Writes go through [`crate::utils::atomic_write`], so a crash leaves
//! either the previous or the new document on disk, and readers never see
//! a half-written file.
//!
//! Several processes may share one catalog (the scheduler daemon and a
//! one-shot CLI call, say). Writers take a [`CatalogLock`] on
//! `backup/backup.lock`, [`reload`](BackupCatalog::reload) the file inside
//! it, and only then build and persist the next database. A writer working
//! from a stale copy would drop the other process's entries.
//!
//! Callers persist a candidate database first and only then swap it into
//! memory with [`BackupCatalog::replace`]; a failed write therefore never
//! leaves memory ahead of disk.

use crate::error::{Result, VaultError};
use crate::types::{Backup, BackupDatabase, BackupSettings};
use crate::utils;
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// In-memory catalog bound to its file
#[derive(Debug, Clone)]
pub struct BackupCatalog {
    /// Location of `backup.json`
    path: PathBuf,
    /// Current contents
    database: BackupDatabase,
}

impl BackupCatalog {
    /// Load the catalog at `path`
    ///
    /// A missing file is not an error: the catalog starts empty with
    /// [`BackupSettings::default`]. A file that exists but cannot be read or
    /// parsed is reported, because silently resetting it would orphan every
    /// backup on disk.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Persistence`] if the file is unreadable or malformed
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let database = match read_database(&path)? {
            Some(database) => database,
            None => {
                info!("No catalog at {:?}, starting with default settings", path);
                BackupDatabase::default()
            }
        };

        if let Err(e) = database.settings.validate() {
            warn!("Catalog {:?} holds questionable settings: {}", path, e);
        }

        debug!(
            "Loaded catalog {:?} with {} backups",
            path,
            database.backups.len()
        );
        Ok(Self { path, database })
    }

    /// Re-read the file, picking up changes made by other processes
    ///
    /// A file that has gone missing reads as the default catalog. Returns
    /// whether the contents changed.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Persistence`] if the file is unreadable or malformed;
    ///   the in-memory copy is left as it was
    pub fn reload(&mut self) -> Result<bool> {
        let database = read_database(&self.path)?.unwrap_or_default();
        if database == self.database {
            return Ok(false);
        }

        debug!(
            "Catalog {:?} changed on disk ({} -> {} backups)",
            self.path,
            self.database.backups.len(),
            database.backups.len()
        );
        self.database = database;
        Ok(true)
    }

    /// Block until this process holds the catalog's writer lock
    ///
    /// The lock lives in a sibling `.lock` file, because persisting replaces
    /// `backup.json` itself.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Persistence`] if the lock file cannot be opened or locked
    pub fn lock(&self) -> Result<CatalogLock> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                VaultError::persistence(format!("failed to create catalog directory {:?}: {}", parent, e))
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| VaultError::persistence(format!("failed to open catalog lock {:?}: {}", lock_path, e)))?;

        file.lock_exclusive()
            .map_err(|e| VaultError::persistence(format!("failed to lock catalog {:?}: {}", lock_path, e)))?;

        trace!("Acquired catalog lock {:?}", lock_path);
        Ok(CatalogLock {
            _file: file,
            path: lock_path,
        })
    }

    /// Location of the writer lock file
    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Write `database` to this catalog's file
    ///
    /// Does not touch the in-memory copy.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Persistence`] if serialization or the write fails
    pub fn persist(&self, database: &BackupDatabase) -> Result<()> {
        let bytes = to_pretty_json(database)
            .map_err(|e| VaultError::persistence(format!("failed to serialize catalog: {}", e)))?;

        utils::atomic_write(&self.path, &bytes).map_err(|e| {
            VaultError::persistence(format!("failed to write catalog {:?}: {}", self.path, e))
        })?;

        debug!(
            "Persisted catalog {:?} ({} backups, {} bytes)",
            self.path,
            database.backups.len(),
            bytes.len()
        );
        Ok(())
    }

    /// Swap in a database that has already been persisted
    pub fn replace(&mut self, database: BackupDatabase) {
        self.database = database;
    }

    /// Current contents
    pub fn database(&self) -> &BackupDatabase {
        &self.database
    }

    /// Backups in creation order
    pub fn backups(&self) -> &[Backup] {
        &self.database.backups
    }

    /// Current settings
    pub fn settings(&self) -> &BackupSettings {
        &self.database.settings
    }

    /// Location of the catalog file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Find a backup by exact ID, or by a prefix matching exactly one backup
    ///
    /// # Errors
    ///
    /// - [`VaultError::BackupNotFound`] if nothing matches
    /// - [`VaultError::AmbiguousBackupId`] if a prefix matches several backups
    pub fn find(&self, id: &str) -> Result<&Backup> {
        if let Some(exact) = self.database.backups.iter().find(|b| b.id == id) {
            return Ok(exact);
        }

        let mut matches = self.database.backups.iter().filter(|b| b.matches_id(id));
        match (matches.next(), matches.next()) {
            (Some(found), None) => Ok(found),
            (None, _) => Err(VaultError::BackupNotFound(id.to_string())),
            (Some(_), Some(_)) => Err(VaultError::AmbiguousBackupId {
                prefix: id.to_string(),
                count: 2 + matches.count(),
            }),
        }
    }
}

/// Cross-process writer lock on a catalog
///
/// Released when dropped.
#[derive(Debug)]
pub struct CatalogLock {
    _file: File,
    path: PathBuf,
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        trace!("Released catalog lock {:?}", self.path);
    }
}

/// Read and parse the catalog file, `None` if it does not exist
fn read_database(path: &Path) -> Result<Option<BackupDatabase>> {
    match fs::read_to_string(path) {
        Ok(json) => serde_json::from_str::<BackupDatabase>(&json)
            .map(Some)
            .map_err(|e| VaultError::persistence(format!("failed to parse catalog {:?}: {}", path, e))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(VaultError::persistence(format!(
            "failed to read catalog {:?}: {}",
            path, e
        ))),
    }
}

/// Split `backups` into survivors and evictions under a count limit
///
/// The newest `max_backups` by timestamp survive. Ordering is a stable sort,
/// so equal timestamps favor the later insertion. Survivors keep their
/// original relative order; evictions are returned oldest first.
pub fn apply_retention(backups: Vec<Backup>, max_backups: usize) -> (Vec<Backup>, Vec<Backup>) {
    if backups.len() <= max_backups {
        return (backups, Vec::new());
    }

    // Indices newest first; ties keep later insertions ahead
    let mut order: Vec<usize> = (0..backups.len()).collect();
    order.sort_by(|&a, &b| {
        backups[b]
            .timestamp
            .cmp(&backups[a].timestamp)
            .then_with(|| b.cmp(&a))
    });

    let mut keep = vec![false; backups.len()];
    for &idx in order.iter().take(max_backups) {
        keep[idx] = true;
    }

    let mut kept = Vec::with_capacity(max_backups);
    let mut evicted = Vec::with_capacity(backups.len() - max_backups);
    for (idx, backup) in backups.into_iter().enumerate() {
        if keep[idx] {
            kept.push(backup);
        } else {
            evicted.push(backup);
        }
    }
    evicted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    (kept, evicted)
}

/// Serialize with the 4-space indentation the catalog has always used
fn to_pretty_json<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
    value.serialize(&mut serializer)?;
    Ok(bytes)
}
