//! Core data types used throughout patchvault
//!
//! The types in this module represent:
//! - **Catalog records**: [`BackupFile`], [`Backup`], [`BackupKind`]
//! - **Settings**: [`BackupSettings`], persisted inside the catalog
//! - **Aggregate root**: [`BackupDatabase`], the full catalog file
//! - **Operation results**: [`RestoreResult`], [`VerificationReport`]
//! - **Configuration**: [`VaultConfig`], the process-level paths and filters
//!
//! The catalog types serialize with the camelCase field names of the
//! on-disk `backup.json` format.
//!
//! ```rust
//! use patchvault::types::{BackupSettings, BackupKind};
//!
//! let settings = BackupSettings::default();
//! assert!(settings.auto_backup);
//! assert_eq!(settings.backup_interval, 3600);
//! assert_eq!(BackupKind::Auto.to_string(), "auto");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One tracked file inside a backup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupFile {
    /// Path relative to the game root, `/` separated
    pub path: String,
    /// Hex-encoded SHA-256 of the stored copy
    pub hash: String,
    /// Size in bytes
    pub size: u64,
}

/// Who triggered a backup
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Requested by the user
    Manual,
    /// Created by the scheduler
    Auto,
}

impl BackupKind {
    /// Description used when the caller leaves it empty
    pub fn default_description(self) -> &'static str {
        match self {
            BackupKind::Manual => "Manual backup",
            BackupKind::Auto => "Auto backup",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Manual => write!(f, "manual"),
            BackupKind::Auto => write!(f, "auto"),
        }
    }
}

/// A point-in-time copy of the tracked file set
///
/// Backups are immutable once recorded. The only mutation the catalog ever
/// applies to one is deleting it wholesale during retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    /// `backup_YYYYMMDD_HHMMSS`, with a `_N` suffix on collisions
    pub id: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Free-text description
    pub description: String,
    /// Files in walk order
    #[serde(default, deserialize_with = "null_as_empty")]
    pub files: Vec<BackupFile>,
    /// Manual or automatic
    #[serde(rename = "type")]
    pub kind: BackupKind,
    /// Game version recorded at creation time
    #[serde(default)]
    pub game_version: String,
}

impl Backup {
    /// Number of files in the backup
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Sum of all file sizes in bytes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Whether `id` equals this backup's ID or is a prefix of it
    pub fn matches_id(&self, id: &str) -> bool {
        !id.is_empty() && self.id.starts_with(id)
    }

    /// One-line summary for listings
    pub fn display_format(&self) -> String {
        format!(
            "{} {} ({}) - {} files, {}",
            self.id,
            self.description,
            self.kind,
            self.file_count(),
            crate::utils::format_bytes(self.total_size())
        )
    }
}

/// Retention and scheduling settings, persisted in the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSettings {
    /// Whether the scheduler creates backups
    pub auto_backup: bool,
    /// Seconds between automatic backups
    pub backup_interval: u64,
    /// Number of backups kept after each create
    pub max_backups: usize,
    /// Store directory, relative to the data directory
    pub backup_path: String,
    /// Persisted but advisory; stored files are never compressed
    pub compression_enabled: bool,
}

impl BackupSettings {
    /// Interval choices offered to users, in seconds
    pub const INTERVAL_PRESETS: &'static [(&'static str, u64)] = &[
        ("30 minutes", 1800),
        ("1 hour", 3600),
        ("2 hours", 7200),
        ("4 hours", 14400),
        ("8 hours", 28800),
        ("12 hours", 43200),
        ("24 hours", 86400),
    ];

    /// Interval as a [`Duration`]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval)
    }

    /// Check the settings can drive the manager and scheduler
    pub fn validate(&self) -> crate::Result<()> {
        if self.backup_interval == 0 {
            return Err(crate::VaultError::invalid_config(
                "backup interval must be at least one second",
            ));
        }
        if self.max_backups == 0 {
            return Err(crate::VaultError::invalid_config(
                "max backups must be at least 1",
            ));
        }
        let path = std::path::Path::new(&self.backup_path);
        if self.backup_path.trim().is_empty() || path.is_absolute() {
            return Err(crate::VaultError::invalid_config(format!(
                "backup path must be a non-empty relative path, got '{}'",
                self.backup_path
            )));
        }
        if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(crate::VaultError::invalid_config(format!(
                "backup path must stay inside the data directory, got '{}'",
                self.backup_path
            )));
        }
        Ok(())
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            auto_backup: true,
            backup_interval: 3600,
            max_backups: 10,
            backup_path: "backups".to_string(),
            compression_enabled: true,
        }
    }
}

/// The catalog: every known backup plus the settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupDatabase {
    /// Backups in creation order
    #[serde(default, deserialize_with = "null_as_empty")]
    pub backups: Vec<Backup>,
    /// Retention and scheduling settings
    #[serde(default)]
    pub settings: BackupSettings,
}

/// Result of a restore operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    /// ID of the backup that was restored
    pub backup_id: String,
    /// Number of files written to the target tree
    pub files_restored: usize,
    /// Total bytes written
    pub bytes_written: u64,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

/// Outcome of checking one stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    /// Stored bytes match the recorded digest
    Valid,
    /// Stored bytes hash to something else
    Corrupted {
        /// Digest of the stored copy
        actual: String,
    },
    /// Stored copy could not be read
    Unreadable {
        /// Why reading failed
        reason: String,
    },
}

/// Verification result for a single file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCheck {
    /// Catalog path of the file
    pub path: String,
    /// Digest recorded at backup time
    pub expected: String,
    /// What was found on disk
    pub status: FileStatus,
}

impl FileCheck {
    /// Whether the stored copy is intact
    pub fn is_valid(&self) -> bool {
        self.status == FileStatus::Valid
    }
}

/// Per-file integrity report for one backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Backup that was checked
    pub backup_id: String,
    /// One entry per recorded file, in catalog order
    pub file_checks: Vec<FileCheck>,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

impl VerificationReport {
    /// Whether every file verified
    pub fn is_valid(&self) -> bool {
        self.file_checks.iter().all(FileCheck::is_valid)
    }

    /// Files that failed verification
    pub fn failures(&self) -> impl Iterator<Item = &FileCheck> {
        self.file_checks.iter().filter(|c| !c.is_valid())
    }

    /// Short human-readable summary
    pub fn summary(&self) -> String {
        let failed = self.failures().count();
        if failed == 0 {
            format!("{}: all {} files verified", self.backup_id, self.file_checks.len())
        } else {
            format!(
                "{}: {} of {} files failed verification",
                self.backup_id,
                failed,
                self.file_checks.len()
            )
        }
    }
}

/// Process-level configuration for a [`crate::BackupManager`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Game root; recorded paths are relative to it and restores land in it
    pub root_path: PathBuf,
    /// Directory holding `backup/backup.json` and the backup store
    pub data_dir: PathBuf,
    /// Subdirectory of the root that gets backed up
    pub tracked_subdir: PathBuf,
    /// Extension of tracked files, matched case-insensitively
    pub tracked_extension: String,
    /// Version string written into new backups
    pub game_version: String,
}

impl VaultConfig {
    /// Default tracked subdirectory
    pub const DEFAULT_TRACKED_SUBDIR: &'static str = "imagepack2";
    /// Default tracked extension
    pub const DEFAULT_TRACKED_EXTENSION: &'static str = "npk";
    /// Default game version
    pub const DEFAULT_GAME_VERSION: &'static str = "1.0.0";

    /// Configuration with default filters for the given directories
    pub fn new(root_path: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            root_path,
            data_dir,
            tracked_subdir: PathBuf::from(Self::DEFAULT_TRACKED_SUBDIR),
            tracked_extension: Self::DEFAULT_TRACKED_EXTENSION.to_string(),
            game_version: Self::DEFAULT_GAME_VERSION.to_string(),
        }
    }

    /// Location of the catalog file
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("backup").join("backup.json")
    }

    /// Directory walked by create
    pub fn source_dir(&self) -> PathBuf {
        self.root_path.join(&self.tracked_subdir)
    }
}

/// Accept `null` where a list is expected; older catalogs write it for empty lists
fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
