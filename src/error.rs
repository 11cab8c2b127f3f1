//! Error types for patchvault
//!
//! Every fallible operation in the crate returns [`Result<T>`] with a
//! [`VaultError`]. Errors fall into three families:
//!
//! - **I/O**: opening, reading, writing or walking files ([`VaultError::Io`],
//!   [`VaultError::FileIo`], [`VaultError::WalkDir`])
//! - **Integrity**: a stored backup file no longer matches its recorded
//!   digest ([`VaultError::Integrity`])
//! - **Persistence**: the catalog file could not be locked, serialized,
//!   written or parsed ([`VaultError::Persistence`])

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in patchvault
pub type Result<T> = std::result::Result<T, VaultError>;

/// Main error type for all backup operations
#[derive(Debug, Error)]
pub enum VaultError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error tied to a specific file
    #[error("IO error on {path:?}: {source}")]
    FileIo {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Stored backup file does not match its recorded digest
    #[error("Backup file corrupted: {path}")]
    Integrity {
        /// Path of the file relative to the game root
        path: String,
        /// Digest recorded at backup time
        expected: String,
        /// Digest of the stored copy now
        actual: String,
    },

    /// Catalog could not be written or read back
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// No backup matches the given ID
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    /// More than one backup matches the given ID prefix
    #[error("Backup ID prefix '{prefix}' is ambiguous ({count} matches)")]
    AmbiguousBackupId {
        /// Prefix supplied by the caller
        prefix: String,
        /// Number of matching backups
        count: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Create a persistence error with a custom message
    pub fn persistence(msg: impl Into<String>) -> Self {
        VaultError::Persistence(msg.into())
    }

    /// Create an invalid configuration error with a custom message
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        VaultError::InvalidConfiguration(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        VaultError::Internal(msg.into())
    }

    /// Attach a path to an I/O error
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VaultError::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Check if this error indicates a corrupted backup
    pub fn is_integrity(&self) -> bool {
        matches!(self, VaultError::Integrity { .. })
    }

    /// Check if retrying the same call could succeed
    ///
    /// Integrity failures are never recoverable: the stored bytes are wrong
    /// and will stay wrong.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VaultError::Io(_)
                | VaultError::FileIo { .. }
                | VaultError::WalkDir(_)
                | VaultError::Persistence(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            VaultError::Integrity { path, .. } => {
                format!(
                    "Backup file '{}' is corrupted. This backup cannot be restored; \
                     pick another backup or create a fresh one.",
                    path
                )
            }
            VaultError::BackupNotFound(id) => {
                format!("Backup '{}' not found. Use 'patchvault list' to see available backups.", id)
            }
            VaultError::AmbiguousBackupId { prefix, .. } => {
                format!("'{}' matches several backups. Type more characters of the backup ID.", prefix)
            }
            VaultError::Persistence(msg) => {
                format!("Could not save the backup catalog ({}). Check free space and permissions.", msg)
            }
            _ => self.to_string(),
        }
    }
}
