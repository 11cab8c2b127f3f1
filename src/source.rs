//! Collaborators that connect the engine to the live game directory
//!
//! The manager never walks or addresses the live tree directly. It asks a
//! [`SourceEnumerator`] for the files to back up and a [`TargetResolver`]
//! where a restored file should land. The defaults, [`NpkEnumerator`] and
//! [`RootResolver`], reproduce the installer's behavior: every `.npk` under
//! the tracked subdirectory, restored back onto the game root.

use crate::error::Result;
use crate::utils;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// A regular file found under the source root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute (or root-joined) path of the file
    pub path: PathBuf,
    /// Size reported by the filesystem during the walk
    pub size: u64,
}

/// Yields the files a backup should contain
pub trait SourceEnumerator: Send + Sync {
    /// List the tracked regular files under `root`
    ///
    /// Any failure to read the tree must be returned, not skipped: a
    /// backup with silently missing files would restore incompletely.
    fn enumerate(&self, root: &Path) -> Result<Vec<SourceFile>>;
}

/// Maps a recorded relative path onto the live directory
pub trait TargetResolver: Send + Sync {
    /// Destination for the file recorded as `relative`
    fn resolve(&self, relative: &Path) -> PathBuf;
}

/// Recursive walk keeping files with one extension
#[derive(Debug, Clone)]
pub struct NpkEnumerator {
    extension: String,
}

impl NpkEnumerator {
    /// Enumerator for `extension` (without the dot), case-insensitive
    pub fn new(extension: impl Into<String>) -> Self {
        Self { extension: extension.into() }
    }
}

impl Default for NpkEnumerator {
    fn default() -> Self {
        Self::new(crate::types::VaultConfig::DEFAULT_TRACKED_EXTENSION)
    }
}

impl SourceEnumerator for NpkEnumerator {
    fn enumerate(&self, root: &Path) -> Result<Vec<SourceFile>> {
        let mut files = Vec::new();

        // Sorted so two walks of the same tree record files in the same order
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || !utils::has_extension(entry.path(), &self.extension) {
                continue;
            }

            let metadata = entry.metadata()?;
            trace!("Tracked file {:?} ({} bytes)", entry.path(), metadata.len());
            files.push(SourceFile {
                path: entry.into_path(),
                size: metadata.len(),
            });
        }

        Ok(files)
    }
}

/// Resolves relative paths against a fixed root
#[derive(Debug, Clone)]
pub struct RootResolver {
    root: PathBuf,
}

impl RootResolver {
    /// Resolver rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root files are restored into
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TargetResolver for RootResolver {
    fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}
