//! Utility functions for patchvault
//!
//! This module holds the hashing service used to fingerprint and verify
//! backed-up files, plus the small file and path helpers shared by the
//! catalog and the manager.
//!
//! ## Categories of Utilities
//!
//! ### Hashing
//! - File content hashing (SHA-256, streamed)
//! - Hashing of in-memory data
//!
//! ### File Operations
//! - Streamed file copies that create parent directories
//! - Atomic file writing (temp file + rename)
//!
//! ### Path Manipulation
//! - Converting absolute paths to relative paths
//! - Portable (forward slash) rendering of relative paths
//! - Case-insensitive extension checks
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crate::utils::{hash_file_content, hash_data};
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let file_hash = hash_file_content(Path::new("imagepack2/sprite.npk"))?;
//! assert_eq!(file_hash, hash_data(&std::fs::read("imagepack2/sprite.npk")?));
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! All utility functions are thread-safe and can be called concurrently from
//! multiple threads without synchronization.

use crate::error::{Result, VaultError};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Hash a file's content using SHA-256
///
/// Streams the file through a fixed-size buffer so memory use does not grow
/// with file size. Identical bytes always produce the identical digest.
///
/// # Arguments
///
/// * `path` - Path to the file to hash
///
/// # Returns
///
/// Returns the SHA-256 hash as a 64-character lowercase hexadecimal string.
///
/// # Errors
///
/// - [`VaultError::FileIo`] if the file cannot be opened or read to the end
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::hash_file_content;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_file_content(Path::new("example.npk"))?;
/// assert_eq!(hash.len(), 64);
/// # Ok(())
/// # }
/// ```
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| VaultError::file_io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(VaultError::file_io(path, e)),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash arbitrary data using SHA-256
///
/// Convenience for data already in memory; produces the same digest as
/// [`hash_file_content`] on a file holding the same bytes.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Copy a file's bytes to `dest`, creating parent directories
///
/// An existing file at `dest` is truncated and overwritten. Returns the
/// number of bytes copied.
pub fn copy_file(src: &Path, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| VaultError::file_io(parent, e))?;
    }

    let mut reader = File::open(src).map_err(|e| VaultError::file_io(src, e))?;
    let mut writer = File::create(dest).map_err(|e| VaultError::file_io(dest, e))?;
    let copied = io::copy(&mut reader, &mut writer).map_err(|e| VaultError::file_io(dest, e))?;
    writer.flush().map_err(|e| VaultError::file_io(dest, e))?;

    trace!("Copied {:?} -> {:?} ({} bytes)", src, dest, copied);
    Ok(copied)
}

/// Make a path relative to a base path
///
/// Tries a lexical strip first and only canonicalizes both paths when that
/// fails (for example when `base` contains `..`).
///
/// # Errors
///
/// - [`VaultError::Internal`] if the path is not under the base path
/// - [`VaultError::Io`] if canonicalization fails (fallback case only)
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::make_relative;
/// use std::path::{Path, PathBuf};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let base = Path::new("/games/dnf");
/// let full_path = Path::new("/games/dnf/imagepack2/ui.npk");
/// assert_eq!(make_relative(full_path, base)?, PathBuf::from("imagepack2/ui.npk"));
/// # Ok(())
/// # }
/// ```
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| VaultError::internal(format!(
            "Path {:?} is not relative to {:?}",
            path_canon, base_canon
        )))
}

/// Render a relative path with `/` separators for the catalog
pub fn portable_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Turn a catalog path back into a relative `PathBuf`
///
/// Rejects absolute paths and `..` components so a tampered catalog cannot
/// direct a restore outside the target tree.
pub fn catalog_path_to_relative(path: &str) -> Result<PathBuf> {
    let candidate = PathBuf::from(path.replace('\\', "/"));
    let mut relative = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => {
                return Err(VaultError::internal(format!(
                    "Refusing non-relative backup path: {}",
                    path
                )))
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(VaultError::internal("Empty backup path"));
    }
    Ok(relative)
}

/// Check whether a file name ends in `.<extension>`, ignoring ASCII case
pub fn has_extension(path: &Path, extension: &str) -> bool {
    let suffix = format!(".{}", extension.to_ascii_lowercase());
    path.file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase().ends_with(&suffix))
        .unwrap_or(false)
}

/// Format bytes in human-readable form
///
/// Uses binary units (1024-based). Values under 1 KB are shown as whole
/// bytes, larger values with two decimals.
///
/// ```rust,ignore
/// use crate::utils::format_bytes;
///
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (write to temp file then rename)
///
/// The target is either the previous content or the complete new content,
/// never a truncated mix. Parent directories are created as needed.
///
/// # Errors
///
/// - [`VaultError::FileIo`] if writing the temporary file or the rename fails
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| VaultError::file_io(parent, e))?;
    }

    let temp_path = path.with_extension("tmp");
    let write_temp = || -> io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()
    };

    if let Err(e) = write_temp() {
        fs::remove_file(&temp_path).ok();
        return Err(VaultError::file_io(&temp_path, e));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        fs::remove_file(&temp_path).ok();
        VaultError::file_io(path, e)
    })?;

    Ok(())
}
