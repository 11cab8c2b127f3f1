//! Property-based testing for patchvault
//!
//! Uses proptest to check the retention policy and the create/restore cycle
//! across randomly generated inputs.

use ::patchvault::*;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn backup_at(index: usize, secs: i64) -> Backup {
    Backup {
        id: format!("backup_{:03}", index),
        timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        description: String::new(),
        files: Vec::new(),
        kind: BackupKind::Manual,
        game_version: VaultConfig::DEFAULT_GAME_VERSION.to_string(),
    }
}

/// Relative pack paths, one or two directories deep
fn pack_path_strategy() -> impl Strategy<Value = String> {
    (
        prop::collection::vec("[a-z]{1,6}", 0..=2),
        "[a-z0-9_]{1,8}",
        prop_oneof![Just("npk"), Just("NPK"), Just("txt")],
    )
        .prop_map(|(dirs, stem, ext)| {
            let mut parts = dirs;
            parts.push(format!("{}.{}", stem, ext));
            parts.join("/")
        })
}

fn pack_tree_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(pack_path_strategy(), prop::collection::vec(any::<u8>(), 0..512), 0..12)
}

fn write_tree(root: &Path, tree: &BTreeMap<String, Vec<u8>>) -> usize {
    let mut written = 0;
    for (relative, content) in tree {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        // A generated file may collide with a generated directory name
        if path.is_dir() || fs::write(&path, content).is_err() {
            continue;
        }
        if relative.to_ascii_lowercase().ends_with(".npk") {
            written += 1;
        }
    }
    written
}

fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            (relative, fs::read(e.path()).unwrap())
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The newest backups survive, in their original order
    #[test]
    fn retention_keeps_newest_in_order(
        offsets in prop::collection::vec(0i64..50, 0..30),
        max_backups in 1usize..12,
    ) {
        let backups: Vec<Backup> = offsets.iter().enumerate().map(|(i, &s)| backup_at(i, s)).collect();
        let (kept, evicted) = apply_retention(backups.clone(), max_backups);

        prop_assert_eq!(kept.len(), backups.len().min(max_backups));
        prop_assert_eq!(kept.len() + evicted.len(), backups.len());

        let all: HashSet<&str> = backups.iter().map(|b| b.id.as_str()).collect();
        let split: HashSet<&str> = kept.iter().chain(evicted.iter()).map(|b| b.id.as_str()).collect();
        prop_assert_eq!(all, split);

        // No evicted backup is newer than a kept one
        if let (Some(oldest_kept), Some(newest_evicted)) = (
            kept.iter().map(|b| b.timestamp).min(),
            evicted.iter().map(|b| b.timestamp).max(),
        ) {
            prop_assert!(newest_evicted <= oldest_kept);
        }

        // Survivors keep insertion order (IDs encode it)
        let kept_ids: Vec<&str> = kept.iter().map(|b| b.id.as_str()).collect();
        let mut sorted = kept_ids.clone();
        sorted.sort();
        prop_assert_eq!(kept_ids, sorted);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Catalog and store hold exactly min(N, max) backups after N creates
    #[test]
    fn store_matches_catalog_after_creates(creates in 1usize..7, max_backups in 1usize..5) {
        let game = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        fs::create_dir_all(game.path().join("imagepack2")).unwrap();
        fs::write(game.path().join("imagepack2").join("base.npk"), b"base").unwrap();

        let manager = BackupManager::open(game.path().to_path_buf(), data.path().to_path_buf()).unwrap();
        let mut settings = manager.settings();
        settings.max_backups = max_backups;
        manager.update_settings(settings).unwrap();

        for i in 0..creates {
            manager.create(&format!("run {}", i), BackupKind::Manual).unwrap();
        }

        let listed: HashSet<String> = manager.list_backups().into_iter().map(|b| b.id).collect();
        let on_disk: HashSet<String> = fs::read_dir(manager.store_path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();

        prop_assert_eq!(listed.len(), creates.min(max_backups));
        prop_assert_eq!(listed, on_disk);
    }

    /// Restoring a backup brings every tracked file back byte-for-byte
    #[test]
    fn restore_recovers_tracked_files(
        original in pack_tree_strategy(),
        patched in pack_tree_strategy(),
    ) {
        let game = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let pack_root = game.path().join("imagepack2");
        fs::create_dir_all(&pack_root).unwrap();

        let tracked = write_tree(&pack_root, &original);
        let before = read_tree(&pack_root);

        let manager = BackupManager::open(game.path().to_path_buf(), data.path().to_path_buf()).unwrap();
        let backup = manager.create("", BackupKind::Manual).unwrap();
        prop_assert_eq!(backup.file_count(), tracked);

        write_tree(&pack_root, &patched);
        manager.restore(&backup).unwrap();
        let after = read_tree(&pack_root);

        for (relative, content) in &before {
            if relative.to_ascii_lowercase().ends_with(".npk") {
                prop_assert_eq!(after.get(relative), Some(content));
            }
        }
    }
}
