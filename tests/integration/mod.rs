//! Integration tests for patchvault
//!
//! Drives the manager against a throwaway game directory the way the
//! installer does: back up, patch, roll back, prune.

use ::patchvault::*;
use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// A fake game install plus a data directory
pub struct VaultHarness {
    pub game_dir: TempDir,
    pub data_dir: TempDir,
    pub manager: BackupManager,
}

impl VaultHarness {
    /// Empty `imagepack2` with default settings
    pub fn new() -> Self {
        let game_dir = TempDir::new().unwrap();
        let data_dir = TempDir::new().unwrap();
        fs::create_dir_all(game_dir.path().join("imagepack2")).unwrap();

        let manager = VaultBuilder::new()
            .build(game_dir.path().to_path_buf(), data_dir.path().to_path_buf())
            .unwrap();

        Self {
            game_dir,
            data_dir,
            manager,
        }
    }

    /// Harness with a few packs already installed
    pub fn with_stock_packs() -> Self {
        let harness = Self::new();
        harness.write_pack("sprite_character.npk", b"stock character sprites");
        harness.write_pack("a/b.npk", b"stock b");
        harness.write_pack("interface/hud.NPK", b"stock hud");
        harness.write_pack("interface/readme.txt", b"not a pack");
        harness
    }

    /// Path of a file under `imagepack2`
    pub fn pack_path(&self, relative: &str) -> PathBuf {
        self.game_dir.path().join("imagepack2").join(relative)
    }

    pub fn write_pack(&self, relative: &str, content: &[u8]) {
        let path = self.pack_path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn read_pack(&self, relative: &str) -> Vec<u8> {
        fs::read(self.pack_path(relative)).unwrap()
    }

    /// Contents of every file under `imagepack2`, keyed by relative path
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        let root = self.game_dir.path().join("imagepack2");
        walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let relative = e.path().strip_prefix(&root).unwrap().to_string_lossy().replace('\\', "/");
                (relative, fs::read(e.path()).unwrap())
            })
            .collect()
    }

    /// Reopen the same directories with a fresh manager
    pub fn reopen(&self) -> BackupManager {
        BackupManager::open(
            self.game_dir.path().to_path_buf(),
            self.data_dir.path().to_path_buf(),
        )
        .unwrap()
    }

    pub fn set_max_backups(&self, max_backups: usize) {
        let mut settings = self.manager.settings();
        settings.max_backups = max_backups;
        self.manager.update_settings(settings).unwrap();
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn store_dirs(store: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(store)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_patch_and_roll_back() {
    let harness = VaultHarness::with_stock_packs();
    let before = harness.snapshot();

    let backup = harness.manager.create("Before UI patch", BackupKind::Manual).unwrap();
    assert_eq!(backup.file_count(), 3);

    // Install a "patch"
    harness.write_pack("sprite_character.npk", b"patched sprites, much larger than before");
    harness.write_pack("interface/hud.NPK", b"patched hud");
    fs::remove_file(harness.pack_path("a/b.npk")).unwrap();

    let result = harness.manager.restore(&backup).unwrap();
    info!("Restored {} files", result.files_restored);

    assert_eq!(result.files_restored, 3);
    assert_eq!(harness.snapshot(), before);
}

#[test]
fn test_recorded_paths_are_relative_to_game_root() {
    let harness = VaultHarness::with_stock_packs();
    let backup = harness.manager.create("", BackupKind::Manual).unwrap();

    let paths: Vec<&str> = backup.files.iter().map(|f| f.path.as_str()).collect();
    assert!(paths.contains(&"imagepack2/a/b.npk"));
    assert!(paths.contains(&"imagepack2/interface/hud.NPK"));
    assert!(paths.contains(&"imagepack2/sprite_character.npk"));
    assert!(!paths.iter().any(|p| p.ends_with(".txt")));
}

#[test]
fn test_stored_digests_match_stored_bytes() {
    let harness = VaultHarness::with_stock_packs();
    let backup = harness.manager.create("", BackupKind::Manual).unwrap();
    let backup_dir = harness.manager.backup_dir(&backup);

    for file in &backup.files {
        let stored = fs::read(backup_dir.join(&file.path)).unwrap();
        assert_eq!(file.hash, sha256_hex(&stored));
        assert_eq!(file.size, stored.len() as u64);
    }
    assert_eq!(
        backup.total_size(),
        (b"stock character sprites".len() + b"stock b".len() + b"stock hud".len()) as u64
    );
}

#[test]
fn test_retention_evicts_oldest() {
    let harness = VaultHarness::with_stock_packs();
    harness.set_max_backups(2);

    let b1 = harness.manager.create("B1", BackupKind::Manual).unwrap();
    let b2 = harness.manager.create("B2", BackupKind::Auto).unwrap();
    let b3 = harness.manager.create("B3", BackupKind::Manual).unwrap();

    let ids: Vec<String> = harness.manager.list_backups().into_iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![b2.id.clone(), b3.id.clone()]);

    let store = harness.manager.store_path();
    assert!(!store.join(&b1.id).exists());
    assert_eq!(store_dirs(&store), {
        let mut expected = vec![b2.id, b3.id];
        expected.sort();
        expected
    });

    // Reloaded catalog agrees
    assert_eq!(harness.reopen().list_backups(), harness.manager.list_backups());
}

#[test]
fn test_lowering_max_backups_applies_on_next_create() {
    let harness = VaultHarness::with_stock_packs();
    for i in 0..4 {
        harness.manager.create(&format!("B{}", i), BackupKind::Manual).unwrap();
    }
    harness.set_max_backups(2);
    assert_eq!(harness.manager.list_backups().len(), 4);

    harness.manager.create("B4", BackupKind::Manual).unwrap();
    let descriptions: Vec<String> = harness
        .manager
        .list_backups()
        .into_iter()
        .map(|b| b.description)
        .collect();
    assert_eq!(descriptions, vec!["B3", "B4"]);
    assert_eq!(store_dirs(&harness.manager.store_path()).len(), 2);
}

#[test]
fn test_tampered_backup_is_refused() {
    let harness = VaultHarness::with_stock_packs();
    let backup = harness.manager.create("", BackupKind::Manual).unwrap();

    harness.write_pack("a/b.npk", b"patched b");
    harness.write_pack("sprite_character.npk", b"patched sprites");
    let live = harness.snapshot();

    let stored = harness.manager.backup_dir(&backup).join("imagepack2/a/b.npk");
    fs::write(&stored, b"flipped bits").unwrap();

    let err = harness.manager.restore(&backup).unwrap_err();
    assert!(err.is_integrity());
    assert!(err.to_string().contains("imagepack2/a/b.npk"));
    match err {
        VaultError::Integrity { path, .. } => assert_eq!(path, "imagepack2/a/b.npk"),
        other => panic!("unexpected error: {other:?}"),
    }

    // Nothing in the live tree was touched
    assert_eq!(harness.snapshot(), live);
}

#[test]
fn test_restore_is_idempotent() {
    let harness = VaultHarness::with_stock_packs();
    let backup = harness.manager.create("", BackupKind::Manual).unwrap();
    harness.write_pack("a/b.npk", b"patched");

    harness.manager.restore(&backup).unwrap();
    let once = harness.snapshot();
    harness.manager.restore(&backup).unwrap();
    assert_eq!(harness.snapshot(), once);
}

#[test]
fn test_restore_keeps_files_added_later() {
    let harness = VaultHarness::with_stock_packs();
    let backup = harness.manager.create("", BackupKind::Manual).unwrap();
    harness.write_pack("new_patch.npk", b"added by a patch");

    harness.manager.restore(&backup).unwrap();
    assert_eq!(harness.read_pack("new_patch.npk"), b"added by a patch");
}

#[test]
fn test_backups_survive_reopen() {
    let harness = VaultHarness::with_stock_packs();
    let backup = harness.manager.create("persisted", BackupKind::Manual).unwrap();
    harness.write_pack("a/b.npk", b"patched");

    let reopened = harness.reopen();
    let listed = reopened.list_backups();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], backup);

    reopened.restore_by_id(&backup.id).unwrap();
    assert_eq!(harness.read_pack("a/b.npk"), b"stock b");
}

#[test]
fn test_catalog_layout_on_disk() {
    let harness = VaultHarness::with_stock_packs();
    let backup = harness.manager.create("layout", BackupKind::Auto).unwrap();

    let catalog_path = harness.data_dir.path().join("backup").join("backup.json");
    assert_eq!(harness.manager.catalog_path(), catalog_path);
    assert_eq!(harness.manager.store_path(), harness.data_dir.path().join("backups"));

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&catalog_path).unwrap()).unwrap();
    let record = &json["backups"][0];
    assert_eq!(record["id"], backup.id.as_str());
    assert_eq!(record["type"], "auto");
    assert_eq!(record["gameVersion"], "1.0.0");
    assert_eq!(record["description"], "layout");
    assert!(record["files"][0]["hash"].as_str().unwrap().len() == 64);
    assert_eq!(json["settings"]["maxBackups"], 10);
    assert_eq!(json["settings"]["backupInterval"], 3600);
    assert_eq!(json["settings"]["autoBackup"], true);
    assert_eq!(json["settings"]["backupPath"], "backups");
    assert_eq!(json["settings"]["compressionEnabled"], true);
}

#[test]
fn test_reads_catalog_written_by_older_installer() {
    let harness = VaultHarness::new();
    let catalog = r#"{
    "backups": [
        {
            "id": "backup_20240101_120000",
            "timestamp": "2024-01-01T12:00:00.1234567+08:00",
            "description": "Manual backup",
            "files": null,
            "type": "manual",
            "gameVersion": "1.0.0"
        }
    ],
    "settings": {
        "autoBackup": false,
        "backupInterval": 7200,
        "maxBackups": 5,
        "backupPath": "backups",
        "compressionEnabled": true
    }
}"#;
    let path = harness.data_dir.path().join("backup").join("backup.json");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, catalog).unwrap();

    let manager = harness.reopen();
    let backups = manager.list_backups();
    assert_eq!(backups.len(), 1);
    assert!(backups[0].files.is_empty());
    let expected = Utc.with_ymd_and_hms(2024, 1, 1, 4, 0, 0).unwrap() + chrono::Duration::nanoseconds(123_456_700);
    assert_eq!(backups[0].timestamp, expected);
    assert!(!manager.settings().auto_backup);
    assert_eq!(manager.settings().backup_interval, 7200);

    // An empty backup restores nothing and needs no store directory
    let result = manager.restore(&backups[0]).unwrap();
    assert_eq!(result.files_restored, 0);
}

#[test]
fn test_concurrent_creates_get_distinct_ids() {
    let harness = VaultHarness::with_stock_packs();

    let created: Vec<Backup> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let manager = harness.manager.clone();
                scope.spawn(move || manager.create(&format!("thread {}", i), BackupKind::Manual).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut ids: Vec<&str> = created.iter().map(|b| b.id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    assert_eq!(harness.manager.list_backups().len(), 4);
    assert_eq!(store_dirs(&harness.manager.store_path()).len(), 4);
}

#[test]
fn test_verify_reports_tampering_without_failing() {
    let harness = VaultHarness::with_stock_packs();
    let backup = harness.manager.create("", BackupKind::Manual).unwrap();
    assert!(harness.manager.verify_backup(&backup).unwrap().is_valid());

    fs::write(
        harness.manager.backup_dir(&backup).join("imagepack2/sprite_character.npk"),
        b"bad",
    )
    .unwrap();

    let report = harness.manager.verify_backup(&backup).unwrap();
    let failed: Vec<&str> = report.failures().map(|c| c.path.as_str()).collect();
    assert_eq!(failed, vec!["imagepack2/sprite_character.npk"]);
    assert!(report.summary().contains("1 of 3"));
}

#[test]
fn test_custom_resolver_redirects_restore() {
    let harness = VaultHarness::with_stock_packs();
    let backup = harness.manager.create("", BackupKind::Manual).unwrap();

    let elsewhere = TempDir::new().unwrap();
    let redirected = VaultBuilder::new()
        .resolver(Box::new(RootResolver::new(elsewhere.path())))
        .build(
            harness.game_dir.path().to_path_buf(),
            harness.data_dir.path().to_path_buf(),
        )
        .unwrap();

    redirected.restore(&backup).unwrap();
    assert_eq!(
        fs::read(elsewhere.path().join("imagepack2/a/b.npk")).unwrap(),
        b"stock b"
    );
}

#[test]
fn test_daemon_and_cli_handles_do_not_lose_backups() {
    let harness = VaultHarness::with_stock_packs();
    harness.set_max_backups(3);
    let daemon = harness.reopen();
    let cli = harness.reopen();

    let mut created = Vec::new();
    for round in 0..3 {
        created.push(cli.create(&format!("manual {}", round), BackupKind::Manual).unwrap().id);
        created.push(daemon.create("", BackupKind::Auto).unwrap().id);
    }

    // Retention ran against the shared catalog, not a per-handle copy
    let survivors: Vec<String> = harness.reopen().list_backups().into_iter().map(|b| b.id).collect();
    assert_eq!(survivors, created[3..].to_vec());
    let mut expected = survivors.clone();
    expected.sort();
    assert_eq!(store_dirs(&harness.manager.store_path()), expected);
    info!("Survivors after interleaved creates: {:?}", survivors);
}
