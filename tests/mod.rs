//! Main test module for patchvault
//!
//! This module includes all test suites:
//! - Integration tests for backup, restore and retention scenarios
//! - Property-based tests for retention and restore invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::patchvault::*;
    use std::fs;
    use tempfile::TempDir;

    fn open(game: &TempDir, data: &TempDir) -> BackupManager {
        BackupManager::open(game.path().to_path_buf(), data.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_empty_pack_directory() {
        let game = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        fs::create_dir_all(game.path().join("imagepack2")).unwrap();
        let manager = open(&game, &data);

        let backup = manager.create("empty", BackupKind::Manual).unwrap();
        assert_eq!(backup.file_count(), 0);
        assert!(manager.backup_dir(&backup).is_dir());

        let result = manager.restore(&backup).unwrap();
        assert_eq!(result.files_restored, 0);
        assert_eq!(result.bytes_written, 0);
    }

    #[test]
    fn test_missing_pack_directory() {
        let game = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let manager = open(&game, &data);

        let err = manager.create("", BackupKind::Manual).unwrap_err();
        assert!(matches!(err, VaultError::WalkDir(_)));
        assert!(manager.list_backups().is_empty());
    }

    #[test]
    fn test_special_filenames() {
        let game = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let pack = game.path().join("imagepack2");
        let names = [
            "file with spaces.npk",
            "sprite-(v2).npk",
            "캐릭터.npk",
            "UPPER.NPK",
            ".npk",
        ];
        fs::create_dir_all(&pack).unwrap();
        for (i, name) in names.iter().enumerate() {
            fs::write(pack.join(name), format!("content {}", i)).unwrap();
        }
        let manager = open(&game, &data);

        let backup = manager.create("", BackupKind::Manual).unwrap();
        assert_eq!(backup.file_count(), names.len());

        for name in &names {
            fs::write(pack.join(name), b"patched").unwrap();
        }
        manager.restore(&backup).unwrap();
        for (i, name) in names.iter().enumerate() {
            assert_eq!(fs::read_to_string(pack.join(name)).unwrap(), format!("content {}", i));
        }
    }

    #[test]
    fn test_zero_byte_pack() {
        let game = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        fs::create_dir_all(game.path().join("imagepack2")).unwrap();
        fs::write(game.path().join("imagepack2").join("empty.npk"), b"").unwrap();
        let manager = open(&game, &data);

        let backup = manager.create("", BackupKind::Manual).unwrap();
        assert_eq!(backup.files[0].size, 0);
        assert_eq!(
            backup.files[0].hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(manager.verify_backup(&backup).unwrap().is_valid());
    }

    #[test]
    fn test_catalog_path_escaping_root_is_refused() {
        let game = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        fs::create_dir_all(game.path().join("imagepack2")).unwrap();
        let manager = open(&game, &data);

        let mut backup = manager.create("", BackupKind::Manual).unwrap();
        backup.files.push(BackupFile {
            path: "../outside.npk".to_string(),
            hash: "00".repeat(32),
            size: 0,
        });

        assert!(manager.restore(&backup).is_err());
        assert!(!game.path().parent().unwrap().join("outside.npk").exists());
    }

    #[test]
    fn test_unknown_backup_id() {
        let game = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let manager = open(&game, &data);

        let err = manager.restore_by_id("backup_20990101_000000").unwrap_err();
        assert!(matches!(err, VaultError::BackupNotFound(_)));
        assert!(err.user_message().contains("patchvault list"));
    }

    #[test]
    fn test_corrupt_catalog_is_reported() {
        let game = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let catalog = data.path().join("backup").join("backup.json");
        fs::create_dir_all(catalog.parent().unwrap()).unwrap();
        fs::write(&catalog, b"{\"backups\": [").unwrap();

        let err = BackupManager::open(game.path().to_path_buf(), data.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, VaultError::Persistence(_)));
        // Left as found for the user to inspect
        assert_eq!(fs::read(&catalog).unwrap(), b"{\"backups\": [");
    }

    #[test]
    fn test_whole_root_tracking() {
        let game = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        fs::create_dir_all(game.path().join("sound")).unwrap();
        fs::write(game.path().join("sound").join("bgm.npk"), b"bgm").unwrap();
        fs::write(game.path().join("top.npk"), b"top").unwrap();

        let manager = VaultBuilder::new()
            .tracked_subdir("")
            .build(game.path().to_path_buf(), data.path().to_path_buf())
            .unwrap();
        let backup = manager.create("", BackupKind::Manual).unwrap();

        let mut paths: Vec<&str> = backup.files.iter().map(|f| f.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["sound/bgm.npk", "top.npk"]);
    }
}
