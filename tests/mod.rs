//! Main test module for CryptDir
//!
//! This module includes all test suites:
//! - Integration tests for whole sync cycles
//! - Chaos tests for damaged stores and unreadable sources
//! - Property-based tests for round trips and store invariants

pub mod integration;

#[cfg(test)]
mod edge_cases {
    use ::cryptdir::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn build(source: &TempDir, store: &TempDir, observer: &CollectingObserver) -> CryptDir {
        CryptDirBuilder::new()
            .store_dir(store.path().join("store"))
            .observer(Arc::new(observer.clone()))
            .build(source.path().to_path_buf())
            .unwrap()
    }

    #[test]
    fn test_empty_directory() {
        let source_dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let observer = CollectingObserver::new();
        let cryptdir = build(&source_dir, &store_dir, &observer);

        let report = cryptdir.encrypt("pw").unwrap();
        assert!(!report.has_changes());
        assert!(!report.store_dropped);
        assert!(observer.events().is_empty());
        assert!(!cryptdir.store_dir().exists());
    }

    #[test]
    fn test_special_filenames() {
        let source_dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let observer = CollectingObserver::new();
        let cryptdir = build(&source_dir, &store_dir, &observer);

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            "ünïcödé.txt",
            "日本語.txt",
        ];
        for name in &special_names {
            fs::write(source_dir.path().join(name), name.as_bytes()).unwrap();
        }

        let report = cryptdir.encrypt("pw").unwrap();
        assert_eq!(report.added, special_names.len());

        let restore_dir = TempDir::new().unwrap();
        let restorer = CryptDirBuilder::new()
            .store_dir(cryptdir.store_dir().to_path_buf())
            .build(restore_dir.path().to_path_buf())
            .unwrap();
        restorer.decrypt("pw").unwrap();

        for name in &special_names {
            assert_eq!(
                fs::read(restore_dir.path().join(name)).unwrap(),
                name.as_bytes(),
                "content of {}",
                name
            );
        }
    }

    #[test]
    fn test_natural_order_of_events() {
        let source_dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let observer = CollectingObserver::new();
        let cryptdir = build(&source_dir, &store_dir, &observer);

        for name in ["file10", "File2", "file1"] {
            fs::write(source_dir.path().join(name), name).unwrap();
        }
        cryptdir.encrypt("pw").unwrap();

        let paths: Vec<String> = observer
            .events()
            .iter()
            .filter_map(|e| e.path().map(str::to_string))
            .collect();
        assert_eq!(paths, vec!["file1", "File2", "file10"]);
    }

    #[test]
    fn test_empty_file_and_empty_directories() {
        let source_dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let observer = CollectingObserver::new();
        let cryptdir = build(&source_dir, &store_dir, &observer);

        fs::create_dir_all(source_dir.path().join("a/b/c")).unwrap();
        fs::write(source_dir.path().join("empty"), b"").unwrap();
        cryptdir.encrypt("pw").unwrap();

        let restore_dir = TempDir::new().unwrap();
        let restorer = CryptDirBuilder::new()
            .store_dir(cryptdir.store_dir().to_path_buf())
            .build(restore_dir.path().join("nested/target"))
            .unwrap();
        let report = restorer.decrypt("pw").unwrap();

        assert_eq!(report.dirs_created, 3);
        assert_eq!(report.files_decrypted, 1);
        assert!(restore_dir.path().join("nested/target/a/b/c").is_dir());
        assert_eq!(
            fs::read(restore_dir.path().join("nested/target/empty")).unwrap(),
            b""
        );
    }

    #[test]
    fn test_default_store_is_not_mirrored() {
        let source_dir = TempDir::new().unwrap();
        fs::write(source_dir.path().join("doc.txt"), "text").unwrap();
        let cryptdir = CryptDir::new(source_dir.path().to_path_buf()).unwrap();

        let first = cryptdir.encrypt("pw").unwrap();
        assert_eq!(first.added, 1);
        assert!(source_dir.path().join(".cryptdir").is_dir());

        let second = cryptdir.encrypt("pw").unwrap();
        assert!(!second.has_changes());
        assert_eq!(second.unchanged, 1);
    }

    #[test]
    fn test_default_exclusions() {
        let source_dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let observer = CollectingObserver::new();
        let cryptdir = build(&source_dir, &store_dir, &observer);

        fs::write(source_dir.path().join(".DS_Store"), "junk").unwrap();
        fs::write(source_dir.path().join("Thumbs.db"), "junk").unwrap();
        fs::write(source_dir.path().join("~$report.docx"), "lock").unwrap();
        fs::write(source_dir.path().join("report.docx"), "real").unwrap();

        let report = cryptdir.encrypt("pw").unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(observer.events(), vec![SyncEvent::Added("report.docx".to_string())]);
    }

    #[test]
    fn test_filter_and_exclude() {
        let source_dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let observer = CollectingObserver::new();
        let cryptdir = CryptDirBuilder::new()
            .store_dir(store_dir.path().join("store"))
            .exclude("drafts")
            .include_pattern(Some("*.md".to_string()))
            .observer(Arc::new(observer.clone()))
            .build(source_dir.path().to_path_buf())
            .unwrap();

        fs::create_dir_all(source_dir.path().join("notes/sub")).unwrap();
        fs::create_dir_all(source_dir.path().join("drafts")).unwrap();
        fs::create_dir_all(source_dir.path().join("images")).unwrap();
        fs::write(source_dir.path().join("notes/sub/a.md"), "a").unwrap();
        fs::write(source_dir.path().join("notes/b.txt"), "b").unwrap();
        fs::write(source_dir.path().join("drafts/c.md"), "c").unwrap();
        fs::write(source_dir.path().join("images/d.png"), "d").unwrap();

        cryptdir.encrypt("pw").unwrap();
        let manifest = Manifest::load(cryptdir.store_dir(), "pw").unwrap();
        let paths: Vec<&str> = manifest.dirents().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["notes", "notes/sub", "notes/sub/a.md"]);
    }

    #[test]
    fn test_large_file() {
        let source_dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let observer = CollectingObserver::new();
        let cryptdir = build(&source_dir, &store_dir, &observer);

        let content: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i * 7 % 251) as u8).collect();
        fs::write(source_dir.path().join("big.bin"), &content).unwrap();
        let report = cryptdir.encrypt("pw").unwrap();
        assert!(report.bytes_encrypted > 0);

        let restore_dir = TempDir::new().unwrap();
        CryptDirBuilder::new()
            .store_dir(cryptdir.store_dir().to_path_buf())
            .build(restore_dir.path().to_path_buf())
            .unwrap()
            .decrypt("pw")
            .unwrap();
        assert_eq!(fs::read(restore_dir.path().join("big.bin")).unwrap(), content);
    }
}
