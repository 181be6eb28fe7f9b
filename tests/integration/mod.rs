//! Integration tests for CryptDir
//!
//! Whole encrypt and decrypt cycles through the public API: round trips,
//! incremental updates, deduplication and store maintenance.

use ::cryptdir::*;
use filetime::FileTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;
use walkdir::WalkDir;

/// Test harness wrapping one source tree and one store
pub struct CryptDirTestHarness {
    pub source_dir: TempDir,
    pub store_root: TempDir,
    pub observer: CollectingObserver,
    pub cryptdir: CryptDir,
    pub password: String,
}

impl CryptDirTestHarness {
    /// Create a new harness with an empty source and no store
    pub fn new() -> Self {
        let source_dir = TempDir::new().unwrap();
        let store_root = TempDir::new().unwrap();
        let observer = CollectingObserver::new();

        let cryptdir = CryptDirBuilder::new()
            .store_dir(store_root.path().join("store"))
            .observer(Arc::new(observer.clone()))
            .build(source_dir.path().to_path_buf())
            .unwrap();

        Self {
            source_dir,
            store_root,
            observer,
            cryptdir,
            password: "correct horse battery staple".to_string(),
        }
    }

    pub fn source(&self) -> &Path {
        self.source_dir.path()
    }

    pub fn store(&self) -> &Path {
        self.cryptdir.store_dir()
    }

    pub fn write(&self, path: &str, content: impl AsRef<[u8]>) {
        let full = self.source().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    pub fn remove(&self, path: &str) {
        let full = self.source().join(path);
        if full.is_dir() {
            fs::remove_dir_all(full).unwrap();
        } else {
            fs::remove_file(full).unwrap();
        }
    }

    /// Encrypt and return the report; the observer is drained first
    pub fn encrypt(&self) -> SyncReport {
        self.observer.take();
        let report = self.cryptdir.encrypt(&self.password).unwrap();
        info!("encrypt: {} events", report.events.len());
        report
    }

    /// Build an engine restoring into `destination` from this store
    pub fn restorer(&self, destination: &Path) -> CryptDir {
        CryptDirBuilder::new()
            .store_dir(self.store().to_path_buf())
            .observer(Arc::new(CollectingObserver::new()))
            .build(destination.to_path_buf())
            .unwrap()
    }

    pub fn manifest(&self) -> Manifest {
        Manifest::load(self.store(), &self.password).unwrap()
    }

    pub fn object_id(&self, path: &str) -> String {
        self.manifest()
            .find_path_entry(path)
            .and_then(|e| e.object_id.clone())
            .unwrap()
    }

    pub fn blob(&self, object_id: &str) -> PathBuf {
        self.store().join(object_id)
    }

    pub fn manifest_bytes(&self) -> Vec<u8> {
        fs::read(self.store().join(addressing::nil_object_id())).unwrap()
    }

    pub fn object_count(&self) -> usize {
        ObjectStore::new(self.store().to_path_buf())
            .list_objects()
            .unwrap()
            .len()
    }
}

/// Relative path of every entry under `root`, with file contents
pub fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let relative = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            let content = e.file_type().is_file().then(|| fs::read(e.path()).unwrap());
            (relative, content)
        })
        .collect()
}

/// Random bytes from a seeded generator
pub fn random_content(rng: &mut StdRng, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf[..]);
    buf
}

#[test]
fn test_round_trip() {
    let harness = CryptDirTestHarness::new();
    let mut rng = StdRng::seed_from_u64(42);

    harness.write("README.md", "# Project");
    harness.write("src/main.rs", "fn main() {}");
    harness.write("src/deep/nested/mod.rs", "pub mod x;");
    harness.write("assets/blob.bin", random_content(&mut rng, 200_000));
    harness.write("assets/empty", "");
    fs::create_dir_all(harness.source().join("empty_dir/inner")).unwrap();

    let report = harness.encrypt();
    assert!(report.manifest_written);
    assert!(!report.has_failures());

    let restore_dir = TempDir::new().unwrap();
    let restored = harness.restorer(restore_dir.path()).decrypt(&harness.password).unwrap();
    assert!(!restored.has_failures());
    assert_eq!(restored.files_decrypted, 5);

    assert_eq!(snapshot(harness.source()), snapshot(restore_dir.path()));
}

#[test]
fn test_store_hides_names_and_contents() {
    let harness = CryptDirTestHarness::new();
    harness.write("secret-plans.txt", "launch codes 0000");
    harness.encrypt();

    for entry in fs::read_dir(harness.store()).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().to_string();
        assert!(addressing::is_object_id(&name), "unexpected store file {}", name);
        let bytes = fs::read(entry.path()).unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("launch codes"));
        assert!(!String::from_utf8_lossy(&bytes).contains("secret-plans"));
    }
}

#[test]
fn test_wrong_password() {
    let harness = CryptDirTestHarness::new();
    harness.write("a.txt", "alpha");
    harness.encrypt();
    let before = harness.manifest_bytes();

    let restore_dir = TempDir::new().unwrap();
    let err = harness
        .restorer(&restore_dir.path().join("out"))
        .decrypt("wrong password")
        .unwrap_err();
    assert!(err.is_crypto_failure(), "unexpected error: {}", err);
    assert_eq!(err.exit_code(), 4);
    assert!(!restore_dir.path().join("out").exists());

    harness.write("b.txt", "beta");
    let err = harness.cryptdir.encrypt("wrong password").unwrap_err();
    assert!(err.is_crypto_failure());
    assert_eq!(harness.manifest_bytes(), before);
    assert_eq!(harness.object_count(), 1);
}

#[test]
fn test_duplicate_content_is_stored_once() {
    let harness = CryptDirTestHarness::new();
    harness.write("one.txt", "same bytes");
    harness.write("dir/two.txt", "same bytes");
    harness.write("dir/sub/three.txt", "same bytes");
    harness.write("other.txt", "different bytes");

    let report = harness.encrypt();
    assert_eq!(report.objects_written, 2);
    assert_eq!(report.objects_reused, 2);
    assert_eq!(harness.object_count(), 2);

    let manifest = harness.manifest();
    assert_eq!(manifest.files().len(), 2);
    let shared = harness.object_id("one.txt");
    assert_eq!(harness.object_id("dir/two.txt"), shared);
    assert_eq!(harness.object_id("dir/sub/three.txt"), shared);
    assert_eq!(manifest.reference_count(&shared), 3);
}

#[test]
fn test_resync_without_changes_is_silent() {
    let harness = CryptDirTestHarness::new();
    harness.write("a.txt", "alpha");
    harness.write("sub/b.txt", "beta");
    harness.encrypt();
    let manifest_before = harness.manifest_bytes();

    let report = harness.encrypt();
    assert!(report.events.is_empty());
    assert!(harness.observer.events().is_empty());
    assert!(!report.has_changes());
    assert_eq!(report.objects_written, 0);
    assert_eq!(report.unchanged, 3);
    assert_eq!(harness.manifest_bytes(), manifest_before);
}

#[test]
fn test_incremental_update() {
    let harness = CryptDirTestHarness::new();
    harness.write("keep1.txt", "unchanged one");
    harness.write("keep2.txt", "unchanged two");
    harness.write("edit.txt", "first version");
    harness.encrypt();

    let keep1 = harness.object_id("keep1.txt");
    let keep2 = harness.object_id("keep2.txt");
    let old_edit = harness.object_id("edit.txt");
    let keep1_bytes = fs::read(harness.blob(&keep1)).unwrap();
    let keep2_bytes = fs::read(harness.blob(&keep2)).unwrap();

    harness.write("edit.txt", "second version");
    let report = harness.encrypt();

    assert_eq!(report.events, vec![SyncEvent::Updated("edit.txt".to_string())]);
    assert_eq!(harness.observer.events(), report.events);
    assert_eq!(report.objects_written, 1);
    assert_eq!(report.objects_deleted, 1);
    assert!(!harness.blob(&old_edit).exists());
    assert_ne!(harness.object_id("edit.txt"), old_edit);
    assert_eq!(fs::read(harness.blob(&keep1)).unwrap(), keep1_bytes);
    assert_eq!(fs::read(harness.blob(&keep2)).unwrap(), keep2_bytes);
}

#[test]
fn test_deletion_keeps_shared_blob() {
    let harness = CryptDirTestHarness::new();
    harness.write("a.txt", "shared");
    harness.write("b.txt", "shared");
    harness.write("c.txt", "unique");
    harness.encrypt();

    let shared = harness.object_id("a.txt");
    let unique = harness.object_id("c.txt");

    harness.remove("a.txt");
    let report = harness.encrypt();
    assert_eq!(report.events, vec![SyncEvent::Removed("a.txt".to_string())]);
    assert_eq!(report.objects_deleted, 0);
    assert!(harness.blob(&shared).exists());

    harness.remove("c.txt");
    let report = harness.encrypt();
    assert_eq!(report.events, vec![SyncEvent::Removed("c.txt".to_string())]);
    assert_eq!(report.objects_deleted, 1);
    assert!(!harness.blob(&unique).exists());
    assert_eq!(harness.object_count(), 1);
}

#[test]
fn test_directory_removal_reports_every_path() {
    let harness = CryptDirTestHarness::new();
    harness.write("keep.txt", "k");
    harness.write("gone/a.txt", "a");
    harness.write("gone/b.txt", "b");
    harness.encrypt();

    harness.remove("gone");
    let report = harness.encrypt();
    assert_eq!(
        report.events,
        vec![
            SyncEvent::Removed("gone".to_string()),
            SyncEvent::Removed("gone/a.txt".to_string()),
            SyncEvent::Removed("gone/b.txt".to_string()),
        ]
    );
    assert_eq!(report.objects_deleted, 2);
}

#[test]
fn test_restore_skips_matching_files() {
    let harness = CryptDirTestHarness::new();
    harness.write("a.txt", "alpha");
    harness.write("dir/b.txt", "beta");
    harness.encrypt();

    let restore_dir = TempDir::new().unwrap();
    let restorer = harness.restorer(restore_dir.path());
    restorer.decrypt(&harness.password).unwrap();

    let a = restore_dir.path().join("a.txt");
    let b = restore_dir.path().join("dir/b.txt");
    let old = FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(&a, old).unwrap();
    filetime::set_file_mtime(&b, old).unwrap();

    let report = restorer.decrypt(&harness.password).unwrap();
    assert_eq!(report.files_skipped, 2);
    assert_eq!(report.files_decrypted, 0);
    assert_eq!(report.dirs_created, 0);
    assert!(report.events.is_empty());
    assert_eq!(FileTime::from_last_modification_time(&fs::metadata(&a).unwrap()), old);

    fs::write(&b, "tampered").unwrap();
    let report = restorer.decrypt(&harness.password).unwrap();
    assert_eq!(report.files_decrypted, 1);
    assert_eq!(report.events, vec![SyncEvent::Decrypted("dir/b.txt".to_string())]);
    assert_eq!(fs::read_to_string(&b).unwrap(), "beta");
    assert_eq!(FileTime::from_last_modification_time(&fs::metadata(&a).unwrap()), old);
}

#[test]
fn test_restore_leaves_extra_files_alone() {
    let harness = CryptDirTestHarness::new();
    harness.write("a.txt", "alpha");
    harness.encrypt();

    let restore_dir = TempDir::new().unwrap();
    fs::write(restore_dir.path().join("local-only.txt"), "mine").unwrap();
    harness.restorer(restore_dir.path()).decrypt(&harness.password).unwrap();

    assert_eq!(fs::read_to_string(restore_dir.path().join("local-only.txt")).unwrap(), "mine");
    assert_eq!(fs::read_to_string(restore_dir.path().join("a.txt")).unwrap(), "alpha");
}

#[test]
fn test_empty_source_drops_store() {
    let harness = CryptDirTestHarness::new();
    harness.write("a.txt", "alpha");
    harness.write("dir/b.txt", "beta");
    harness.encrypt();
    assert!(harness.store().exists());

    harness.remove("a.txt");
    harness.remove("dir");
    let report = harness.encrypt();

    assert!(report.store_dropped);
    assert_eq!(report.removed, 3);
    assert_eq!(report.events.last(), Some(&SyncEvent::StoreDropped));
    assert!(!harness.store().exists());

    let again = harness.encrypt();
    assert!(!again.store_dropped);
    assert!(again.events.is_empty());
}

#[test]
fn test_rename_reuses_object() {
    let harness = CryptDirTestHarness::new();
    harness.write("old-name.txt", "payload");
    harness.encrypt();
    let id = harness.object_id("old-name.txt");
    let blob_before = fs::read(harness.blob(&id)).unwrap();

    fs::rename(
        harness.source().join("old-name.txt"),
        harness.source().join("new-name.txt"),
    )
    .unwrap();
    let report = harness.encrypt();

    assert_eq!(report.objects_written, 0);
    assert_eq!(report.objects_reused, 1);
    assert_eq!(report.objects_deleted, 0);
    assert_eq!(
        report.events,
        vec![
            SyncEvent::Added("new-name.txt".to_string()),
            SyncEvent::Removed("old-name.txt".to_string()),
        ]
    );
    assert_eq!(harness.object_id("new-name.txt"), id);
    assert_eq!(fs::read(harness.blob(&id)).unwrap(), blob_before);
}

#[test]
fn test_copy_across_runs_reuses_object() {
    let harness = CryptDirTestHarness::new();
    harness.write("original.txt", "payload");
    harness.encrypt();
    let id = harness.object_id("original.txt");

    harness.write("backup/copy.txt", "payload");
    let report = harness.encrypt();

    assert_eq!(report.objects_written, 0);
    assert_eq!(harness.object_id("backup/copy.txt"), id);
    assert_eq!(harness.manifest().files().len(), 1);
}

#[test]
fn test_file_replaced_by_directory() {
    let harness = CryptDirTestHarness::new();
    harness.write("thing", "was a file");
    harness.encrypt();
    let old = harness.object_id("thing");

    harness.remove("thing");
    harness.write("thing/child.txt", "now a directory");
    let report = harness.encrypt();

    assert_eq!(
        report.events,
        vec![
            SyncEvent::Updated("thing".to_string()),
            SyncEvent::Added("thing/child.txt".to_string()),
        ]
    );
    assert!(!harness.blob(&old).exists());

    let restore_dir = TempDir::new().unwrap();
    harness.restorer(restore_dir.path()).decrypt(&harness.password).unwrap();
    assert!(restore_dir.path().join("thing").is_dir());
}

#[test]
fn test_dangling_reference_is_skipped() {
    let harness = CryptDirTestHarness::new();
    let mut manifest = Manifest::new();
    manifest.add_entry("docs", None, None);
    manifest.add_entry("docs/ghost.txt", Some(addressing::new_object_id()), None);
    assert!(manifest.persist(harness.store(), &harness.password).unwrap());

    let restore_dir = TempDir::new().unwrap();
    let report = harness.restorer(restore_dir.path()).decrypt(&harness.password).unwrap();

    assert_eq!(report.dangling_references, 1);
    assert!(!report.has_failures());
    assert_eq!(report.events, vec![SyncEvent::Created("docs".to_string())]);
    assert!(!restore_dir.path().join("docs/ghost.txt").exists());
}

#[test]
fn test_manifest_object_ids_cannot_escape_store() {
    let harness = CryptDirTestHarness::new();
    let outside = harness.store_root.path().join("outside.txt");
    fs::write(&outside, "must survive").unwrap();

    let json = r#"{"dirents":[{"path":"gone","objectId":"../outside.txt"}],"files":[{"objectId":"../outside.txt","contentHash":"h","secret":"s"}]}"#;
    fs::create_dir_all(harness.store()).unwrap();
    CipherPipeline::new(&harness.password)
        .encrypt_to_target(json.as_bytes(), &Manifest::blob_path(harness.store()))
        .unwrap();

    let err = harness.cryptdir.encrypt(&harness.password).unwrap_err();
    assert!(matches!(err, CryptDirError::InvalidManifest(_)), "{err:?}");
    assert!(harness.cryptdir.prune(&harness.password, false).is_err());
    assert!(harness.cryptdir.verify(&harness.password).is_err());

    let restore_dir = TempDir::new().unwrap();
    assert!(harness.restorer(restore_dir.path()).decrypt(&harness.password).is_err());
    assert_eq!(fs::read_to_string(&outside).unwrap(), "must survive");
}

#[test]
fn test_missing_blob_fails_only_its_entry() {
    let harness = CryptDirTestHarness::new();
    harness.write("a.txt", "alpha");
    harness.write("b.txt", "beta");
    harness.encrypt();
    fs::remove_file(harness.blob(&harness.object_id("a.txt"))).unwrap();

    let restore_dir = TempDir::new().unwrap();
    let report = harness.restorer(restore_dir.path()).decrypt(&harness.password).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "a.txt");
    assert!(report.failures[0].reason.contains("not found"));
    assert!(report.events[0].is_failure());
    assert_eq!(report.events[1], SyncEvent::Decrypted("b.txt".to_string()));
    assert_eq!(fs::read_to_string(restore_dir.path().join("b.txt")).unwrap(), "beta");
}

#[test]
fn test_missing_blob_is_encrypted_again() {
    let harness = CryptDirTestHarness::new();
    harness.write("a.txt", "alpha");
    harness.encrypt();
    let id = harness.object_id("a.txt");
    fs::remove_file(harness.blob(&id)).unwrap();

    harness.write("b.txt", "alpha");
    let report = harness.encrypt();
    assert_eq!(report.objects_written, 1);
    let new_id = harness.object_id("a.txt");
    assert_ne!(new_id, id);
    assert_eq!(harness.object_id("b.txt"), new_id);
    assert!(harness.blob(&new_id).exists());
}

#[test]
fn test_missing_source_has_no_side_effects() {
    let store_root = TempDir::new().unwrap();
    let observer = CollectingObserver::new();
    let cryptdir = CryptDirBuilder::new()
        .store_dir(store_root.path().join("store"))
        .observer(Arc::new(observer.clone()))
        .build(store_root.path().join("does-not-exist"))
        .unwrap();

    let err = cryptdir.encrypt("pw").unwrap_err();
    assert!(matches!(err, CryptDirError::SourceNotFound(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(observer.events().is_empty());
    assert!(!store_root.path().join("store").exists());
}

#[test]
fn test_verify_prune_and_status() {
    let harness = CryptDirTestHarness::new();
    harness.write("a.txt", "alpha");
    harness.write("b.txt", "alpha");
    harness.write("c.txt", "gamma");
    harness.encrypt();

    let report = harness.cryptdir.verify(&harness.password).unwrap();
    assert!(report.is_valid(), "{}", report.summary());
    assert_eq!(report.total_objects_checked, 2);

    let orphan = addressing::new_object_id();
    fs::write(harness.blob(&orphan), b"left behind").unwrap();
    fs::write(harness.store().join(".cryptdir-tmpXYZ123"), b"partial").unwrap();
    fs::write(harness.store().join("README"), b"not ours").unwrap();

    let report = harness.cryptdir.verify(&harness.password).unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.orphaned_objects, vec![orphan.clone()]);

    let status = harness.cryptdir.status(&harness.password).unwrap();
    assert_eq!(status.files, 3);
    assert_eq!(status.unique_objects, 2);
    assert_eq!(status.shared_references, 1);
    assert_eq!(status.orphaned_blobs, 1);

    let dry = harness.cryptdir.prune(&harness.password, true).unwrap();
    assert_eq!(dry.orphaned_objects, vec![orphan.clone()]);
    assert_eq!(dry.temp_files.len(), 1);
    assert_eq!(dry.files_deleted, 0);
    assert!(dry.bytes_reclaimed > 0);
    assert!(harness.blob(&orphan).exists());

    let pruned = harness.cryptdir.prune(&harness.password, false).unwrap();
    assert_eq!(pruned.files_deleted, 2);
    assert!(!harness.blob(&orphan).exists());
    assert!(!harness.store().join(".cryptdir-tmpXYZ123").exists());
    assert!(harness.store().join("README").exists());

    assert!(harness.cryptdir.verify(&harness.password).unwrap().is_valid());
}

#[test]
fn test_prune_refuses_store_without_manifest() {
    let harness = CryptDirTestHarness::new();
    harness.write("a.txt", "alpha");
    harness.encrypt();
    fs::remove_file(harness.store().join(addressing::nil_object_id())).unwrap();

    let err = harness.cryptdir.prune(&harness.password, false).unwrap_err();
    assert!(matches!(err, CryptDirError::InvalidManifest(_)));
    assert_eq!(harness.object_count(), 1);
}

#[test]
fn test_change_passphrase_keeps_objects() {
    let harness = CryptDirTestHarness::new();
    harness.write("a.txt", "alpha");
    harness.encrypt();
    let id = harness.object_id("a.txt");
    let blob_before = fs::read(harness.blob(&id)).unwrap();

    assert!(harness.cryptdir.change_passphrase(&harness.password, "rotated").unwrap());
    assert_eq!(fs::read(harness.blob(&id)).unwrap(), blob_before);
    assert!(harness.cryptdir.status(&harness.password).unwrap_err().is_crypto_failure());

    let restore_dir = TempDir::new().unwrap();
    let report = harness.restorer(restore_dir.path()).decrypt("rotated").unwrap();
    assert_eq!(report.files_decrypted, 1);
    assert_eq!(fs::read_to_string(restore_dir.path().join("a.txt")).unwrap(), "alpha");
}

#[test]
fn test_many_files_in_many_directories() {
    let harness = CryptDirTestHarness::new();
    let mut rng = StdRng::seed_from_u64(7);
    for dir in 0..5 {
        for file in 0..20 {
            let len = rng.random_range(0..4096);
            harness.write(&format!("dir{dir}/file{file}.dat"), random_content(&mut rng, len));
        }
    }

    let report = harness.encrypt();
    assert_eq!(report.added, 105);
    assert!(!report.has_failures());

    let restore_dir = TempDir::new().unwrap();
    harness.restorer(restore_dir.path()).decrypt(&harness.password).unwrap();
    assert_eq!(snapshot(harness.source()), snapshot(restore_dir.path()));
}
