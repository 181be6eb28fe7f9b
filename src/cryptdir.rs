//! Main CryptDir implementation
//!
//! [`CryptDir`] ties the other modules together. It owns the paths and
//! filters of one source tree and one store and runs whole-tree operations
//! against them:
//!
//! - **encrypt**: scan the source, encrypt new content, drop blobs nothing
//!   references anymore, rewrite the manifest if it changed
//! - **decrypt**: restore every directory and every file whose content
//!   differs from the manifest
//! - **verify**, **prune**, **status**, **change_passphrase**: maintenance
//!
//! ## Incremental behavior
//!
//! Content is addressed by its SHA-256 hash. A file whose hash is already
//! known, from this run or from the previous manifest with its blob still on
//! disk, is never encrypted again; renames, copies and unchanged files cost
//! a hash computation and nothing else. On restore a destination file whose
//! hash already matches is left alone.
//!
//! ## Failures
//!
//! A missing source directory or a manifest that cannot be decrypted aborts
//! the call before anything is written. Any other problem only affects the
//! entry it occurred on: it is reported as [`SyncEvent::Failed`], recorded in
//! the report, and the run continues. During encrypt a failed entry keeps
//! its previous manifest entry so the mirrored copy survives.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use cryptdir::CryptDir;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cryptdir = CryptDir::builder()
//!     .store_dir(PathBuf::from("/mnt/cloud/vault"))
//!     .build(PathBuf::from("./documents"))?;
//!
//! let report = cryptdir.encrypt("master password")?;
//! println!("{} added, {} updated, {} removed", report.added, report.updated, report.removed);
//!
//! // Later, possibly on another machine
//! let restored = cryptdir.decrypt("master password")?;
//! println!("{} files decrypted", restored.files_decrypted);
//! # Ok(())
//! # }
//! ```

use crate::addressing::{hash_file, new_object_id, new_secret};
use crate::collections::HashSet;
use crate::error::{CryptDirError, Result};
use crate::file_tracking::{FileTracker, TrackedEntry, DEFAULT_EXCLUDE_PATTERNS};
use crate::manifest::{FileObject, Manifest};
use crate::store::ObjectStore;
use crate::types::*;
use crate::utils::{manifest_path_to_host, resolve_path};
use crate::verification::{StoreVerifier, VerificationReport};
use chrono::{DateTime, Utc};
use globset::Glob;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

/// Name of the store directory when none is configured
pub const DEFAULT_STORE_DIR_NAME: &str = ".cryptdir";

/// Sync engine for one source tree and one store
///
/// # Examples
///
/// ```rust,no_run
/// use cryptdir::{CryptDir, CryptDirBuilder};
/// use std::path::PathBuf;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // Store in <source>/.cryptdir
/// let cryptdir = CryptDir::new(PathBuf::from("./project"))?;
///
/// // Using builder pattern for custom configuration
/// let cryptdir = CryptDirBuilder::new()
///     .store_dir(PathBuf::from("./vault"))
///     .exclude_patterns(vec!["*.tmp".to_string()])
///     .build(PathBuf::from("./project"))?;
/// # Ok(())
/// # }
/// ```
pub struct CryptDir {
    /// Directory being mirrored
    source_dir: PathBuf,
    /// Encrypted object store
    store: ObjectStore,
    /// Source tree scanner
    file_tracker: FileTracker,
    /// Resolved configuration
    config: CryptDirConfig,
    /// Receiver of sync events
    observer: Arc<dyn SyncObserver>,
}

impl std::fmt::Debug for CryptDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptDir")
            .field("source_dir", &self.source_dir)
            .field("store", &self.store)
            .field("file_tracker", &self.file_tracker)
            .field("config", &self.config)
            .field("observer", &"<observer>")
            .finish()
    }
}

impl CryptDir {
    /// Create an engine with default settings
    ///
    /// The store lives in `<source_dir>/.cryptdir` and events are logged
    /// through `tracing`.
    pub fn new(source_dir: PathBuf) -> Result<Self> {
        CryptDirBuilder::new().build(source_dir)
    }

    /// Start configuring an engine
    pub fn builder() -> CryptDirBuilder {
        CryptDirBuilder::new()
    }

    /// Directory being mirrored
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Store directory
    pub fn store_dir(&self) -> &Path {
        self.store.root()
    }

    /// Store handle
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Resolved configuration
    pub fn config(&self) -> &CryptDirConfig {
        &self.config
    }

    /// Mirror the source tree into the store
    ///
    /// # Arguments
    ///
    /// * `master_passphrase` - Passphrase protecting the manifest
    ///
    /// # Returns
    ///
    /// A [`SyncReport`] with counts, per-entry failures and every event.
    ///
    /// # Errors
    ///
    /// - [`CryptDirError::SourceNotFound`] if the source directory is missing
    /// - [`CryptDirError::IncorrectPassword`] if the existing manifest does not
    ///   decrypt with `master_passphrase`
    /// - [`CryptDirError::InvalidManifest`] if the existing manifest is malformed
    /// - [`CryptDirError::Io`] if the manifest or the store cannot be written
    ///
    /// Failures of single entries are not errors; see [`SyncReport::failures`].
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use cryptdir::CryptDir;
    /// # use std::path::PathBuf;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let cryptdir = CryptDir::new(PathBuf::from("./documents"))?;
    /// let report = cryptdir.encrypt("master password")?;
    /// for failure in &report.failures {
    ///     eprintln!("{}: {}", failure.path, failure.reason);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip(self, master_passphrase), fields(source = ?self.source_dir))]
    pub fn encrypt(&self, master_passphrase: &str) -> Result<SyncReport> {
        info!("Encrypting {:?} into {:?}", self.source_dir, self.store.root());
        let start = Instant::now();

        if !self.source_dir.is_dir() {
            error!("Invalid directory {:?}", self.source_dir);
            return Err(CryptDirError::SourceNotFound(self.source_dir.clone()));
        }

        let previous = Manifest::load(self.store.root(), master_passphrase)?;
        let snapshot = previous.to_canonical_json()?;
        let entries = self.file_tracker.scan()?;
        debug!(
            "{} entries in source, {} in previous manifest",
            entries.len(),
            previous.dirents().len()
        );

        let mut report = SyncReport::default();
        let mut current = Manifest::new();

        for entry in &entries {
            let result = if entry.is_dir {
                current.add_entry(entry.manifest_path.clone(), None, None);
                Ok(None)
            } else {
                self.sync_file(entry, &previous, &mut current, &mut report)
                    .map(Some)
            };

            match result {
                Ok(object_id) => {
                    let event = match previous.find_path_entry(&entry.manifest_path) {
                        None => Some(SyncEvent::Added(entry.manifest_path.clone())),
                        Some(old) if old.object_id != object_id => {
                            Some(SyncEvent::Updated(entry.manifest_path.clone()))
                        }
                        Some(_) => None,
                    };
                    match event {
                        Some(event @ SyncEvent::Added(_)) => {
                            report.added += 1;
                            self.emit(&mut report.events, event);
                        }
                        Some(event) => {
                            report.updated += 1;
                            self.emit(&mut report.events, event);
                        }
                        None => report.unchanged += 1,
                    }
                }
                Err(e) => {
                    self.record_failure(&mut report.failures, &mut report.events, &entry.manifest_path, &e);
                    carry_forward(&previous, &mut current, &entry.manifest_path);
                }
            }
        }

        let mut deleted = HashSet::default();
        for old in current.diff_obsolete(&previous) {
            if let Some(id) = &old.object_id {
                if !current.references_object(id) && deleted.insert(id.clone()) {
                    match self.store.remove_object(id) {
                        Ok(true) => report.objects_deleted += 1,
                        Ok(false) => trace!("Object {} already gone", id),
                        Err(e) => warn!("Failed to delete object {}: {}", id, e),
                    }
                }
            }
            if current.find_path_entry(&old.path).is_none() {
                report.removed += 1;
                self.emit(&mut report.events, SyncEvent::Removed(old.path));
            }
        }

        if current.is_empty() {
            if self.store.drop_store()? {
                report.store_dropped = true;
                self.emit(&mut report.events, SyncEvent::StoreDropped);
            }
        } else if !current.equals_serialized(&snapshot) {
            report.manifest_written = current.persist(self.store.root(), master_passphrase)?;
        } else {
            debug!("Manifest unchanged");
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        self.observer.on_sync_complete(&report);
        info!(
            "Encrypted {:?} in {}ms ({} added, {} updated, {} removed, {} failed)",
            self.source_dir,
            report.duration_ms,
            report.added,
            report.updated,
            report.removed,
            report.failures.len()
        );
        Ok(report)
    }

    /// Resolve the object for one file, encrypting it only if its content
    /// is new to both this run and the previous manifest
    fn sync_file(
        &self,
        entry: &TrackedEntry,
        previous: &Manifest,
        current: &mut Manifest,
        report: &mut SyncReport,
    ) -> Result<String> {
        let content_hash = hash_file(&entry.path)?;

        if let Some(existing) = current.find_file_by_content_hash(&content_hash) {
            let object_id = existing.object_id.clone();
            trace!("{} shares object {}", entry.manifest_path, object_id);
            current.add_entry(entry.manifest_path.clone(), Some(object_id.clone()), None);
            report.objects_reused += 1;
            return Ok(object_id);
        }

        if let Some(known) = previous
            .find_file_by_content_hash(&content_hash)
            .filter(|file| self.store.contains(&file.object_id))
        {
            let object_id = known.object_id.clone();
            trace!("{} carries object {} forward", entry.manifest_path, object_id);
            current.add_entry(
                entry.manifest_path.clone(),
                Some(object_id.clone()),
                Some(known.clone()),
            );
            report.objects_reused += 1;
            return Ok(object_id);
        }

        self.store.ensure()?;
        let file = FileObject {
            object_id: new_object_id(),
            content_hash,
            secret: new_secret(),
        };
        let bytes = file
            .pipeline()
            .encrypt_file_to_target(&entry.path, &self.store.blob_path(&file.object_id))?;
        debug!("Encrypted {} as {} ({} bytes)", entry.manifest_path, file.object_id, bytes);

        report.objects_written += 1;
        report.bytes_encrypted += bytes;
        let object_id = file.object_id.clone();
        current.add_entry(entry.manifest_path.clone(), Some(object_id.clone()), Some(file));
        Ok(object_id)
    }

    /// Restore the source tree from the store
    ///
    /// Entries are processed in manifest order. Directories are created,
    /// files are decrypted unless the destination already holds the right
    /// content. Extra files in the destination are left alone.
    ///
    /// # Errors
    ///
    /// - [`CryptDirError::IncorrectPassword`] if the manifest does not decrypt
    ///   with `master_passphrase`
    /// - [`CryptDirError::InvalidManifest`] if the manifest is malformed
    /// - [`CryptDirError::Io`] if the source directory cannot be created
    ///
    /// Failures of single entries are not errors; see
    /// [`RestoreReport::failures`].
    #[instrument(skip(self, master_passphrase), fields(source = ?self.source_dir))]
    pub fn decrypt(&self, master_passphrase: &str) -> Result<RestoreReport> {
        info!("Decrypting {:?} into {:?}", self.store.root(), self.source_dir);
        let start = Instant::now();

        let manifest = Manifest::load(self.store.root(), master_passphrase)?;
        fs::create_dir_all(&self.source_dir)?;

        let mut report = RestoreReport::default();
        debug!("Restoring {} entries", manifest.dirents().len());

        for entry in manifest.dirents() {
            let destination = manifest_path_to_host(&self.source_dir, &entry.path);

            let Some(object_id) = entry.object_id.as_deref() else {
                if destination.is_dir() {
                    continue;
                }
                match fs::create_dir_all(&destination) {
                    Ok(()) => {
                        report.dirs_created += 1;
                        self.emit(&mut report.events, SyncEvent::Created(entry.path.clone()));
                    }
                    Err(e) => self.record_failure(
                        &mut report.failures,
                        &mut report.events,
                        &entry.path,
                        &CryptDirError::from(e),
                    ),
                }
                continue;
            };

            let Some(file) = manifest.find_file_by_object_id(object_id) else {
                debug!("Skipping {}: object {} not in manifest", entry.path, object_id);
                report.dangling_references += 1;
                continue;
            };

            if !needs_restore(&destination, &file.content_hash) {
                trace!("{} is up to date", entry.path);
                report.files_skipped += 1;
                continue;
            }

            match self.restore_file(file, &destination) {
                Ok(bytes) => {
                    report.files_decrypted += 1;
                    report.bytes_written += bytes;
                    self.emit(&mut report.events, SyncEvent::Decrypted(entry.path.clone()));
                }
                Err(e) => {
                    self.record_failure(&mut report.failures, &mut report.events, &entry.path, &e)
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        self.observer.on_restore_complete(&report);
        info!(
            "Decrypted into {:?} in {}ms ({} files decrypted, {} skipped, {} failed)",
            self.source_dir,
            report.duration_ms,
            report.files_decrypted,
            report.files_skipped,
            report.failures.len()
        );
        Ok(report)
    }

    fn restore_file(&self, file: &FileObject, destination: &Path) -> Result<u64> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        file.pipeline()
            .decrypt_to_file(&self.store.blob_path(&file.object_id), destination)?
            .ok_or_else(|| CryptDirError::ObjectNotFound(file.object_id.clone()))
    }

    /// Check every blob the manifest references
    ///
    /// See [`StoreVerifier`] for what is checked.
    #[instrument(skip(self, master_passphrase))]
    pub fn verify(&self, master_passphrase: &str) -> Result<VerificationReport> {
        let manifest = Manifest::load(self.store.root(), master_passphrase)?;
        StoreVerifier::new(&self.store).verify(&manifest)
    }

    /// Remove blobs the manifest does not reference and leftover temporary
    /// files
    ///
    /// # Arguments
    ///
    /// * `master_passphrase` - Passphrase protecting the manifest
    /// * `dry_run` - Only report what would be removed
    ///
    /// # Errors
    ///
    /// - [`CryptDirError::IncorrectPassword`] if the manifest does not decrypt
    /// - [`CryptDirError::InvalidManifest`] if the store holds blobs but no
    ///   manifest; every blob would look orphaned, so nothing is touched
    #[instrument(skip(self, master_passphrase))]
    pub fn prune(&self, master_passphrase: &str, dry_run: bool) -> Result<PruneStats> {
        info!("Pruning {:?}{}", self.store.root(), if dry_run { " (dry run)" } else { "" });
        let start = Instant::now();

        let manifest = Manifest::load(self.store.root(), master_passphrase)?;
        let objects = self.store.list_objects()?;
        if manifest.is_empty() && !self.store.manifest_path().exists() && !objects.is_empty() {
            return Err(CryptDirError::invalid_manifest(
                "store has objects but no manifest; refusing to prune",
            ));
        }

        let mut stats = PruneStats {
            objects_examined: objects.len(),
            orphaned_objects: self.store.orphaned_objects(&manifest)?,
            temp_files: self.store.list_temp_files()?,
            dry_run,
            ..Default::default()
        };

        for id in &stats.orphaned_objects {
            let size = self.store.object_size(id).unwrap_or(0);
            stats.bytes_reclaimed += size;
            if dry_run {
                continue;
            }
            match self.store.remove_object(id) {
                Ok(true) => stats.files_deleted += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to delete object {}: {}", id, e),
            }
        }

        for temp in &stats.temp_files {
            stats.bytes_reclaimed += fs::metadata(temp).map(|m| m.len()).unwrap_or(0);
            if dry_run {
                continue;
            }
            match fs::remove_file(temp) {
                Ok(()) => stats.files_deleted += 1,
                Err(e) => warn!("Failed to delete {:?}: {}", temp, e),
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Prune complete in {}ms: {} orphaned objects, {} temporary files, {} bytes",
            stats.duration_ms,
            stats.orphaned_objects.len(),
            stats.temp_files.len(),
            stats.bytes_reclaimed
        );
        Ok(stats)
    }

    /// Summarize the manifest and the blobs on disk
    #[instrument(skip(self, master_passphrase))]
    pub fn status(&self, master_passphrase: &str) -> Result<StoreStatus> {
        let manifest = Manifest::load(self.store.root(), master_passphrase)?;
        let store_stats = self.store.stats()?;

        let mut status = StoreStatus {
            unique_objects: manifest.files().len(),
            blobs_on_disk: store_stats.object_count + usize::from(store_stats.has_manifest),
            bytes_on_disk: store_stats.total_size + store_stats.manifest_size,
            orphaned_blobs: self.store.orphaned_objects(&manifest)?.len(),
            ..Default::default()
        };

        let mut seen = HashSet::default();
        for entry in manifest.dirents() {
            match entry.object_id.as_deref() {
                None => status.directories += 1,
                Some(id) => {
                    status.files += 1;
                    if manifest.find_file_by_object_id(id).is_none() {
                        status.dangling_references += 1;
                    } else if !seen.insert(id) {
                        status.shared_references += 1;
                    }
                }
            }
        }

        if store_stats.has_manifest {
            status.last_written = fs::metadata(self.store.manifest_path())
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);
        }
        Ok(status)
    }

    /// Re-encrypt the manifest under a new master passphrase
    ///
    /// File blobs keep their own secrets and are not touched. Returns
    /// `false` if the store has no manifest yet.
    ///
    /// # Errors
    ///
    /// - [`CryptDirError::IncorrectPassword`] if `old_passphrase` is wrong
    #[instrument(skip(self, old_passphrase, new_passphrase))]
    pub fn change_passphrase(&self, old_passphrase: &str, new_passphrase: &str) -> Result<bool> {
        let manifest = Manifest::load(self.store.root(), old_passphrase)?;
        if manifest.is_empty() {
            debug!("No manifest to re-encrypt");
            return Ok(false);
        }
        let written = manifest.persist(self.store.root(), new_passphrase)?;
        info!("Master passphrase changed for {:?}", self.store.root());
        Ok(written)
    }

    fn emit(&self, events: &mut Vec<SyncEvent>, event: SyncEvent) {
        self.observer.on_event(&event);
        events.push(event);
    }

    fn record_failure(
        &self,
        failures: &mut Vec<EntryFailure>,
        events: &mut Vec<SyncEvent>,
        path: &str,
        err: &CryptDirError,
    ) {
        let reason = err.to_string();
        failures.push(EntryFailure {
            path: path.to_string(),
            reason: reason.clone(),
        });
        self.emit(
            events,
            SyncEvent::Failed {
                path: path.to_string(),
                reason,
            },
        );
    }
}

/// Keep the previous entry of a path that failed this run
fn carry_forward(previous: &Manifest, current: &mut Manifest, path: &str) {
    let Some(old) = previous.find_path_entry(path) else {
        return;
    };

    match previous.file_for_entry(old) {
        Some(file) => match current.find_file_by_content_hash(&file.content_hash) {
            Some(existing) => {
                let object_id = existing.object_id.clone();
                current.add_entry(path, Some(object_id), None);
            }
            None => current.add_entry(path, old.object_id.clone(), Some(file.clone())),
        },
        None => current.add_entry(path, old.object_id.clone(), None),
    }
    debug!("Kept previous entry for {}", path);
}

fn needs_restore(destination: &Path, content_hash: &str) -> bool {
    if !destination.is_file() {
        return true;
    }
    match hash_file(destination) {
        Ok(hash) => hash != content_hash,
        Err(e) => {
            trace!("Cannot hash {:?}: {}", destination, e);
            true
        }
    }
}

/// Builder for configuring a [`CryptDir`]
///
/// # Examples
///
/// ```rust,no_run
/// use cryptdir::CryptDirBuilder;
/// use std::path::PathBuf;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cryptdir = CryptDirBuilder::new()
///     .store_dir(PathBuf::from("/mnt/cloud/vault"))
///     .exclude_patterns(vec!["*.log".to_string(), "target/**".to_string()])
///     .include_pattern(Some("*.md".to_string()))
///     .follow_symlinks(false)
///     .build(PathBuf::from("./notes"))?;
/// # Ok(())
/// # }
/// ```
///
/// # Default Values
///
/// - `store_dir`: `<source_dir>/.cryptdir`
/// - `exclude_patterns`: `.DS_Store`, `Thumbs.db`, `~$*`
/// - `include_pattern`: none
/// - `follow_symlinks`: false
/// - `observer`: [`TracingObserver`]
pub struct CryptDirBuilder {
    store_dir: Option<PathBuf>,
    exclude_patterns: Vec<String>,
    include_pattern: Option<String>,
    follow_symlinks: bool,
    observer: Option<Arc<dyn SyncObserver>>,
}

impl std::fmt::Debug for CryptDirBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptDirBuilder")
            .field("store_dir", &self.store_dir)
            .field("exclude_patterns", &self.exclude_patterns)
            .field("include_pattern", &self.include_pattern)
            .field("follow_symlinks", &self.follow_symlinks)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl CryptDirBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            store_dir: None,
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            include_pattern: None,
            follow_symlinks: false,
            observer: None,
        }
    }

    /// Set the store directory
    ///
    /// The store may live inside the source tree; it is never mirrored into
    /// itself.
    pub fn store_dir(mut self, store_dir: PathBuf) -> Self {
        self.store_dir = Some(store_dir);
        self
    }

    /// Replace the exclusion patterns
    ///
    /// Patterns use glob syntax and match either the file name or the path
    /// relative to the source directory. Passing a list replaces the
    /// defaults; include them again to keep them.
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    /// Add one exclusion pattern to the current list
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Only mirror files matching this pattern
    pub fn include_pattern(mut self, pattern: Option<String>) -> Self {
        self.include_pattern = pattern;
        self
    }

    /// Set whether to follow symbolic links
    ///
    /// When disabled (default) symbolic links are skipped.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Set the receiver of sync events
    pub fn observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the engine
    ///
    /// Nothing on disk is created here; a missing source directory is
    /// reported by [`CryptDir::encrypt`]. A store nested inside the source is
    /// fine, it is left out of every scan.
    ///
    /// # Errors
    ///
    /// - [`CryptDirError::InvalidPattern`] if a filter pattern does not parse
    /// - [`CryptDirError::StoreContainsSource`] if the store directory is the
    ///   source directory or one of its ancestors
    pub fn build(self, source_dir: PathBuf) -> Result<CryptDir> {
        for pattern in self.exclude_patterns.iter().chain(self.include_pattern.iter()) {
            Glob::new(pattern)
                .map_err(|e| CryptDirError::InvalidPattern(format!("{pattern}: {e}")))?;
        }

        let store_dir = self
            .store_dir
            .unwrap_or_else(|| source_dir.join(DEFAULT_STORE_DIR_NAME));
        if resolve_path(&source_dir).starts_with(resolve_path(&store_dir)) {
            return Err(CryptDirError::StoreContainsSource {
                store: store_dir,
                source_dir,
            });
        }

        let file_tracker = FileTracker::new(source_dir.clone())
            .with_store_path(store_dir.clone())
            .with_exclude_patterns(self.exclude_patterns.clone())
            .with_include_pattern(self.include_pattern.clone())
            .with_follow_symlinks(self.follow_symlinks);

        let config = CryptDirConfig {
            source_dir: source_dir.clone(),
            store_dir: store_dir.clone(),
            exclude_patterns: self.exclude_patterns,
            include_pattern: self.include_pattern,
            follow_symlinks: self.follow_symlinks,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        Ok(CryptDir {
            source_dir,
            store: ObjectStore::new(store_dir),
            file_tracker,
            config,
            observer: self.observer.unwrap_or_else(|| Arc::new(TracingObserver)),
        })
    }
}

impl Default for CryptDirBuilder {
    fn default() -> Self {
        Self::new()
    }
}
