//! Core data types used throughout the cryptdir library
//!
//! ## Overview
//!
//! - **Events**: [`SyncEvent`] - one user-visible change or failure
//! - **Observers**: [`SyncObserver`], [`TracingObserver`], [`CollectingObserver`] -
//!   where events go
//! - **Reports**: [`SyncReport`], [`RestoreReport`], [`PruneStats`],
//!   [`StoreStatus`] - results of engine operations
//! - **Configuration**: [`CryptDirConfig`] - resolved engine settings
//!
//! ## Examples
//!
//! ```rust
//! use cryptdir::types::SyncEvent;
//!
//! let event = SyncEvent::Added("docs/a.txt".to_string());
//! assert_eq!(event.to_string(), "Added docs/a.txt");
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// A user-visible change or failure during a sync run
///
/// Paths are manifest paths (relative, `/`-separated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum SyncEvent {
    /// A path appeared in the source tree and was mirrored
    Added(String),
    /// The content of a path changed and was mirrored again
    Updated(String),
    /// A path disappeared from the source tree
    Removed(String),
    /// A directory was created during restore
    Created(String),
    /// A file was decrypted during restore
    Decrypted(String),
    /// The source tree was empty and the whole store was deleted
    StoreDropped,
    /// Processing of one entry failed
    Failed {
        /// Entry that failed
        path: String,
        /// What went wrong
        reason: String,
    },
}

impl SyncEvent {
    /// Path the event is about, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            SyncEvent::Added(p)
            | SyncEvent::Updated(p)
            | SyncEvent::Removed(p)
            | SyncEvent::Created(p)
            | SyncEvent::Decrypted(p) => Some(p),
            SyncEvent::Failed { path, .. } => Some(path),
            SyncEvent::StoreDropped => None,
        }
    }

    /// Check whether this event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncEvent::Failed { .. })
    }

    /// Short label of the event kind
    pub fn label(&self) -> &'static str {
        match self {
            SyncEvent::Added(_) => "Added",
            SyncEvent::Updated(_) => "Updated",
            SyncEvent::Removed(_) => "Removed",
            SyncEvent::Created(_) => "Created",
            SyncEvent::Decrypted(_) => "Decrypted",
            SyncEvent::StoreDropped => "Dropped",
            SyncEvent::Failed { .. } => "Failed",
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::StoreDropped => write!(f, "Dropped encrypted store"),
            SyncEvent::Failed { path, reason } => write!(f, "Failed {}: {}", path, reason),
            other => write!(f, "{} {}", other.label(), other.path().unwrap_or_default()),
        }
    }
}

/// Receiver of sync events
///
/// The engine holds exactly one observer and calls it synchronously for
/// every event, in traversal order. Implementations must be cheap or hand
/// the work off; a slow observer slows the run down.
///
/// # Example
///
/// ```rust
/// use cryptdir::types::{SyncEvent, SyncObserver};
///
/// struct PrintObserver;
///
/// impl SyncObserver for PrintObserver {
///     fn on_event(&self, event: &SyncEvent) {
///         println!("{}", event);
///     }
/// }
/// ```
pub trait SyncObserver: Send + Sync {
    /// Called for every event as it happens
    fn on_event(&self, event: &SyncEvent);

    /// Called once an encrypt run has finished
    fn on_sync_complete(&self, _report: &SyncReport) {}

    /// Called once a decrypt run has finished
    fn on_restore_complete(&self, _report: &RestoreReport) {}
}

/// Observer that forwards events to `tracing`
///
/// Changes are logged at `info`, failures at `warn`. This is the observer
/// an engine gets when none is configured.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_event(&self, event: &SyncEvent) {
        if event.is_failure() {
            warn!("{}", event);
        } else {
            info!("{}", event);
        }
    }

    fn on_sync_complete(&self, report: &SyncReport) {
        info!(
            "Encrypt finished: {} added, {} updated, {} removed in {}ms",
            report.added, report.updated, report.removed, report.duration_ms
        );
    }

    fn on_restore_complete(&self, report: &RestoreReport) {
        info!(
            "Decrypt finished: {} files decrypted, {} skipped in {}ms",
            report.files_decrypted, report.files_skipped, report.duration_ms
        );
    }
}

/// Observer that records every event, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct CollectingObserver {
    events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl CollectingObserver {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    /// Remove and return the recorded events
    pub fn take(&self) -> Vec<SyncEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl SyncObserver for CollectingObserver {
    fn on_event(&self, event: &SyncEvent) {
        self.events.lock().push(event.clone());
    }
}

/// A per-entry failure recorded in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFailure {
    /// Manifest path of the entry
    pub path: String,
    /// Error message
    pub reason: String,
}

/// Result of an encrypt run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    /// Paths new to the store
    pub added: usize,
    /// Paths whose content changed
    pub updated: usize,
    /// Paths that disappeared from the source
    pub removed: usize,
    /// Paths that needed no work
    pub unchanged: usize,
    /// Blobs encrypted during this run
    pub objects_written: usize,
    /// Entries served by an existing blob
    pub objects_reused: usize,
    /// Blobs deleted because nothing references them anymore
    pub objects_deleted: usize,
    /// Plaintext bytes encrypted
    pub bytes_encrypted: u64,
    /// Whether the manifest blob was rewritten
    pub manifest_written: bool,
    /// Whether the store was deleted because the source was empty
    pub store_dropped: bool,
    /// Entries that could not be processed
    pub failures: Vec<EntryFailure>,
    /// Every event of the run, in order
    pub events: Vec<SyncEvent>,
    /// Run duration in milliseconds
    pub duration_ms: u64,
}

impl SyncReport {
    /// Check whether the run changed anything in the store
    pub fn has_changes(&self) -> bool {
        self.added > 0
            || self.updated > 0
            || self.removed > 0
            || self.objects_deleted > 0
            || self.manifest_written
            || self.store_dropped
    }

    /// Check whether any entry failed
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Result of a decrypt run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Directories created in the destination
    pub dirs_created: usize,
    /// Files decrypted
    pub files_decrypted: usize,
    /// Files already matching their content hash
    pub files_skipped: usize,
    /// Entries whose object is missing from the manifest
    pub dangling_references: usize,
    /// Plaintext bytes written
    pub bytes_written: u64,
    /// Entries that could not be restored
    pub failures: Vec<EntryFailure>,
    /// Every event of the run, in order
    pub events: Vec<SyncEvent>,
    /// Run duration in milliseconds
    pub duration_ms: u64,
}

impl RestoreReport {
    /// Check whether any entry failed
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Statistics from pruning the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneStats {
    /// Blobs examined
    pub objects_examined: usize,
    /// Orphaned blobs found
    pub orphaned_objects: Vec<String>,
    /// Leftover temporary files found
    pub temp_files: Vec<PathBuf>,
    /// Files actually deleted (0 on a dry run)
    pub files_deleted: usize,
    /// Bytes reclaimed (or reclaimable on a dry run)
    pub bytes_reclaimed: u64,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

/// Summary of a store and its manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStatus {
    /// Directory entries in the manifest
    pub directories: usize,
    /// File entries in the manifest
    pub files: usize,
    /// Unique file objects
    pub unique_objects: usize,
    /// File entries that share their object with an earlier entry
    pub shared_references: usize,
    /// File entries without a file object
    pub dangling_references: usize,
    /// Blobs present on disk
    pub blobs_on_disk: usize,
    /// Size of the blobs on disk, manifest included
    pub bytes_on_disk: u64,
    /// Blobs not known to the manifest
    pub orphaned_blobs: usize,
    /// Time of the last manifest write, if a manifest exists
    pub last_written: Option<DateTime<Utc>>,
}

/// Resolved settings of a [`crate::CryptDir`] instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptDirConfig {
    /// Directory being mirrored
    pub source_dir: PathBuf,
    /// Encrypted object store
    pub store_dir: PathBuf,
    /// Glob patterns of entries to skip
    pub exclude_patterns: Vec<String>,
    /// Glob pattern entries must match to participate
    pub include_pattern: Option<String>,
    /// Whether symbolic links are followed
    pub follow_symlinks: bool,
    /// Library version
    pub version: String,
}
