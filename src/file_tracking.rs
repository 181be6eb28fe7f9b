//! Source tree scanning
//!
//! [`FileTracker`] lists every directory and regular file below a source
//! root, applies the exclusion and inclusion filters and returns the entries
//! in the deterministic order the sync engine processes them in.
//!
//! ## Filters
//!
//! Patterns use glob syntax (`globset`). A pattern matches an entry when it
//! matches either the entry's file name or its full manifest path, so
//! `*.tmp` excludes temporary files at any depth while `build/**` only
//! applies below the top-level `build` directory.
//!
//! - **Exclusion**: matching entries are skipped; an excluded directory is
//!   not descended into.
//! - **Inclusion**: when set, only matching files participate, together with
//!   the directories that contain them and directories matching the pattern
//!   themselves.
//!
//! The store directory is always skipped when it lies inside the source tree.
//!
//! ## Ordering
//!
//! Entries are sorted by manifest path with [`natural_cmp`], so `file2`
//! precedes `file10` and a directory precedes its contents.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cryptdir::file_tracking::FileTracker;
//! use std::path::PathBuf;
//!
//! # fn main() -> cryptdir::Result<()> {
//! let entries = FileTracker::new(PathBuf::from("./documents"))
//!     .with_exclude_patterns(vec!["*.tmp".to_string()])
//!     .scan()?;
//! for entry in &entries {
//!     println!("{} {}", if entry.is_dir { "d" } else { "f" }, entry.manifest_path);
//! }
//! # Ok(())
//! # }
//! ```

use crate::collections::HashSet;
use crate::error::{CryptDirError, Result};
use crate::utils::{natural_cmp, resolve_path, to_manifest_path};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::{DirEntry, WalkDir};

/// Exclusion patterns applied when none are configured
///
/// Finder metadata, Windows thumbnail caches and Office lock files.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[".DS_Store", "Thumbs.db", "~$*"];

/// One directory or file found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntry {
    /// Host path of the entry
    pub path: PathBuf,
    /// Path relative to the source root, `/`-separated
    pub manifest_path: String,
    /// Whether this is a directory
    pub is_dir: bool,
    /// File size in bytes (0 for directories)
    pub size: u64,
}

/// Scanner for a source tree
#[derive(Debug, Clone)]
pub struct FileTracker {
    /// Root directory to scan
    root_path: PathBuf,
    /// Directory to skip, normally the object store
    store_path: Option<PathBuf>,
    /// Glob patterns of entries to skip
    exclude_patterns: Vec<String>,
    /// Glob pattern entries must match to participate
    include_pattern: Option<String>,
    /// Whether to follow symbolic links during traversal
    follow_symlinks: bool,
}

impl FileTracker {
    /// Create a tracker with the default exclusions, no inclusion filter and
    /// symbolic links skipped
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            store_path: None,
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            include_pattern: None,
            follow_symlinks: false,
        }
    }

    /// Skip this directory (and everything below it) during the scan
    pub fn with_store_path(mut self, store_path: PathBuf) -> Self {
        self.store_path = Some(store_path);
        self
    }

    /// Replace the exclusion patterns
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    /// Set or clear the inclusion pattern
    pub fn with_include_pattern(mut self, pattern: Option<String>) -> Self {
        self.include_pattern = pattern;
        self
    }

    /// Set symbolic link following behavior
    ///
    /// When disabled (the default) symbolic links are skipped entirely.
    /// When enabled their targets are scanned as if they were regular
    /// entries; link cycles are reported and skipped.
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Root directory being scanned
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Scan the source tree
    ///
    /// # Returns
    ///
    /// All participating entries in natural manifest-path order. The root
    /// itself is not included.
    ///
    /// # Errors
    ///
    /// - [`CryptDirError::SourceNotFound`] if the root is missing or not a
    ///   directory
    /// - [`CryptDirError::InvalidPattern`] if a filter pattern does not parse
    /// - [`CryptDirError::WalkDir`] if the root cannot be read
    pub fn scan(&self) -> Result<Vec<TrackedEntry>> {
        if !self.root_path.is_dir() {
            return Err(CryptDirError::SourceNotFound(self.root_path.clone()));
        }

        let excludes = build_globset(&self.exclude_patterns)?;
        let include = self
            .include_pattern
            .as_ref()
            .map(|p| build_globset(std::slice::from_ref(p)))
            .transpose()?;
        let root = self.root_path.canonicalize()?;
        let store = self.store_path.as_deref().map(resolve_path);

        let mut entries = Vec::new();
        let walker = WalkDir::new(&root)
            .min_depth(1)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|e| !self.is_skipped(e, &root, store.as_deref(), &excludes));

        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(e.into()),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if !file_type.is_dir() && !file_type.is_file() {
                debug!("Skipping special file {:?}", entry.path());
                continue;
            }

            let manifest_path = match to_manifest_path(entry.path(), &root) {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            let size = if file_type.is_file() {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            } else {
                0
            };

            entries.push(TrackedEntry {
                path: entry.path().to_path_buf(),
                manifest_path,
                is_dir: file_type.is_dir(),
                size,
            });
        }

        if let Some(include) = &include {
            entries = apply_include(entries, include);
        }

        entries.sort_by(|a, b| natural_cmp(&a.manifest_path, &b.manifest_path));
        debug!("Scanned {:?}: {} entries", root, entries.len());
        Ok(entries)
    }

    fn is_skipped(
        &self,
        entry: &DirEntry,
        root: &Path,
        store: Option<&Path>,
        excludes: &GlobSet,
    ) -> bool {
        if entry.path_is_symlink() && !self.follow_symlinks {
            debug!("Skipping symbolic link {:?}", entry.path());
            return true;
        }

        if entry.file_type().is_dir() && store.is_some_and(|s| is_same_dir(entry.path(), s)) {
            trace!("Skipping store directory {:?}", entry.path());
            return true;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let excluded = excludes.is_match(entry.file_name()) || excludes.is_match(relative);
        if excluded {
            trace!("Excluded {:?}", relative);
        }
        excluded
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| CryptDirError::InvalidPattern(format!("{pattern}: {e}")))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn matches(set: &GlobSet, manifest_path: &str) -> bool {
    let name = manifest_path.rsplit('/').next().unwrap_or(manifest_path);
    set.is_match(name) || set.is_match(manifest_path)
}

/// Keep matching files, matching directories and every ancestor of either
fn apply_include(entries: Vec<TrackedEntry>, include: &GlobSet) -> Vec<TrackedEntry> {
    let mut keep: HashSet<String> = HashSet::default();

    for entry in &entries {
        if !matches(include, &entry.manifest_path) {
            continue;
        }
        keep.insert(entry.manifest_path.clone());

        let mut current = entry.manifest_path.as_str();
        while let Some((parent, _)) = current.rsplit_once('/') {
            if !keep.insert(parent.to_string()) {
                break;
            }
            current = parent;
        }
    }

    entries
        .into_iter()
        .filter(|e| keep.contains(&e.manifest_path))
        .collect()
}

fn is_same_dir(candidate: &Path, store: &Path) -> bool {
    if candidate == store {
        return true;
    }
    candidate
        .canonicalize()
        .map(|c| c == store)
        .unwrap_or(false)
}
