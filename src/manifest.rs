//! The manifest describing a mirrored tree
//!
//! A [`Manifest`] records every path of the source tree in traversal order
//! ([`PathEntry`]) and every unique piece of content ([`FileObject`]). Paths
//! that point at identical content share one file object, and therefore one
//! blob in the store.
//!
//! The manifest is stored in the object store like any other blob, encrypted
//! under the master passphrase, with the reserved nil identifier as its file
//! name. Its JSON form is:
//!
//! ```json
//! {
//!   "dirents": [{"path": "docs"}, {"path": "docs/a.txt", "objectId": "9F2C..."}],
//!   "files": [{"objectId": "9F2C...", "contentHash": "ba78...", "secret": "q3N~..."}]
//! }
//! ```
//!
//! A decrypted manifest is untrusted input: it is parsed into typed structures
//! that reject unknown fields and then validated (unique paths and object
//! ids, relative paths without traversal components, object ids in canonical
//! form) before any of it is used to build a host path.

use crate::addressing::{is_object_id, nil_object_id};
use crate::cipher::CipherPipeline;
use crate::collections::{HashMap, HashSet};
use crate::error::{CryptDirError, Result};
use crate::utils::is_valid_manifest_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// One path of the mirrored tree
///
/// Directories carry no object id; files carry the id of the [`FileObject`]
/// holding their content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PathEntry {
    /// Relative path with `/` separators
    pub path: String,
    /// Object holding the file content, absent for directories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

impl PathEntry {
    /// Create a directory entry
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            object_id: None,
        }
    }

    /// Create a file entry referencing `object_id`
    pub fn file(path: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            object_id: Some(object_id.into()),
        }
    }

    /// Check whether this entry is a directory
    pub fn is_dir(&self) -> bool {
        self.object_id.is_none()
    }
}

/// A unique piece of content and the secret its blob is encrypted with
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileObject {
    /// Blob file name in the store
    pub object_id: String,
    /// SHA-256 of the plaintext, lowercase hex
    pub content_hash: String,
    /// Passphrase of this object's blob
    pub secret: String,
}

impl std::fmt::Debug for FileObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileObject")
            .field("object_id", &self.object_id)
            .field("content_hash", &self.content_hash)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl FileObject {
    /// Pipeline for this object's blob
    pub fn pipeline(&self) -> CipherPipeline {
        CipherPipeline::new(&self.secret)
    }
}

/// Wire form of the manifest, validated into a [`Manifest`]
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestDocument {
    #[serde(default)]
    dirents: Vec<PathEntry>,
    #[serde(default)]
    files: Vec<FileObject>,
}

impl TryFrom<ManifestDocument> for Manifest {
    type Error = CryptDirError;

    fn try_from(doc: ManifestDocument) -> Result<Self> {
        let nil = nil_object_id();
        let mut paths = HashSet::default();
        for entry in &doc.dirents {
            if !is_valid_manifest_path(&entry.path) {
                return Err(CryptDirError::invalid_manifest(format!(
                    "invalid path {:?}",
                    entry.path
                )));
            }
            if !paths.insert(entry.path.as_str()) {
                return Err(CryptDirError::invalid_manifest(format!(
                    "duplicate path {:?}",
                    entry.path
                )));
            }
            if let Some(id) = &entry.object_id {
                if !is_object_id(id) || *id == nil {
                    return Err(CryptDirError::invalid_manifest(format!(
                        "invalid object id for {:?}",
                        entry.path
                    )));
                }
            }
        }

        let mut ids = HashSet::default();
        for file in &doc.files {
            if !is_object_id(&file.object_id) || file.object_id == nil {
                return Err(CryptDirError::invalid_manifest(format!(
                    "invalid object id {:?}",
                    file.object_id
                )));
            }
            if !ids.insert(file.object_id.as_str()) {
                return Err(CryptDirError::invalid_manifest(format!(
                    "duplicate object id {}",
                    file.object_id
                )));
            }
        }

        let mut manifest = Manifest {
            dirents: doc.dirents,
            files: doc.files,
            ..Default::default()
        };
        manifest.rebuild_indices();
        Ok(manifest)
    }
}

/// In-memory model of the mirrored tree
///
/// Lookups by path, object id and content hash go through hash indices that
/// are kept in step with every mutation and rebuilt after loading.
///
/// # Example
///
/// ```rust
/// use cryptdir::{FileObject, Manifest};
///
/// let mut manifest = Manifest::new();
/// manifest.add_entry("docs", None, None);
/// manifest.add_entry(
///     "docs/a.txt",
///     Some("0A1B".to_string()),
///     Some(FileObject {
///         object_id: "0A1B".to_string(),
///         content_hash: "ba78".to_string(),
///         secret: "s3cret".to_string(),
///     }),
/// );
///
/// assert!(manifest.find_path_entry("docs/a.txt").is_some());
/// assert!(manifest.find_file_by_content_hash("ba78").is_some());
/// assert!(manifest.references_object("0A1B"));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "ManifestDocument")]
pub struct Manifest {
    dirents: Vec<PathEntry>,
    files: Vec<FileObject>,
    #[serde(skip)]
    by_path: HashMap<String, usize>,
    #[serde(skip)]
    by_object_id: HashMap<String, usize>,
    #[serde(skip)]
    by_content_hash: HashMap<String, usize>,
    #[serde(skip)]
    references: HashMap<String, usize>,
}

impl Manifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of the manifest blob inside a store
    pub fn blob_path(store_dir: &Path) -> PathBuf {
        store_dir.join(nil_object_id())
    }

    /// Load the manifest of a store
    ///
    /// A store without a manifest blob (or a store directory that does not
    /// exist) yields an empty manifest.
    ///
    /// # Errors
    ///
    /// - [`CryptDirError::IncorrectPassword`] if the blob cannot be decrypted
    ///   with `passphrase`
    /// - [`CryptDirError::CorruptData`] if the blob is structurally broken
    /// - [`CryptDirError::InvalidManifest`] if the decrypted document does not
    ///   have the expected shape or fails validation
    pub fn load(store_dir: &Path, passphrase: &str) -> Result<Self> {
        let path = Self::blob_path(store_dir);
        let pipeline = CipherPipeline::new(passphrase);

        match pipeline.decrypt_to_json::<Manifest>(&path) {
            Ok(Some(manifest)) => {
                debug!(
                    "Loaded manifest with {} entries and {} objects",
                    manifest.dirents.len(),
                    manifest.files.len()
                );
                Ok(manifest)
            }
            Ok(None) => {
                debug!("No manifest in {:?}, starting empty", store_dir);
                Ok(Self::new())
            }
            Err(CryptDirError::Json(e)) => Err(CryptDirError::invalid_manifest(e.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Encrypt the manifest into its store blob
    ///
    /// An empty manifest is never written; the return value tells whether a
    /// blob was written. The store directory is created if needed.
    pub fn persist(&self, store_dir: &Path, passphrase: &str) -> Result<bool> {
        if self.dirents.is_empty() {
            trace!("Empty manifest, nothing to persist");
            return Ok(false);
        }

        fs::create_dir_all(store_dir)?;
        CipherPipeline::new(passphrase).encrypt_json_to_target(self, &Self::blob_path(store_dir))?;
        debug!("Persisted manifest with {} entries", self.dirents.len());
        Ok(true)
    }

    /// Look up the entry for a path
    pub fn find_path_entry(&self, path: &str) -> Option<&PathEntry> {
        self.by_path.get(path).map(|&idx| &self.dirents[idx])
    }

    /// Look up a file object by id
    pub fn find_file_by_object_id(&self, object_id: &str) -> Option<&FileObject> {
        self.by_object_id.get(object_id).map(|&idx| &self.files[idx])
    }

    /// Look up the file object holding content with the given hash
    pub fn find_file_by_content_hash(&self, content_hash: &str) -> Option<&FileObject> {
        self.by_content_hash
            .get(content_hash)
            .map(|&idx| &self.files[idx])
    }

    /// Resolve the file object of an entry, if it is a file and not dangling
    pub fn file_for_entry(&self, entry: &PathEntry) -> Option<&FileObject> {
        entry
            .object_id
            .as_deref()
            .and_then(|id| self.find_file_by_object_id(id))
    }

    /// Append a path entry and optionally a file object
    ///
    /// Adding a path that is already present replaces its entry in place.
    /// A file object whose id is already present is ignored.
    pub fn add_entry(
        &mut self,
        path: impl Into<String>,
        object_id: Option<String>,
        file_object: Option<FileObject>,
    ) {
        let entry = PathEntry {
            path: path.into(),
            object_id,
        };

        if let Some(id) = &entry.object_id {
            *self.references.entry(id.clone()).or_insert(0) += 1;
        }

        match self.by_path.get(&entry.path).copied() {
            Some(idx) => {
                if let Some(old_id) = self.dirents[idx].object_id.take() {
                    self.release_reference(&old_id);
                }
                self.dirents[idx] = entry;
            }
            None => {
                self.by_path.insert(entry.path.clone(), self.dirents.len());
                self.dirents.push(entry);
            }
        }

        if let Some(file) = file_object {
            if self.by_object_id.contains_key(&file.object_id) {
                return;
            }
            let idx = self.files.len();
            self.by_object_id.insert(file.object_id.clone(), idx);
            self.by_content_hash
                .entry(file.content_hash.clone())
                .or_insert(idx);
            self.files.push(file);
        }
    }

    /// Entries of `previous` whose `(path, objectId)` pair is not in `self`
    ///
    /// This covers removed paths, paths whose content changed, and paths that
    /// changed between file and directory.
    pub fn diff_obsolete(&self, previous: &Manifest) -> Vec<PathEntry> {
        previous
            .dirents
            .iter()
            .filter(|old| {
                self.find_path_entry(&old.path)
                    .map_or(true, |current| current.object_id != old.object_id)
            })
            .cloned()
            .collect()
    }

    /// Canonical JSON form, used for change detection and as the blob payload
    pub fn to_canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check whether this manifest serializes to `previous`
    pub fn equals_serialized(&self, previous: &str) -> bool {
        self.to_canonical_json()
            .map(|current| current == previous)
            .unwrap_or(false)
    }

    /// Path entries in traversal order
    pub fn dirents(&self) -> &[PathEntry] {
        &self.dirents
    }

    /// File objects in insertion order
    pub fn files(&self) -> &[FileObject] {
        &self.files
    }

    /// Check whether the manifest has no path entries
    pub fn is_empty(&self) -> bool {
        self.dirents.is_empty()
    }

    /// Check whether any path entry references `object_id`
    pub fn references_object(&self, object_id: &str) -> bool {
        self.references.get(object_id).is_some_and(|&count| count > 0)
    }

    /// Number of path entries referencing `object_id`
    pub fn reference_count(&self, object_id: &str) -> usize {
        self.references.get(object_id).copied().unwrap_or(0)
    }

    /// Object ids referenced by at least one path entry
    pub fn referenced_object_ids(&self) -> impl Iterator<Item = &str> {
        self.references
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(id, _)| id.as_str())
    }

    fn release_reference(&mut self, object_id: &str) {
        if let Some(count) = self.references.get_mut(object_id) {
            *count = count.saturating_sub(1);
        }
    }

    fn rebuild_indices(&mut self) {
        self.by_path.clear();
        self.by_object_id.clear();
        self.by_content_hash.clear();
        self.references.clear();

        for (idx, entry) in self.dirents.iter().enumerate() {
            self.by_path.insert(entry.path.clone(), idx);
            if let Some(id) = &entry.object_id {
                *self.references.entry(id.clone()).or_insert(0) += 1;
            }
        }
        for (idx, file) in self.files.iter().enumerate() {
            self.by_object_id.insert(file.object_id.clone(), idx);
            self.by_content_hash
                .entry(file.content_hash.clone())
                .or_insert(idx);
        }
    }
}
