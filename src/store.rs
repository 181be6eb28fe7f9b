//! The encrypted object store
//!
//! The store is a single flat directory:
//!
//! ```text
//! store/
//! ├── 00000000000000000000000000000000   # manifest, master passphrase
//! ├── 3F2A9C...                          # file object, its own secret
//! └── 8B01D4...
//! ```
//!
//! Blob names are object identifiers. [`ObjectStore`] only deals with names
//! and files; what a blob contains is the business of the cipher pipeline
//! and the manifest.

use crate::addressing::{is_object_id, nil_object_id};
use crate::cipher::{self, is_temp_file_name};
use crate::error::{CryptDirError, Result};
use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Handle on a store directory
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Create a handle; the directory is not touched
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check whether the store directory exists
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Create the store directory if needed
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Path of the blob for `object_id`
    pub fn blob_path(&self, object_id: &str) -> PathBuf {
        self.root.join(object_id)
    }

    /// Path of the manifest blob
    pub fn manifest_path(&self) -> PathBuf {
        Manifest::blob_path(&self.root)
    }

    /// Check whether the blob for `object_id` is present
    pub fn contains(&self, object_id: &str) -> bool {
        self.blob_path(object_id).is_file()
    }

    /// Size on disk of a blob
    pub fn object_size(&self, object_id: &str) -> Result<u64> {
        let path = self.blob_path(object_id);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(CryptDirError::ObjectNotFound(object_id.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CryptDirError::ObjectNotFound(object_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a blob; returns whether a file was removed
    pub fn remove_object(&self, object_id: &str) -> Result<bool> {
        let removed = cipher::remove_blob(&self.blob_path(object_id))?;
        if removed {
            debug!("Deleted object {}", object_id);
        }
        Ok(removed)
    }

    /// Object ids of every file blob in the store (the manifest excluded)
    pub fn list_objects(&self) -> Result<Vec<String>> {
        let nil = nil_object_id();
        let mut objects: Vec<String> = self
            .file_names()?
            .into_iter()
            .filter(|name| is_object_id(name) && *name != nil)
            .collect();
        objects.sort();
        Ok(objects)
    }

    /// Leftover pipeline temporary files
    pub fn list_temp_files(&self) -> Result<Vec<PathBuf>> {
        let mut temps: Vec<PathBuf> = self
            .file_names()?
            .into_iter()
            .filter(|name| is_temp_file_name(name))
            .map(|name| self.root.join(name))
            .collect();
        temps.sort();
        Ok(temps)
    }

    /// Blobs present in the store but unknown to `manifest`
    pub fn orphaned_objects(&self, manifest: &Manifest) -> Result<Vec<String>> {
        Ok(self
            .list_objects()?
            .into_iter()
            .filter(|id| {
                manifest.find_file_by_object_id(id).is_none() && !manifest.references_object(id)
            })
            .collect())
    }

    /// Delete the whole store directory; returns whether it existed
    pub fn drop_store(&self) -> Result<bool> {
        if !self.root.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&self.root)?;
        debug!("Dropped store {:?}", self.root);
        Ok(true)
    }

    /// Statistics about the blobs on disk
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats {
            has_manifest: self.manifest_path().is_file(),
            ..Default::default()
        };

        for id in self.list_objects()? {
            stats.object_count += 1;
            stats.total_size += self.object_size(&id)?;
        }
        if stats.has_manifest {
            stats.manifest_size = fs::metadata(self.manifest_path())?.len();
        }
        stats.temp_files = self.list_temp_files()?.len();

        trace!("Store stats: {:?}", stats);
        Ok(stats)
    }

    fn file_names(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

/// Blob statistics of a store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of file blobs
    pub object_count: usize,
    /// Combined size of the file blobs
    pub total_size: u64,
    /// Whether the manifest blob exists
    pub has_manifest: bool,
    /// Size of the manifest blob
    pub manifest_size: u64,
    /// Leftover temporary files
    pub temp_files: usize,
}
