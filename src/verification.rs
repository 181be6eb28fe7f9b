//! Store verification and integrity checking
//!
//! Verification decrypts every blob the manifest references, recomputes the
//! content hash of the plaintext and compares it with the hash recorded in
//! the manifest. It also looks for blobs the manifest does not know about
//! and for path entries whose file object is missing.
//!
//! Nothing is written: plaintext goes to a hashing sink and is discarded.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cryptdir::CryptDir;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cryptdir = CryptDir::new(PathBuf::from("./documents"))?;
//! let report = cryptdir.verify("master password")?;
//! if report.is_valid() {
//!     println!("Store is valid!");
//! } else {
//!     println!("Issues found: {}", report.summary());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Performance
//!
//! Verification reads and decrypts the whole store once; every unique object
//! is checked a single time however many paths reference it.

use crate::collections::HashMap;
use crate::error::Result;
use crate::manifest::{FileObject, Manifest};
use crate::store::ObjectStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::time::Instant;
use tracing::{debug, info};

/// Verifier bound to one store
#[derive(Debug)]
pub struct StoreVerifier<'a> {
    store: &'a ObjectStore,
}

impl<'a> StoreVerifier<'a> {
    /// Create a verifier for `store`
    pub fn new(store: &'a ObjectStore) -> Self {
        Self { store }
    }

    /// Verify every object referenced by `manifest`
    ///
    /// # Returns
    ///
    /// A report listing every problem found. Problems with individual
    /// objects are reported, not returned as errors.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store directory cannot be listed.
    pub fn verify(&self, manifest: &Manifest) -> Result<VerificationReport> {
        let start = Instant::now();
        let mut report = VerificationReport::default();

        let mut paths_by_object: HashMap<&str, Vec<String>> = HashMap::default();
        let mut order = Vec::new();
        for entry in manifest.dirents() {
            let Some(id) = entry.object_id.as_deref() else {
                continue;
            };
            if manifest.find_file_by_object_id(id).is_none() {
                report.dangling_references.push(entry.path.clone());
                continue;
            }
            let paths = paths_by_object.entry(id).or_default();
            if paths.is_empty() {
                order.push(id);
            }
            paths.push(entry.path.clone());
        }

        debug!("Verifying {} objects", order.len());
        for id in order {
            let Some(file) = manifest.find_file_by_object_id(id) else {
                continue;
            };
            let paths = paths_by_object.remove(id).unwrap_or_default();
            let check = self.verify_object(file, paths);

            if !check.object_exists {
                report.missing_objects.push(check.object_id.clone());
            } else if !check.decrypts {
                report.crypto_failures.push(check.object_id.clone());
            } else if !check.content_hash_valid {
                report.hash_mismatches.push(check.object_id.clone());
            }
            report.object_checks.push(check);
        }

        report.orphaned_objects = self.store.orphaned_objects(manifest)?;
        report.total_objects_checked = report.object_checks.len();
        report.objects_valid = report.object_checks.iter().filter(|c| c.is_valid()).count();
        report.verification_time_ms = start.elapsed().as_millis() as u64;

        info!(
            "Verified store in {}ms: {} / {} objects valid",
            report.verification_time_ms, report.objects_valid, report.total_objects_checked
        );
        Ok(report)
    }

    fn verify_object(&self, file: &FileObject, paths: Vec<String>) -> ObjectVerification {
        let mut check = ObjectVerification {
            object_id: file.object_id.clone(),
            paths,
            object_exists: self.store.contains(&file.object_id),
            decrypts: false,
            content_hash_valid: false,
            plaintext_size: 0,
            error: None,
        };
        if !check.object_exists {
            check.error = Some(format!("Object {} not found", file.object_id));
            return check;
        }

        let mut sink = HashingSink::default();
        match file
            .pipeline()
            .decrypt_to_writer(&self.store.blob_path(&file.object_id), &mut sink)
        {
            Ok(Some(size)) => {
                check.decrypts = true;
                check.plaintext_size = size;
                let computed = sink.finalize();
                check.content_hash_valid = computed == file.content_hash;
                if !check.content_hash_valid {
                    check.error = Some(format!(
                        "Content hash mismatch: expected {}, got {}",
                        file.content_hash, computed
                    ));
                }
            }
            Ok(None) => {
                check.object_exists = false;
                check.error = Some(format!("Object {} not found", file.object_id));
            }
            Err(e) => {
                check.error = Some(format!("Failed to decrypt object: {}", e));
            }
        }
        check
    }
}

#[derive(Default)]
struct HashingSink {
    hasher: Sha256,
}

impl HashingSink {
    fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Write for HashingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Result of verifying a store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Per-object results
    pub object_checks: Vec<ObjectVerification>,
    /// Objects whose blob is missing
    pub missing_objects: Vec<String>,
    /// Objects whose blob does not decrypt with its secret
    pub crypto_failures: Vec<String>,
    /// Objects whose plaintext does not match the recorded hash
    pub hash_mismatches: Vec<String>,
    /// Paths referencing an object the manifest does not define
    pub dangling_references: Vec<String>,
    /// Blobs in the store the manifest does not reference
    pub orphaned_objects: Vec<String>,
    /// Number of objects checked
    pub total_objects_checked: usize,
    /// Number of objects that passed every check
    pub objects_valid: usize,
    /// Time taken for verification in milliseconds
    pub verification_time_ms: u64,
}

impl VerificationReport {
    /// Check whether the store is fully consistent
    pub fn is_valid(&self) -> bool {
        self.objects_valid == self.total_objects_checked
            && self.dangling_references.is_empty()
            && self.orphaned_objects.is_empty()
    }

    /// One-line summary of the verification
    pub fn summary(&self) -> String {
        if self.is_valid() {
            return format!(
                "Store is valid ({} objects verified in {}ms)",
                self.total_objects_checked, self.verification_time_ms
            );
        }

        let issues = [
            (!self.missing_objects.is_empty())
                .then(|| format!("{} missing", self.missing_objects.len())),
            (!self.crypto_failures.is_empty())
                .then(|| format!("{} undecryptable", self.crypto_failures.len())),
            (!self.hash_mismatches.is_empty())
                .then(|| format!("{} hash mismatches", self.hash_mismatches.len())),
            (!self.dangling_references.is_empty())
                .then(|| format!("{} dangling references", self.dangling_references.len())),
            (!self.orphaned_objects.is_empty())
                .then(|| format!("{} orphaned", self.orphaned_objects.len())),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");

        format!(
            "Store is invalid: {} ({}/{} objects valid)",
            issues, self.objects_valid, self.total_objects_checked
        )
    }
}

/// Verification result for one file object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectVerification {
    /// Object identifier
    pub object_id: String,
    /// Manifest paths referencing the object
    pub paths: Vec<String>,
    /// Whether the blob exists
    pub object_exists: bool,
    /// Whether the blob decrypted completely
    pub decrypts: bool,
    /// Whether the plaintext matches the recorded content hash
    pub content_hash_valid: bool,
    /// Plaintext size in bytes
    pub plaintext_size: u64,
    /// Error message if verification failed
    pub error: Option<String>,
}

impl ObjectVerification {
    /// Check if the object passed every check
    pub fn is_valid(&self) -> bool {
        self.object_exists && self.decrypts && self.content_hash_valid && self.error.is_none()
    }
}
