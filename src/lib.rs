//! # CryptDir - Encrypted directory mirroring
//!
//! Keeps an encrypted copy of a directory tree in a flat store of opaque
//! blobs, suitable for syncing through untrusted storage, and restores the
//! tree from it.
//!
//! ## Overview
//!
//! CryptDir lets you:
//! - Mirror a directory into a store where names, structure and contents are
//!   all hidden
//! - Re-run the mirror incrementally: only new content is encrypted
//! - Restore the tree anywhere, skipping files that are already correct
//! - Check, prune and re-key an existing store
//!
//! ## Architecture
//!
//! - **Content addressing**: every file is identified by the SHA-256 of its
//!   content; files with equal content share one blob
//! - **Blob format**: `[16-byte IV][AES-256-CBC (gzip(plaintext))]`, the key
//!   being the SHA-256 of a passphrase
//! - **Per-file secrets**: each blob is encrypted with its own random
//!   passphrase, kept only inside the manifest
//! - **Manifest**: a JSON document listing every path and every file object,
//!   stored in the store under the all-zero object id and encrypted with the
//!   master passphrase
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cryptdir::CryptDir;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cryptdir = CryptDir::builder()
//!     .store_dir(PathBuf::from("/mnt/dropbox/vault"))
//!     .build(PathBuf::from("./documents"))?;
//!
//! // Mirror the tree
//! let report = cryptdir.encrypt("master password")?;
//! println!("{} added, {} updated, {} removed", report.added, report.updated, report.removed);
//!
//! // Restore it
//! let restored = cryptdir.decrypt("master password")?;
//! println!("{} files decrypted", restored.files_decrypted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Observing Progress
//!
//! Every user-visible change is a [`SyncEvent`] delivered to a
//! [`SyncObserver`]. The default observer logs through `tracing`; pass your
//! own to collect or display events:
//!
//! ```rust,no_run
//! use cryptdir::{CollectingObserver, CryptDir};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let observer = CollectingObserver::new();
//! let cryptdir = CryptDir::builder()
//!     .observer(Arc::new(observer.clone()))
//!     .build(PathBuf::from("./documents"))?;
//! cryptdir.encrypt("master password")?;
//! for event in observer.take() {
//!     println!("{}", event);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Maintenance
//!
//! ```rust,no_run
//! # use cryptdir::CryptDir;
//! # use std::path::PathBuf;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let cryptdir = CryptDir::new(PathBuf::from("./documents"))?;
//! let report = cryptdir.verify("master password")?;
//! println!("{}", report.summary());
//!
//! let pruned = cryptdir.prune("master password", true)?;
//! println!("{} orphaned blobs", pruned.orphaned_objects.len());
//!
//! cryptdir.change_passphrase("master password", "new password")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Considerations
//!
//! - Blob names are random and carry no information about the paths
//! - File sizes are visible to anyone holding the store, up to gzip and
//!   block padding
//! - CBC without a MAC detects a wrong key with high probability but does not
//!   authenticate the ciphertext; [`CryptDir::verify`] checks content hashes
//! - Symbolic links are skipped unless following is enabled
//!
//! ## Error Handling
//!
//! All operations return `Result<T, CryptDirError>`. A wrong passphrase on
//! the manifest surfaces as [`CryptDirError::IncorrectPassword`] before
//! anything is written. Problems with single entries are reported in the
//! run's report and do not abort it.
//!
//! ## Module Organization
//!
//! - [`cryptdir`]: The sync engine and its builder
//! - [`manifest`]: Path entries, file objects and the manifest document
//! - [`cipher`]: Encrypt and decrypt pipelines over files
//! - [`stream`]: Streaming AES-256-CBC reader and writer
//! - [`store`]: Blob directory management
//! - [`addressing`]: Content hashes, object ids and secrets
//! - [`file_tracking`]: Source tree scanning and filtering
//! - [`verification`]: Store integrity checking
//! - [`types`]: Events, observers and reports
//! - [`error`]: Error types and exit statuses

// Public API modules
pub mod addressing;
pub mod cipher;
pub mod cryptdir;
pub mod error;
pub mod file_tracking;
pub mod manifest;
pub mod store;
pub mod stream;
pub mod types;
pub mod verification;

// Internal modules (not part of public API)
mod collections;
mod utils;

// Re-export main types for convenience
pub use crate::cryptdir::{CryptDir, CryptDirBuilder};
pub use cipher::{CipherPipeline, DecryptState, DecryptStream};
pub use error::{CryptDirError, ExitStatusKind, Result};
pub use manifest::{FileObject, Manifest, PathEntry};
pub use store::{ObjectStore, StoreStats};
pub use types::*;
pub use utils::format_bytes;
pub use verification::{ObjectVerification, StoreVerifier, VerificationReport};
