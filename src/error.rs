//! Error types for the cryptdir library
//!
//! Every fallible operation returns [`Result<T>`], an alias over
//! [`CryptDirError`]. The variants follow the failure taxonomy of a sync run:
//! some conditions abort the whole operation (a missing source directory, a
//! manifest that cannot be decrypted) while others only affect one entry and
//! are reported through [`crate::types::SyncEvent::Failed`] while the
//! traversal continues.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the cryptdir library
pub type Result<T> = std::result::Result<T, CryptDirError>;

/// Main error type for all cryptdir operations
#[derive(Debug, Error)]
pub enum CryptDirError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The source directory does not exist or is not a directory
    #[error("Source directory not found: {0:?}")]
    SourceNotFound(PathBuf),

    /// A blob could not be deciphered or decompressed with the given passphrase
    #[error("Incorrect password for {0:?}")]
    IncorrectPassword(PathBuf),

    /// A blob is structurally invalid (truncated IV, misaligned ciphertext)
    #[error("Corrupt data in {path:?}: {reason}")]
    CorruptData {
        /// Blob that failed to decode
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// An object referenced by the manifest has no blob in the store
    #[error("Object not found in store: {0}")]
    ObjectNotFound(String),

    /// The decrypted manifest does not have the expected shape
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Exclusion or inclusion glob could not be parsed
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// The store directory is the source directory or one of its ancestors
    #[error("Store directory {store:?} contains the source directory {source_dir:?}")]
    StoreContainsSource {
        /// Configured store directory
        store: PathBuf,
        /// Configured source directory
        source_dir: PathBuf,
    },

    /// Path cannot be represented in the manifest (non UTF-8, outside root)
    #[error("Path conversion error: {0:?}")]
    PathConversion(PathBuf),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<globset::Error> for CryptDirError {
    fn from(err: globset::Error) -> Self {
        CryptDirError::InvalidPattern(err.to_string())
    }
}

impl From<tempfile::PersistError> for CryptDirError {
    fn from(err: tempfile::PersistError) -> Self {
        CryptDirError::Io(err.error)
    }
}

/// Process exit status classes used at the CLI boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatusKind {
    /// Run completed without failures
    Success,
    /// Internal or I/O failure that aborted the run
    Failure,
    /// Command line could not be parsed (clap's own code)
    Usage,
    /// The source directory is missing
    SourceNotFound,
    /// The master password is wrong or the manifest is unreadable
    IncorrectPassword,
    /// The run finished but at least one entry failed
    PartialFailure,
}

impl ExitStatusKind {
    /// Numeric process exit code
    pub fn code(self) -> i32 {
        match self {
            ExitStatusKind::Success => 0,
            ExitStatusKind::Failure => 1,
            ExitStatusKind::Usage => 2,
            ExitStatusKind::SourceNotFound => 3,
            ExitStatusKind::IncorrectPassword => 4,
            ExitStatusKind::PartialFailure => 5,
        }
    }
}

impl CryptDirError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        CryptDirError::Internal(msg.into())
    }

    /// Create a corrupt-data error for a blob
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        CryptDirError::CorruptData {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-manifest error
    pub fn invalid_manifest(msg: impl Into<String>) -> Self {
        CryptDirError::InvalidManifest(msg.into())
    }

    /// Check whether this error came out of the cipher pipeline.
    ///
    /// A wrong passphrase and a damaged ciphertext cannot be told apart from
    /// the bytes alone, so both count as crypto failures.
    pub fn is_crypto_failure(&self) -> bool {
        matches!(
            self,
            CryptDirError::IncorrectPassword(_) | CryptDirError::CorruptData { .. }
        )
    }

    /// Check if this error aborts a whole run rather than a single entry
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CryptDirError::SourceNotFound(_)
                | CryptDirError::InvalidManifest(_)
                | CryptDirError::InvalidPattern(_)
                | CryptDirError::StoreContainsSource { .. }
        )
    }

    /// Exit status class for this error when it terminates the CLI
    pub fn exit_status(&self) -> ExitStatusKind {
        match self {
            CryptDirError::SourceNotFound(_) => ExitStatusKind::SourceNotFound,
            CryptDirError::IncorrectPassword(_)
            | CryptDirError::CorruptData { .. }
            | CryptDirError::InvalidManifest(_) => ExitStatusKind::IncorrectPassword,
            CryptDirError::InvalidPattern(_) | CryptDirError::StoreContainsSource { .. } => {
                ExitStatusKind::Usage
            }
            _ => ExitStatusKind::Failure,
        }
    }

    /// Numeric exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.exit_status().code()
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            CryptDirError::SourceNotFound(path) => {
                format!("Invalid directory {:?}. Check the --source path.", path)
            }
            CryptDirError::IncorrectPassword(path) => {
                format!(
                    "Incorrect password for {:?}. The store was encrypted with a different password.",
                    path
                )
            }
            CryptDirError::InvalidPattern(pattern) => {
                format!("Invalid filter pattern: {}. Patterns use glob syntax.", pattern)
            }
            CryptDirError::StoreContainsSource { store, .. } => {
                format!(
                    "Store directory {:?} is the source directory or one of its parents. Choose another --store path.",
                    store
                )
            }
            _ => self.to_string(),
        }
    }
}
