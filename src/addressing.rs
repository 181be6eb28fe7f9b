//! Content addressing and identifier generation
//!
//! Files are identified in the manifest by the SHA-256 digest of their bytes,
//! which drives both deduplication and change detection. Blobs in the store
//! are named by random object identifiers that are unrelated to the content,
//! so the store does not leak which files share content with a known file.
//!
//! Identifiers are UUIDs rendered as 32 uppercase hex digits without hyphens.
//! The nil UUID in that form is reserved as the name of the manifest blob; a
//! v4 UUID always carries version bits, so a generated id can never collide
//! with it.

use crate::error::Result;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use uuid::Uuid;

/// Default length of a per-object secret
pub const DEFAULT_SECRET_LENGTH: usize = 48;

/// Alphabet per-object secrets are drawn from (66 characters)
pub const SECRET_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.~";

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Hash a file's content using SHA-256
///
/// The file is read in 64KB chunks, so memory use does not depend on the
/// file size.
///
/// # Errors
///
/// - [`crate::CryptDirError::Io`] if the file cannot be opened or read
///
/// # Example
///
/// ```rust,no_run
/// use cryptdir::addressing::hash_file;
/// use std::path::Path;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_file(Path::new("notes.txt"))?;
/// assert_eq!(hash.len(), 64);
/// # Ok(())
/// # }
/// ```
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash an in-memory byte slice using SHA-256
pub fn hash_data(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Generate a fresh object identifier
///
/// ```rust
/// let id = cryptdir::addressing::new_object_id();
/// assert_eq!(id.len(), 32);
/// assert_eq!(id, id.to_uppercase());
/// assert!(!id.contains('-'));
/// ```
pub fn new_object_id() -> String {
    canonical(Uuid::new_v4())
}

/// The reserved identifier under which the manifest is stored
pub fn nil_object_id() -> String {
    canonical(Uuid::nil())
}

/// Generate a per-object secret with the default length and alphabet
pub fn new_secret() -> String {
    new_secret_with(DEFAULT_SECRET_LENGTH, SECRET_ALPHABET)
}

/// Generate a random secret of `length` characters drawn from `alphabet`
///
/// Every character is sampled independently and uniformly from a CSPRNG
/// (`rand::rng()` is a ChaCha-based generator reseeded from the OS).
/// An empty alphabet yields an empty string.
pub fn new_secret_with(length: usize, alphabet: &[u8]) -> String {
    if alphabet.is_empty() {
        return String::new();
    }

    let mut rng = rand::rng();
    (0..length)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

/// Check whether a store file name has the shape of an object identifier
pub fn is_object_id(name: &str) -> bool {
    name.len() == 32 && name.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}

fn canonical(id: Uuid) -> String {
    id.simple().to_string().to_uppercase()
}
