//! Streaming cipher pipeline
//!
//! Every blob in the store, the manifest included, has the same layout:
//!
//! ```text
//! [16-byte IV][AES-256-CBC (PKCS#7) ciphertext of gzip(plaintext)]
//! ```
//!
//! The AES key is the SHA-256 digest of the passphrase. There is no salt;
//! a fresh random IV per write keeps two encryptions of the same plaintext
//! distinct.
//!
//! ## Encryption
//!
//! ```text
//! reader ──► GzEncoder ──► CbcWriter ──► BufWriter ──► temp file ──rename──► target
//! ```
//!
//! The chain is driven by a single `io::copy`, so memory use is bounded by the
//! copy buffer whatever the input size. The blob is assembled in a temporary
//! file next to the target and only renamed into place once every stage has
//! been finished, so a failed write never leaves a truncated blob under its
//! final name.
//!
//! ## Decryption
//!
//! [`DecryptStream`] reads the IV, then pulls plaintext through
//! `CbcReader → GzDecoder`. The stream tracks its progress in a
//! [`DecryptState`] and stops for good on the first failure.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cryptdir::CipherPipeline;
//! use std::path::Path;
//!
//! # fn main() -> cryptdir::Result<()> {
//! let pipeline = CipherPipeline::new("correct horse battery staple");
//! pipeline.encrypt_to_target(&b"hello"[..], Path::new("store/BLOB"))?;
//!
//! let mut plain = Vec::new();
//! let written = pipeline.decrypt_to_writer(Path::new("store/BLOB"), &mut plain)?;
//! assert_eq!(written, Some(5));
//! # Ok(())
//! # }
//! ```

use crate::error::{CryptDirError, Result};
use crate::stream::{self, CbcReader, CbcWriter, CipherFault, IV_SIZE, KEY_SIZE};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Buffer size for every copy through the pipeline
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Prefix of the temporary files a pipeline writes before renaming
pub const TEMP_FILE_PREFIX: &str = ".cryptdir-tmp";

/// Progress of a [`DecryptStream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptState {
    /// Source opened, nothing read yet
    Idle,
    /// Reading the IV prefix
    ReadingIv,
    /// IV consumed, block decipher layer attached
    Deciphering,
    /// Decompression layer attached, no plaintext produced yet
    Decompressing,
    /// Plaintext is being handed to the caller
    Delivering,
    /// End of plaintext reached and the stream verified
    Done,
    /// The stream failed and will not produce more data
    Failed(String),
}

/// AES-256-CBC + gzip pipeline bound to one passphrase
///
/// The engine creates one pipeline for the master passphrase (manifest) and
/// one per file object (its secret).
#[derive(Clone)]
pub struct CipherPipeline {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for CipherPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherPipeline").finish_non_exhaustive()
    }
}

impl CipherPipeline {
    /// Create a pipeline keyed with `SHA-256(passphrase)`
    pub fn new(passphrase: &str) -> Self {
        Self {
            key: Sha256::digest(passphrase.as_bytes()).into(),
        }
    }

    /// Compress and encrypt everything `reader` yields into `target`
    ///
    /// # Arguments
    ///
    /// * `reader` - Plaintext source, read to exhaustion
    /// * `target` - Final blob path; its parent directory must exist
    ///
    /// # Returns
    ///
    /// Number of plaintext bytes consumed.
    ///
    /// # Errors
    ///
    /// - [`CryptDirError::Io`] if reading the input or writing the blob fails.
    ///   No file is created or replaced at `target` in that case.
    pub fn encrypt_to_target<R: Read>(&self, mut reader: R, target: &Path) -> Result<u64> {
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .tempfile_in(parent_dir(target))?;

        let iv = stream::generate_iv();
        let consumed = {
            let mut sink = BufWriter::with_capacity(COPY_BUFFER_SIZE, &mut temp);
            sink.write_all(&iv)?;

            let cipher = CbcWriter::new(sink, &self.key, &iv);
            let mut encoder = GzEncoder::new(cipher, Compression::default());
            let consumed = io::copy(&mut reader, &mut encoder)?;

            let cipher = encoder.finish()?;
            let mut sink = cipher.finish()?;
            sink.flush()?;
            consumed
        };

        temp.persist(target)?;
        trace!("Encrypted {} bytes into {:?}", consumed, target);
        Ok(consumed)
    }

    /// Encrypt the file at `source_path` into `target`
    pub fn encrypt_file_to_target(&self, source_path: &Path, target: &Path) -> Result<u64> {
        let file = File::open(source_path)?;
        self.encrypt_to_target(BufReader::with_capacity(COPY_BUFFER_SIZE, file), target)
    }

    /// Serialize `value` as JSON and encrypt it into `target`
    pub fn encrypt_json_to_target<T: Serialize>(&self, value: &T, target: &Path) -> Result<u64> {
        let bytes = serde_json::to_vec(value)?;
        self.encrypt_to_target(bytes.as_slice(), target)
    }

    /// Open a blob for streaming decryption
    ///
    /// Returns `Ok(None)` when `source` does not exist. The IV is read
    /// eagerly, so a blob shorter than its IV is reported here.
    ///
    /// # Errors
    ///
    /// - [`CryptDirError::CorruptData`] if the blob is shorter than the IV
    /// - [`CryptDirError::Io`] if the blob cannot be opened
    pub fn decrypt_from_source(&self, source: &Path) -> Result<Option<DecryptStream>> {
        let file = match File::open(source) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::with_capacity(COPY_BUFFER_SIZE, file);
        DecryptStream::open(reader, &self.key, source).map(Some)
    }

    /// Decrypt a blob into `writer`
    ///
    /// Returns the number of plaintext bytes written, or `None` if the blob
    /// does not exist. Bytes may already have reached `writer` when a
    /// crypto failure is detected; use [`CipherPipeline::decrypt_to_file`]
    /// when partial output must not be observable.
    pub fn decrypt_to_writer<W: Write>(&self, source: &Path, writer: &mut W) -> Result<Option<u64>> {
        let Some(mut stream) = self.decrypt_from_source(source)? else {
            return Ok(None);
        };

        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = stream.read_chunk(&mut buffer)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n])?;
            total += n as u64;
        }

        Ok(Some(total))
    }

    /// Decrypt a blob into the file at `destination`
    ///
    /// The plaintext is written to a temporary file in the destination's
    /// directory and renamed over `destination` only after the stream has
    /// been fully verified. On failure any existing destination is left as
    /// it was.
    pub fn decrypt_to_file(&self, source: &Path, destination: &Path) -> Result<Option<u64>> {
        if !source.exists() {
            return Ok(None);
        }

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .tempfile_in(parent_dir(destination))?;

        let written = {
            let mut sink = BufWriter::with_capacity(COPY_BUFFER_SIZE, &mut temp);
            let written = self.decrypt_to_writer(source, &mut sink)?;
            sink.flush()?;
            written
        };

        match written {
            Some(bytes) => {
                temp.persist(destination)?;
                debug!("Decrypted {:?} to {:?} ({} bytes)", source, destination, bytes);
                Ok(Some(bytes))
            }
            // Removed between the existence check and the open.
            None => Ok(None),
        }
    }

    /// Decrypt a blob holding a JSON document into a typed value
    pub fn decrypt_to_json<T: DeserializeOwned>(&self, source: &Path) -> Result<Option<T>> {
        let mut bytes = Vec::new();
        match self.decrypt_to_writer(source, &mut bytes)? {
            Some(_) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Streaming decryption of one blob
///
/// Implements [`Read`]; the crate-level error of a failed read is available
/// through [`DecryptStream::read_chunk`].
pub struct DecryptStream {
    decoder: GzDecoder<CbcReader<BufReader<File>>>,
    source: PathBuf,
    state: DecryptState,
}

impl DecryptStream {
    fn open(mut reader: BufReader<File>, key: &[u8; KEY_SIZE], source: &Path) -> Result<Self> {
        let mut state = DecryptState::Idle;
        advance(&mut state, DecryptState::ReadingIv, source);
        let iv: [u8; IV_SIZE] = stream::read_iv(&mut reader).map_err(|e| classify(e, source))?;

        advance(&mut state, DecryptState::Deciphering, source);
        let cipher = CbcReader::new(reader, key, &iv);

        advance(&mut state, DecryptState::Decompressing, source);
        Ok(Self {
            decoder: GzDecoder::new(cipher),
            source: source.to_path_buf(),
            state,
        })
    }

    /// Current state of the stream
    pub fn state(&self) -> &DecryptState {
        &self.state
    }

    /// Blob this stream reads from
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Read plaintext, reporting failures as [`CryptDirError`]
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let DecryptState::Failed(reason) = &self.state {
            trace!("Read after failure on {:?}: {}", self.source, reason);
            return Err(CryptDirError::IncorrectPassword(self.source.clone()));
        }
        if self.state == DecryptState::Done || buf.is_empty() {
            return Ok(0);
        }

        let result = match self.decoder.read(buf) {
            Ok(0) => self.verify_trailer().map(|_| 0),
            Ok(n) => Ok(n),
            Err(e) => Err(e),
        };

        match result {
            Ok(0) => {
                self.state = DecryptState::Done;
                Ok(0)
            }
            Ok(n) => {
                self.state = DecryptState::Delivering;
                Ok(n)
            }
            Err(e) => {
                self.state = DecryptState::Failed(e.to_string());
                debug!("Decryption of {:?} failed: {}", self.source, e);
                Err(classify(e, &self.source))
            }
        }
    }

    // The gzip member can end before the cipher layer has seen its final
    // block; drain it so the padding check runs.
    fn verify_trailer(&mut self) -> io::Result<()> {
        let cipher = self.decoder.get_mut();
        if !cipher.is_finished() {
            io::copy(cipher, &mut io::sink())?;
        }
        Ok(())
    }
}

impl Read for DecryptStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_chunk(buf).map_err(|e| match e {
            CryptDirError::Io(io) => io,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        })
    }
}

impl std::fmt::Debug for DecryptStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptStream")
            .field("source", &self.source)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn advance(state: &mut DecryptState, next: DecryptState, source: &Path) {
    trace!("{:?}: {:?} -> {:?}", source, state, next);
    *state = next;
}

/// Map an I/O error from the decrypt chain onto the crate taxonomy
///
/// Structural faults of the blob become `CorruptData`. Bad padding and
/// anything gzip rejects (bad header, corrupt deflate data, checksum
/// mismatch, premature end) is what a wrong key produces, so those become
/// `IncorrectPassword`. Everything else stays an I/O error.
fn classify(err: io::Error, source: &Path) -> CryptDirError {
    if let Some(fault) = err.get_ref().and_then(|e| e.downcast_ref::<CipherFault>()) {
        return if fault.is_structural() {
            CryptDirError::corrupt(source, fault.to_string())
        } else {
            CryptDirError::IncorrectPassword(source.to_path_buf())
        };
    }

    match err.kind() {
        io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::UnexpectedEof => CryptDirError::IncorrectPassword(source.to_path_buf()),
        _ => CryptDirError::Io(err),
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Check whether a file name belongs to a pipeline temporary file
pub fn is_temp_file_name(name: &str) -> bool {
    name.starts_with(TEMP_FILE_PREFIX)
}

/// Remove a blob, ignoring a blob that is already gone
pub(crate) fn remove_blob(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
