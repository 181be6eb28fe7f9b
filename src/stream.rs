//! Streaming AES-256-CBC layers
//!
//! [`CbcWriter`] and [`CbcReader`] wrap any `Write`/`Read` and encrypt or
//! decrypt block by block, so a pipeline can be assembled from plain std I/O
//! adapters (`flate2` on one side, a buffered file on the other) and never
//! holds more than one input chunk in memory.
//!
//! Padding is PKCS#7. The writer pads on [`CbcWriter::finish`]; the reader
//! always holds back the last full block until the inner reader reports EOF,
//! then strips and checks the padding.
//!
//! Failures inside these layers are reported as `io::Error`s of kind
//! `InvalidData` carrying a [`CipherFault`], which the pipeline turns into
//! the crate's error taxonomy.

use aes::Aes256;
use cbc::cipher::block_padding::{Padding, Pkcs7};
use cbc::cipher::consts::U16;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::Rng;
use std::io::{self, Read, Write};
use thiserror::Error;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;
/// Length of the IV prefix of every blob
pub const IV_SIZE: usize = 16;
/// AES-256 key length
pub const KEY_SIZE: usize = 32;

const READ_CHUNK_SIZE: usize = 16 * 1024;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Faults raised by the CBC layers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherFault {
    /// Fewer than [`IV_SIZE`] bytes before end of input
    #[error("blob is shorter than its IV prefix")]
    MissingIv,
    /// No ciphertext block after the IV
    #[error("blob has no ciphertext")]
    EmptyCiphertext,
    /// Ciphertext length is not a multiple of the block size
    #[error("ciphertext is not a whole number of blocks")]
    Misaligned,
    /// PKCS#7 padding check failed after deciphering the final block
    #[error("invalid padding in final block")]
    BadPadding,
}

impl CipherFault {
    /// Whether the fault shows the blob is structurally broken, as opposed
    /// to deciphered with the wrong key
    pub fn is_structural(&self) -> bool {
        !matches!(self, CipherFault::BadPadding)
    }
}

impl From<CipherFault> for io::Error {
    fn from(fault: CipherFault) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, fault)
    }
}

/// Generate a random IV
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill(&mut iv);
    iv
}

/// Read exactly [`IV_SIZE`] bytes of IV prefix
pub fn read_iv<R: Read>(reader: &mut R) -> io::Result<[u8; IV_SIZE]> {
    let mut iv = [0u8; IV_SIZE];
    match reader.read_exact(&mut iv) {
        Ok(()) => Ok(iv),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(CipherFault::MissingIv.into()),
        Err(e) => Err(e),
    }
}

/// Writer that encrypts everything written to it
///
/// Complete blocks are enciphered and passed to the inner writer as soon as
/// they are available; at most `BLOCK_SIZE - 1` bytes wait for more input.
/// [`CbcWriter::finish`] must be called to write the padded final block.
pub struct CbcWriter<W: Write> {
    inner: W,
    cipher: Aes256CbcEnc,
    pending: Vec<u8>,
}

impl<W: Write> CbcWriter<W> {
    /// Create a writer enciphering under `key` with `iv`
    pub fn new(inner: W, key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        Self {
            inner,
            cipher: Aes256CbcEnc::new(&(*key).into(), &(*iv).into()),
            pending: Vec::with_capacity(READ_CHUNK_SIZE + BLOCK_SIZE),
        }
    }

    /// Pad, encrypt the final block and return the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        let used = self.pending.len() % BLOCK_SIZE;
        let start = self.pending.len() - used;
        self.pending.resize(start + BLOCK_SIZE, 0);
        let last: &mut GenericArray<u8, U16> = GenericArray::from_mut_slice(&mut self.pending[start..]);
        <Pkcs7 as Padding<U16>>::pad(last, used);
        self.encrypt_pending()?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn encrypt_pending(&mut self) -> io::Result<()> {
        let whole = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        if whole == 0 {
            return Ok(());
        }

        for block in self.pending[..whole].chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        self.inner.write_all(&self.pending[..whole])?;
        self.pending.drain(..whole);
        Ok(())
    }
}

impl<W: Write> Write for CbcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.encrypt_pending()?;
        Ok(buf.len())
    }

    // Only whole blocks can leave the writer; the tail stays until finish().
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> std::fmt::Debug for CbcWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbcWriter")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Reader that decrypts a CBC ciphertext stream
pub struct CbcReader<R: Read> {
    inner: R,
    cipher: Aes256CbcDec,
    ciphertext: Vec<u8>,
    plaintext: Vec<u8>,
    position: usize,
    seen_block: bool,
    finished: bool,
}

impl<R: Read> CbcReader<R> {
    /// Create a reader deciphering under `key` with `iv`
    pub fn new(inner: R, key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        Self {
            inner,
            cipher: Aes256CbcDec::new(&(*key).into(), &(*iv).into()),
            ciphertext: Vec::with_capacity(READ_CHUNK_SIZE + BLOCK_SIZE),
            plaintext: Vec::new(),
            position: 0,
            seen_block: false,
            finished: false,
        }
    }

    /// Whether the final block has been deciphered and its padding checked
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn decrypt_blocks(&mut self, len: usize) {
        for block in self.ciphertext[..len].chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        self.plaintext.clear();
        self.plaintext.extend(self.ciphertext.drain(..len));
        self.position = 0;
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let read = loop {
            match self.inner.read(&mut chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        if read == 0 {
            return self.finish_stream();
        }

        self.seen_block = true;
        self.ciphertext.extend_from_slice(&chunk[..read]);

        // Keep at least one whole block back: it may be the padded final one.
        let releasable = self.ciphertext.len().saturating_sub(BLOCK_SIZE);
        let whole = releasable - releasable % BLOCK_SIZE;
        if whole > 0 {
            self.decrypt_blocks(whole);
        }
        Ok(())
    }

    fn finish_stream(&mut self) -> io::Result<()> {
        if !self.seen_block {
            return Err(CipherFault::EmptyCiphertext.into());
        }
        if self.ciphertext.len() != BLOCK_SIZE {
            return Err(CipherFault::Misaligned.into());
        }

        self.decrypt_blocks(BLOCK_SIZE);
        let last: &GenericArray<u8, U16> = GenericArray::from_slice(&self.plaintext);
        let unpadded = <Pkcs7 as Padding<U16>>::unpad(last).map(<[u8]>::len);
        match unpadded {
            Ok(kept) => {
                self.plaintext.truncate(kept);
                self.finished = true;
                Ok(())
            }
            Err(_) => {
                self.plaintext.clear();
                Err(CipherFault::BadPadding.into())
            }
        }
    }
}

impl<R: Read> Read for CbcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.position < self.plaintext.len() {
                let available = &self.plaintext[self.position..];
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                self.position += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

impl<R: Read> std::fmt::Debug for CbcReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbcReader")
            .field("buffered", &self.ciphertext.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
