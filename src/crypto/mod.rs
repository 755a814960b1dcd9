//! Key derivation and the streaming encryption envelope.
//!
//! Every encrypted stream (settings, index, backup objects) shares one
//! envelope: a cleartext 16-byte random IV followed by AES-256 in OFB mode,
//! keyed by a password-derived key. There is no authentication tag — a
//! wrong password produces garbage plaintext rather than a decrypt error,
//! which is why callers downstream (the index loader in particular) must
//! treat "decoded nonsense" as `CryptoError::IndexDecryptionFailed`.
//!
//! ```text
//! encrypted stream := iv (16 bytes, cleartext) || aes256-ofb(plaintext)
//! ```
//!
//! The key itself comes from scrypt over `(password, salt)` with
//! `N = 2^18, r = 8, p = 1`, producing the full 32-byte AES-256 key.
//! Derivation is expensive by design (that is the point of scrypt) so
//! [`CryptoContext`] memoizes the derived key after the first use.

use std::io::{self, Read, Write};
use std::sync::OnceLock;
use std::time::Instant;

use aes::Aes256;
use cipher::{KeyIvInit, StreamCipher};
use ofb::Ofb;
use rand::RngCore;
use thiserror::Error;

/// log2(N) for the scrypt cost parameter; N = 2^18.
const SCRYPT_LOG_N: u8 = 18;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// AES block size / OFB IV length in bytes.
pub const IV_LEN: usize = 16;

type Cipher = Ofb<Aes256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("index could not be decrypted — almost certainly a wrong password")]
    IndexDecryptionFailed,
}

/// Holds a password and salt, deriving and memoizing the AES-256 key on
/// first use. Cheap to clone: the derived key is shared via `OnceLock`.
#[derive(Clone)]
pub struct CryptoContext {
    password: String,
    salt: Vec<u8>,
    key: std::sync::Arc<OnceLock<[u8; KEY_LEN]>>,
}

impl CryptoContext {
    pub fn new(password: impl Into<String>, salt: Vec<u8>) -> Self {
        Self {
            password: password.into(),
            salt,
            key: std::sync::Arc::new(OnceLock::new()),
        }
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Derives the key if it hasn't been already, otherwise returns the
    /// memoized value. Derivation is logged at debug level along with the
    /// time it took, since scrypt at this cost is deliberately slow.
    fn key(&self) -> Result<[u8; KEY_LEN], CryptoError> {
        if let Some(key) = self.key.get() {
            return Ok(*key);
        }
        let started = Instant::now();
        let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let mut key = [0u8; KEY_LEN];
        scrypt::scrypt(self.password.as_bytes(), &self.salt, &params, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "derived scrypt key");
        // another thread may have raced us here; whichever key lands first wins,
        // they are equal anyway since input is identical.
        let _ = self.key.set(key);
        Ok(*self.key.get().unwrap())
    }

    pub fn writer<W: Write>(&self, inner: W) -> Result<CryptoWriter<W>, CryptoError> {
        CryptoWriter::new(inner, self.key()?)
    }

    pub fn reader<R: Read>(&self, inner: R) -> Result<CryptoReader<R>, CryptoError> {
        CryptoReader::new(inner, self.key()?)
    }
}

/// Generates a fresh random 16-byte salt for a new archive's settings.
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Wraps a writer, encrypting everything written to it with AES-256-OFB.
/// Writes a random IV in cleartext to `inner` as soon as it is constructed.
pub struct CryptoWriter<W: Write> {
    inner: W,
    cipher: Cipher,
}

impl<W: Write> CryptoWriter<W> {
    fn new(mut inner: W, key: [u8; KEY_LEN]) -> Result<Self, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        inner.write_all(&iv)?;
        let cipher = Cipher::new(&key.into(), &iv.into());
        Ok(Self { inner, cipher })
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CryptoWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut scratch = buf.to_vec();
        self.cipher.apply_keystream(&mut scratch);
        self.inner.write_all(&scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Wraps a reader, decrypting everything read from it with AES-256-OFB.
/// Reads the cleartext 16-byte IV prefix as soon as it is constructed.
pub struct CryptoReader<R: Read> {
    inner: R,
    cipher: Cipher,
}

impl<R: Read> CryptoReader<R> {
    fn new(mut inner: R, key: [u8; KEY_LEN]) -> Result<Self, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        inner.read_exact(&mut iv)?;
        let cipher = Cipher::new(&key.into(), &iv.into());
        Ok(Self { inner, cipher })
    }
}

impl<R: Read> Read for CryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply_keystream(&mut buf[..n]);
        Ok(n)
    }
}
