//! The storage provider abstraction: settings, index, and backup-object
//! persistence behind one trait, with two backends — [`local`] and,
//! behind the `s3` feature, [`cloud`].
//!
//! Three object kinds, read/write/delete each:
//! - **settings**: one small record per archive.
//! - **index**: one gzip+encrypted blob per archive.
//! - **backup files**: one object per content hash, addressed by
//!   `hash[0:2]/hash[2:4]/hash`.
//!
//! "Not found" is not an error for settings or the index — a brand-new
//! archive simply has neither yet — so the sentinel variants below are
//! the caller's signal to fall back to defaults rather than abort.

pub mod local;
#[cfg(feature = "s3")]
pub mod cloud;

use std::io::{Read, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("settings not found")]
    SettingsNotFound,
    #[error("index not found")]
    IndexNotFound,
    #[error("backup file not found: {0}")]
    BackupFileNotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "s3")]
    #[error("object store error: {0}")]
    ObjectStore(String),
}

/// A write handle for settings or the index. Callers MUST call
/// [`StorageWriter::finish`] when done — for the cloud backend this is the
/// point at which the spooled bytes actually get uploaded, mirroring the
/// original's piped-writer-whose-close-joins-the-upload-task design.
pub trait StorageWriter: Write + Send {
    fn finish(self: Box<Self>) -> Result<(), StorageError>;
}

pub trait StorageProvider: Send + Sync {
    fn read_settings(&self) -> Result<Box<dyn Read + Send>, StorageError>;
    fn write_settings(&self) -> Result<Box<dyn StorageWriter>, StorageError>;
    fn delete_settings(&self) -> Result<(), StorageError>;

    fn read_index(&self) -> Result<Box<dyn Read + Send>, StorageError>;
    fn write_index(&self) -> Result<Box<dyn StorageWriter>, StorageError>;
    fn delete_index(&self) -> Result<(), StorageError>;

    fn read_backup_file(&self, hash: &str) -> Result<Box<dyn Read + Send>, StorageError>;
    fn write_backup_file(&self, hash: &str, data: &mut dyn Read) -> Result<(), StorageError>;
    fn delete_backup_file(&self, hash: &str) -> Result<(), StorageError>;
}

/// `hash[0:2]/hash[2:4]/hash` — the relative path under which a backup
/// object for `hash` is stored, regardless of backend.
pub fn object_rel_path(hash: &str) -> String {
    debug_assert!(hash.len() >= 4, "content hash too short: {hash}");
    format!("{}/{}/{}", &hash[0..2], &hash[2..4], hash)
}
