//! # coffer — encrypted, incremental, content-addressed file-tree backup
//!
//! Guarantees held across the whole engine:
//! - Every on-wire object (settings, index, backup files) is encrypted with
//!   the same password-derived AES-256-OFB envelope; a cleartext random IV
//!   prefixes each stream (see [`crypto`])
//! - The index map has exactly one writer: its own background actor thread,
//!   reached only through [`index::Index`]'s message channel
//! - A backup object's name is always `hex(sha1(rel_path))` split into a
//!   two-level directory prefix, stable across platforms and runs
//! - `backup` only updates the index after the upload it describes has
//!   actually succeeded; a crash mid-upload leaves the index unchanged
//! - The [`storage`] trait is the only extension point for new backends —
//!   everything above it is backend-agnostic

pub mod archive;
pub mod crypto;
pub mod entry;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod settings;
pub mod storage;
pub mod walker;

// Flat re-exports for the most common types.
pub use archive::{Archive, ArchiveError};
pub use crypto::{CryptoContext, CryptoError};
pub use entry::{Entry, EntryMetadata};
pub use index::{EntryFlags, Index, IndexEntry, IndexError};
pub use settings::{Settings, SettingsError};
pub use storage::{StorageError, StorageProvider};
