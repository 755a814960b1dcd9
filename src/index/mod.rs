//! The archive index: a single-writer actor owning an in-memory
//! `rel_path -> IndexEntry` map, mutated only from its own background
//! thread and reached from the outside only through [`Index`]'s message
//! channel.
//!
//! On-disk record format (gzip-wrapped, then encrypted):
//!
//! ```text
//! record := u32_le body_len || body
//! body   := u16_le relpath_len || relpath bytes (utf-8) || i64_le last_modified
//! ```
//!
//! The stream ends cleanly when a size-prefix read hits EOF with zero bytes
//! consumed; any other truncation mid-record is a malformed index. Entry
//! flags are never persisted — they are this run's bookkeeping only, reset
//! to [`EntryFlags::PRESENT_IN_BACKUP`] for everything freshly loaded from
//! disk, and accumulate [`EntryFlags::PRESENT_IN_LOCAL`] as the current
//! walk encounters each path.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::crypto::{CryptoContext, CryptoError};
use crate::entry::EntryMetadata;
use crate::storage::{StorageError, StorageProvider};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);
/// Defends against a corrupt/garbage length prefix turning into a multi-GiB
/// allocation; no real rel_path record is anywhere near this size.
const MAX_RECORD_LEN: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index could not be decrypted — almost certainly a wrong password")]
    DecryptionFailed,
    #[error("malformed index record")]
    MalformedRecord,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A tiny hand-rolled stand-in for the `bitflags` macro — two flags don't
/// justify a new dependency, and the teacher's own style favors small
/// manual bit-twiddling (see its old block-header flags) over pulling in a
/// crate for it.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $flag:ident = $val:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name($ty);

        impl $name {
            $(pub const $flag: Self = Self($val);)*

            pub fn bits(self) -> $ty { self.0 }
            pub fn from_bits(bits: $ty) -> Self { Self(bits) }
            pub fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }
            pub fn insert(&mut self, other: Self) { self.0 |= other.0; }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
        }
    };
}

bitflags_like! {
    /// In-memory-only bookkeeping flags; never written to disk.
    pub struct EntryFlags: u8 {
        const NONE = 0x0;
        const PRESENT_IN_BACKUP = 0x1;
        const PRESENT_IN_LOCAL = 0x2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub metadata: EntryMetadata,
    pub flags: EntryFlags,
}

enum Message {
    Set {
        rel_path: String,
        metadata: EntryMetadata,
        flags: EntryFlags,
        mark_dirty: bool,
    },
    Get {
        rel_path: String,
        reply: Sender<Option<IndexEntry>>,
    },
    Delete {
        rel_path: String,
    },
    /// List every known (rel_path, entry) pair — used by the clean pipeline
    /// to find backup entries whose local file never resurfaced this run.
    Snapshot {
        reply: Sender<Vec<(String, IndexEntry)>>,
    },
    /// The actor's critical-section primitive. Unlike the other message
    /// types, the actor itself takes the snapshot (it already holds the map)
    /// and hands it back before blocking on `done` — the caller's critical
    /// section runs purely on that local snapshot and never needs to send
    /// the actor another message while it's parked, which would deadlock.
    Sync {
        reply: Sender<Vec<(String, IndexEntry)>>,
        done: Receiver<()>,
    },
    /// Tells the actor to perform a final checkpoint (if dirty) and return.
    /// Explicit rather than relying on every `Sender` clone being dropped,
    /// since `Index` itself is `Clone` and a caller's own handle would
    /// otherwise keep the channel connected forever.
    Close,
}

/// A handle to the index actor. Cloning shares the same background thread
/// and channel; the last handle dropped does **not** close the index —
/// call [`Index::close`] explicitly so the final checkpoint is guaranteed.
#[derive(Clone)]
pub struct Index {
    tx: Sender<Message>,
    closed: Arc<AtomicBool>,
    join: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl Index {
    /// Loads the index from storage (a missing index is not an error — a
    /// brand-new archive simply starts empty) and spawns its actor thread.
    pub fn open(storage: Arc<dyn StorageProvider>, crypto: CryptoContext) -> Result<Self, IndexError> {
        let entries = load_index(storage.as_ref(), &crypto)?;
        let (tx, rx) = bounded(16);
        let join = std::thread::spawn(move || run_actor(rx, storage, crypto, entries));
        Ok(Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            join: Arc::new(std::sync::Mutex::new(Some(join))),
        })
    }

    /// Looks up `rel_path`. As a side effect, if found, marks the entry
    /// `PRESENT_IN_LOCAL` — this is how a walk over the local tree tells the
    /// index "this path still exists locally" without a separate message
    /// type, mirroring the original's `getEntry` behavior exactly.
    pub fn get(&self, rel_path: &str) -> Option<IndexEntry> {
        let (reply_tx, reply_rx) = bounded(0);
        if self
            .tx
            .send(Message::Get {
                rel_path: rel_path.to_string(),
                reply: reply_tx,
            })
            .is_err()
        {
            tracing::warn!(rel_path, "index is closed, ignoring get");
            return None;
        }
        reply_rx.recv().ok().flatten()
    }

    pub fn set(&self, rel_path: impl Into<String>, metadata: EntryMetadata, flags: EntryFlags, mark_dirty: bool) {
        let rel_path = rel_path.into();
        if self
            .tx
            .send(Message::Set {
                rel_path: rel_path.clone(),
                metadata,
                flags,
                mark_dirty,
            })
            .is_err()
        {
            tracing::warn!(rel_path, "index is closed, ignoring set");
        }
    }

    pub fn delete(&self, rel_path: impl Into<String>) {
        let rel_path = rel_path.into();
        if self.tx.send(Message::Delete { rel_path: rel_path.clone() }).is_err() {
            tracing::warn!(rel_path, "index is closed, ignoring delete");
        }
    }

    pub fn snapshot(&self) -> Vec<(String, IndexEntry)> {
        let (reply_tx, reply_rx) = bounded(0);
        if self.tx.send(Message::Snapshot { reply: reply_tx }).is_err() {
            return Vec::new();
        }
        reply_rx.recv().unwrap_or_default()
    }

    /// Runs `critical` against a consistent snapshot of the map, taken while
    /// the actor is guaranteed not to be servicing any other message — the
    /// Rust analogue of the original's `sync(fn)` rendezvous primitive, used
    /// so a walk and a clean pass never race each other's view of
    /// `PRESENT_IN_LOCAL`. The snapshot is handed to `critical` directly
    /// rather than left for it to fetch with a further call back into the
    /// index — the actor is parked waiting on `done` for the duration of
    /// `critical`, so a nested message would never get a reply.
    pub fn sync<T>(&self, critical: impl FnOnce(&[(String, IndexEntry)]) -> T) -> T {
        let (reply_tx, reply_rx) = bounded(0);
        let (done_tx, done_rx) = bounded(0);
        if self.tx.send(Message::Sync { reply: reply_tx, done: done_rx }).is_err() {
            return critical(&[]);
        }
        let snapshot = reply_rx.recv().unwrap_or_default();
        let result = critical(&snapshot);
        let _ = done_tx.send(());
        result
    }

    /// Signals the actor to perform its final checkpoint (if dirty) and
    /// waits for it to exit. Safe to call more than once, including from
    /// cloned handles — only the first call actually sends the signal and
    /// joins; later calls are a no-op.
    pub fn close(&self) -> Result<(), IndexError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.tx.send(Message::Close);
        if let Some(join) = self.join.lock().unwrap().take() {
            join.join().map_err(|_| IndexError::Io(io::Error::new(io::ErrorKind::Other, "index thread panicked")))?;
        }
        Ok(())
    }
}

fn run_actor(
    rx: Receiver<Message>,
    storage: Arc<dyn StorageProvider>,
    crypto: CryptoContext,
    mut entries: HashMap<String, IndexEntry>,
) {
    let mut dirty = false;
    let ticker = crossbeam_channel::tick(MAINTENANCE_INTERVAL);

    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(Message::Set { rel_path, metadata, flags, mark_dirty }) => {
                    entries.insert(rel_path, IndexEntry { metadata, flags });
                    if mark_dirty {
                        dirty = true;
                    }
                }
                Ok(Message::Get { rel_path, reply }) => {
                    let found = entries.get_mut(&rel_path).map(|e| {
                        e.flags.insert(EntryFlags::PRESENT_IN_LOCAL);
                        *e
                    });
                    let _ = reply.send(found);
                }
                Ok(Message::Delete { rel_path }) => {
                    if entries.remove(&rel_path).is_some() {
                        dirty = true;
                    }
                }
                Ok(Message::Snapshot { reply }) => {
                    let snap = entries.iter().map(|(k, v)| (k.clone(), *v)).collect();
                    let _ = reply.send(snap);
                }
                Ok(Message::Sync { reply, done }) => {
                    let snap = entries.iter().map(|(k, v)| (k.clone(), *v)).collect();
                    let _ = reply.send(snap);
                    let _ = done.recv();
                }
                Ok(Message::Close) => break,
                Err(_) => break,
            },
            recv(ticker) -> _ => {
                if dirty {
                    match write_index(storage.as_ref(), &crypto, &entries) {
                        Ok(()) => tracing::debug!("maintenance checkpoint wrote index"),
                        Err(e) => tracing::error!(error = %e, "maintenance checkpoint failed"),
                    }
                    // Deliberately not cleared: see DESIGN.md's Open Questions.
                }
            }
        }
    }

    if dirty {
        if let Err(e) = write_index(storage.as_ref(), &crypto, &entries) {
            tracing::error!(error = %e, "final index checkpoint failed");
        }
    }
}

fn load_index(storage: &dyn StorageProvider, crypto: &CryptoContext) -> Result<HashMap<String, IndexEntry>, IndexError> {
    let reader = match storage.read_index() {
        Ok(r) => r,
        Err(StorageError::IndexNotFound) => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let crypto_reader = crypto.reader(reader)?;
    let mut gz = GzDecoder::new(crypto_reader);
    let mut entries = HashMap::new();
    loop {
        match read_record(&mut gz) {
            Ok(Some((rel_path, last_modified))) => {
                entries.insert(
                    rel_path,
                    IndexEntry {
                        metadata: EntryMetadata { last_modified },
                        flags: EntryFlags::PRESENT_IN_BACKUP,
                    },
                );
            }
            Ok(None) => break,
            Err(IndexError::MalformedRecord) => return Err(IndexError::MalformedRecord),
            Err(e) => return Err(e),
        }
    }
    Ok(entries)
}

fn write_index(storage: &dyn StorageProvider, crypto: &CryptoContext, entries: &HashMap<String, IndexEntry>) -> Result<(), IndexError> {
    let writer = storage.write_index()?;
    let crypto_writer = crypto.writer(writer)?;
    let mut gz = GzEncoder::new(crypto_writer, Compression::default());
    for (rel_path, entry) in entries {
        write_record(&mut gz, rel_path, entry.metadata.last_modified)?;
    }
    let crypto_writer = gz.finish()?;
    crypto_writer.into_inner().finish()?;
    Ok(())
}

/// Reads one size-prefixed record. `Ok(None)` means the stream ended
/// cleanly right at a size-prefix boundary; any other short read is a
/// malformed index, since the gzip layer having decoded at all means the
/// password was right.
fn read_record(r: &mut impl Read) -> Result<Option<(String, i64)>, IndexError> {
    let mut len_buf = [0u8; 4];
    if !read_or_clean_eof(r, &mut len_buf).map_err(|_| IndexError::DecryptionFailed)? {
        return Ok(None);
    }
    let body_len = u32::from_le_bytes(len_buf) as usize;
    if body_len < 10 || body_len > MAX_RECORD_LEN {
        return Err(IndexError::MalformedRecord);
    }
    let mut body = vec![0u8; body_len];
    r.read_exact(&mut body).map_err(|_| IndexError::MalformedRecord)?;

    let mut cursor = &body[..];
    let relpath_len = cursor.read_u16::<LittleEndian>().map_err(|_| IndexError::MalformedRecord)? as usize;
    if cursor.len() < relpath_len + 8 {
        return Err(IndexError::MalformedRecord);
    }
    let rel_path = String::from_utf8(cursor[..relpath_len].to_vec()).map_err(|_| IndexError::MalformedRecord)?;
    cursor = &cursor[relpath_len..];
    let last_modified = cursor.read_i64::<LittleEndian>().map_err(|_| IndexError::MalformedRecord)?;

    Ok(Some((rel_path, last_modified)))
}

fn write_record(w: &mut impl Write, rel_path: &str, last_modified: i64) -> io::Result<()> {
    let relpath_bytes = rel_path.as_bytes();
    let body_len = 2 + relpath_bytes.len() + 8;
    w.write_u32::<LittleEndian>(body_len as u32)?;
    w.write_u16::<LittleEndian>(relpath_bytes.len() as u16)?;
    w.write_all(relpath_bytes)?;
    w.write_i64::<LittleEndian>(last_modified)?;
    Ok(())
}

/// Returns `Ok(true)` if `buf` was filled completely, `Ok(false)` if the
/// stream ended with zero bytes read (a clean stop), or an error if it
/// ended partway through `buf` (truncated).
fn read_or_clean_eof(r: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut read_total = 0;
    while read_total < buf.len() {
        match r.read(&mut buf[read_total..]) {
            Ok(0) if read_total == 0 => return Ok(false),
            Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated record")),
            Ok(n) => read_total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_salt, CryptoContext};
    use crate::storage::local::LocalFilesystemProvider;

    fn open_test_index(dir: &std::path::Path) -> (Index, Arc<dyn StorageProvider>, CryptoContext) {
        let storage: Arc<dyn StorageProvider> = Arc::new(LocalFilesystemProvider::new(dir).unwrap());
        let crypto = CryptoContext::new("correct horse battery staple", generate_salt());
        let index = Index::open(storage.clone(), crypto.clone()).unwrap();
        (index, storage, crypto)
    }

    #[test]
    fn set_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _storage, _crypto) = open_test_index(dir.path());

        assert!(index.get("a.txt").is_none());
        index.set("a.txt", EntryMetadata { last_modified: 100 }, EntryFlags::PRESENT_IN_BACKUP, true);
        let entry = index.get("a.txt").expect("just set");
        assert_eq!(entry.metadata.last_modified, 100);
        assert!(entry.flags.contains(EntryFlags::PRESENT_IN_LOCAL), "get() should mark present-in-local");

        index.delete("a.txt");
        assert!(index.get("a.txt").is_none());
        index.close().unwrap();
    }

    #[test]
    fn persists_across_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (index, storage, crypto) = open_test_index(dir.path());
        index.set("keep.txt", EntryMetadata { last_modified: 42 }, EntryFlags::PRESENT_IN_BACKUP, true);
        index.close().unwrap();

        let reopened = Index::open(storage, crypto).unwrap();
        let entry = reopened.get("keep.txt").expect("should survive reopen");
        assert_eq!(entry.metadata.last_modified, 42);
        reopened.close().unwrap();
    }

    #[test]
    fn sync_runs_critical_section_without_racing_the_actor() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _storage, _crypto) = open_test_index(dir.path());
        index.set("x.txt", EntryMetadata { last_modified: 1 }, EntryFlags::PRESENT_IN_BACKUP, true);
        let snapshot_len = index.sync(|snapshot| snapshot.len());
        assert_eq!(snapshot_len, 1);
        index.close().unwrap();
    }
}
