//! Shared entry types used by the walker, the index, and the archive.

use std::time::{SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};

/// Everything about an entry that matters for the incremental-backup
/// decision: just its modification time, as whole seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryMetadata {
    pub last_modified: i64,
}

impl EntryMetadata {
    pub fn from_system_time(t: SystemTime) -> Self {
        let secs = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self { last_modified: secs }
    }
}

/// A file discovered while walking the local tree, relative to the
/// archive's root.
#[derive(Debug, Clone)]
pub struct Entry {
    pub rel_path: String,
    pub metadata: EntryMetadata,
}

impl Entry {
    pub fn hash(&self) -> String {
        hash_rel_path(&self.rel_path)
    }
}

/// `hex(sha1(rel_path))` — the content address for a path. Two files with
/// identical relative paths always map to the same backup object, so a
/// changed file simply overwrites its predecessor's object on the next
/// backup.
pub fn hash_rel_path(rel_path: &str) -> String {
    let digest = Sha1::digest(rel_path.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_rel_path("docs/readme.md"), hash_rel_path("docs/readme.md"));
    }

    #[test]
    fn hash_differs_by_path() {
        assert_ne!(hash_rel_path("a.txt"), hash_rel_path("b.txt"));
    }

    #[test]
    fn known_hash_matches_reference_sha1() {
        // sha1("hello") = aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d
        assert_eq!(hash_rel_path("hello"), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }
}
