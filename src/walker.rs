//! Recursive directory walk producing [`Entry`] values relative to a root.
//!
//! The original (`inspection/finder.go`) hand-rolls its own recursive
//! `os.ReadDir` traversal with a `Visitor` interface (`VisitDir`/`VisitFile`);
//! this crate gets the same relative-path, skip-directories behavior for
//! free from `walkdir`, which both other CLI-shaped repos in the example
//! pack already depend on.

use std::path::Path;

use walkdir::WalkDir;

use crate::entry::{Entry, EntryMetadata};

/// Walks `root` depth-first, yielding one [`Entry`] per regular file found.
/// Directories are descended into but never yielded themselves. Symlinks and
/// other non-regular files are skipped with a warning rather than followed —
/// the original's `os.FileInfo`-based walk only ever sees plain directory
/// entries and never special files, so this mirrors that by construction.
pub fn walk(root: &Path, mut visit: impl FnMut(Entry)) {
    for result in WalkDir::new(root).follow_links(false) {
        let entry = match result {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(error = %e, "failed to read directory entry during walk");
                continue;
            }
        };

        if entry.depth() == 0 {
            // The root itself; nothing to visit.
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            tracing::warn!(path = %entry.path().display(), "skipping non-regular file");
            continue;
        }

        let rel_path = match entry.path().strip_prefix(root) {
            Ok(p) => p,
            Err(_) => {
                tracing::error!(path = %entry.path().display(), "entry is not under walk root");
                continue;
            }
        };
        let rel_path = to_posix_string(rel_path);

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(path = %rel_path, error = %e, "couldn't stat file");
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(path = %rel_path, error = %e, "couldn't read mtime");
                continue;
            }
        };

        visit(Entry {
            rel_path,
            metadata: EntryMetadata::from_system_time(modified),
        });
    }
}

/// Converts a walked relative path to the POSIX, forward-slash form that is
/// the entry's stable cross-run, cross-platform identity.
fn to_posix_string(rel_path: &Path) -> String {
    rel_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
