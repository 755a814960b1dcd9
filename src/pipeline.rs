//! Bounded-channel producer/worker pools for `backup`, `restore`, `clean`,
//! and the additive read-only `status` command.
//!
//! Each of `backup`/`restore`/`clean` follows the same shape as the
//! original's `archivingVisitor.go`/`commandRestore.go`/`deletingVisitor.go`:
//! one producer (a directory walk or an index snapshot walk) feeding a
//! bounded channel of capacity `2 * degree_of_parallelism`, drained by that
//! many worker threads. Workers never abort the run on a single failure —
//! they count it and keep going — matching spec.md §7's "worker errors are
//! counted and logged; they do not propagate" policy.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::bounded;

use crate::archive::Archive;
use crate::entry::Entry;
use crate::walker;

/// Which side of the archive `clean` prunes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanLocation {
    /// Remove backup objects (and index entries) for files no longer present locally.
    Backup,
    /// Remove local files that the archive has no record of.
    Local,
}

/// Per-run outcome counters, printed by the CLI after a pipeline finishes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl PipelineReport {
    fn merge(reports: &[PipelineReport]) -> Self {
        reports.iter().fold(PipelineReport::default(), |acc, r| PipelineReport {
            succeeded: acc.succeeded + r.succeeded,
            failed: acc.failed + r.failed,
        })
    }
}

/// A read-only snapshot of archive/local drift, computed by the `status`
/// command without mutating anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusReport {
    pub to_backup: usize,
    pub to_restore: usize,
    pub in_sync: usize,
}

/// Runs the backup pipeline: walk `root`, enqueue every entry
/// `archive.needs_backup` flags, drain with `parallelism` workers.
/// `stop` is polled between walked entries so a cooperative shutdown signal
/// (e.g. Ctrl-C) stops the producer promptly without abandoning in-flight
/// uploads.
pub fn backup(archive: &Archive, root: &Path, parallelism: usize, stop: Arc<AtomicBool>) -> PipelineReport {
    let (tx, rx) = bounded::<Entry>(parallelism * 2);

    std::thread::scope(|scope| {
        let reports: Vec<PipelineReport> = (0..parallelism.max(1))
            .map(|id| {
                let rx = rx.clone();
                scope.spawn(move || worker_backup(id, archive, &rx))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .collect();

        walker::walk(root, |entry| {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            if archive.needs_backup(&entry) && tx.send(entry).is_err() {
                // Channel closed (all workers gone); nothing more to do.
            }
        });
        drop(tx);

        PipelineReport::merge(&reports)
    })
}

fn worker_backup(id: usize, archive: &Archive, rx: &crossbeam_channel::Receiver<Entry>) -> PipelineReport {
    let mut succeeded = 0;
    let mut failed = 0;
    while let Ok(entry) = rx.recv() {
        tracing::debug!(worker = id, rel_path = %entry.rel_path, "backing up");
        match archive.backup(&entry) {
            Ok(()) => {
                succeeded += 1;
                println!("{}", entry.rel_path);
            }
            Err(e) => {
                failed += 1;
                tracing::error!(worker = id, rel_path = %entry.rel_path, error = %e, "backup failed");
            }
        }
    }
    tracing::info!(worker = id, succeeded, failed, "backup worker finished");
    PipelineReport { succeeded, failed }
}

/// Runs the restore pipeline: find every entry present in the backup but
/// absent locally, enqueue it, drain with `parallelism` workers. `stop` is
/// polled between entries, same as `backup`'s walker, so a cooperative
/// shutdown signal stops the producer promptly without abandoning in-flight
/// restores.
pub fn restore(archive: &Archive, root: &Path, parallelism: usize, stop: Arc<AtomicBool>) -> PipelineReport {
    let (tx, rx) = bounded::<Entry>(parallelism * 2);

    std::thread::scope(|scope| {
        let reports: Vec<PipelineReport> = (0..parallelism.max(1))
            .map(|id| {
                let rx = rx.clone();
                scope.spawn(move || worker_restore(id, archive, &rx))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .collect();

        archive.find_locally_missing(|entry| {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            let abs_path = root.join(&entry.rel_path);
            if !abs_path.exists() {
                let _ = tx.send(entry);
            }
        });
        drop(tx);

        PipelineReport::merge(&reports)
    })
}

fn worker_restore(id: usize, archive: &Archive, rx: &crossbeam_channel::Receiver<Entry>) -> PipelineReport {
    let mut succeeded = 0;
    let mut failed = 0;
    while let Ok(entry) = rx.recv() {
        tracing::debug!(worker = id, rel_path = %entry.rel_path, "restoring");
        match archive.restore(&entry) {
            Ok(()) => {
                succeeded += 1;
                println!("{}", entry.rel_path);
            }
            Err(e) => {
                failed += 1;
                tracing::error!(worker = id, rel_path = %entry.rel_path, error = %e, "restore failed");
            }
        }
    }
    tracing::info!(worker = id, succeeded, failed, "restore worker finished");
    PipelineReport { succeeded, failed }
}

/// Runs the clean pipeline for either side (see [`CleanLocation`]). `stop`
/// is threaded through to whichever producer backs the chosen side, same
/// cooperative-shutdown contract as `backup` and `restore`.
pub fn clean(archive: &Archive, root: &Path, location: CleanLocation, parallelism: usize, stop: Arc<AtomicBool>) -> PipelineReport {
    match location {
        CleanLocation::Backup => clean_backup(archive, parallelism, stop),
        CleanLocation::Local => clean_local(archive, root, parallelism, stop),
    }
}

/// Removes backup objects (and their index entries) for anything the
/// current walk never observed locally. Producer is an index snapshot, not
/// a directory walk — mirrors `find_locally_missing`'s use in restore, but
/// here the worker deletes instead of recreating.
fn clean_backup(archive: &Archive, parallelism: usize, stop: Arc<AtomicBool>) -> PipelineReport {
    let (tx, rx) = bounded::<Entry>(parallelism * 2);

    std::thread::scope(|scope| {
        let reports: Vec<PipelineReport> = (0..parallelism.max(1))
            .map(|id| {
                let rx = rx.clone();
                scope.spawn(move || worker_clean_backup(id, archive, &rx))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .collect();

        archive.find_locally_missing(|entry| {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(entry);
        });
        drop(tx);

        PipelineReport::merge(&reports)
    })
}

fn worker_clean_backup(id: usize, archive: &Archive, rx: &crossbeam_channel::Receiver<Entry>) -> PipelineReport {
    let mut succeeded = 0;
    let mut failed = 0;
    while let Ok(entry) = rx.recv() {
        tracing::debug!(worker = id, rel_path = %entry.rel_path, "removing from backup");
        match archive.delete(&entry) {
            Ok(()) => {
                succeeded += 1;
                println!("{}", entry.rel_path);
            }
            Err(e) => {
                failed += 1;
                tracing::error!(worker = id, rel_path = %entry.rel_path, error = %e, "delete failed");
            }
        }
    }
    tracing::info!(worker = id, succeeded, failed, "clean-backup worker finished");
    PipelineReport { succeeded, failed }
}

/// Removes local files the archive has never indexed at all — the original
/// `deletingVisitor.go`'s behavior (`GetEntry(relPath) == nil` means
/// delete-from-local), ported onto a walk + bounded channel like the other
/// pipelines rather than a direct synchronous visitor.
fn clean_local(archive: &Archive, root: &Path, parallelism: usize, stop: Arc<AtomicBool>) -> PipelineReport {
    let (tx, rx) = bounded::<Entry>(parallelism * 2);
    let root = root.to_path_buf();

    std::thread::scope(|scope| {
        let reports: Vec<PipelineReport> = (0..parallelism.max(1))
            .map(|id| {
                let rx = rx.clone();
                let root = root.clone();
                scope.spawn(move || worker_clean_local(id, &root, &rx))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .collect();

        walker::walk(&root, |entry| {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            if !archive.is_indexed(&entry.rel_path) {
                let _ = tx.send(entry);
            }
        });
        drop(tx);

        PipelineReport::merge(&reports)
    })
}

fn worker_clean_local(id: usize, root: &Path, rx: &crossbeam_channel::Receiver<Entry>) -> PipelineReport {
    let mut succeeded = 0;
    let mut failed = 0;
    while let Ok(entry) = rx.recv() {
        let abs_path = root.join(&entry.rel_path);
        tracing::debug!(worker = id, rel_path = %entry.rel_path, "removing untracked local file");
        match std::fs::remove_file(&abs_path) {
            Ok(()) => {
                succeeded += 1;
                println!("{}", entry.rel_path);
            }
            Err(e) => {
                failed += 1;
                tracing::error!(worker = id, rel_path = %entry.rel_path, error = %e, "local delete failed");
            }
        }
    }
    tracing::info!(worker = id, succeeded, failed, "clean-local worker finished");
    PipelineReport { succeeded, failed }
}

/// Single-threaded, read-only: counts how many local files still need
/// backing up, how many backup-only entries could be restored, and how many
/// are already in sync. Does not mutate the archive or local tree.
pub fn status(archive: &Archive, root: &Path) -> StatusReport {
    let mut report = StatusReport::default();

    walker::walk(root, |entry| {
        if archive.needs_backup(&entry) {
            report.to_backup += 1;
        } else {
            report.in_sync += 1;
        }
    });

    archive.find_locally_missing(|_| {
        report.to_restore += 1;
    });

    report
}
