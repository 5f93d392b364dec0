//! Destination tree synchronization.

use crate::diff::{Change, CompareMode, DiffEntry, diff};
use crate::error::{Error, Result};
use crate::scan::{TreeSnapshot, prune_nested_packages, scan};
use filetime::FileTime;
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Delay before re-checking a path that should have been removed.
///
/// Some platforms keep a just-deleted file visible in a transient pending
/// delete state while another process still holds it open.
const REMOVAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Cooperative cancellation signal, checked between mirror phases.
///
/// Cancellation is never observed mid-phase: a half-applied phase would
/// leave the destination in a state the next phase assumes did not happen.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One item that could not be applied, and why.
#[derive(Debug)]
pub struct SkippedItem {
    pub rel_path: String,
    pub reason: String,
}

/// Summary of one mirror invocation.
#[derive(Debug, Default)]
pub struct MirrorReport {
    /// Entries created or overwritten in the destination.
    pub copied: usize,
    /// Entries removed from the destination.
    pub removed: usize,
    /// Per-item failures. Mirroring is best-effort: one bad item never
    /// aborts the rest of its phase. Callers report these as warnings.
    pub skipped: Vec<SkippedItem>,
}

/// Make the destination tree an exact structural and content copy of the
/// source tree for every path named in `entries`.
///
/// Applies four strict phases, each internally parallel over disjoint
/// paths:
///
/// 1. Recursively remove every `TypeChanged` destination entry, so nothing
///    is ever written over an entry of the wrong kind.
/// 2. Copy `Added` and `ContentChanged` entries from source, preserving
///    source mtimes so the next diff can take the size+mtime fast path.
/// 3. Re-materialize `TypeChanged` entries at their new kind.
/// 4. Remove `Removed` entries. A path that is already gone counts as
///    removed, which is what makes whole-subtree removals compose with the
///    per-child entries beneath them.
///
/// Per-item failures are logged and collected into the report; see
/// [`MirrorReport::skipped`]. Concurrent mirrors into the same destination
/// are not supported and must be serialized by the caller.
pub fn mirror(dest_root: &Path, source_root: &Path, entries: &[DiffEntry]) -> Result<MirrorReport> {
    mirror_cancellable(dest_root, source_root, entries, &CancelToken::new())
}

/// [`mirror`] with a cancellation token checked between phases.
pub fn mirror_cancellable(
    dest_root: &Path,
    source_root: &Path,
    entries: &[DiffEntry],
    cancel: &CancelToken,
) -> Result<MirrorReport> {
    let mut added_or_changed: Vec<&str> = Vec::new();
    let mut retyped: Vec<&str> = Vec::new();
    let mut removed: Vec<&str> = Vec::new();

    for entry in entries {
        match entry.change {
            Change::Added | Change::ContentChanged => added_or_changed.push(&entry.rel_path),
            Change::TypeChanged => retyped.push(&entry.rel_path),
            Change::Removed => removed.push(&entry.rel_path),
            Change::Unchanged => {}
        }
    }

    let report = Mutex::new(MirrorReport::default());
    let copied = AtomicUsize::new(0);
    let deleted = AtomicUsize::new(0);

    // Phase 1: clear type-changed entries before anything is written.
    run_phase(&retyped, &report, |rel| {
        remove_existing(&dest_root.join(rel))?;
        Ok(())
    });

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    // Phase 2: create and overwrite.
    run_phase(&added_or_changed, &report, |rel| {
        copy_entry(source_root, dest_root, rel)?;
        copied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    // Phase 3: re-materialize type-changed entries at their new kind.
    run_phase(&retyped, &report, |rel| {
        copy_entry(source_root, dest_root, rel)?;
        copied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    // Phase 4: remove entries gone from the source.
    run_phase(&removed, &report, |rel| {
        remove_existing(&dest_root.join(rel))?;
        deleted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });

    let mut report = report.into_inner().unwrap_or_else(PoisonError::into_inner);
    report.copied = copied.into_inner();
    report.removed = deleted.into_inner();
    Ok(report)
}

/// Scan the destination, diff it against an already-scanned source, and
/// mirror the result.
///
/// The destination is scanned fresh on every call; only the source side is
/// expected to come from a [`crate::ScanCache`] when one artifact is pushed
/// into many destinations.
pub fn sync_tree(
    dest_root: &Path,
    source: &TreeSnapshot,
    mode: CompareMode,
) -> Result<MirrorReport> {
    let dest = scan(dest_root, &prune_nested_packages)?;
    let entries = diff(source, &dest, mode)?;
    mirror(dest_root, source.root(), &entries)
}

/// Apply one operation to every path of a phase, in parallel, collecting
/// failures instead of propagating them.
fn run_phase<F>(paths: &[&str], report: &Mutex<MirrorReport>, op: F)
where
    F: Fn(&str) -> Result<()> + Sync,
{
    paths.par_iter().for_each(|rel| {
        if let Err(err) = op(rel) {
            tracing::warn!(path = %rel, error = %err, "skipping item");
            report
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .skipped
                .push(SkippedItem {
                    rel_path: rel.to_string(),
                    reason: err.to_string(),
                });
        }
    });
}

/// Copy one entry from source to destination at the same relative path.
fn copy_entry(source_root: &Path, dest_root: &Path, rel: &str) -> Result<()> {
    let src = source_root.join(rel);
    let dst = dest_root.join(rel);

    let meta = fs::symlink_metadata(&src).map_err(|e| Error::unreadable_file(&src, e))?;

    if meta.is_symlink() {
        let target = fs::read_link(&src)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        make_symlink(&target, &dst)?;
    } else if meta.is_dir() {
        fs::create_dir_all(&dst)?;
    } else {
        copy_file_preserving(&src, &dst)?;
    }

    Ok(())
}

/// Copy a regular file, creating parent directories and carrying over the
/// source's modification time.
///
/// Preserving the mtime is what keeps the size+mtime fast path valid on the
/// next diff; a plain copy would force every later sync to re-hash.
pub(crate) fn copy_file_preserving(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    let meta = fs::metadata(src).map_err(|e| Error::unreadable_file(src, e))?;
    fs::copy(src, dst).map_err(|e| Error::unreadable_file(src, e))?;
    filetime::set_file_mtime(dst, FileTime::from_system_time(meta.modified()?))?;

    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)?;
    } else {
        std::os::windows::fs::symlink_file(target, link)?;
    }
    Ok(())
}

/// Remove a path of any kind, treating "already gone" as success.
///
/// The removal is re-verified and retried once after a short delay before
/// being reported, so a transient pending-delete state does not count as a
/// failure.
fn remove_existing(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
        Ok(meta) => meta,
    };

    let outcome = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match outcome {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if path_still_exists(path) {
        std::thread::sleep(REMOVAL_RETRY_DELAY);
        if path_still_exists(path) {
            return Err(Error::stale_removal(path));
        }
    }

    Ok(())
}

/// Whether a path demonstrably still exists.
///
/// A permission error counts as existing: on some platforms a file in the
/// pending-delete state answers EPERM rather than ENOENT.
fn path_still_exists(path: &Path) -> bool {
    match fs::symlink_metadata(path) {
        Ok(_) => true,
        Err(e) => e.kind() != std::io::ErrorKind::NotFound,
    }
}
