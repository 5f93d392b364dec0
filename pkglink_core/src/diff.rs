//! Tree diffing: classify every path in two snapshots.

use crate::error::{Error, Result};
use crate::scan::{FileSystemItem, ItemKind, TreeSnapshot};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Files at or below this size are compared byte-for-byte instead of hashed.
const SMALL_FILE_BYTES: u64 = 64 * 1024;

/// Classification of one relative path across two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Present in source only.
    Added,
    /// Present in destination only.
    Removed,
    /// Same kind on both sides, file content differs.
    ContentChanged,
    /// Kind differs, or a symlink's target differs. Repair requires
    /// remove-and-recreate, never an in-place edit.
    TypeChanged,
    /// No work needed for this path.
    Unchanged,
}

/// One diff result: a relative path and its classification.
#[derive(Debug, Clone)]
pub struct DiffEntry {
    pub rel_path: String,
    pub change: Change,
}

/// How file content equality is decided.
///
/// The fast path assumes equal size and mtime mean equal content. Some
/// filesystems truncate mtimes to one-second resolution, so a same-second
/// edit can be misclassified as unchanged; that window is an accepted
/// tradeoff of [`CompareMode::Fast`], not a bug. Callers that cannot accept
/// it use [`CompareMode::Content`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompareMode {
    /// Treat equal size and mtime as unchanged without reading content.
    #[default]
    Fast,

    /// Always verify by content, ignoring the size+mtime shortcut.
    Content,
}

/// Diff two snapshots.
///
/// Pure with respect to the snapshots: nothing is mutated, and the result
/// contains exactly one entry per distinct relative path appearing in
/// either snapshot, in deterministic order (source paths sorted, then
/// destination-only paths sorted). Per-path comparisons run on the rayon
/// pool and are all joined before returning.
pub fn diff(
    source: &TreeSnapshot,
    dest: &TreeSnapshot,
    mode: CompareMode,
) -> Result<Vec<DiffEntry>> {
    let source_items: Vec<&FileSystemItem> = source.items().collect();

    let mut entries = source_items
        .par_iter()
        .map(|item| {
            let change = match dest.get(item.rel_path()) {
                None => Change::Added,
                Some(existing) => compare_items(source, item, dest, existing, mode)?,
            };
            Ok(DiffEntry {
                rel_path: item.rel_path().to_string(),
                change,
            })
        })
        .collect::<Result<Vec<DiffEntry>>>()?;

    for item in dest.items() {
        if !source.contains(item.rel_path()) {
            entries.push(DiffEntry {
                rel_path: item.rel_path().to_string(),
                change: Change::Removed,
            });
        }
    }

    Ok(entries)
}

/// Compare two items that share a relative path.
fn compare_items(
    source: &TreeSnapshot,
    src: &FileSystemItem,
    dest: &TreeSnapshot,
    dst: &FileSystemItem,
    mode: CompareMode,
) -> Result<Change> {
    match (src.kind(), dst.kind()) {
        // A directory's identity is structural; its children carry their
        // own diff entries.
        (ItemKind::Dir, ItemKind::Dir) => Ok(Change::Unchanged),

        (ItemKind::Symlink, ItemKind::Symlink) => {
            let src_target = resolve_link(source.root(), src.rel_path())?;
            let dst_target = resolve_link(dest.root(), dst.rel_path())?;
            if src_target == dst_target {
                Ok(Change::Unchanged)
            } else {
                Ok(Change::TypeChanged)
            }
        }

        (ItemKind::File, ItemKind::File) => {
            if mode == CompareMode::Fast
                && src.size() == dst.size()
                && src.mtime() == dst.mtime()
            {
                return Ok(Change::Unchanged);
            }
            if same_content(source, src, dest, dst)? {
                Ok(Change::Unchanged)
            } else {
                Ok(Change::ContentChanged)
            }
        }

        // Mismatched kinds: no content comparison attempted.
        _ => Ok(Change::TypeChanged),
    }
}

/// Resolve a symlink to an absolute real path, falling back to the raw link
/// text when the target cannot be resolved (dangling link).
fn resolve_link(root: &Path, rel_path: &str) -> Result<PathBuf> {
    let link = root.join(rel_path);
    match std::fs::canonicalize(&link) {
        Ok(real) => Ok(real),
        Err(_) => Ok(std::fs::read_link(&link)?),
    }
}

/// Decide content equality for two regular files.
fn same_content(
    source: &TreeSnapshot,
    src: &FileSystemItem,
    dest: &TreeSnapshot,
    dst: &FileSystemItem,
) -> Result<bool> {
    if src.size() != dst.size() {
        return Ok(false);
    }

    if src.size() <= SMALL_FILE_BYTES {
        let src_path = source.root().join(src.rel_path());
        let dst_path = dest.root().join(dst.rel_path());
        let src_bytes =
            std::fs::read(&src_path).map_err(|e| Error::unreadable_file(&src_path, e))?;
        let dst_bytes =
            std::fs::read(&dst_path).map_err(|e| Error::unreadable_file(&dst_path, e))?;
        return Ok(src_bytes == dst_bytes);
    }

    Ok(src.content_hash(source.root())? == dst.content_hash(dest.root())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{prune_nested_packages, scan};
    use filetime::FileTime;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn snap(root: &Path) -> TreeSnapshot {
        scan(root, &prune_nested_packages).unwrap()
    }

    fn changes(entries: &[DiffEntry]) -> BTreeMap<String, Change> {
        entries
            .iter()
            .map(|e| (e.rel_path.clone(), e.change))
            .collect()
    }

    fn copy_mtime(from: &Path, to: &Path) {
        let mtime = FileTime::from_last_modification_time(&fs::metadata(from).unwrap());
        filetime::set_file_mtime(to, mtime).unwrap();
    }

    #[test]
    fn test_diff_against_empty_destination() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("a.txt"), b"x").unwrap();
        fs::create_dir(src.path().join("dir")).unwrap();
        fs::write(src.path().join("dir/b.txt"), b"y").unwrap();

        let entries = diff(&snap(src.path()), &snap(dst.path()), CompareMode::Fast).unwrap();
        let map = changes(&entries);

        assert_eq!(map["a.txt"], Change::Added);
        assert_eq!(map["dir"], Change::Added);
        assert_eq!(map["dir/b.txt"], Change::Added);
    }

    #[test]
    fn test_diff_removed() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(dst.path().join("old.txt"), b"x").unwrap();

        let entries = diff(&snap(src.path()), &snap(dst.path()), CompareMode::Fast).unwrap();
        let map = changes(&entries);

        assert_eq!(map["old.txt"], Change::Removed);
    }

    #[test]
    fn test_diff_content_changed() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("f.txt"), b"new contents").unwrap();
        fs::write(dst.path().join("f.txt"), b"old").unwrap();

        let entries = diff(&snap(src.path()), &snap(dst.path()), CompareMode::Fast).unwrap();
        assert_eq!(changes(&entries)["f.txt"], Change::ContentChanged);
    }

    #[test]
    fn test_diff_equal_content_different_mtime_is_unchanged() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("f.txt"), b"same").unwrap();
        fs::write(dst.path().join("f.txt"), b"same").unwrap();
        filetime::set_file_mtime(
            dst.path().join("f.txt"),
            FileTime::from_unix_time(1_600_000_000, 0),
        )
        .unwrap();

        let entries = diff(&snap(src.path()), &snap(dst.path()), CompareMode::Fast).unwrap();
        assert_eq!(changes(&entries)["f.txt"], Change::Unchanged);
    }

    #[test]
    fn test_fast_path_skips_content_read() {
        // Same size, same mtime, different bytes: the fast path reports
        // Unchanged without reading either file. This is the documented
        // contract of CompareMode::Fast, asserted here on purpose.
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("f.txt"), b"aaaa").unwrap();
        fs::write(dst.path().join("f.txt"), b"bbbb").unwrap();
        copy_mtime(&src.path().join("f.txt"), &dst.path().join("f.txt"));

        let entries = diff(&snap(src.path()), &snap(dst.path()), CompareMode::Fast).unwrap();
        assert_eq!(changes(&entries)["f.txt"], Change::Unchanged);

        // Content mode sees through the identical stats.
        let entries = diff(&snap(src.path()), &snap(dst.path()), CompareMode::Content).unwrap();
        assert_eq!(changes(&entries)["f.txt"], Change::ContentChanged);
    }

    #[test]
    fn test_diff_type_changed_file_vs_dir() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir(src.path().join("p")).unwrap();
        fs::write(src.path().join("p/inner.txt"), b"x").unwrap();
        fs::write(dst.path().join("p"), b"i am a file").unwrap();

        let entries = diff(&snap(src.path()), &snap(dst.path()), CompareMode::Fast).unwrap();
        let map = changes(&entries);

        assert_eq!(map["p"], Change::TypeChanged);
        assert_eq!(map["p/inner.txt"], Change::Added);
    }

    #[test]
    #[cfg(unix)]
    fn test_diff_symlinks_same_resolved_target_unchanged() {
        let shared = TempDir::new().unwrap();
        fs::write(shared.path().join("target.txt"), b"t").unwrap();
        let target = shared.path().join("target.txt");

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::os::unix::fs::symlink(&target, src.path().join("link")).unwrap();
        std::os::unix::fs::symlink(&target, dst.path().join("link")).unwrap();

        let entries = diff(&snap(src.path()), &snap(dst.path()), CompareMode::Fast).unwrap();
        assert_eq!(changes(&entries)["link"], Change::Unchanged);
    }

    #[test]
    #[cfg(unix)]
    fn test_diff_symlinks_different_target_type_changed() {
        let shared = TempDir::new().unwrap();
        fs::write(shared.path().join("one.txt"), b"1").unwrap();
        fs::write(shared.path().join("two.txt"), b"2").unwrap();

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::os::unix::fs::symlink(shared.path().join("one.txt"), src.path().join("link"))
            .unwrap();
        std::os::unix::fs::symlink(shared.path().join("two.txt"), dst.path().join("link"))
            .unwrap();

        let entries = diff(&snap(src.path()), &snap(dst.path()), CompareMode::Fast).unwrap();
        assert_eq!(changes(&entries)["link"], Change::TypeChanged);
    }

    #[test]
    fn test_diff_both_dirs_unchanged() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir(src.path().join("d")).unwrap();
        fs::create_dir(dst.path().join("d")).unwrap();

        let entries = diff(&snap(src.path()), &snap(dst.path()), CompareMode::Fast).unwrap();
        assert_eq!(changes(&entries)["d"], Change::Unchanged);
    }

    #[test]
    fn test_diff_covers_every_path_once() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("both.txt"), b"x").unwrap();
        fs::write(src.path().join("only-src.txt"), b"x").unwrap();
        fs::write(dst.path().join("both.txt"), b"x").unwrap();
        fs::write(dst.path().join("only-dst.txt"), b"x").unwrap();

        let entries = diff(&snap(src.path()), &snap(dst.path()), CompareMode::Fast).unwrap();
        let mut paths: Vec<_> = entries.iter().map(|e| e.rel_path.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec!["both.txt", "only-dst.txt", "only-src.txt"]);
    }
}
