//! Directory tree scanning.

use crate::error::{Error, Result};
use crate::hash::Hash;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

/// Directory name treated as a nested-dependency boundary.
///
/// Directories with this base name are opaque to the engine: they are never
/// descended into and never appear in snapshots.
pub const NESTED_PACKAGE_DIR: &str = "node_modules";

/// Filesystem kind of a scanned entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// A symbolic link (recorded, not followed).
    Symlink,
}

/// One entry discovered by a scan.
///
/// The relative path always uses forward-slash separators, regardless of
/// platform. `size` is meaningful for regular files only.
#[derive(Debug)]
pub struct FileSystemItem {
    rel_path: String,
    kind: ItemKind,
    size: u64,
    mtime: SystemTime,
    hash: OnceLock<Hash>,
}

impl FileSystemItem {
    /// Path relative to the scan root, with forward-slash separators.
    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    /// Filesystem kind of this entry.
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Size in bytes (files only).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Modification time as recorded by the scan.
    pub fn mtime(&self) -> SystemTime {
        self.mtime
    }

    /// Content hash salted with the relative path.
    ///
    /// Computed on first use and memoized for the lifetime of the item, so
    /// repeated diffs against the same snapshot hash each file at most once.
    pub fn content_hash(&self, root: &Path) -> Result<Hash> {
        if let Some(hash) = self.hash.get() {
            return Ok(*hash);
        }
        let hash = Hash::hash_file_salted(&root.join(&self.rel_path), &self.rel_path)?;
        let _ = self.hash.set(hash);
        Ok(hash)
    }
}

/// The ordered set of items produced by one scan of one root.
///
/// Relative paths are unique within a snapshot. A directory and every one of
/// its descendants are separate items.
#[derive(Debug)]
pub struct TreeSnapshot {
    root: PathBuf,
    items: BTreeMap<String, FileSystemItem>,
}

impl TreeSnapshot {
    /// The root this snapshot was scanned from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Iterate items in deterministic (path-sorted) order.
    pub fn items(&self) -> impl Iterator<Item = &FileSystemItem> {
        self.items.values()
    }

    /// Look up an item by relative path.
    pub fn get(&self, rel_path: &str) -> Option<&FileSystemItem> {
        self.items.get(rel_path)
    }

    /// Whether the snapshot contains the given relative path.
    pub fn contains(&self, rel_path: &str) -> bool {
        self.items.contains_key(rel_path)
    }

    /// Number of items in the snapshot.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the snapshot holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Default prune predicate: skip nested dependency directories at any depth.
pub fn prune_nested_packages(rel_path: &str, kind: ItemKind) -> bool {
    kind == ItemKind::Dir
        && rel_path
            .rsplit('/')
            .next()
            .is_some_and(|base| base == NESTED_PACKAGE_DIR)
}

/// Scan a directory tree into a [`TreeSnapshot`].
///
/// `prune` is evaluated for every discovered entry; a true result excludes
/// the entry, and for directories everything beneath it, from the snapshot.
/// Symlinks are recorded as [`ItemKind::Symlink`] and never followed.
///
/// A non-existent root scans to an empty snapshot rather than an error,
/// which is what allows a first-time materialization to be expressed as a
/// diff against "nothing yet". A root that exists but is not a directory is
/// a fatal [`Error::NotADirectory`].
pub fn scan(root: &Path, prune: &(dyn Fn(&str, ItemKind) -> bool + Sync)) -> Result<TreeSnapshot> {
    let mut items = BTreeMap::new();

    match std::fs::symlink_metadata(root) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(TreeSnapshot {
                root: root.to_path_buf(),
                items,
            });
        }
        Err(e) => return Err(e.into()),
        Ok(meta) if !meta.is_dir() => return Err(Error::not_a_directory(root)),
        Ok(_) => {}
    }

    scan_level(root, "", prune, &mut items)?;

    Ok(TreeSnapshot {
        root: root.to_path_buf(),
        items,
    })
}

/// List one directory level and recurse into unpruned subdirectories.
fn scan_level(
    dir: &Path,
    prefix: &str,
    prune: &(dyn Fn(&str, ItemKind) -> bool + Sync),
    items: &mut BTreeMap<String, FileSystemItem>,
) -> Result<()> {
    let walker = ignore::WalkBuilder::new(dir)
        .max_depth(Some(1)) // Only immediate children
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .follow_links(false)
        .build();

    for entry in walker {
        let entry = entry?;
        let path = entry.path();

        // Skip the directory itself
        if path == dir {
            continue;
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::non_unicode_name(path))?;
        let rel_path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };

        let meta = std::fs::symlink_metadata(path)?;
        let kind = if meta.is_symlink() {
            ItemKind::Symlink
        } else if meta.is_dir() {
            ItemKind::Dir
        } else {
            ItemKind::File
        };

        if prune(&rel_path, kind) {
            continue;
        }

        items.insert(
            rel_path.clone(),
            FileSystemItem {
                rel_path: rel_path.clone(),
                kind,
                size: meta.len(),
                mtime: meta.modified()?,
                hash: OnceLock::new(),
            },
        );

        if kind == ItemKind::Dir {
            scan_level(path, &rel_path, prune, items)?;
        }
    }

    Ok(())
}
