//! Process-lifetime scan memoization.

use crate::error::Result;
use crate::scan::{TreeSnapshot, prune_nested_packages, scan};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Memoizes source-side scans across repeated synchronization calls within
/// one process run.
///
/// When the same store artifact is mirrored into many destinations in a
/// single invocation, the source scan and its per-file hashes are paid once
/// and shared; destinations are always scanned fresh by the synchronizer.
///
/// The cache is an explicit object, never a hidden global: create one per
/// invocation and pass it to the call sites that want cross-call reuse.
/// Entries live for the lifetime of the cache and are never invalidated, so
/// a second lookup of a root that changed on disk in the meantime is not
/// guaranteed to see the change. That staleness is the accepted price of
/// scanning once per run; rescan with [`scan`] directly when freshness
/// matters more than speed.
#[derive(Debug, Default)]
pub struct ScanCache {
    snapshots: Mutex<HashMap<PathBuf, Arc<TreeSnapshot>>>,
}

impl ScanCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the memoized snapshot for `root`, scanning it on first use.
    ///
    /// Roots are canonicalized when possible, so the same directory reached
    /// through different spellings shares one snapshot. The map lock is
    /// held across a miss's scan, which is what guarantees a root is only
    /// ever scanned and hashed by a single caller.
    pub fn get_or_scan(&self, root: &Path) -> Result<Arc<TreeSnapshot>> {
        let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

        let mut snapshots = self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(snapshot) = snapshots.get(&key) {
            return Ok(snapshot.clone());
        }

        let snapshot = Arc::new(scan(&key, &prune_nested_packages)?);
        snapshots.insert(key, snapshot.clone());
        Ok(snapshot)
    }

    /// Number of roots scanned so far.
    pub fn len(&self) -> usize {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no root has been scanned yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
