//! # Pkglink Core
//!
//! Tree synchronization and content-signing engine.
//!
//! This library publishes a local source tree into a versioned artifact
//! store and keeps consumer copies of that artifact synchronized with the
//! source, without re-copying unchanged bytes and without corrupting
//! partially-applied state.
//!
//! ## Features
//!
//! - Deterministic package signatures over path-salted BLAKE3 file hashes
//! - Snapshot scanning with injectable pruning of nested dependency dirs
//! - Pure diffing of two snapshots, including entries that change kind
//! - Four-phase mirroring that is idempotent and safe for kind changes
//! - Process-lifetime scan cache for one-source, many-destination pushes
//!
//! ## Example
//!
//! ```no_run
//! use pkglink_core::{
//!     CompareMode, PackageId, PackageStore, ScanCache, WriteOptions, sync_tree,
//! };
//! use std::path::Path;
//!
//! # fn main() -> pkglink_core::Result<()> {
//! // Publish a file set into the store.
//! let store = PackageStore::at("/home/me/.pkglink");
//! let id = PackageId::new("demo", "1.0.0");
//! let files = vec!["package.json".to_string(), "src/index.js".to_string()];
//! let receipt = store.write_artifact(
//!     &id,
//!     Path::new("/work/demo"),
//!     &files,
//!     WriteOptions { only_if_changed: true },
//! )?;
//!
//! // Mirror the stored artifact into a consumer, reusing one source scan
//! // for any number of destinations.
//! if receipt.changed {
//!     let cache = ScanCache::new();
//!     let source = cache.get_or_scan(&store.locate(&id)?)?;
//!     sync_tree(Path::new("/work/app/node_modules/demo"), &source, CompareMode::Fast)?;
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
mod diff;
mod error;
mod hash;
mod mirror;
mod scan;
mod store;

pub use cache::ScanCache;
pub use diff::{Change, CompareMode, DiffEntry, diff};
pub use error::{Error, Result};
pub use hash::{HASH_SIZE, Hash, signature_of};
pub use mirror::{
    CancelToken, MirrorReport, SkippedItem, mirror, mirror_cancellable, sync_tree,
};
pub use scan::{
    FileSystemItem, ItemKind, NESTED_PACKAGE_DIR, TreeSnapshot, prune_nested_packages, scan,
};
pub use store::{
    ArtifactReceipt, PackageId, PackageStore, SIGNATURE_FILE, WriteOptions, read_signature,
};
