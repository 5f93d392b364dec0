//! Content-signed artifact store.

use crate::error::{Error, Result};
use crate::hash::{Hash, signature_of};
use crate::mirror::copy_file_preserving;
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the signature file persisted next to an artifact's contents.
///
/// Its format is a single opaque hex string.
pub const SIGNATURE_FILE: &str = "pkglink.sig";

/// Identifies one versioned artifact in the store.
///
/// Name and version are opaque strings to the engine; the collaborator
/// layer decides what they mean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageId {
    pub name: String,
    pub version: String,
}

impl PackageId {
    /// Create a new package identifier.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Options for one artifact write.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Skip the copy phase when the computed signature matches the one
    /// already persisted for this version, leaving the stored artifact
    /// untouched.
    pub only_if_changed: bool,
}

/// Result of one artifact write.
#[derive(Debug)]
pub struct ArtifactReceipt {
    /// Aggregate content signature of the written file set (hex).
    pub signature: String,
    /// False when change detection found an identical prior artifact and
    /// skipped the copy phase.
    pub changed: bool,
}

/// A store of versioned package artifacts, one directory per version.
///
/// Layout: `<root>/packages/<name>/<version>/...` with a [`SIGNATURE_FILE`]
/// alongside each version's contents.
#[derive(Debug)]
pub struct PackageStore {
    root: PathBuf,
}

impl PackageStore {
    /// Use the store rooted at the given path, creating directories lazily
    /// on first write.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all packages.
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    /// Directory holding every version of one package.
    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.packages_dir().join(name)
    }

    /// Directory holding one exact version.
    pub fn version_dir(&self, id: &PackageId) -> PathBuf {
        self.package_dir(&id.name).join(&id.version)
    }

    /// List the versions of a package present in the store.
    pub fn versions(&self, name: &str) -> Result<Vec<String>> {
        let dir = self.package_dir(name);
        let mut versions = Vec::new();

        let entries = match fs::read_dir(&dir) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(versions),
            Err(e) => return Err(e.into()),
            Ok(entries) => entries,
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let version = entry
                    .file_name()
                    .into_string()
                    .map_err(|_| Error::non_unicode_name(entry.path()))?;
                versions.push(version);
            }
        }

        versions.sort();
        Ok(versions)
    }

    /// Resolve the directory of an exact version, erroring when absent.
    pub fn locate(&self, id: &PackageId) -> Result<PathBuf> {
        let dir = self.version_dir(id);
        if !dir.is_dir() {
            return Err(Error::missing_artifact(&id.name, &id.version));
        }
        Ok(dir)
    }

    /// Copy a file set into the store under `id` and compute its signature.
    ///
    /// `files` are paths relative to `source_root`, forward-slash separated,
    /// enumerated by the collaborator; the engine neither filters nor
    /// expands the list. Every file is hashed salted by its relative path,
    /// in parallel, before anything is copied.
    ///
    /// With [`WriteOptions::only_if_changed`], an artifact whose signature
    /// matches the previously persisted one is left untouched and the
    /// receipt reports `changed: false`.
    ///
    /// Unlike mirroring, a store write is fail-fast: the first unreadable
    /// input aborts the whole write, and the signature file is persisted
    /// only after every copy succeeded. An interrupted write therefore
    /// never presents a signature that claims completeness.
    pub fn write_artifact(
        &self,
        id: &PackageId,
        source_root: &Path,
        files: &[String],
        options: WriteOptions,
    ) -> Result<ArtifactReceipt> {
        let pairs = files
            .par_iter()
            .map(|rel| {
                let hash = Hash::hash_file_salted(&source_root.join(rel), rel)?;
                Ok((rel.clone(), hash))
            })
            .collect::<Result<Vec<(String, Hash)>>>()?;
        let signature = signature_of(pairs).to_hex();

        let dest = self.version_dir(id);
        if options.only_if_changed
            && read_signature(&dest)?.is_some_and(|previous| previous == signature)
        {
            return Ok(ArtifactReceipt {
                signature,
                changed: false,
            });
        }

        // Rebuild the version directory from scratch; artifacts are
        // immutable snapshots, not incrementally patched trees.
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        fs::create_dir_all(&dest)?;

        files.par_iter().try_for_each(|rel| {
            copy_file_preserving(&source_root.join(rel), &dest.join(rel))
        })?;

        write_signature(&dest, &signature)?;

        Ok(ArtifactReceipt {
            signature,
            changed: true,
        })
    }
}

/// Read the persisted signature of an artifact directory, if any.
pub fn read_signature(dir: &Path) -> Result<Option<String>> {
    match fs::read_to_string(dir.join(SIGNATURE_FILE)) {
        Ok(contents) => Ok(Some(contents.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Persist the signature file atomically as the final step of a write.
fn write_signature(dir: &Path, signature: &str) -> Result<()> {
    let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
    temp_file.write_all(signature.as_bytes())?;
    temp_file.write_all(b"\n")?;
    temp_file.flush()?;
    temp_file.persist(dir.join(SIGNATURE_FILE))?;
    Ok(())
}
