//! The consumer-side lockfile: which artifacts are installed where.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Lockfile name in a consumer's working directory.
pub const LOCKFILE: &str = "pkglink.lock";

/// One installed package as recorded in the lockfile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedPackage {
    /// Exact store version installed.
    pub version: String,

    /// Signature of the installed artifact, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// The manifest range this installation replaced, so `remove` can
    /// restore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced: Option<String>,
}

/// The lockfile: package name to installation record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lockfile {
    #[serde(default)]
    pub packages: BTreeMap<String, LockedPackage>,
}

/// Read the lockfile of a consumer directory; missing means empty.
pub fn read_lockfile(dir: &Path) -> Result<Lockfile> {
    let path = dir.join(LOCKFILE);
    let contents = match std::fs::read_to_string(&path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Lockfile::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
        Ok(contents) => contents,
    };
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write the lockfile, deleting it when no packages remain.
pub fn write_lockfile(dir: &Path, lockfile: &Lockfile) -> Result<()> {
    let path = dir.join(LOCKFILE);

    if lockfile.packages.is_empty() {
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(e).with_context(|| format!("Failed to remove {}", path.display()));
            }
            _ => return Ok(()),
        }
    }

    let mut contents = serde_json::to_string_pretty(lockfile)?;
    contents.push('\n');
    std::fs::write(&path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_lockfile_reads_empty() {
        let dir = TempDir::new().unwrap();
        let lockfile = read_lockfile(dir.path()).unwrap();
        assert!(lockfile.packages.is_empty());
    }

    #[test]
    fn test_lockfile_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut lockfile = Lockfile::default();
        lockfile.packages.insert(
            "demo".to_string(),
            LockedPackage {
                version: "1.0.0".to_string(),
                signature: Some("abc123".to_string()),
                replaced: Some("^1.0.0".to_string()),
            },
        );

        write_lockfile(dir.path(), &lockfile).unwrap();
        let read = read_lockfile(dir.path()).unwrap();
        assert_eq!(read.packages["demo"].version, "1.0.0");
        assert_eq!(read.packages["demo"].replaced.as_deref(), Some("^1.0.0"));
    }

    #[test]
    fn test_empty_lockfile_is_deleted() {
        let dir = TempDir::new().unwrap();
        let mut lockfile = Lockfile::default();
        lockfile.packages.insert(
            "demo".to_string(),
            LockedPackage {
                version: "1.0.0".to_string(),
                signature: None,
                replaced: None,
            },
        );
        write_lockfile(dir.path(), &lockfile).unwrap();
        assert!(dir.path().join(LOCKFILE).exists());

        lockfile.packages.clear();
        write_lockfile(dir.path(), &lockfile).unwrap();
        assert!(!dir.path().join(LOCKFILE).exists());
    }
}
