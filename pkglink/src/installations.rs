//! The store-side installations registry.
//!
//! Maps each published package to the consumer directories that installed
//! it, so a publish can push the fresh artifact to every consumer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Registry file name in the store root.
pub const INSTALLATIONS_FILE: &str = "installations.json";

/// Package name to consumer directories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Installations {
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<PathBuf>>,
}

impl Installations {
    /// Record that `consumer` installed `name`. Idempotent.
    pub fn add(&mut self, name: &str, consumer: &Path) {
        let consumers = self.packages.entry(name.to_string()).or_default();
        if !consumers.iter().any(|c| c == consumer) {
            consumers.push(consumer.to_path_buf());
        }
    }

    /// Forget that `consumer` installed `name`.
    pub fn remove(&mut self, name: &str, consumer: &Path) {
        if let Some(consumers) = self.packages.get_mut(name) {
            consumers.retain(|c| c != consumer);
            if consumers.is_empty() {
                self.packages.remove(name);
            }
        }
    }

    /// The consumers currently registered for `name`.
    pub fn consumers_of(&self, name: &str) -> &[PathBuf] {
        self.packages.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop consumers whose directory no longer exists, returning the
    /// dropped paths.
    pub fn prune_missing(&mut self, name: &str) -> Vec<PathBuf> {
        let Some(consumers) = self.packages.get_mut(name) else {
            return Vec::new();
        };
        let (alive, dead): (Vec<PathBuf>, Vec<PathBuf>) =
            consumers.drain(..).partition(|c| c.is_dir());
        *consumers = alive;
        if consumers.is_empty() {
            self.packages.remove(name);
        }
        dead
    }
}

/// Read the registry from the store root; missing means empty.
pub fn read_installations(store_root: &Path) -> Result<Installations> {
    let path = store_root.join(INSTALLATIONS_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Installations::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
        Ok(contents) => contents,
    };
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write the registry to the store root.
pub fn write_installations(store_root: &Path, installations: &Installations) -> Result<()> {
    std::fs::create_dir_all(store_root)
        .with_context(|| format!("Failed to create {}", store_root.display()))?;
    let path = store_root.join(INSTALLATIONS_FILE);
    let mut contents = serde_json::to_string_pretty(installations)?;
    contents.push('\n');
    std::fs::write(&path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_add_is_idempotent() {
        let mut installations = Installations::default();
        let consumer = Path::new("/work/app");

        installations.add("demo", consumer);
        installations.add("demo", consumer);
        assert_eq!(installations.consumers_of("demo").len(), 1);
    }

    #[test]
    fn test_remove_clears_empty_entries() {
        let mut installations = Installations::default();
        let consumer = Path::new("/work/app");

        installations.add("demo", consumer);
        installations.remove("demo", consumer);
        assert!(installations.packages.is_empty());
    }

    #[test]
    fn test_prune_missing_drops_dead_consumers() {
        let alive = TempDir::new().unwrap();
        let mut installations = Installations::default();
        installations.add("demo", alive.path());
        installations.add("demo", Path::new("/definitely/not/a/real/dir"));

        let dead = installations.prune_missing("demo");
        assert_eq!(dead.len(), 1);
        assert_eq!(installations.consumers_of("demo"), &[alive.path().to_path_buf()]);
    }

    #[test]
    fn test_registry_roundtrip() {
        let store = TempDir::new().unwrap();
        let mut installations = Installations::default();
        installations.add("demo", Path::new("/work/app"));

        write_installations(store.path(), &installations).unwrap();
        let read = read_installations(store.path()).unwrap();
        assert_eq!(read.consumers_of("demo"), &[PathBuf::from("/work/app")]);
    }
}
