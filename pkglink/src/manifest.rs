//! Package manifest reading and rewriting.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Manifest file name in a package's working directory.
pub const MANIFEST_FILE: &str = "package.json";

/// The subset of the manifest this tool reads and edits.
///
/// Every other field round-trips untouched through `rest`, so rewriting the
/// manifest never drops data it does not understand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, String>>,

    #[serde(
        default,
        rename = "devDependencies",
        skip_serializing_if = "Option::is_none"
    )]
    pub dev_dependencies: Option<BTreeMap<String, String>>,

    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl PackageManifest {
    /// The recorded range for `name`, wherever it is declared.
    pub fn dependency_range(&self, name: &str) -> Option<&str> {
        self.dependencies
            .as_ref()
            .and_then(|deps| deps.get(name))
            .or_else(|| self.dev_dependencies.as_ref().and_then(|deps| deps.get(name)))
            .map(String::as_str)
    }

    /// Record `name -> range`, replacing any existing declaration.
    ///
    /// An existing devDependencies declaration stays there; otherwise the
    /// entry lands in dependencies, or devDependencies when `dev` is set.
    pub fn set_dependency(&mut self, name: &str, range: &str, dev: bool) {
        let in_dev = self
            .dev_dependencies
            .as_ref()
            .is_some_and(|deps| deps.contains_key(name));

        if let Some(deps) = self.dependencies.as_mut() {
            deps.remove(name);
        }
        if let Some(deps) = self.dev_dependencies.as_mut() {
            deps.remove(name);
        }

        let target = if dev || in_dev {
            self.dev_dependencies.get_or_insert_with(BTreeMap::new)
        } else {
            self.dependencies.get_or_insert_with(BTreeMap::new)
        };
        target.insert(name.to_string(), range.to_string());
    }

    /// Drop `name` from both dependency tables.
    pub fn remove_dependency(&mut self, name: &str) {
        if let Some(deps) = self.dependencies.as_mut() {
            deps.remove(name);
        }
        if let Some(deps) = self.dev_dependencies.as_mut() {
            deps.remove(name);
        }
    }
}

/// Read the manifest from a package directory.
pub fn read_manifest(dir: &Path) -> Result<PackageManifest> {
    let path = dir.join(MANIFEST_FILE);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Rewrite the manifest in a package directory.
pub fn write_manifest(dir: &Path, manifest: &PackageManifest) -> Result<()> {
    let path = dir.join(MANIFEST_FILE);
    let mut contents = serde_json::to_string_pretty(manifest)?;
    contents.push('\n');
    std::fs::write(&path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_roundtrip_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{
  "name": "demo",
  "version": "1.0.0",
  "scripts": { "build": "tsc" },
  "dependencies": { "left-pad": "^1.0.0" }
}"#,
        )
        .unwrap();

        let manifest = read_manifest(dir.path()).unwrap();
        assert_eq!(manifest.name, "demo");
        assert!(manifest.rest.contains_key("scripts"));

        write_manifest(dir.path(), &manifest).unwrap();
        let again = read_manifest(dir.path()).unwrap();
        assert!(again.rest.contains_key("scripts"));
        assert_eq!(again.dependency_range("left-pad"), Some("^1.0.0"));
    }

    #[test]
    fn test_set_dependency_respects_existing_dev_table() {
        let mut manifest = PackageManifest::default();
        manifest
            .dev_dependencies
            .get_or_insert_with(Default::default)
            .insert("tool".to_string(), "^2.0.0".to_string());

        manifest.set_dependency("tool", "file:.pkglink/tool", false);

        assert!(manifest.dependencies.is_none() || !manifest.dependencies.as_ref().unwrap().contains_key("tool"));
        assert_eq!(
            manifest.dev_dependencies.as_ref().unwrap()["tool"],
            "file:.pkglink/tool"
        );
    }

    #[test]
    fn test_set_and_remove_dependency() {
        let mut manifest = PackageManifest::default();
        manifest.set_dependency("demo", "file:.pkglink/demo", false);
        assert_eq!(manifest.dependency_range("demo"), Some("file:.pkglink/demo"));

        manifest.remove_dependency("demo");
        assert_eq!(manifest.dependency_range("demo"), None);
    }
}
