//! Enumeration of a package's publishable files.
//!
//! The core engine receives an explicit file list and never filters it;
//! assembling that list from npm conventions happens here.

use crate::manifest::{MANIFEST_FILE, PackageManifest};
use anyhow::{Context, Result};
use ignore::gitignore::GitignoreBuilder;
use ignore::overrides::OverrideBuilder;
use std::path::Path;

/// Patterns excluded from every publish, whatever the ignore files say.
const DEFAULT_IGNORES: &[&str] = &[
    ".*.swp",
    "._*",
    ".DS_Store",
    ".git",
    ".hg",
    ".svn",
    ".npmrc",
    ".npmignore",
    ".gitignore",
    "npm-debug.log",
    "node_modules",
    ".pkglink",
    "pkglink.lock",
];

/// Files shipped even when a `files` whitelist would not match them.
const ALWAYS_INCLUDED: &[&str] = &[
    MANIFEST_FILE,
    "README*",
    "CHANGELOG*",
    "LICENSE*",
    "LICENCE*",
    "NOTICE*",
];

/// List the files of `dir` that belong in a published artifact.
///
/// Exclusions come from the built-in defaults plus the contents of
/// `.npmignore`, falling back to `.gitignore` when the manifest declares no
/// `files` whitelist. When the manifest does declare `files`, only matching
/// paths (plus the always-included set) are kept. Returned paths are
/// relative, forward-slash separated, and sorted.
pub fn publishable_files(dir: &Path, manifest: &PackageManifest) -> Result<Vec<String>> {
    let has_whitelist = manifest.files.as_ref().is_some_and(|f| !f.is_empty());

    let mut ignore_builder = GitignoreBuilder::new(dir);
    for pattern in DEFAULT_IGNORES {
        ignore_builder
            .add_line(None, pattern)
            .context("invalid built-in ignore pattern")?;
    }
    let npmignore = dir.join(".npmignore");
    if npmignore.is_file() {
        if let Some(err) = ignore_builder.add(&npmignore) {
            return Err(err).context("Failed to parse .npmignore");
        }
    } else if !has_whitelist {
        let gitignore = dir.join(".gitignore");
        if gitignore.is_file() {
            if let Some(err) = ignore_builder.add(&gitignore) {
                return Err(err).context("Failed to parse .gitignore");
            }
        }
    }
    let ignores = ignore_builder.build()?;

    let whitelist = if has_whitelist {
        let mut overrides = OverrideBuilder::new(dir);
        for pattern in ALWAYS_INCLUDED {
            overrides.add(pattern)?;
        }
        for pattern in manifest.files.as_deref().unwrap_or_default() {
            let trimmed = pattern.trim_end_matches('/');
            overrides.add(trimmed)?;
            // A bare directory name whitelists everything beneath it.
            overrides.add(&format!("{}/**", trimmed))?;
        }
        Some(overrides.build()?)
    } else {
        None
    };

    let walker = ignore::WalkBuilder::new(dir)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .follow_links(false)
        .filter_entry(|e| e.file_name() != ".git" && e.file_name() != "node_modules")
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 || !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(dir)
            .expect("walker yields paths under its root");
        let rel_str = rel
            .to_str()
            .with_context(|| format!("Non-Unicode file name: {}", rel.display()))?
            .replace('\\', "/");

        if ignores.matched_path_or_any_parents(rel, false).is_ignore() {
            continue;
        }
        if let Some(whitelist) = &whitelist {
            if !whitelist.matched(rel, false).is_whitelist() {
                continue;
            }
        }

        files.push(rel_str);
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn manifest_with_files(files: Option<Vec<&str>>) -> PackageManifest {
        PackageManifest {
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            files: files.map(|f| f.into_iter().map(String::from).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_exclude_dependency_dirs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), b"{}").unwrap();
        fs::write(dir.path().join("index.js"), b"x").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/dep")).unwrap();
        fs::write(dir.path().join("node_modules/dep/i.js"), b"y").unwrap();

        let files = publishable_files(dir.path(), &manifest_with_files(None)).unwrap();
        assert_eq!(files, vec!["index.js", "package.json"]);
    }

    #[test]
    fn test_npmignore_applies() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), b"{}").unwrap();
        fs::write(dir.path().join("keep.js"), b"x").unwrap();
        fs::write(dir.path().join("debug.log"), b"x").unwrap();
        fs::write(dir.path().join(".npmignore"), b"*.log\n").unwrap();

        let files = publishable_files(dir.path(), &manifest_with_files(None)).unwrap();
        assert_eq!(files, vec!["keep.js", "package.json"]);
    }

    #[test]
    fn test_gitignore_ignored_when_whitelist_present() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), b"{}").unwrap();
        fs::write(dir.path().join(".gitignore"), b"dist\n").unwrap();
        fs::create_dir(dir.path().join("dist")).unwrap();
        fs::write(dir.path().join("dist/out.js"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files =
            publishable_files(dir.path(), &manifest_with_files(Some(vec!["dist"]))).unwrap();
        assert_eq!(files, vec!["dist/out.js", "package.json"]);
    }

    #[test]
    fn test_whitelist_keeps_manifest_and_readme() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), b"{}").unwrap();
        fs::write(dir.path().join("README.md"), b"docs").unwrap();
        fs::write(dir.path().join("main.js"), b"x").unwrap();
        fs::write(dir.path().join("extra.js"), b"x").unwrap();

        let files =
            publishable_files(dir.path(), &manifest_with_files(Some(vec!["main.js"]))).unwrap();
        assert_eq!(files, vec!["README.md", "main.js", "package.json"]);
    }

    #[test]
    fn test_gitignore_respected_without_whitelist() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), b"{}").unwrap();
        fs::write(dir.path().join(".gitignore"), b"secret.txt\n").unwrap();
        fs::write(dir.path().join("secret.txt"), b"x").unwrap();
        fs::write(dir.path().join("main.js"), b"x").unwrap();

        let files = publishable_files(dir.path(), &manifest_with_files(None)).unwrap();
        assert_eq!(files, vec!["main.js", "package.json"]);
    }
}
