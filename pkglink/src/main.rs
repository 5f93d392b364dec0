use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pkglink_core::{
    CompareMode, NESTED_PACKAGE_DIR, PackageId, PackageStore, ScanCache, TreeSnapshot,
    WriteOptions, read_signature, sync_tree,
};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

mod files;
mod installations;
mod lockfile;
mod manifest;

use files::publishable_files;
use installations::{read_installations, write_installations};
use lockfile::{LockedPackage, read_lockfile, write_lockfile};
use manifest::{read_manifest, write_manifest};

/// Directory inside a consumer holding the local copies of installed
/// packages; manifest entries point at it with `file:` addresses.
const CONSUMER_CACHE_DIR: &str = ".pkglink";

/// Pkglink - publish local packages and keep consumers in sync
#[derive(Parser)]
#[command(name = "pkglink")]
#[command(about = "Publish local packages into a shared store and sync consumers", long_about = None)]
#[command(version)]
struct Cli {
    /// Store root directory (defaults to PKGLINK_STORE env var or ~/.pkglink)
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Operate on this directory instead of the current one
    #[arg(short = 'C', long, global = true)]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish the package in the working directory to the store
    Publish {
        /// Skip the publish when the content signature is unchanged
        #[arg(long)]
        changed: bool,

        /// Propagate the artifact to every registered consumer afterwards
        #[arg(long)]
        push: bool,
    },

    /// Publish, then propagate to every registered consumer
    Push {
        /// Skip the publish (and the propagation) when unchanged
        #[arg(long)]
        changed: bool,
    },

    /// Install packages from the store into this consumer
    Add {
        /// Packages to install, as `name` or `name@version`
        #[arg(required = true)]
        packages: Vec<String>,

        /// Record the dependency under devDependencies
        #[arg(long)]
        dev: bool,
    },

    /// Re-sync installed packages from the store
    Update {
        /// Packages to update (all installed packages if omitted)
        packages: Vec<String>,
    },

    /// Remove installed packages and restore manifest entries
    Remove {
        /// Packages to remove
        packages: Vec<String>,

        /// Remove every installed package
        #[arg(long)]
        all: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Store root: CLI arg > PKGLINK_STORE env var > ~/.pkglink
    let store_root = match cli.store {
        Some(root) => root,
        None => match std::env::var_os("PKGLINK_STORE") {
            Some(root) => PathBuf::from(root),
            None => dirs::home_dir()
                .context("Cannot determine a home directory for the store; pass --store")?
                .join(".pkglink"),
        },
    };

    let cwd = match cli.cwd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Publish { changed, push } => cmd_publish(&store_root, &cwd, changed, push),
        Commands::Push { changed } => cmd_publish(&store_root, &cwd, changed, true),
        Commands::Add { packages, dev } => cmd_add(&store_root, &cwd, &packages, dev),
        Commands::Update { packages } => cmd_update(&store_root, &cwd, &packages),
        Commands::Remove { packages, all } => cmd_remove(&store_root, &cwd, &packages, all),
    }
}

fn cmd_publish(store_root: &Path, working_dir: &Path, only_changed: bool, push: bool) -> Result<()> {
    let manifest = read_manifest(working_dir)?;
    if manifest.name.is_empty() || manifest.version.is_empty() {
        bail!("package.json must declare both name and version");
    }
    if manifest
        .rest
        .get("private")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
    {
        bail!("refusing to publish private package {}", manifest.name);
    }

    let files = publishable_files(working_dir, &manifest)?;
    if files.is_empty() {
        bail!("no publishable files found in {}", working_dir.display());
    }

    let store = PackageStore::at(store_root);
    let id = PackageId::new(&manifest.name, &manifest.version);
    let receipt = store
        .write_artifact(
            &id,
            working_dir,
            &files,
            WriteOptions {
                only_if_changed: only_changed,
            },
        )
        .with_context(|| format!("Failed to publish {}", id))?;

    if !receipt.changed {
        println!("{} has not changed, skipping publish.", id);
        return Ok(());
    }

    println!(
        "{} published to store ({} files, signature {})",
        id,
        files.len(),
        &receipt.signature[..8]
    );

    if push {
        push_to_consumers(&store, &id)?;
    }
    Ok(())
}

/// Mirror a freshly published artifact into every registered consumer.
///
/// One scan cache serves the single store-side source for all consumers;
/// each consumer's trees are scanned fresh.
fn push_to_consumers(store: &PackageStore, id: &PackageId) -> Result<()> {
    let mut installations = read_installations(store.root())?;
    for dead in installations.prune_missing(&id.name) {
        println!("Dropping missing consumer {}", dead.display());
    }
    let consumers: Vec<PathBuf> = installations.consumers_of(&id.name).to_vec();
    write_installations(store.root(), &installations)?;

    if consumers.is_empty() {
        println!("No consumers registered for {}.", id.name);
        return Ok(());
    }

    let source_dir = store.locate(id)?;
    let signature = read_signature(&source_dir)?;
    let cache = ScanCache::new();
    let source = cache.get_or_scan(&source_dir)?;

    for consumer in &consumers {
        install_into(&source, consumer, &id.name)
            .with_context(|| format!("Failed to push {} to {}", id, consumer.display()))?;

        let mut lockfile = read_lockfile(consumer)?;
        if let Some(entry) = lockfile.packages.get_mut(&id.name) {
            entry.version = id.version.clone();
            entry.signature = signature.clone();
            write_lockfile(consumer, &lockfile)?;
        }
        println!("Pushed {} to {}", id, consumer.display());
    }
    Ok(())
}

/// Mirror a store artifact into a consumer: first the consumer-local cache
/// copy, then the dependency-resolution copy.
fn install_into(source: &TreeSnapshot, consumer: &Path, name: &str) -> Result<()> {
    for dest in [
        consumer.join(CONSUMER_CACHE_DIR).join(name),
        consumer.join(NESTED_PACKAGE_DIR).join(name),
    ] {
        let report = sync_tree(&dest, source, CompareMode::Fast)?;
        for skipped in &report.skipped {
            eprintln!(
                "warning: skipped {} in {}: {}",
                skipped.rel_path,
                dest.display(),
                skipped.reason
            );
        }
    }
    Ok(())
}

fn cmd_add(store_root: &Path, cwd: &Path, packages: &[String], dev: bool) -> Result<()> {
    let store = PackageStore::at(store_root);
    let cache = ScanCache::new();

    for spec in packages {
        let (name, version) = parse_package_spec(spec);
        let version = match version {
            Some(version) => version,
            None => latest_version(&store, &name)?,
        };
        let id = PackageId::new(name.clone(), version);

        let source_dir = match store.locate(&id) {
            Ok(dir) => dir,
            Err(err) => {
                println!("{}, skipping.", err);
                continue;
            }
        };
        let source = cache.get_or_scan(&source_dir)?;
        install_into(&source, cwd, &name)?;

        let local_address = format!("file:{}/{}", CONSUMER_CACHE_DIR, name);
        let mut manifest = read_manifest(cwd)?;
        let replaced = manifest
            .dependency_range(&name)
            .map(String::from)
            .filter(|range| range != &local_address);
        manifest.set_dependency(&name, &local_address, dev);
        write_manifest(cwd, &manifest)?;

        let mut lockfile = read_lockfile(cwd)?;
        let earlier_replaced = lockfile
            .packages
            .get(&name)
            .and_then(|entry| entry.replaced.clone());
        lockfile.packages.insert(
            name.clone(),
            LockedPackage {
                version: id.version.clone(),
                signature: read_signature(&source_dir)?,
                replaced: replaced.or(earlier_replaced),
            },
        );
        write_lockfile(cwd, &lockfile)?;

        let mut installations = read_installations(store.root())?;
        installations.add(&name, cwd);
        write_installations(store.root(), &installations)?;

        println!("{} installed into {}", id, cwd.display());
    }
    Ok(())
}

fn cmd_update(store_root: &Path, cwd: &Path, packages: &[String]) -> Result<()> {
    let mut lockfile = read_lockfile(cwd)?;
    if lockfile.packages.is_empty() {
        println!("Nothing installed in {}.", cwd.display());
        return Ok(());
    }

    let targets: Vec<String> = if packages.is_empty() {
        lockfile.packages.keys().cloned().collect()
    } else {
        packages
            .iter()
            .map(|spec| parse_package_spec(spec).0)
            .collect()
    };

    let store = PackageStore::at(store_root);
    let cache = ScanCache::new();

    for name in targets {
        let Some(entry) = lockfile.packages.get(&name) else {
            println!("{} is not installed here, skipping.", name);
            continue;
        };
        let id = PackageId::new(name.clone(), entry.version.clone());

        let source_dir = match store.locate(&id) {
            Ok(dir) => dir,
            Err(err) => {
                println!("{}, skipping.", err);
                continue;
            }
        };
        let source = cache.get_or_scan(&source_dir)?;
        install_into(&source, cwd, &name)?;

        let signature = read_signature(&source_dir)?;
        if let Some(entry) = lockfile.packages.get_mut(&name) {
            entry.signature = signature;
        }
        println!("{} updated", id);
    }

    write_lockfile(cwd, &lockfile)?;
    Ok(())
}

fn cmd_remove(store_root: &Path, cwd: &Path, packages: &[String], all: bool) -> Result<()> {
    let mut lockfile = read_lockfile(cwd)?;

    let targets: Vec<String> = if all {
        lockfile.packages.keys().cloned().collect()
    } else if packages.is_empty() {
        bail!("name at least one package to remove, or pass --all");
    } else {
        packages
            .iter()
            .map(|spec| parse_package_spec(spec).0)
            .collect()
    };

    let mut manifest = read_manifest(cwd)?;
    let mut installations = read_installations(store_root)?;

    for name in targets {
        let Some(entry) = lockfile.packages.remove(&name) else {
            println!("{} is not installed here, skipping.", name);
            continue;
        };

        match entry.replaced {
            Some(range) => manifest.set_dependency(&name, &range, false),
            None => manifest.remove_dependency(&name),
        }

        remove_dir_if_present(&cwd.join(CONSUMER_CACHE_DIR).join(&name))?;
        remove_dir_if_present(&cwd.join(NESTED_PACKAGE_DIR).join(&name))?;
        installations.remove(&name, cwd);

        println!("{} removed from {}", name, cwd.display());
    }

    write_manifest(cwd, &manifest)?;
    write_lockfile(cwd, &lockfile)?;
    write_installations(store_root, &installations)?;
    Ok(())
}

/// Split `name` or `name@version`, keeping scoped names (`@scope/pkg`) whole.
fn parse_package_spec(spec: &str) -> (String, Option<String>) {
    match spec.rfind('@') {
        Some(idx) if idx > 0 => {
            let version = &spec[idx + 1..];
            if version.is_empty() {
                (spec[..idx].to_string(), None)
            } else {
                (spec[..idx].to_string(), Some(version.to_string()))
            }
        }
        _ => (spec.to_string(), None),
    }
}

/// Pick the newest stored version: semver order, with non-semver versions
/// sorting below and among themselves lexicographically.
fn latest_version(store: &PackageStore, name: &str) -> Result<String> {
    store
        .versions(name)?
        .into_iter()
        .max_by(|a, b| compare_versions(a, b))
        .with_context(|| format!("No versions of {} in store", name))
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Remove a directory tree, treating "already gone" as success.
fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", dir.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_package_spec() {
        assert_eq!(parse_package_spec("demo"), ("demo".to_string(), None));
        assert_eq!(
            parse_package_spec("demo@1.2.3"),
            ("demo".to_string(), Some("1.2.3".to_string()))
        );
        assert_eq!(
            parse_package_spec("@scope/demo"),
            ("@scope/demo".to_string(), None)
        );
        assert_eq!(
            parse_package_spec("@scope/demo@2.0.0"),
            ("@scope/demo".to_string(), Some("2.0.0".to_string()))
        );
        assert_eq!(parse_package_spec("demo@"), ("demo".to_string(), None));
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
        // Semver sorts above anything unparseable.
        assert_eq!(compare_versions("1.0.0", "snapshot"), Ordering::Greater);
        assert_eq!(compare_versions("alpha", "beta"), Ordering::Less);
    }

    #[test]
    fn test_add_then_remove_roundtrip() {
        use pkglink_core::{PackageStore, WriteOptions};
        use tempfile::TempDir;

        let package = TempDir::new().unwrap();
        std::fs::write(
            package.path().join("package.json"),
            r#"{ "name": "dep", "version": "1.0.0" }"#,
        )
        .unwrap();
        std::fs::write(package.path().join("index.js"), b"module.exports = 1").unwrap();

        let store_dir = TempDir::new().unwrap();
        let store = PackageStore::at(store_dir.path());
        let id = PackageId::new("dep", "1.0.0");
        let manifest = read_manifest(package.path()).unwrap();
        let files = publishable_files(package.path(), &manifest).unwrap();
        store
            .write_artifact(&id, package.path(), &files, WriteOptions::default())
            .unwrap();

        let consumer = TempDir::new().unwrap();
        std::fs::write(
            consumer.path().join("package.json"),
            r#"{ "name": "app", "version": "0.1.0", "dependencies": { "dep": "^1.0.0" } }"#,
        )
        .unwrap();

        cmd_add(
            store_dir.path(),
            consumer.path(),
            &["dep".to_string()],
            false,
        )
        .unwrap();

        assert!(consumer.path().join(".pkglink/dep/index.js").is_file());
        assert!(consumer.path().join("node_modules/dep/index.js").is_file());
        let manifest = read_manifest(consumer.path()).unwrap();
        assert_eq!(manifest.dependency_range("dep"), Some("file:.pkglink/dep"));
        let lockfile = read_lockfile(consumer.path()).unwrap();
        assert_eq!(lockfile.packages["dep"].replaced.as_deref(), Some("^1.0.0"));

        cmd_remove(store_dir.path(), consumer.path(), &["dep".to_string()], false).unwrap();

        assert!(!consumer.path().join(".pkglink/dep").exists());
        assert!(!consumer.path().join("node_modules/dep").exists());
        let manifest = read_manifest(consumer.path()).unwrap();
        assert_eq!(manifest.dependency_range("dep"), Some("^1.0.0"));
        assert!(read_lockfile(consumer.path()).unwrap().packages.is_empty());
    }

    #[test]
    fn test_publish_then_push_updates_consumer() {
        use tempfile::TempDir;

        let package = TempDir::new().unwrap();
        std::fs::write(
            package.path().join("package.json"),
            r#"{ "name": "dep", "version": "1.0.0" }"#,
        )
        .unwrap();
        std::fs::write(package.path().join("index.js"), b"v1").unwrap();

        let store_dir = TempDir::new().unwrap();
        let consumer = TempDir::new().unwrap();
        std::fs::write(
            consumer.path().join("package.json"),
            r#"{ "name": "app", "version": "0.1.0" }"#,
        )
        .unwrap();

        cmd_publish(store_dir.path(), package.path(), false, false).unwrap();
        cmd_add(
            store_dir.path(),
            consumer.path(),
            &["dep".to_string()],
            false,
        )
        .unwrap();
        assert_eq!(
            std::fs::read(consumer.path().join("node_modules/dep/index.js")).unwrap(),
            b"v1"
        );

        std::fs::write(package.path().join("index.js"), b"v2").unwrap();
        cmd_publish(store_dir.path(), package.path(), true, true).unwrap();

        assert_eq!(
            std::fs::read(consumer.path().join("node_modules/dep/index.js")).unwrap(),
            b"v2"
        );
        assert_eq!(
            std::fs::read(consumer.path().join(".pkglink/dep/index.js")).unwrap(),
            b"v2"
        );
    }
}
