//! Error types for pkglink_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using pkglink_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during scanning, synchronization, and store writes.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Scan root exists but is not a directory.
    ///
    /// A missing root is not an error and scans to an empty snapshot.
    #[error("Scan root is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// A file could not be read while hashing or copying it.
    #[error("Unreadable file {path}: {source}")]
    UnreadableFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A removed path still exists after the removal was retried.
    #[error("Path still exists after removal retry: {path}")]
    StaleRemoval { path: PathBuf },

    /// An entry has a file name that is not valid Unicode.
    #[error("File name is not valid Unicode: {path}")]
    NonUnicodeName { path: PathBuf },

    /// Invalid hash format or encoding.
    #[error("Invalid hash: {reason}")]
    InvalidHash { reason: String },

    /// Store root is invalid or unusable.
    #[error("Invalid store at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// A requested package version is not present in the store.
    #[error("Package {name}@{version} not found in store")]
    MissingArtifact { name: String, version: String },

    /// The operation was cancelled between phases.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<PathBuf>) -> Self {
        Error::NotADirectory { path: path.into() }
    }

    /// Create an UnreadableFile error.
    pub fn unreadable_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::UnreadableFile {
            path: path.into(),
            source,
        }
    }

    /// Create a StaleRemoval error.
    pub fn stale_removal(path: impl Into<PathBuf>) -> Self {
        Error::StaleRemoval { path: path.into() }
    }

    /// Create a NonUnicodeName error.
    pub fn non_unicode_name(path: impl Into<PathBuf>) -> Self {
        Error::NonUnicodeName { path: path.into() }
    }

    /// Create an InvalidHash error.
    pub fn invalid_hash(reason: impl Into<String>) -> Self {
        Error::InvalidHash {
            reason: reason.into(),
        }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a MissingArtifact error.
    pub fn missing_artifact(name: impl Into<String>, version: impl Into<String>) -> Self {
        Error::MissingArtifact {
            name: name.into(),
            version: version.into(),
        }
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}
