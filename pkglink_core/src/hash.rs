//! Content hashing and package signatures using BLAKE3.

use crate::error::{Error, Result};
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Hash digest size in bytes (BLAKE3 produces 256-bit hashes).
pub const HASH_SIZE: usize = 32;

/// A 32-byte BLAKE3 hash digest.
///
/// Used both for per-file change detection and, via [`signature_of`], for
/// package-level aggregate signatures. This is a content-identity check,
/// not a security boundary.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Create a Hash from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    /// Create a Hash from a hex string (64 hex characters).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != HASH_SIZE * 2 {
            return Err(Error::invalid_hash(format!(
                "Expected {} hex characters, got {}",
                HASH_SIZE * 2,
                hex_str.len()
            )));
        }

        let bytes =
            hex::decode(hex_str).map_err(|e| Error::invalid_hash(format!("Invalid hex: {}", e)))?;

        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&bytes);
        Ok(Hash(hash))
    }

    /// Convert to hex string (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Hash raw bytes.
    pub fn hash_bytes(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Hash(*hash.as_bytes())
    }

    /// Hash data from a reader.
    pub fn hash_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut hasher = blake3::Hasher::new();
        std::io::copy(&mut reader, &mut hasher)?;
        Ok(Hash(*hasher.finalize().as_bytes()))
    }

    /// Hash a file's content.
    pub fn hash_file(path: &Path) -> Result<Self> {
        Self::hash_file_salted(path, "")
    }

    /// Hash a file's content, feeding `salt` into the digest first.
    ///
    /// The salt is typically the file's relative path normalized to forward
    /// slashes. Two byte-identical files at different paths then produce
    /// different hashes, so a rename changes the aggregate signature even
    /// when no bytes changed.
    ///
    /// An unreadable file surfaces as [`Error::UnreadableFile`]; it is never
    /// treated as "no content".
    pub fn hash_file_salted(path: &Path, salt: &str) -> Result<Self> {
        let mut file =
            std::fs::File::open(path).map_err(|e| Error::unreadable_file(path, e))?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(salt.as_bytes());
        std::io::copy(&mut file, &mut hasher).map_err(|e| Error::unreadable_file(path, e))?;
        Ok(Hash(*hasher.finalize().as_bytes()))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

/// Compute the aggregate package signature for a set of files.
///
/// Pairs are sorted by relative path, then the hex digests are concatenated
/// and hashed. Identical file sets (same relative paths, same bytes) always
/// yield the same signature regardless of enumeration order, mtimes, or
/// host OS.
pub fn signature_of(mut pairs: Vec<(String, Hash)>) -> Hash {
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = blake3::Hasher::new();
    for (_, hash) in &pairs {
        hasher.update(hash.to_hex().as_bytes());
    }
    Hash(*hasher.finalize().as_bytes())
}
