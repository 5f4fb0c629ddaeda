//! Hashing utilities for change detection.
//!
//! This module provides:
//! - `Checksum`: the 64-bit content hash every snapshot node carries
//! - `Hashable`: canonical-JSON checksumming for configuration objects
//! - `combine_sorted()`: order-independent aggregate of many checksums
//! - `hash_file()` / `hash_directory()` / `hash_bytes()`: digests for on-disk assets

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

pub type HashError = serde_json::Error;

/// A 64-bit content hash.
///
/// Derived from the first eight bytes of a SHA-256 over a canonical encoding, so it is
/// stable across processes and platforms. Collisions are tolerable: a checksum only
/// decides whether a node is rebuilt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(pub u64);

impl Checksum {
  /// Truncate a SHA-256 digest to its leading 64 bits.
  fn from_digest(digest: &[u8]) -> Self {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    Checksum(u64::from_be_bytes(bytes))
  }

  pub fn of_bytes(data: &[u8]) -> Self {
    Self::from_digest(&Sha256::digest(data))
  }
}

impl std::fmt::Display for Checksum {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:016x}", self.0)
  }
}

/// Objects whose checksum is the hash of their serialized form.
///
/// Implementors control what is covered through serde attributes: provenance and
/// caches are `#[serde(skip)]`ped on the hashing view so they never influence the result.
pub trait Hashable: Serialize {
  fn checksum(&self) -> Result<Checksum, HashError> {
    let serialized = serde_json::to_vec(self)?;
    Ok(Checksum::of_bytes(&serialized))
  }
}

/// Hash a set of checksums without regard to the order they were discovered in.
pub fn combine_sorted(checksums: impl IntoIterator<Item = Checksum>) -> Checksum {
  let mut all: Vec<Checksum> = checksums.into_iter().collect();
  all.sort_unstable();

  let mut hasher = Sha256::new();
  for checksum in all {
    hasher.update(checksum.0.to_be_bytes());
  }
  Checksum::from_digest(&hasher.finalize())
}

/// A full 64-character SHA256 hash for asset content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while hashing an asset on disk.
#[derive(Debug, thiserror::Error)]
pub enum AssetHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },
}

/// Hash an asset that may be either a single file or a directory tree.
pub fn hash_path(path: &Path) -> Result<ContentHash, AssetHashError> {
  if path.is_dir() { hash_directory(path) } else { hash_file(path) }
}

/// Compute a deterministic hash of a directory's contents.
///
/// Covers file contents and the relative layout; timestamps and permissions are ignored.
/// Entries are sorted by path.
pub fn hash_directory(path: &Path) -> Result<ContentHash, AssetHashError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  for entry in WalkDir::new(path).sort_by_file_name() {
    let entry = entry.map_err(|e| AssetHashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .replace('\\', "/");

    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let line = if file_type.is_file() {
      format!("F:{}:{}", rel_path, hash_file(entry_path)?.0)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else {
      continue;
    };

    entries.push((rel_path, line));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, line) in entries {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, AssetHashError> {
  let read_err = |e: std::io::Error| AssetHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}
