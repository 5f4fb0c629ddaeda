//! Snapshot persistence.
//!
//! Each build keeps its last snapshot in an embedded database:
//!
//! ```text
//! {data_dir}/builds/<build-slug>/
//! ├── build.db            # metadata, edges, snapshot checksum
//! └── teams/<n>/...       # per-team working directories and connection descriptors
//! ```
//!
//! Saving replaces the previous snapshot in a single write transaction.

use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use thiserror::Error;
use tracing::{debug, info};

use super::types::{Metadata, Snapshot, StoredSnapshot};
use crate::consts::BUILD_DB_FILENAME;
use crate::platform::paths::build_dir;
use crate::util::hash::Checksum;

/// Key: node ID, value: JSON-encoded [`Metadata`].
const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Key: edge ordinal, value: JSON-encoded `(parent, child)`.
const EDGES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("edges");

/// Snapshot-level values: `build_id`, `checksum`.
const INFO_TABLE: TableDefinition<&str, &str> = TableDefinition::new("info");

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to create {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("database error: {0}")]
  Database(#[from] redb::DatabaseError),

  #[error("transaction error: {0}")]
  Transaction(#[from] redb::TransactionError),

  #[error("table error: {0}")]
  Table(#[from] redb::TableError),

  #[error("storage error: {0}")]
  Storage(#[from] redb::StorageError),

  #[error("commit error: {0}")]
  Commit(#[from] redb::CommitError),

  #[error("corrupt record {key}: {source}")]
  Decode {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to encode record {key}: {source}")]
  Encode {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("stored checksum {0:?} is not a hex value")]
  BadChecksum(String),
}

/// The `build.db` of one build.
pub struct SnapshotStore {
  db: Database,
  path: PathBuf,
}

impl SnapshotStore {
  /// Open (or create) the database at `path`.
  pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let db = Database::create(&path)?;
    let txn = db.begin_write()?;
    {
      txn.open_table(METADATA_TABLE)?;
      txn.open_table(EDGES_TABLE)?;
      txn.open_table(INFO_TABLE)?;
    }
    txn.commit()?;

    debug!(path = %path.display(), "snapshot store opened");
    Ok(Self { db, path })
  }

  /// Where the store of `build_id` lives under `data_dir`.
  pub fn location(data_dir: &Path, build_id: &str) -> PathBuf {
    build_dir(data_dir, build_id).join(BUILD_DB_FILENAME)
  }

  /// Open the store of `build_id` under `data_dir`.
  pub fn for_build(data_dir: &Path, build_id: &str) -> Result<Self, StoreError> {
    Self::open(Self::location(data_dir, build_id))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Replace the stored snapshot with `snapshot`.
  pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
    let txn = self.db.begin_write()?;
    txn.delete_table(METADATA_TABLE)?;
    txn.delete_table(EDGES_TABLE)?;
    {
      let mut metadata = txn.open_table(METADATA_TABLE)?;
      for (id, meta) in &snapshot.metastore {
        let bytes = serde_json::to_vec(meta).map_err(|source| StoreError::Encode { key: id.clone(), source })?;
        metadata.insert(id.as_str(), bytes.as_slice())?;
      }

      let mut edges = txn.open_table(EDGES_TABLE)?;
      for (ordinal, edge) in snapshot.dag.edges().iter().enumerate() {
        let bytes = serde_json::to_vec(edge).map_err(|source| StoreError::Encode {
          key: format!("{} -> {}", edge.0, edge.1),
          source,
        })?;
        edges.insert(ordinal as u64, bytes.as_slice())?;
      }

      let mut info = txn.open_table(INFO_TABLE)?;
      info.insert("build_id", snapshot.build_id.as_str())?;
      info.insert("checksum", snapshot.checksum.to_string().as_str())?;
    }
    txn.commit()?;

    info!(
      build = %snapshot.build_id,
      nodes = snapshot.len(),
      checksum = %snapshot.checksum,
      "snapshot saved"
    );
    Ok(())
  }

  /// Read the stored snapshot, if one was ever saved.
  pub fn load(&self) -> Result<Option<StoredSnapshot>, StoreError> {
    let txn = self.db.begin_read()?;
    let info = txn.open_table(INFO_TABLE)?;

    let Some(checksum) = info.get("checksum")? else {
      return Ok(None);
    };
    let checksum_text = checksum.value().to_string();
    let checksum = u64::from_str_radix(&checksum_text, 16)
      .map(Checksum)
      .map_err(|_| StoreError::BadChecksum(checksum_text.clone()))?;
    let build_id = info.get("build_id")?.map(|v| v.value().to_string()).unwrap_or_default();

    let table = txn.open_table(METADATA_TABLE)?;
    let mut stored = StoredSnapshot {
      build_id,
      checksum,
      metastore: Default::default(),
      edges: Vec::with_capacity(txn.open_table(EDGES_TABLE)?.len()? as usize),
    };
    for entry in table.iter()? {
      let (key, value) = entry?;
      let id = key.value().to_string();
      let meta: Metadata =
        serde_json::from_slice(value.value()).map_err(|source| StoreError::Decode { key: id.clone(), source })?;
      stored.metastore.insert(id, meta);
    }

    let edges = txn.open_table(EDGES_TABLE)?;
    for entry in edges.iter()? {
      let (key, value) = entry?;
      let edge: (String, String) = serde_json::from_slice(value.value()).map_err(|source| StoreError::Decode {
        key: format!("edge {}", key.value()),
        source,
      })?;
      stored.edges.push(edge);
    }

    Ok(Some(stored))
  }
}
