//! Content-addressed build state.
//!
//! A [`Snapshot`] is the checksummed metadata of every object in a build together with
//! the dependency graph between them. [`SnapshotBuilder`] produces one from a
//! materialized build; [`SnapshotStore`] persists the last one per build.

mod builder;
mod storage;
mod types;

pub use builder::SnapshotBuilder;
pub use storage::{SnapshotStore, StoreError};
pub use types::*;
