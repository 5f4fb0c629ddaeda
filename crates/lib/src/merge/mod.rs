//! Layered configuration merging.
//!
//! [`smart_merge`] reconciles one object with the object it shadows according to the
//! overlay's declared policy. [`Layer::mask`] applies it across every collection of a
//! layer, so N layers fold left to right into one resolved tree.

mod layer;

pub use layer::{Layer, Unresolved};

use thiserror::Error;
use tracing::trace;

use crate::config::{ConflictStrategy, Mergeable};
use crate::provenance::Provenance;

#[derive(Debug, Error)]
pub enum MergeError {
  #[error("invalid conflict strategy {strategy:?} on {kind} {id}")]
  InvalidStrategy {
    kind: &'static str,
    id: String,
    strategy: String,
  },

  #[error("merge conflict: {kind} {layer_id} from {layer_file} conflicts with {kind} {base_id} from {base_file}")]
  Conflict {
    kind: &'static str,
    base_id: String,
    base_file: String,
    layer_id: String,
    layer_file: String,
  },

  #[error("cannot swap {found} {id} into a {expected} object")]
  TypeMismatch {
    expected: &'static str,
    found: &'static str,
    id: String,
  },
}

/// Reconcile `layer` with the `base` object it shadows.
///
/// The layer's conflict policy decides the outcome. `append_slices` forces list
/// concatenation for the default strategy even when the layer did not ask for it.
pub fn smart_merge<T: Mergeable>(mut base: T, layer: T, append_slices: bool) -> Result<T, MergeError> {
  let policy = layer.conflict_policy()?;
  let append = append_slices || policy.append;

  trace!(
    kind = T::kind(),
    id = base.identity(),
    strategy = %policy.strategy,
    append,
    "merging object"
  );

  match policy.strategy {
    ConflictStrategy::Default => {
      let provenance = Provenance::layered(layer.provenance(), base.provenance());
      base.overlay(&layer, append);
      base.set_provenance(provenance);
      Ok(base)
    }
    ConflictStrategy::Overwrite => {
      let original_policy = base.on_conflict().cloned();
      let provenance = Provenance::layered(layer.provenance(), base.provenance());
      base.swap(layer);
      base.set_on_conflict(original_policy);
      base.set_provenance(provenance);
      Ok(base)
    }
    ConflictStrategy::Inherit => {
      let provenance = Provenance::layered(layer.provenance(), base.provenance());
      let mut merged = layer;
      merged.overlay(&base, append);
      base.swap(merged);
      base.set_provenance(provenance);
      Ok(base)
    }
    ConflictStrategy::Skip => Ok(base),
    ConflictStrategy::Panic => Err(MergeError::Conflict {
      kind: T::kind(),
      base_id: base.identity().to_string(),
      base_file: base.provenance().current_file(),
      layer_id: layer.identity().to_string(),
      layer_file: layer.provenance().current_file(),
    }),
  }
}
