//! The contract every configuration entity implements.

use std::collections::BTreeMap;

use super::policy::{ConflictPolicy, ConflictStrategy, OnConflict};
use crate::merge::MergeError;
use crate::provenance::Provenance;

/// Field-wise overlay: replace `self` with `layer` wherever `layer` holds a non-zero value.
///
/// Lists are replaced when the layer's list is non-empty, or concatenated when `append`
/// is set. Maps are merged key by key.
pub trait Overlay {
  fn overlay(&mut self, layer: &Self, append: bool);
}

impl Overlay for String {
  fn overlay(&mut self, layer: &Self, _append: bool) {
    if !layer.is_empty() {
      self.clone_from(layer);
    }
  }
}

impl Overlay for bool {
  fn overlay(&mut self, layer: &Self, _append: bool) {
    if *layer {
      *self = true;
    }
  }
}

macro_rules! overlay_numeric {
  ($($ty:ty),*) => {
    $(
      impl Overlay for $ty {
        fn overlay(&mut self, layer: &Self, _append: bool) {
          if *layer != 0 {
            *self = *layer;
          }
        }
      }
    )*
  };
}

overlay_numeric!(u16, u32, u64);

impl<T: Clone> Overlay for Option<T> {
  fn overlay(&mut self, layer: &Self, _append: bool) {
    if layer.is_some() {
      self.clone_from(layer);
    }
  }
}

impl<T: Clone> Overlay for Vec<T> {
  fn overlay(&mut self, layer: &Self, append: bool) {
    if append {
      self.extend(layer.iter().cloned());
    } else if !layer.is_empty() {
      self.clone_from(layer);
    }
  }
}

impl<V: Clone> Overlay for BTreeMap<String, V> {
  fn overlay(&mut self, layer: &Self, _append: bool) {
    for (key, value) in layer {
      self.insert(key.clone(), value.clone());
    }
  }
}

/// Uniform contract for objects the merge engine reconciles.
///
/// Implemented for each concrete entity through [`impl_mergeable!`], which lists the
/// fields taking part in an overlay. Identity, policy and provenance are never overlaid.
pub trait Mergeable: Clone {
  /// Collection name, used in paths and error messages ("hosts", "scripts", ...).
  fn kind() -> &'static str;

  fn identity(&self) -> &str;

  fn on_conflict(&self) -> Option<&OnConflict>;

  fn set_on_conflict(&mut self, on_conflict: Option<OnConflict>);

  fn provenance(&self) -> &Provenance;

  fn set_provenance(&mut self, provenance: Provenance);

  /// Overlay `layer`'s non-zero fields onto `self`.
  fn overlay(&mut self, layer: &Self, append: bool);

  /// Replace every field with `other`'s.
  fn swap(&mut self, other: Self)
  where
    Self: Sized,
  {
    *self = other;
  }

  /// Resolved path of the definition, e.g. `/hosts/web`.
  fn path(&self) -> String {
    format!("/{}/{}", Self::kind(), self.identity())
  }

  /// The declared policy, parsed. An object without a conflict block uses the default.
  fn conflict_policy(&self) -> Result<ConflictPolicy, MergeError> {
    let Some(declared) = self.on_conflict() else {
      return Ok(ConflictPolicy::default());
    };
    let strategy = ConflictStrategy::parse(&declared.strategy).ok_or_else(|| MergeError::InvalidStrategy {
      kind: Self::kind(),
      id: self.identity().to_string(),
      strategy: declared.strategy.clone(),
    })?;
    Ok(ConflictPolicy {
      strategy,
      append: declared.append,
    })
  }
}

/// Implement [`Mergeable`] for a struct with `id`, `on_conflict` and `provenance` fields.
macro_rules! impl_mergeable {
  ($ty:ty, $kind:literal, [$($field:ident),* $(,)?]) => {
    impl $crate::config::Mergeable for $ty {
      fn kind() -> &'static str {
        $kind
      }

      fn identity(&self) -> &str {
        &self.id
      }

      fn on_conflict(&self) -> Option<&$crate::config::OnConflict> {
        self.on_conflict.as_ref()
      }

      fn set_on_conflict(&mut self, on_conflict: Option<$crate::config::OnConflict>) {
        self.on_conflict = on_conflict;
      }

      fn provenance(&self) -> &$crate::provenance::Provenance {
        &self.provenance
      }

      fn set_provenance(&mut self, provenance: $crate::provenance::Provenance) {
        self.provenance = provenance;
      }

      fn overlay(&mut self, layer: &Self, append: bool) {
        $( $crate::config::Overlay::overlay(&mut self.$field, &layer.$field, append); )*
      }
    }
  };
}

pub(crate) use impl_mergeable;
