//! Configuration object model.
//!
//! The typed entities a layer declares, the [`Mergeable`] contract the merge engine works
//! against, conflict policies, and validators.

mod object;
mod policy;
mod types;
pub mod validate;

pub use object::{Mergeable, Overlay};
pub use policy::{ConflictPolicy, ConflictStrategy, OnConflict};
pub use types::{
  Command, DnsRecord, Environment, Host, HostDependency, Identity, IncludedNetwork, Network, ProvisionerKind,
  ProvisionerRef, RemoteFile, Script,
};

use serde::Serialize;

use crate::merge::MergeError;

/// A configuration object of any kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "object", rename_all = "snake_case")]
pub enum ConfigObject {
  Environment(Environment),
  Host(Host),
  Network(Network),
  Identity(Identity),
  Script(Script),
  Command(Command),
  RemoteFile(RemoteFile),
  DnsRecord(DnsRecord),
}

macro_rules! dispatch {
  ($self:expr, $obj:ident => $body:expr) => {
    match $self {
      ConfigObject::Environment($obj) => $body,
      ConfigObject::Host($obj) => $body,
      ConfigObject::Network($obj) => $body,
      ConfigObject::Identity($obj) => $body,
      ConfigObject::Script($obj) => $body,
      ConfigObject::Command($obj) => $body,
      ConfigObject::RemoteFile($obj) => $body,
      ConfigObject::DnsRecord($obj) => $body,
    }
  };
}

impl ConfigObject {
  pub fn kind(&self) -> &'static str {
    fn kind_of<T: Mergeable>(_: &T) -> &'static str {
      T::kind()
    }
    dispatch!(self, obj => kind_of(obj))
  }

  pub fn identity(&self) -> &str {
    dispatch!(self, obj => obj.identity())
  }

  pub fn path(&self) -> String {
    dispatch!(self, obj => obj.path())
  }

  pub fn conflict_policy(&self) -> Result<ConflictPolicy, MergeError> {
    dispatch!(self, obj => obj.conflict_policy())
  }

  /// Replace this object's fields with `other`'s. Both must be the same kind.
  pub fn swap(&mut self, other: ConfigObject) -> Result<(), MergeError> {
    match (self, other) {
      (ConfigObject::Environment(a), ConfigObject::Environment(b)) => a.swap(b),
      (ConfigObject::Host(a), ConfigObject::Host(b)) => a.swap(b),
      (ConfigObject::Network(a), ConfigObject::Network(b)) => a.swap(b),
      (ConfigObject::Identity(a), ConfigObject::Identity(b)) => a.swap(b),
      (ConfigObject::Script(a), ConfigObject::Script(b)) => a.swap(b),
      (ConfigObject::Command(a), ConfigObject::Command(b)) => a.swap(b),
      (ConfigObject::RemoteFile(a), ConfigObject::RemoteFile(b)) => a.swap(b),
      (ConfigObject::DnsRecord(a), ConfigObject::DnsRecord(b)) => a.swap(b),
      (this, other) => {
        return Err(MergeError::TypeMismatch {
          expected: this.kind(),
          found: other.kind(),
          id: other.identity().to_string(),
        });
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn swap_between_same_kinds_replaces_fields() {
    let mut obj = ConfigObject::Host(Host {
      id: "web".into(),
      hostname: "old".into(),
      ..Default::default()
    });
    obj
      .swap(ConfigObject::Host(Host {
        id: "web".into(),
        hostname: "new".into(),
        ..Default::default()
      }))
      .unwrap();
    match obj {
      ConfigObject::Host(host) => assert_eq!(host.hostname, "new"),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn swap_between_kinds_is_a_type_mismatch() {
    let mut obj = ConfigObject::Host(Host {
      id: "web".into(),
      ..Default::default()
    });
    let err = obj
      .swap(ConfigObject::Script(Script {
        id: "web".into(),
        ..Default::default()
      }))
      .unwrap_err();
    assert!(matches!(
      err,
      MergeError::TypeMismatch {
        expected: "hosts",
        found: "scripts",
        ..
      }
    ));
  }

  #[test]
  fn path_and_kind_dispatch() {
    let obj = ConfigObject::RemoteFile(RemoteFile {
      id: "motd".into(),
      ..Default::default()
    });
    assert_eq!(obj.kind(), "files");
    assert_eq!(obj.path(), "/files/motd");
  }
}
