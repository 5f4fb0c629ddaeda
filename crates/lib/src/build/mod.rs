//! Build expansion.
//!
//! A resolved environment is materialized into a [`Build`]: one [`Team`] per team
//! number, each owning its provisioned networks, hosts, connections and steps.
//!
//! # Submodules
//!
//! - [`expand`] - environment resolution and materialization
//! - [`types`] - the instance objects

pub mod expand;
mod types;

pub use expand::{ExpandError, ResolvedEnvironment, materialize_build, resolve_environment};
pub use types::*;
