//! rangeforge-lib: core types and logic for RangeForge
//!
//! This crate turns layered competition configuration into provisioned infrastructure:
//! - `load` / `merge`: read layer files and fold them into one resolved layer
//! - `build`: expand an environment into teams, networks, hosts and steps
//! - `snapshot`: the dependency graph of a build, with per-node checksums
//! - `plan`: the delta between a live snapshot and the stored one
//! - `execute`: run a plan bucket by bucket on a pool of workers

pub mod build;
pub mod config;
pub mod consts;
pub mod dag;
pub mod execute;
pub mod issue;
pub mod load;
pub mod merge;
pub mod plan;
pub mod platform;
pub mod provenance;
pub mod snapshot;
pub mod util;
