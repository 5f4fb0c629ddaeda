//! Turning a fresh snapshot into work.
//!
//! [`calculate_delta`] compares a live snapshot against the one stored for the build and
//! buckets every new or changed node by its scheduling cost. [`calculate_terraform_needs`]
//! derives the per-team infrastructure commands a builder has to run for a plan.

mod delta;
mod terraform;
mod types;

pub use delta::calculate_delta;
pub use terraform::{TerraformCommand, calculate_terraform_needs};
pub use types::{Plan, PlanError, Task, TaskAction};
