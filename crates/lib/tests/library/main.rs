//! Integration tests for rangeforge-lib.

mod common;
mod execute_tests;
mod merge_tests;
mod plan_tests;
mod snapshot_tests;
