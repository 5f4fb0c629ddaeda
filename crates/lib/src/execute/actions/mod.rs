//! Local process actions used by jobs and the local executor.

pub mod cmd;

pub use cmd::{execute_cmd, execute_program};
