//! Types shared by the cubicle crates.

pub mod types;

pub use types::{ExecutionResult, TIMEOUT_EXIT_CODE};
