//! Metric definitions for cubicle.
//!
//! Thin layer over the `metrics` facade: names live in [`definitions`] so every
//! crate records under the same keys. Nothing is exported until the embedding
//! process installs a recorder.
//!
//! ```rust,ignore
//! use cubicle_metrics::{counter, labels, sandbox};
//!
//! counter!(sandbox::COMMAND_EXECUTIONS_TOTAL, labels::MODE => "buffered").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
