//! Batch execution over a rotating credential pool
//!
//! `BatchScheduler::run` is the entry point: it acquires credentials from a
//! `KeyPool`, splits the items into batches, and drives every item through a
//! `TaskExecutor`, which fails over between credentials when an attempt fails.
//! The result is always a structured `RunReport`; only an empty pool is an
//! error.

pub mod error;
pub mod executor;
pub mod report;
pub mod scheduler;

pub use error::{AttemptError, Error, Result};
pub use executor::{Execution, TaskExecutor, WorkItem};
pub use report::{BatchAssignment, ItemOutcome, RunOutcome, RunReport};
pub use scheduler::{BatchScheduler, RunPlan};
