//! Service layer
//!
//! Services contain the worker's business logic. They are trait-based so
//! the job loop can be tested without spawning processes.

mod execution;

pub use execution::{CommandExecutionService, ExecutionService};
