//! Service Module
//!
//! Business logic layer for the orchestrator. The [`Orchestrator`] drives runs
//! through the stage executors and is the only writer of run records.

pub mod backoff;
pub mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorError};
