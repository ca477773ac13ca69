//! Data Transfer Objects for the orchestrator API
//!
//! Lightweight request/response shapes exchanged between the orchestrator
//! service, its client and the CLI.

pub mod run;
