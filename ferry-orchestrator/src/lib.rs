//! Ferry Orchestrator
//!
//! Drives model promotion runs through Train, Promote, Deploy and Validate:
//! - `repository`: the Job State Store (in-memory and PostgreSQL)
//! - `stage`: one executor per pipeline stage
//! - `service`: the orchestrator owning retry, cancellation and resume
//! - `api`: the HTTP surface used by the client and CLI

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
pub mod stage;

#[cfg(test)]
mod testing;
