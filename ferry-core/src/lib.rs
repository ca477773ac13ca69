//! Ferry Core
//!
//! Core types and abstractions for the Ferry model promotion pipeline.
//!
//! This crate contains:
//! - Domain types: the pipeline run record, its stages and the rules that move it forward
//! - DTOs: Data transfer objects for the orchestrator API

pub mod domain;
pub mod dto;
