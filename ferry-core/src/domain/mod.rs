//! Core domain types
//!
//! This module contains the core domain structures used across Ferry crates.
//! The run record and its transition rules live here so that every state store
//! (in-memory or durable) applies exactly the same semantics.

pub mod error;
pub mod run;
pub mod spec;
pub mod stage;
