//! # nexus-test
//!
//! Integration tests for the NexusDB runner engine.
//!
//! This crate contains:
//! - Shared fixtures: the `t1` table, its request table and a catalog
//! - End-to-end request and batch scenarios (under `tests/`)
//! - Concurrency checks for shared plans

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Tables, catalogs and rows used across tests and benchmarks
pub mod fixtures;

pub use fixtures::*;
