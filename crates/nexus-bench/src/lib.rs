//! NexusDB Runner Benchmarks
//!
//! This crate contains benchmarks for the runner engine:
//! - Request-mode window aggregation over stored partitions
//! - Request union
//! - Batch window aggregation
//! - Plan construction
//!
//! Run benchmarks with:
//! ```bash
//! cargo bench -p nexus-bench
//! ```

pub mod utils;
