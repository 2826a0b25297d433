//! Configuration for the runner engine.
//!
//! This module provides the configuration consumed by plan construction.

mod engine;

pub use engine::{EngineConfig, EngineConfigBuilder, EngineMode};
