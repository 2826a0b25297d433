//! Type definitions for the runner engine.
//!
//! This module contains the identifier types shared across crates.

mod ids;

pub use ids::{RunnerId, TaskId};
