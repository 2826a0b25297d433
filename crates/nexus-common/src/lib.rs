//! # nexus-common
//!
//! Common types, errors, and utilities for the NexusDB runner engine.
//!
//! This crate provides the foundational types shared by the engine crates:
//!
//! - **Types**: Core identifiers (`RunnerId`, `TaskId`)
//! - **Errors**: Unified error handling with `NexusError`
//! - **Config**: Engine configuration (`EngineConfig`)
//! - **Constants**: Row format and frame sentinels
//!
//! ## Example
//!
//! ```rust
//! use nexus_common::config::EngineConfig;
//! use nexus_common::error::NexusResult;
//! use nexus_common::types::RunnerId;
//!
//! fn example() -> NexusResult<()> {
//!     let config = EngineConfig::request();
//!     config.validate()?;
//!     let root = RunnerId::new(0);
//!     assert!(root.is_valid());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{EngineConfig, EngineMode};
pub use constants::*;
pub use error::{ErrorCode, NexusError, NexusResult};
pub use types::{RunnerId, TaskId};
