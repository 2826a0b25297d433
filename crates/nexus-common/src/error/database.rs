//! Engine error types.
//!
//! Provides the error taxonomy shared by plan construction, request
//! evaluation and configuration loading.

use std::fmt;
use thiserror::Error;

use crate::types::RunnerId;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Configuration could not be loaded or is invalid.
    InvalidConfig = 0x0003,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Encoded row data is malformed.
    Corruption = 0x0104,

    // Query errors (0x0600 - 0x06FF)
    /// Table not found.
    TableNotFound = 0x0601,
    /// Column not found.
    ColumnNotFound = 0x0602,
    /// Type mismatch.
    TypeMismatch = 0x0603,
    /// Query execution failed.
    ExecutionFailed = 0x0605,
    /// A compiled function reported a failure.
    FunctionFailed = 0x0606,

    // Plan errors (0x0700 - 0x07FF)
    /// Runner plan is structurally invalid.
    InvalidPlan = 0x0700,
    /// A required index does not exist.
    IndexNotFound = 0x0701,
    /// Producer and consumer schemas are incompatible.
    SchemaMismatch = 0x0702,
    /// A runner id could not be resolved.
    RunnerNotFound = 0x0703,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x06 => "Query",
            0x07 => "Plan",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for NexusDB.
///
/// Plan errors are raised while a runner plan is being built and keep
/// it out of service. Query errors are raised while a single request is
/// evaluated. Missing data is never an error.
///
/// # Example
///
/// ```rust
/// use nexus_common::error::{NexusError, NexusResult};
///
/// fn lookup(db: &str, table: &str) -> NexusResult<()> {
///     Err(NexusError::TableNotFound { table: format!("{db}.{table}") })
/// }
/// ```
#[derive(Debug, Error)]
pub enum NexusError {
    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    // ==========================================================================
    // Query Errors
    // ==========================================================================
    /// Table not found.
    #[error("table '{table}' not found")]
    TableNotFound {
        /// The missing table.
        table: String,
    },

    /// Column not found.
    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound {
        /// The missing column.
        column: String,
        /// The table name.
        table: String,
    },

    /// Type mismatch.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type.
        expected: String,
        /// Actual type.
        actual: String,
    },

    /// Query execution failed.
    #[error("query execution failed: {reason}")]
    ExecutionFailed {
        /// Reason for failure.
        reason: String,
    },

    /// A compiled function failed while evaluating one row.
    #[error("function '{function}' failed: {reason}")]
    FunctionFailed {
        /// Function name.
        function: String,
        /// Reason reported by the function.
        reason: String,
    },

    // ==========================================================================
    // Plan Errors
    // ==========================================================================
    /// Runner plan is structurally invalid.
    #[error("invalid plan: {message}")]
    InvalidPlan {
        /// Error message.
        message: String,
    },

    /// Index not found on a table.
    #[error("index '{index}' not found on table '{table}'")]
    IndexNotFound {
        /// The missing index.
        index: String,
        /// The table name.
        table: String,
    },

    /// Schema mismatch between two plan nodes.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// Error message.
        message: String,
    },

    /// Runner not found in a plan.
    #[error("runner {id} not found")]
    RunnerNotFound {
        /// The missing runner.
        id: RunnerId,
    },

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },
}

impl NexusError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } => ErrorCode::Io,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::TableNotFound { .. } => ErrorCode::TableNotFound,
            Self::ColumnNotFound { .. } => ErrorCode::ColumnNotFound,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::ExecutionFailed { .. } => ErrorCode::ExecutionFailed,
            Self::FunctionFailed { .. } => ErrorCode::FunctionFailed,
            Self::InvalidPlan { .. } => ErrorCode::InvalidPlan,
            Self::IndexNotFound { .. } => ErrorCode::IndexNotFound,
            Self::SchemaMismatch { .. } => ErrorCode::SchemaMismatch,
            Self::RunnerNotFound { .. } => ErrorCode::RunnerNotFound,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
        }
    }

    /// Returns true if this error was raised while building a plan.
    ///
    /// Such a plan must never be put into service.
    #[must_use]
    pub const fn is_plan_error(&self) -> bool {
        matches!(self.code().as_u16() >> 8, 0x07)
    }

    /// Creates an invalid plan error.
    #[must_use]
    pub fn invalid_plan(message: impl Into<String>) -> Self {
        Self::InvalidPlan {
            message: message.into(),
        }
    }
}
