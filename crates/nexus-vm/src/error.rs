//! Runner engine error types.
//!
//! Errors fall into two groups. Plan errors are raised by the plan builder
//! and keep a plan out of service. Evaluation errors are raised while one
//! request is being served. Missing data is never reported here; it is
//! represented by empty handlers.

use nexus_common::error::{ErrorCode, NexusError};
use nexus_common::types::RunnerId;
use thiserror::Error;

use crate::schema::DataType;

/// Runner engine error type.
#[derive(Debug, Error)]
pub enum VmError {
    /// The plan is structurally invalid.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// A producer id does not name a runner of the plan.
    #[error("runner {consumer} references unknown producer {producer}")]
    UnknownProducer {
        /// The consuming runner.
        consumer: RunnerId,
        /// The missing producer.
        producer: RunnerId,
    },

    /// A runner was given a producer of the wrong handler kind.
    #[error("runner {consumer} expects a {expected} producer, got {actual} from runner {producer}")]
    ProducerKind {
        /// The consuming runner.
        consumer: RunnerId,
        /// The offending producer.
        producer: RunnerId,
        /// Expected handler kind.
        expected: &'static str,
        /// Actual handler kind.
        actual: &'static str,
    },

    /// A required index does not exist.
    #[error("index '{index}' not found on table '{table}'")]
    IndexNotFound {
        /// The missing index.
        index: String,
        /// The table name.
        table: String,
    },

    /// Table not found in the catalog.
    #[error("table '{db}.{table}' not found")]
    TableNotFound {
        /// Database name.
        db: String,
        /// Table name.
        table: String,
    },

    /// Producer and consumer schemas disagree.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Column not found in a schema.
    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    /// Runner id lookup failed.
    #[error("runner {0} not found")]
    RunnerNotFound(RunnerId),

    /// A value was read through an accessor of another kind.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type.
        expected: DataType,
        /// Actual type, or "NULL".
        actual: String,
    },

    /// Encoded row bytes are malformed.
    #[error("malformed row: {0}")]
    Codec(String),

    /// A compiled function failed on one evaluation step.
    #[error("function '{function}' failed: {reason}")]
    Function {
        /// Function name.
        function: String,
        /// Reason reported by the function.
        reason: String,
    },

    /// A request-mode plan was run without a request row.
    #[error("runner {0} requires a request row")]
    MissingRequest(RunnerId),

    /// Other evaluation failure.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Error raised by a shared component.
    #[error(transparent)]
    Common(#[from] NexusError),
}

impl VmError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidPlan(_) | Self::UnknownProducer { .. } | Self::ProducerKind { .. } => {
                ErrorCode::InvalidPlan
            }
            Self::IndexNotFound { .. } => ErrorCode::IndexNotFound,
            Self::TableNotFound { .. } => ErrorCode::TableNotFound,
            Self::SchemaMismatch(_) => ErrorCode::SchemaMismatch,
            Self::ColumnNotFound(_) => ErrorCode::ColumnNotFound,
            Self::RunnerNotFound(_) => ErrorCode::RunnerNotFound,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::Codec(_) => ErrorCode::Corruption,
            Self::Function { .. } => ErrorCode::FunctionFailed,
            Self::MissingRequest(_) | Self::Execution(_) => ErrorCode::ExecutionFailed,
            Self::Common(e) => e.code(),
        }
    }

    /// Returns true if this error was raised while building a plan.
    #[must_use]
    pub fn is_plan_error(&self) -> bool {
        self.code().category() == "Plan"
    }

    /// Creates an invalid plan error.
    pub fn invalid_plan(message: impl Into<String>) -> Self {
        Self::InvalidPlan(message.into())
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: DataType, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected,
            actual: actual.into(),
        }
    }
}

impl From<VmError> for NexusError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::Common(inner) => inner,
            VmError::IndexNotFound { index, table } => NexusError::IndexNotFound { index, table },
            VmError::TableNotFound { db, table } => NexusError::TableNotFound {
                table: format!("{db}.{table}"),
            },
            VmError::SchemaMismatch(message) => NexusError::SchemaMismatch { message },
            VmError::RunnerNotFound(id) => NexusError::RunnerNotFound { id },
            VmError::TypeMismatch { expected, actual } => NexusError::TypeMismatch {
                expected: expected.to_string(),
                actual,
            },
            VmError::Codec(message) => NexusError::Corruption { message },
            VmError::Function { function, reason } => {
                NexusError::FunctionFailed { function, reason }
            }
            VmError::ColumnNotFound(column) => NexusError::ColumnNotFound {
                column,
                table: String::new(),
            },
            e @ (VmError::InvalidPlan(_)
            | VmError::UnknownProducer { .. }
            | VmError::ProducerKind { .. }) => NexusError::invalid_plan(e.to_string()),
            e @ (VmError::MissingRequest(_) | VmError::Execution(_)) => {
                NexusError::ExecutionFailed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Runner engine result type.
pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_errors() {
        let err = VmError::UnknownProducer {
            consumer: RunnerId::new(3),
            producer: RunnerId::new(9),
        };
        assert!(err.is_plan_error());
        assert_eq!(err.to_string(), "runner 3 references unknown producer 9");

        let err = VmError::IndexNotFound {
            index: "index2".into(),
            table: "t1".into(),
        };
        assert!(err.is_plan_error());
    }

    #[test]
    fn test_evaluation_errors() {
        let err = VmError::Function {
            function: "sum".into(),
            reason: "bad input".into(),
        };
        assert!(!err.is_plan_error());
        assert_eq!(err.code(), ErrorCode::FunctionFailed);
    }

    #[test]
    fn test_into_nexus_error_keeps_code() {
        let err = VmError::type_mismatch(DataType::Int64, "VARCHAR");
        let code = err.code();
        let nexus: NexusError = err.into();
        assert_eq!(nexus.code(), code);

        let err = VmError::invalid_plan("null producer");
        let nexus: NexusError = err.into();
        assert!(nexus.is_plan_error());
    }
}
