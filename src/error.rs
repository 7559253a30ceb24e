use thiserror::Error;
use tracing::error;

use crate::types::Rid;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QuarryError>;

/// Errors raised while planning or executing a statement.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QuarryError {
    /// Predicate shape the planner cannot translate into an index or traversal operation.
    #[error("unsupported condition: {0}")]
    UnsupportedCondition(String),
    /// Index referenced by name does not exist.
    #[error("index not found: {0}")]
    IndexNotFound(String),
    /// Type referenced by name does not exist in the schema.
    #[error("type not found: {0}")]
    TypeNotFound(String),
    /// Cluster referenced by name or id does not exist.
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),
    /// Pattern cannot be ordered into a valid traversal schedule.
    #[error("pattern schedule unsatisfiable: {0}")]
    ScheduleUnsatisfiable(String),
    /// Execution was cancelled through the context's cancel token.
    #[error("execution cancelled")]
    Cancelled,
    /// Execution exceeded its configured time limit.
    #[error("execution timed out after {limit_ms} ms")]
    Timeout {
        /// Configured limit in milliseconds.
        limit_ms: u64,
    },
    /// Attempted to mutate a tuple bound to a stored record.
    #[error("record {0} is immutable in this context")]
    ImmutableRecord(Rid),
    /// Invalid argument or statement shape.
    #[error("invalid argument: {0}")]
    Invalid(String),
    /// Failure reported by a storage collaborator.
    #[error("storage error: {0}")]
    Storage(String),
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QuarryError {
    /// Returns a stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            QuarryError::UnsupportedCondition(_) => "UnsupportedCondition",
            QuarryError::IndexNotFound(_) => "IndexNotFound",
            QuarryError::TypeNotFound(_) => "TypeNotFound",
            QuarryError::ClusterNotFound(_) => "ClusterNotFound",
            QuarryError::ScheduleUnsatisfiable(_) => "ScheduleUnsatisfiable",
            QuarryError::Cancelled => "Cancelled",
            QuarryError::Timeout { .. } => "Timeout",
            QuarryError::ImmutableRecord(_) => "ImmutableRecord",
            QuarryError::Invalid(_) => "Invalid",
            QuarryError::Storage(_) => "Storage",
            QuarryError::Config(_) => "Config",
            QuarryError::Internal(_) => "Internal",
        }
    }

    /// Returns true for errors raised while building a plan, before any tuple is produced.
    pub fn is_plan_time(&self) -> bool {
        matches!(
            self,
            QuarryError::UnsupportedCondition(_)
                | QuarryError::IndexNotFound(_)
                | QuarryError::TypeNotFound(_)
                | QuarryError::ClusterNotFound(_)
                | QuarryError::ScheduleUnsatisfiable(_)
        )
    }

    /// Builds an internal-invariant error and logs it.
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(%message, "internal invariant violated");
        QuarryError::Internal(message)
    }
}

impl From<toml::de::Error> for QuarryError {
    fn from(err: toml::de::Error) -> Self {
        QuarryError::Config(err.to_string())
    }
}
