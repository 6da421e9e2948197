//! Error types for filter operations

use thiserror::Error;

/// Errors that can occur during filter operations
#[derive(Debug, Error)]
pub enum FilterError {
    /// A constructor parameter is outside its allowed range
    #[error("invalid configuration for '{param}': value '{value}' {constraint}")]
    InvalidConfig {
        /// Parameter name
        param: &'static str,
        /// Invalid value provided
        value: String,
        /// Constraint that was violated
        constraint: String,
    },

    /// `save` or `flush` was called on a filter with no data path configured
    #[error("persistence is disabled: no data path configured")]
    PersistenceDisabled,

    /// A ticker operation violated its precondition
    #[error("ticker state error: {0}")]
    TickerState(&'static str),

    /// The operation is not supported by this filter variant
    #[error("operation '{operation}' is not supported by this filter")]
    Unsupported {
        /// Name of the rejected operation
        operation: &'static str,
    },

    /// Persisted filter data is structurally invalid
    #[error("corrupted filter data: {0}")]
    Corrupted(String),

    /// A filesystem operation failed during save or load
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// `meta.json` could not be serialized or parsed
    #[error("malformed filter metadata: {0}")]
    Meta(#[from] serde_json::Error),
}

/// Result type alias for filter operations
pub type Result<T> = std::result::Result<T, FilterError>;
