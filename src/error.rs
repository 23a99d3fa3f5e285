//! Error types for the transform pipeline

use thiserror::Error;

/// Result type alias for the transform pipeline
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (bad operation name, invalid config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configured transform operation failed
    #[error("Transform '{operation}' failed on '{method}': {source}")]
    TransformExecution {
        /// Operation name
        operation: String,
        /// Method being served
        method: String,
        /// Failure raised by the operation
        #[source]
        source: anyhow::Error,
    },

    /// No route registered for the method
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Call shape does not match the method (unary vs streaming, missing payload)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Handler business logic failed
    #[error("Handler error: {0}")]
    Handler(#[from] anyhow::Error),

    /// Call was cancelled by the host
    #[error("Call cancelled: {0}")]
    Cancelled(String),

    /// Call exceeded its deadline
    #[error("Call timed out: {0}")]
    Timeout(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a transform execution error
    pub fn transform(
        operation: impl Into<String>,
        method: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::TransformExecution {
            operation: operation.into(),
            method: method.into(),
            source,
        }
    }

    /// Map to the RPC status code reported to the caller
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::Cancelled(_) => rpc_status::CANCELLED,
            Self::Protocol(_) | Self::Json(_) => rpc_status::INVALID_ARGUMENT,
            Self::Timeout(_) => rpc_status::DEADLINE_EXCEEDED,
            Self::MethodNotFound(_) => rpc_status::UNIMPLEMENTED,
            Self::Config(_) => rpc_status::FAILED_PRECONDITION,
            Self::TransformExecution { .. } | Self::Handler(_) => rpc_status::INTERNAL,
        }
    }

    /// Returns `true` if the call was aborted by the host rather than failing
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::Timeout(_))
    }
}

/// Standard RPC status codes
pub mod rpc_status {
    /// Cancelled by the caller or host
    pub const CANCELLED: i32 = 1;
    /// Malformed or mismatched request
    pub const INVALID_ARGUMENT: i32 = 3;
    /// Deadline expired before completion
    pub const DEADLINE_EXCEEDED: i32 = 4;
    /// Service misconfigured
    pub const FAILED_PRECONDITION: i32 = 9;
    /// Method not implemented
    pub const UNIMPLEMENTED: i32 = 12;
    /// Internal failure
    pub const INTERNAL: i32 = 13;
}
