use thiserror::Error;

use crate::status::StatusCode;

/// Error taxonomy of the report exchange.
///
/// Every transaction step converts the error it observes into exactly one of
/// these variants before the step returns; the protocol layer maps the variant
/// to the status code that is recorded on the task.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Search bundle rejected: {0}")]
    Validation(String),

    #[error("Not allowed by remote: {0}")]
    NotAllowed(String),

    #[error("Remote not reachable: {0}")]
    NotReachable(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("No receipt received for task '{task_id}'")]
    ReceiptMissing { task_id: String },

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExchangeError {
    /// Create a new Validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Create a new NotAllowed error
    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::NotAllowed(message.into())
    }

    /// Create a new NotReachable error
    pub fn not_reachable(message: impl Into<String>) -> Self {
        Self::NotReachable(message.into())
    }

    /// Create a new Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a new ReceiptMissing error
    pub fn receipt_missing(task_id: impl Into<String>) -> Self {
        Self::ReceiptMissing {
            task_id: task_id.into(),
        }
    }

    /// Create a new Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether retrying the whole transaction could succeed.
    ///
    /// Only transport-level conditions qualify; validation and protocol
    /// violations are terminal by definition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReachable(_) | Self::Storage(_))
    }

    /// The status code a sender-side transaction records for this error.
    ///
    /// A policy rejection refuses the counterpart's bundle, so it reports as
    /// `not-allowed`; a local persistence failure reports in the sender's
    /// receipt space; everything else that is not an explicit authorization
    /// or receipt condition reports as `not-reachable`.
    pub fn send_status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::NotAllowed(_) => StatusCode::NotAllowed,
            Self::ReceiptMissing { .. } => StatusCode::ReceiptMissing,
            Self::Storage(_) => StatusCode::ReceiptError,
            _ => StatusCode::NotReachable,
        }
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::NotAllowed(_) => ErrorCategory::NotAllowed,
            Self::NotReachable(_) => ErrorCategory::NotReachable,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::ReceiptMissing { .. } => ErrorCategory::Receipt,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Json(_) => ErrorCategory::Serialization,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotAllowed,
    NotReachable,
    Protocol,
    Receipt,
    Storage,
    Configuration,
    Serialization,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotAllowed => write!(f, "not_allowed"),
            Self::NotReachable => write!(f, "not_reachable"),
            Self::Protocol => write!(f, "protocol"),
            Self::Receipt => write!(f, "receipt"),
            Self::Storage => write!(f, "storage"),
            Self::Configuration => write!(f, "configuration"),
            Self::Serialization => write!(f, "serialization"),
        }
    }
}

/// Convenience result type for exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;
