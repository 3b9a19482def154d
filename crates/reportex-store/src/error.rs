use thiserror::Error;

/// Error types for collaborator operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Version conflict: {0}")]
    Conflict(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Whether a retry at the transport layer can change the outcome.
    ///
    /// Authorization rejections and addressing errors are definitive; only
    /// reachability and backend hiccups are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Backend(_))
    }

    /// Whether the remote rejected the caller's authorization (HTTP 403).
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::unreachable("connection refused").is_transient());
        assert!(StoreError::backend("500").is_transient());
        assert!(!StoreError::forbidden("403").is_transient());
        assert!(!StoreError::not_found("Bundle", "b-1").is_transient());
        assert!(!StoreError::conflict("stale version").is_transient());
    }

    #[test]
    fn test_forbidden_classification() {
        assert!(StoreError::forbidden("403").is_forbidden());
        assert!(!StoreError::unreachable("timeout").is_forbidden());
    }

    #[test]
    fn test_not_found_message() {
        let err = StoreError::not_found("Bundle", "b-1");
        assert_eq!(err.to_string(), "Resource not found: Bundle/b-1");
    }
}
