/// Unified error types for the comment store
use thiserror::Error;

/// Errors raised by a repository session
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Node or property lookup did not resolve
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// A sibling with the same name already exists
    #[error("Item already exists: {0}")]
    ItemExists(String),

    /// Write rejected by the repository (protected property, root removal, ...)
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Malformed property value (e.g. mixed types in a multi-valued property)
    #[error("Value format error: {0}")]
    ValueFormat(String),

    /// SQLite backend errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored property payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Main error type for comment operations
#[derive(Error, Debug)]
pub enum CommentError {
    /// Caller violated a precondition
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Record identifier does not resolve to a stored comment
    #[error("Comment not found: {0}")]
    NotFound(String),

    /// Any underlying repository failure
    #[error("Storage failure: {0}")]
    Storage(#[from] RepositoryError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CommentError {
    /// Stable error code for callers that report failures
    pub fn code(&self) -> &'static str {
        match self {
            CommentError::InvalidArgument(_) => "INVALID_ARGUMENT",
            CommentError::NotFound(_) => "NOT_FOUND",
            CommentError::Storage(RepositoryError::ItemExists(_)) => "STORAGE_CONFLICT",
            CommentError::Storage(_) => "STORAGE_FAILURE",
            CommentError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether running the same operation again may succeed.
    ///
    /// Two sessions growing the same fresh bucket branch collide on the
    /// sibling name when the second one saves; nothing was persisted for the
    /// loser, so the caller can simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CommentError::Storage(RepositoryError::ItemExists(_)))
    }
}

/// Result type alias for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Result type alias for comment operations
pub type CommentResult<T> = Result<T, CommentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_sibling_collisions_are_retryable() {
        let conflict = CommentError::from(RepositoryError::ItemExists("/doccommentdata/a/b/q".to_string()));
        assert!(conflict.is_retryable());
        assert_eq!(conflict.code(), "STORAGE_CONFLICT");

        let violation = CommentError::from(RepositoryError::ConstraintViolation("jcr:uuid".to_string()));
        assert!(!violation.is_retryable());
        assert_eq!(violation.code(), "STORAGE_FAILURE");

        assert!(!CommentError::NotFound("x".to_string()).is_retryable());
        assert_eq!(CommentError::InvalidArgument("x".to_string()).code(), "INVALID_ARGUMENT");
    }
}
