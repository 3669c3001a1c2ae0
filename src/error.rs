/// Error types for HLCS operations.
///
/// Every fallible operation in the crate returns [`HlcsResult`]. The
/// variants follow the failure taxonomy the orchestrator relies on:
/// invalid input is surfaced immediately, storage failures surface on
/// write paths, and upstream failures (including timeouts) are always
/// recoverable at the orchestration boundary.
use thiserror::Error;

/// The main error type for HLCS operations.
#[derive(Error, Debug)]
pub enum HlcsError {
    /// Caller-supplied data violates a precondition
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// Description of the violated precondition
        reason: String,
    },

    /// A batch call supplied a metadata list whose length differs from the contents
    #[error("Arity mismatch: {expected} contents but {actual} metadata entries")]
    ArityMismatch {
        /// Number of contents supplied
        expected: usize,
        /// Number of metadata entries supplied
        actual: usize,
    },

    /// The vector store or a snapshot file rejected an operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// An external service (classifier, generator, evaluator) failed
    #[error("Upstream service '{service}' failed: {reason}")]
    Upstream {
        /// Logical name of the service
        service: String,
        /// Failure description
        reason: String,
    },

    /// An external call exceeded its deadline
    #[error("Call to '{service}' timed out after {after_ms}ms")]
    Timeout {
        /// Logical name of the service
        service: String,
        /// Configured deadline
        after_ms: u64,
    },

    /// A record id was not present in the store
    #[error("Record '{id}' not found")]
    NotFound {
        /// The missing id
        id: String,
    },

    /// Serialization error when converting data to/from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HlcsError {
    /// Shorthand for [`HlcsError::InvalidInput`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        HlcsError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`HlcsError::Upstream`].
    pub fn upstream(service: impl Into<String>, reason: impl Into<String>) -> Self {
        HlcsError::Upstream {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Whether the orchestrator may recover from this error by falling back.
    ///
    /// Timeouts are a specialization of upstream failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HlcsError::Upstream { .. } | HlcsError::Timeout { .. })
    }

    /// Whether this error reports bad caller input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            HlcsError::InvalidInput { .. } | HlcsError::ArityMismatch { .. }
        )
    }
}

/// Result type alias for HLCS operations.
pub type HlcsResult<T> = Result<T, HlcsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_recoverable() {
        let err = HlcsError::Timeout {
            service: "classifier".into(),
            after_ms: 50,
        };
        assert!(err.is_recoverable());
        assert!(!err.is_invalid_input());
        assert_eq!(err.to_string(), "Call to 'classifier' timed out after 50ms");
    }

    #[test]
    fn test_arity_mismatch_is_invalid_input() {
        let err = HlcsError::ArityMismatch {
            expected: 3,
            actual: 2,
        };
        assert!(err.is_invalid_input());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_storage_not_recoverable() {
        assert!(!HlcsError::Storage("disk full".into()).is_recoverable());
    }
}
