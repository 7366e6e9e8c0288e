//! Error types for Recordar
//!
//! This module defines the crate-wide error type. The KV cache core keeps
//! its own error enum ([`crate::kv::CacheError`]) because cache failures are
//! handled internally and must never surface to user requests.

use thiserror::Error;

/// Result type alias for Recordar operations
pub type Result<T> = std::result::Result<T, RecordarError>;

/// Error type for all Recordar operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordarError {
    /// A request parameter failed validation
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name as it appears in the request
        name: String,
        /// Reason the value was rejected
        reason: String,
    },

    /// Shape mismatch between tensors
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// Model configuration is inconsistent
    #[error("Invalid model config: {reason}")]
    InvalidModelConfig {
        /// Reason for invalidity
        reason: String,
    },

    /// Requested model is not loaded
    #[error("Model '{0}' not found")]
    ModelNotFound(String),

    /// Prompt produced no tokens
    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    /// Cache subsystem failure surfaced through the runtime
    #[error("Cache error: {0}")]
    Cache(#[from] crate::kv::CacheError),

    /// Server startup or I/O failure
    #[error("Server error: {0}")]
    Server(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RecordarError::InvalidParameter {
            name: "kv_bits".to_string(),
            reason: "must be 4 or 8".to_string(),
        };
        assert!(err.to_string().contains("kv_bits"));
        assert!(err.to_string().contains("must be 4 or 8"));
    }

    #[test]
    fn test_error_equality() {
        let err1 = RecordarError::ModelNotFound("demo".to_string());
        let err2 = RecordarError::ModelNotFound("demo".to_string());
        assert_eq!(err1, err2);
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = RecordarError::ShapeMismatch {
            expected: vec![1, 2, 8, 16],
            actual: vec![1, 2, 4, 16],
        };
        assert!(err.to_string().contains("expected"));
    }
}
