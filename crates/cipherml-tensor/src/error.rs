//! Error Types - CipherML Tensor Error Handling
//!
//! Errors raised by shape validation, broadcasting and the numeric kernels
//! operating on `Tensor` values.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced by tensor construction and tensor operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    /// Shape mismatch between tensors or between a shape and its data.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape.
        actual: Vec<usize>,
    },

    /// Invalid dimension index.
    #[error("Invalid dimension: index {index} for tensor with {ndim} dimensions")]
    InvalidDimension {
        /// The invalid dimension index.
        index: i64,
        /// Number of dimensions in the tensor.
        ndim: usize,
    },

    /// Broadcasting failed between shapes.
    #[error("Cannot broadcast shapes {shape1:?} and {shape2:?}")]
    BroadcastError {
        /// The first shape.
        shape1: Vec<usize>,
        /// The second shape.
        shape2: Vec<usize>,
    },

    /// Invalid operation for the given operands.
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

/// Result type alias for tensor operations.
pub type TensorResult<T> = std::result::Result<T, TensorError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl TensorError {
    /// Creates a new shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Creates a new broadcast error.
    #[must_use]
    pub fn broadcast(shape1: &[usize], shape2: &[usize]) -> Self {
        Self::BroadcastError {
            shape1: shape1.to_vec(),
            shape2: shape2.to_vec(),
        }
    }

    /// Creates a new invalid operation error.
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TensorError::shape_mismatch(&[2, 3], &[3, 2]);
        assert_eq!(format!("{err}"), "Shape mismatch: expected [2, 3], got [3, 2]");

        let err = TensorError::broadcast(&[4], &[3]);
        assert!(format!("{err}").contains("[4]"));
    }

    #[test]
    fn test_invalid_operation() {
        let err = TensorError::invalid_operation("matmul needs rank >= 2");
        assert!(matches!(err, TensorError::InvalidOperation { .. }));
    }
}
