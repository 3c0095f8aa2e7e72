//! Graph Error Types
//!
//! Error handling for graph construction, validation and evaluation.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_tensor::TensorError;
use thiserror::Error;

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors raised while building, transforming or evaluating a graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Structural defect: cycle, dangling or forward reference, bad arity.
    #[error("Malformed graph: {reason}")]
    MalformedGraph {
        /// What is wrong with the graph.
        reason: String,
    },

    /// Operator type with no known semantics.
    #[error("Unsupported operator '{op_type}' at node '{node}'")]
    UnsupportedOperator {
        /// Name of the offending node.
        node: String,
        /// Operator type as written in the source graph.
        op_type: String,
    },

    /// Missing or ill-typed operator attribute.
    #[error("Invalid attribute '{attribute}' on node '{node}': {reason}")]
    InvalidAttribute {
        /// Name of the offending node.
        node: String,
        /// Attribute name.
        attribute: String,
        /// Why the attribute was rejected.
        reason: String,
    },

    /// A node failed to evaluate on concrete values.
    #[error("Evaluation of node '{node}' failed: {source}")]
    Evaluation {
        /// Name of the failing node.
        node: String,
        /// Underlying tensor error.
        source: TensorError,
    },

    /// Wrong number of graph inputs supplied.
    #[error("Expected {expected} graph inputs, got {actual}")]
    InputCount {
        /// Declared input count.
        expected: usize,
        /// Supplied input count.
        actual: usize,
    },

    /// A supplied input does not match its declared shape.
    #[error("Input '{name}' expects shape {expected:?}, got {actual:?}")]
    InputShape {
        /// Input name.
        name: String,
        /// Declared shape.
        expected: Vec<usize>,
        /// Supplied shape.
        actual: Vec<usize>,
    },

    /// Tensor error outside node evaluation.
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl GraphError {
    /// Creates a malformed graph error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedGraph {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::malformed("cycle through 'a'");
        assert_eq!(err.to_string(), "Malformed graph: cycle through 'a'");

        let err = GraphError::UnsupportedOperator {
            node: "n0".to_string(),
            op_type: "Softmax".to_string(),
        };
        assert!(err.to_string().contains("Softmax"));
        assert!(err.to_string().contains("n0"));
    }
}
