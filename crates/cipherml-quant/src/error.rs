//! Quantization Error Types
//!
//! Error types for calibration, quantized operator construction, integer
//! execution and circuit compilation.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_graph::{GraphError, OpTag};
use cipherml_tensor::TensorError;
use thiserror::Error;

/// Result type for quantization operations.
pub type QuantResult<T> = Result<T, QuantError>;

/// Errors that can occur during quantization and compilation.
#[derive(Error, Debug)]
pub enum QuantError {
    /// The operator has no integer implementation for this node.
    #[error("Unsupported operator {kind} at node '{node}': {reason}")]
    UnsupportedOperator {
        /// Offending node.
        node: String,
        /// Operator kind.
        kind: OpTag,
        /// Why it cannot be quantized.
        reason: String,
    },

    /// An integer intermediate needs more bits than the backend allows.
    #[error("Bit width exceeded at '{node}': requires {required} bits, limit is {limit}")]
    BitWidthExceeded {
        /// Node whose accumulator is too wide.
        node: String,
        /// Bits required.
        required: u32,
        /// Configured ceiling.
        limit: u32,
    },

    /// Requested bit width is outside the supported range.
    #[error("Invalid bit width {n_bits}: must be between 1 and {max}")]
    InvalidBitWidth {
        /// Requested width.
        n_bits: u32,
        /// Largest supported width.
        max: u32,
    },

    /// Calibration data cannot produce quantization parameters.
    #[error("Calibration error: {0}")]
    CalibrationError(String),

    /// A declared output does not depend on any graph input.
    #[error("Output '{0}' is constant after folding and cannot be quantized")]
    ConstantOutput(String),

    /// Wrong number of quantized inputs supplied.
    #[error("Expected {expected} inputs, got {actual}")]
    InputCount {
        /// Expected count.
        expected: usize,
        /// Supplied count.
        actual: usize,
    },

    /// Quantized input has the wrong shape.
    #[error("Input '{name}' has shape {actual:?}, expected {expected:?}")]
    InputShape {
        /// Input name.
        name: String,
        /// Declared shape.
        expected: Vec<usize>,
        /// Supplied shape.
        actual: Vec<usize>,
    },

    /// Execution requested before compilation.
    #[error("Module has not been compiled")]
    NotCompiled,

    /// Circuit backend failure.
    #[error("Backend '{backend}' failed: {message}")]
    Backend {
        /// Backend name.
        backend: String,
        /// Failure description.
        message: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while loading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Graph construction or evaluation error.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Tensor kernel error.
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl QuantError {
    /// Creates an unsupported operator error.
    pub fn unsupported(node: &str, kind: OpTag, reason: impl Into<String>) -> Self {
        Self::UnsupportedOperator {
            node: node.to_string(),
            kind,
            reason: reason.into(),
        }
    }
}
