//! CipherML Quant - Post-Training Quantization for Encrypted Inference
//!
//! Turns a folded floating graph into an integer-only module whose every
//! tensor carries affine quantization parameters, and compiles that module
//! into a circuit for a backend with a bounded integer bit width.
//!
//! # Example
//! ```rust
//! use cipherml_graph::{GraphBuilder, OpKind};
//! use cipherml_quant::{CompileConfig, PostTrainingAffineQuantization};
//! use cipherml_tensor::Tensor;
//!
//! let graph = GraphBuilder::new()
//!     .input("x", &[1, 2])
//!     .initializer("w", Tensor::from_vec(vec![0.5, -1.0, 1.0, 0.25], &[2, 2]).unwrap())
//!     .node("fc", OpKind::MatMul, &["x", "w"], "h")
//!     .node("act", OpKind::Relu, &["h"], "y")
//!     .output("y")
//!     .build()
//!     .unwrap();
//!
//! let calibration = Tensor::from_vec(vec![-1.0, 0.0, 0.5, 1.0, 1.0, -0.5], &[3, 2]).unwrap();
//! let mut module = PostTrainingAffineQuantization::new(4, graph)
//!     .quantize_module(&[calibration.clone()])
//!     .unwrap();
//!
//! let q = module.quantize_input(&[calibration]).unwrap();
//! let config = CompileConfig::new().use_virtual_lib(true);
//! module.compile(&q, &config).unwrap();
//! assert_eq!(module.forward_fhe(&q).unwrap(), module.forward(&q).unwrap());
//! ```
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]

pub mod calibration;
pub mod compile;
pub mod config;
pub mod error;
pub mod module;
pub mod ops;
pub mod post_training;
pub mod qparams;
pub mod registry;

pub use calibration::CalibrationData;
pub use compile::{
    fingerprint, BitWidthReport, Circuit, CircuitBackend, CompileConfig, ExecutableCircuit,
    SimulationBackend, SimulationCircuit,
};
pub use config::QuantConfig;
pub use error::{QuantError, QuantResult};
pub use module::{QuantizedGraph, QuantizedModule};
pub use ops::{IntRange, Kernel, OpContext, QuantizedInput, QuantizedOp};
pub use post_training::PostTrainingAffineQuantization;
pub use qparams::{
    int_range, integer_bit_width, QuantParams, QuantizedArray, MAX_N_BITS, STABILITY_CONST,
};
pub use registry::{OpConstructor, OperatorRegistry};

// =============================================================================
// Constants
// =============================================================================

/// Default bit-width ceiling of the target encrypted-execution backend.
pub const MAXIMUM_BIT_WIDTH: u32 = 8;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(MAXIMUM_BIT_WIDTH, 8);
        assert!(MAXIMUM_BIT_WIDTH <= MAX_N_BITS);
        assert_eq!(CompileConfig::default().max_bit_width, MAXIMUM_BIT_WIDTH);
    }
}
