//! # CipherML - Quantized Inference for Encrypted Execution
//!
//! CipherML takes a trained floating-point network expressed as a tensor
//! graph and turns it into an integer-only circuit that a bit-width bounded
//! homomorphic backend can execute.
//!
//! ## Pipeline
//!
//! - **Graph**: typed operators connected by named edges, built with
//!   [`GraphBuilder`] or from exchange-format operator names
//! - **Constant folding**: every subgraph without a dependency on a graph
//!   input is evaluated once and replaced by its value
//! - **Post-training quantization**: one calibration pass assigns affine
//!   parameters to every tensor and builds an integer kernel per operator
//! - **Compilation**: the integer plan is measured against the backend's
//!   bit-width ceiling and compiled into an executable circuit
//!
//! # Quick Start
//!
//! ```rust
//! use cipherml::prelude::*;
//!
//! let graph = GraphBuilder::new()
//!     .input("x", &[1, 2])
//!     .initializer("w", Tensor::from_vec(vec![1.0, -0.5, 0.25, 2.0], &[2, 2]).unwrap())
//!     .initializer("b", Tensor::from_vec(vec![0.1, -0.1], &[2]).unwrap())
//!     .node_from_op_type("fc", "Gemm", &Attributes::new(), &["x", "w", "b"], &["h"])
//!     .node("act", OpKind::Sigmoid, &["h"], "y")
//!     .output("y")
//!     .build()
//!     .unwrap();
//!
//! let x = Tensor::from_vec(vec![-1.0, 0.5, 0.0, 1.0, 0.75, -0.25], &[3, 2]).unwrap();
//! let mut module = PostTrainingAffineQuantization::new(8, graph)
//!     .quantize_module(&[x.clone()])
//!     .unwrap();
//!
//! let q = module.quantize_input(&[x]).unwrap();
//! let circuit = module.compile(&q, &CompileConfig::new().use_virtual_lib(true)).unwrap();
//! assert!(circuit.advisory().is_some());
//! assert_eq!(module.forward_fhe(&q).unwrap(), module.forward(&q).unwrap());
//! ```
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use cipherml_graph as graph;
pub use cipherml_quant as quant;
pub use cipherml_tensor as tensor;

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for quantizing and compiling a graph.
///
/// ```rust
/// use cipherml::prelude::*;
/// ```
pub mod prelude {
    // Tensors
    pub use cipherml_tensor::{Conv2dParams, Pool2dParams, Tensor, TensorError};

    // Graphs
    pub use cipherml_graph::{
        fold_constants, AttributeValue, Attributes, Graph, GraphBuilder, GraphError, OpKind,
        OpTag, OptimizationPass, Optimizer,
    };

    // Quantization and compilation
    pub use cipherml_quant::{
        BitWidthReport, CalibrationData, Circuit, CircuitBackend, CompileConfig,
        ExecutableCircuit, OperatorRegistry, PostTrainingAffineQuantization, QuantConfig,
        QuantError, QuantParams, QuantizedArray, QuantizedInput, QuantizedModule, QuantizedOp,
        SimulationBackend, MAXIMUM_BIT_WIDTH,
    };
}

// =============================================================================
// Version Information
// =============================================================================

/// Returns the version of CipherML.
#[must_use]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(version(), "0.1.0");
    }
}
