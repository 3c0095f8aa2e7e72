//! CipherML Graph - Tensor Computation Graphs
//!
//! Immutable, validated graphs of typed operators connected by named edges,
//! the floating-point semantics of every operator, and the graph-to-graph
//! passes (constant folding, dead code elimination) that prepare a trained
//! network for quantization.
//!
//! # Example
//! ```rust
//! use cipherml_graph::{fold_constants, GraphBuilder, OpKind};
//! use cipherml_tensor::Tensor;
//!
//! let graph = GraphBuilder::new()
//!     .input("x", &[1, 2])
//!     .initializer("w", Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], &[2, 2]).unwrap())
//!     .initializer("two", Tensor::scalar(2.0))
//!     .node("scale_w", OpKind::Mul, &["w", "two"], "w2")
//!     .node("mm", OpKind::MatMul, &["x", "w2"], "y")
//!     .output("y")
//!     .build()
//!     .unwrap();
//!
//! let folded = fold_constants(&graph).unwrap();
//! assert_eq!(folded.len(), 1);
//! assert!(folded.is_constant("w2"));
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

pub mod builder;
pub mod error;
pub mod eval;
pub mod ir;
pub mod op;
pub mod optimize;

pub use builder::GraphBuilder;
pub use error::{GraphError, GraphResult};
pub use eval::sigmoid;
pub use ir::{EdgeSource, Graph, Node, NodeId, ValueInfo};
pub use op::{AttributeValue, Attributes, OpKind, OpTag};
pub use optimize::{fold_constants, OptimizationPass, Optimizer};
