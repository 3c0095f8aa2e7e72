//! CipherML Tensor - N-Dimensional Arrays for Graph Evaluation
//!
//! Owned, contiguous, row-major tensors generic over floating and integer
//! element types. The floating instantiation evaluates graph operators
//! during constant folding and calibration; the integer instantiation
//! carries quantized values through the integer kernels.
//!
//! # Example
//! ```rust
//! use cipherml_tensor::Tensor;
//!
//! let a = Tensor::<f64>::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
//! let b = Tensor::<f64>::from_vec(vec![1.0, 0.0, 0.0, 1.0], &[2, 2]).unwrap();
//! let c = a.matmul(&b).unwrap();
//! assert_eq!(c.data(), a.data());
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::needless_range_loop)]

pub mod dtype;
pub mod error;
pub mod nn;
pub mod shape;
pub mod tensor;

pub use dtype::{DType, Element};
pub use error::{TensorError, TensorResult};
pub use nn::{avg_pool2d, conv2d, pool2d_sum, Conv2dParams, Pool2dParams};
pub use shape::Shape;
pub use tensor::Tensor;
