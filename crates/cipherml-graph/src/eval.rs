//! Floating Evaluation Rules
//!
//! The single definition of what every operator computes on real values.
//! Graph execution, constant folding and quantization calibration all call
//! [`OpKind::evaluate`], so a folded constant is bit-for-bit the value an
//! unfolded graph would have produced.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_tensor::{avg_pool2d, conv2d, Tensor, TensorError, TensorResult};

use crate::op::OpKind;

/// Logistic function.
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl OpKind {
    /// Evaluates the operator on concrete floating inputs.
    pub fn evaluate(&self, inputs: &[&Tensor<f64>]) -> TensorResult<Tensor<f64>> {
        if !self.arity().contains(&inputs.len()) {
            return Err(TensorError::invalid_operation(format!(
                "{} expects {:?} inputs, got {}",
                self.name(),
                self.arity(),
                inputs.len()
            )));
        }

        match self {
            Self::Constant { value } => Ok(value.clone()),
            Self::Identity => Ok(inputs[0].clone()),
            Self::Add => inputs[0].add(inputs[1]),
            Self::Sub => inputs[0].sub(inputs[1]),
            Self::Mul => inputs[0].mul(inputs[1]),
            Self::Div => inputs[0].div(inputs[1]),
            Self::MatMul => inputs[0].matmul(inputs[1]),
            Self::Gemm {
                alpha,
                beta,
                trans_a,
                trans_b,
            } => {
                let a = if *trans_a { inputs[0].t()? } else { inputs[0].clone() };
                let b = if *trans_b { inputs[1].t()? } else { inputs[1].clone() };
                if a.ndim() != 2 || b.ndim() != 2 {
                    return Err(TensorError::invalid_operation(format!(
                        "Gemm requires 2-D operands, got {:?} and {:?}",
                        a.shape(),
                        b.shape()
                    )));
                }
                let alpha = *alpha;
                let product = a.matmul(&b)?.map(|x| alpha * x);
                match inputs.get(2) {
                    Some(c) => {
                        let beta = *beta;
                        product.zip_map(*c, |p, c| p + beta * c)
                    }
                    None => Ok(product),
                }
            }
            Self::Relu => Ok(inputs[0].map(|x| x.max(0.0))),
            Self::Sigmoid => Ok(inputs[0].map(sigmoid)),
            Self::Tanh => Ok(inputs[0].map(f64::tanh)),
            Self::Exp => Ok(inputs[0].map(f64::exp)),
            Self::Clip { min, max } => {
                let (lo, hi) = (*min, *max);
                Ok(inputs[0].map(|x| x.max(lo).min(hi)))
            }
            Self::Conv(params) => conv2d(inputs[0], inputs[1], inputs.get(2).copied(), params),
            Self::AveragePool(params) => avg_pool2d(inputs[0], params),
            Self::Reshape { shape } => inputs[0].reshape(shape),
            Self::Flatten { axis } => inputs[0].flatten(*axis),
            Self::Transpose { perm } => inputs[0].transpose(perm),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
