//! Elementwise Kernels - Add, Sub, Mul and Div
//!
//! Add and Sub bring every operand into the output integer domain with its
//! own rescale factor and sum the results. Mul and Div are only expressible
//! against a constant: the centered integers are multiplied by the centered
//! constant (or its quantized reciprocal) and rescaled once.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_graph::OpKind;
use cipherml_tensor::Tensor;

use super::{IntRange, Kernel, OpContext, QuantizedInput};
use crate::error::{QuantError, QuantResult};
use crate::qparams::{QuantParams, QuantizedArray};

// =============================================================================
// Add / Sub
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Variable {
        slot: usize,
        zero_point: i64,
        multiplier: f64,
    },
    Constant(Tensor<i64>),
}

/// Signed sum of operands rescaled into the output domain.
#[derive(Debug, Clone, PartialEq)]
pub struct AddSubKernel {
    terms: Vec<(i64, Term)>,
}

/// Builds the kernel for `Add` and `Sub`.
pub fn build_add_sub(ctx: &mut OpContext<'_>) -> QuantResult<Kernel> {
    let signs: [i64; 2] = match ctx.node.kind {
        OpKind::Add => [1, 1],
        OpKind::Sub => [1, -1],
        _ => return Err(ctx.unsupported("not an additive operator")),
    };
    if ctx.variable_positions().is_empty() {
        return Err(ctx.unsupported("all operands are constant"));
    }

    let out_scale = ctx.output_params.scale;
    let mut slot = 0usize;
    let terms = ctx
        .inputs
        .iter()
        .zip(signs)
        .map(|(input, sign)| {
            let term = match input {
                QuantizedInput::Variable { params, .. } => {
                    slot += 1;
                    Term::Variable {
                        slot: slot - 1,
                        zero_point: params.zero_point,
                        multiplier: params.scale / out_scale,
                    }
                }
                QuantizedInput::Constant { value, .. } => {
                    let m = value.params.scale / out_scale;
                    Term::Constant(value.centered().map(move |c| (c as f64 * m).round() as i64))
                }
            };
            (sign, term)
        })
        .collect();

    Ok(Kernel::AddSub(AddSubKernel { terms }))
}

impl AddSubKernel {
    /// Integer forward pass.
    pub fn forward(
        &self,
        inputs: &[&Tensor<i64>],
        out: &QuantParams,
        range: &mut IntRange,
    ) -> QuantResult<Tensor<i64>> {
        let mut acc: Option<Tensor<i64>> = None;
        for (sign, term) in &self.terms {
            let sign = *sign;
            let value = match term {
                Term::Variable {
                    slot,
                    zero_point,
                    multiplier,
                } => {
                    let (zp, m) = (*zero_point, *multiplier);
                    inputs[*slot].map(move |q| sign * ((q - zp) as f64 * m).round() as i64)
                }
                Term::Constant(c) => c.map(move |v| sign * v),
            };
            acc = Some(match acc {
                None => value,
                Some(a) => a.add(&value)?,
            });
        }
        let acc = acc.ok_or_else(|| QuantError::CalibrationError("empty sum".to_string()))?;
        range.observe(&acc);
        let out = *out;
        Ok(acc.map(move |a| out.requantize(a as f64)))
    }
}

// =============================================================================
// Mul / Div
// =============================================================================

/// Product of a variable with a constant, rescaled once.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleKernel {
    input_zero_point: i64,
    constant: Tensor<i64>,
    multiplier: f64,
}

/// Builds the kernel for `Mul` and `Div` against a constant.
pub fn build_scale(ctx: &mut OpContext<'_>) -> QuantResult<Kernel> {
    let variables = ctx.variable_positions();
    let var = match variables.as_slice() {
        [var] => *var,
        [] => return Err(ctx.unsupported("all operands are constant")),
        _ => return Err(ctx.unsupported("both operands are variables")),
    };
    let x_params = *ctx.inputs[var].params();
    let (float, quantized) = match &ctx.inputs[1 - var] {
        QuantizedInput::Constant { float, value, .. } => (float, value),
        QuantizedInput::Variable { .. } => {
            return Err(ctx.unsupported("both operands are variables"))
        }
    };

    let constant = match ctx.node.kind {
        OpKind::Mul => quantized.clone(),
        OpKind::Div if var == 0 => {
            let reciprocal = float.map(|c| 1.0 / c);
            if reciprocal.data().iter().any(|r| !r.is_finite()) {
                return Err(ctx.unsupported("division by a constant containing zero"));
            }
            QuantizedArray::from_float(&reciprocal, ctx.n_bits, false)?
        }
        OpKind::Div => return Err(ctx.unsupported("the divisor must be a constant")),
        _ => return Err(ctx.unsupported("not a multiplicative operator")),
    };

    Ok(Kernel::Scale(ScaleKernel {
        input_zero_point: x_params.zero_point,
        multiplier: x_params.scale * constant.params.scale / ctx.output_params.scale,
        constant: constant.centered(),
    }))
}

impl ScaleKernel {
    /// Integer forward pass.
    pub fn forward(
        &self,
        x: &Tensor<i64>,
        out: &QuantParams,
        range: &mut IntRange,
    ) -> QuantResult<Tensor<i64>> {
        let zp = self.input_zero_point;
        let product = x.zip_map(&self.constant, move |q, c| (q - zp) * c)?;
        range.observe(&product);
        let (m, out) = (self.multiplier, *out);
        Ok(product.map(move |p| out.requantize(p as f64 * m)))
    }
}

// =============================================================================
// Tests
// =============================================================================
