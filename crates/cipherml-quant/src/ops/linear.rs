//! Linear Kernels - MatMul, Gemm and Conv
//!
//! For `y = alpha * x @ w + beta * b` with `x ≈ s_x (q_x - z_x)` and
//! `w ≈ s_w (q_w - z_w)`, the product of centered integers is an exact
//! integer at scale `|alpha| * s_x * s_w`. The bias is quantized once at that
//! same scale and added to the accumulator, so the only rounding step is the
//! final rescale into the output domain.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_graph::OpKind;
use cipherml_tensor::{conv2d, Conv2dParams, Tensor};

use super::{IntRange, Kernel, OpContext, QuantizedInput};
use crate::error::QuantResult;
use crate::qparams::{integer_bit_width, QuantParams, QuantizedArray};

/// Shape of the integer product.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearMode {
    /// NumPy matmul against a constant right operand.
    MatMul,
    /// 2-D product, optionally transposing the variable operand.
    Gemm {
        /// Transpose the variable operand first.
        trans_a: bool,
    },
    /// 2-D convolution.
    Conv(Conv2dParams),
}

/// Integer matrix product or convolution against a constant weight.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearKernel {
    mode: LinearMode,
    input_zero_point: i64,
    weight: Tensor<i64>,
    bias: Option<Tensor<i64>>,
    multiplier: f64,
}

/// Builds a linear kernel for `MatMul`, `Gemm` and `Conv`.
pub fn build(ctx: &mut OpContext<'_>) -> QuantResult<Kernel> {
    let (mode, alpha, beta, trans_b) = match &ctx.node.kind {
        OpKind::MatMul => (LinearMode::MatMul, 1.0, 1.0, false),
        OpKind::Gemm {
            alpha,
            beta,
            trans_a,
            trans_b,
        } => (
            LinearMode::Gemm { trans_a: *trans_a },
            *alpha,
            *beta,
            *trans_b,
        ),
        OpKind::Conv(params) => (LinearMode::Conv(params.clone()), 1.0, 1.0, false),
        other => return Err(ctx.unsupported(format!("{} is not a linear operator", other.name()))),
    };

    let x_params = match &ctx.inputs[0] {
        QuantizedInput::Variable { params, .. } => *params,
        QuantizedInput::Constant { .. } => {
            return Err(ctx.unsupported("the data operand must be a variable"))
        }
    };
    let weight = match &ctx.inputs[1] {
        QuantizedInput::Constant { value, .. } => value.clone(),
        QuantizedInput::Variable { .. } => {
            return Err(ctx.unsupported("the weight operand must be a constant"))
        }
    };
    if !(alpha.is_finite() && alpha != 0.0) {
        return Err(ctx.unsupported(format!("alpha must be finite and non-zero, got {alpha}")));
    }

    // A negative alpha is carried by the weight sign; the scale stays positive.
    let acc_scale = alpha.abs() * x_params.scale * weight.params.scale;
    let mut centered = weight.centered();
    if alpha < 0.0 {
        centered = centered.map(|w| -w);
    }
    if trans_b {
        centered = centered.t()?;
    }

    let bias = match ctx.inputs.get(2) {
        None => None,
        Some(QuantizedInput::Variable { .. }) => {
            return Err(ctx.unsupported("the bias operand must be a constant"))
        }
        Some(QuantizedInput::Constant { float, .. }) => {
            let ints = float.map(move |c| (beta * c / acc_scale).round() as i64);
            let lo = ints.min().unwrap_or(0).min(-1);
            let hi = ints.max().unwrap_or(0).max(0);
            let params = QuantParams::new(acc_scale, 0, integer_bit_width(lo, hi), true)?;
            let float = float.clone();
            ctx.inputs[2] = QuantizedInput::Constant {
                name: ctx.inputs[2].name().to_string(),
                value: QuantizedArray {
                    values: ints.clone(),
                    params,
                },
                float,
            };
            Some(ints)
        }
    };

    Ok(Kernel::Linear(LinearKernel {
        mode,
        input_zero_point: x_params.zero_point,
        weight: centered,
        bias,
        multiplier: acc_scale / ctx.output_params.scale,
    }))
}

impl LinearKernel {
    /// Product mode.
    pub fn mode(&self) -> &LinearMode {
        &self.mode
    }

    /// Centered integer weight as used in the product.
    pub fn weight(&self) -> &Tensor<i64> {
        &self.weight
    }

    /// Integer bias at accumulator scale.
    pub fn bias(&self) -> Option<&Tensor<i64>> {
        self.bias.as_ref()
    }

    /// Accumulator-to-output rescale factor.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Integer forward pass.
    pub fn forward(
        &self,
        x: &Tensor<i64>,
        out: &QuantParams,
        range: &mut IntRange,
    ) -> QuantResult<Tensor<i64>> {
        let zp = self.input_zero_point;
        let centered = x.map(move |q| q - zp);

        let acc = match &self.mode {
            LinearMode::Conv(params) => {
                conv2d(&centered, &self.weight, self.bias.as_ref(), params)?
            }
            LinearMode::MatMul | LinearMode::Gemm { trans_a: false } => {
                self.add_bias(centered.matmul(&self.weight)?)?
            }
            LinearMode::Gemm { trans_a: true } => {
                self.add_bias(centered.t()?.matmul(&self.weight)?)?
            }
        };
        range.observe(&acc);

        let multiplier = self.multiplier;
        let out = *out;
        Ok(acc.map(move |a| out.requantize(a as f64 * multiplier)))
    }

    fn add_bias(&self, acc: Tensor<i64>) -> QuantResult<Tensor<i64>> {
        match &self.bias {
            Some(bias) => Ok(acc.add(bias)?),
            None => Ok(acc),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
