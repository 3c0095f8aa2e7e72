//! Layout Kernel
//!
//! Identity, Reshape, Flatten and Transpose move integers without touching
//! them, so input and output share quantization parameters.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_graph::OpKind;
use cipherml_tensor::Tensor;

use super::{Kernel, OpContext, QuantizedInput};
use crate::error::QuantResult;

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Identity,
    Reshape(Vec<i64>),
    Flatten(i64),
    Transpose(Vec<usize>),
}

/// Pure data movement.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutKernel {
    step: Step,
}

/// Builds the kernel for layout operators and pins the output parameters to
/// the input parameters.
pub fn build(ctx: &mut OpContext<'_>) -> QuantResult<Kernel> {
    let step = match &ctx.node.kind {
        OpKind::Identity => Step::Identity,
        OpKind::Reshape { shape } => Step::Reshape(shape.clone()),
        OpKind::Flatten { axis } => Step::Flatten(*axis),
        OpKind::Transpose { perm } => Step::Transpose(perm.clone()),
        _ => return Err(ctx.unsupported("not a layout operator")),
    };
    match &ctx.inputs[0] {
        QuantizedInput::Variable { params, .. } => ctx.output_params = *params,
        QuantizedInput::Constant { .. } => {
            return Err(ctx.unsupported("layout of a constant is folded away"))
        }
    }
    Ok(Kernel::Layout(LayoutKernel { step }))
}

impl LayoutKernel {
    /// Rearranges the integers of `x`.
    pub fn forward(&self, x: &Tensor<i64>) -> QuantResult<Tensor<i64>> {
        Ok(match &self.step {
            Step::Identity => x.clone(),
            Step::Reshape(shape) => x.reshape(shape)?,
            Step::Flatten(axis) => x.flatten(*axis)?,
            Step::Transpose(perm) => x.transpose(perm)?,
        })
    }
}
