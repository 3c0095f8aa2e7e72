//! Table Lookup Kernel
//!
//! A univariate function of a single quantized input can only ever see
//! `2^n_bits` distinct integers. The function is evaluated once on the real
//! value of each of them and the results are quantized with the output
//! parameters, so execution is a pure table lookup.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_tensor::Tensor;
use tracing::trace;

use super::{Kernel, OpContext, QuantizedInput};
use crate::error::QuantResult;

/// Output integer for every representable input integer.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    offset: i64,
    table: Vec<i64>,
}

/// Builds the table for `Relu`, `Sigmoid`, `Tanh`, `Exp` and `Clip`.
pub fn build(ctx: &mut OpContext<'_>) -> QuantResult<Kernel> {
    if !ctx.node.kind.is_univariate() {
        return Err(ctx.unsupported("not a univariate function"));
    }
    let params = match &ctx.inputs[0] {
        QuantizedInput::Variable { params, .. } => *params,
        QuantizedInput::Constant { .. } => {
            return Err(ctx.unsupported("a table over a constant input is never executed"))
        }
    };

    let (qmin, qmax) = (params.qmin(), params.qmax());
    let levels: Vec<f64> = (qmin..=qmax).map(|q| params.dequantize_value(q)).collect();
    let count = levels.len();
    let reals = ctx
        .node
        .kind
        .evaluate(&[&Tensor::from_vec(levels, &[count])?])?;
    let table = ctx.output_params.quantize(&reals).into_vec();
    trace!(node = %ctx.node.name, entries = table.len(), "built lookup table");

    Ok(Kernel::Lookup(LookupTable {
        offset: qmin,
        table,
    }))
}

impl LookupTable {
    /// Smallest input integer covered.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Table entries, indexed by `q - offset`.
    pub fn entries(&self) -> &[i64] {
        &self.table
    }

    /// Looks up every element; inputs outside the table are clamped to its ends.
    pub fn forward(&self, x: &Tensor<i64>) -> Tensor<i64> {
        let last = self.table.len() as i64 - 1;
        let (offset, table) = (self.offset, &self.table);
        x.map(move |q| table[(q - offset).clamp(0, last) as usize])
    }
}

// =============================================================================
// Tests
// =============================================================================
