//! Average Pooling Kernel
//!
//! The window sum of centered integers is exact; dividing by the window size
//! is folded into the rescale factor of each output position.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_graph::OpKind;
use cipherml_tensor::{pool2d_sum, Pool2dParams, Tensor};

use super::{IntRange, Kernel, OpContext, QuantizedInput};
use crate::error::QuantResult;
use crate::qparams::QuantParams;

/// Integer average pooling.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolKernel {
    params: Pool2dParams,
    input_zero_point: i64,
    scale_ratio: f64,
}

/// Builds the kernel for `AveragePool`.
pub fn build(ctx: &mut OpContext<'_>) -> QuantResult<Kernel> {
    let OpKind::AveragePool(params) = &ctx.node.kind else {
        return Err(ctx.unsupported("not a pooling operator"));
    };
    let input = match &ctx.inputs[0] {
        QuantizedInput::Variable { params, .. } => *params,
        QuantizedInput::Constant { .. } => {
            return Err(ctx.unsupported("the pooled operand must be a variable"))
        }
    };
    Ok(Kernel::Pool(PoolKernel {
        params: params.clone(),
        input_zero_point: input.zero_point,
        scale_ratio: input.scale / ctx.output_params.scale,
    }))
}

impl PoolKernel {
    /// Window geometry.
    pub fn params(&self) -> &Pool2dParams {
        &self.params
    }

    /// Integer forward pass.
    pub fn forward(
        &self,
        x: &Tensor<i64>,
        out: &QuantParams,
        range: &mut IntRange,
    ) -> QuantResult<Tensor<i64>> {
        let zp = self.input_zero_point;
        let (sums, counts) = pool2d_sum(&x.map(move |q| q - zp), &self.params)?;
        range.observe(&sums);

        let plane = counts.len();
        let data = sums
            .data()
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let divisor = counts[i % plane].max(1) as f64;
                out.requantize(s as f64 * self.scale_ratio / divisor)
            })
            .collect();
        Ok(Tensor::from_vec(data, sums.shape())?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cipherml_graph::GraphBuilder;
    use cipherml_tensor::avg_pool2d;

    #[test]
    fn test_average_pool_matches_float() {
        let pool = Pool2dParams::square(2);
        let graph = GraphBuilder::new()
            .input("x", &[1, 1, 4, 4])
            .node("pool", OpKind::AveragePool(pool.clone()), &["x"], "y")
            .output("y")
            .build()
            .unwrap();
        let input = QuantParams::from_range(-1.0, 1.0, 8, false).unwrap();
        let output = QuantParams::from_range(-0.6, 0.5, 8, false).unwrap();
        let mut ctx = OpContext {
            node: &graph.nodes()[0],
            inputs: vec![QuantizedInput::Variable {
                name: "x".to_string(),
                params: input,
            }],
            output_params: output,
            n_bits: 8,
        };
        let Kernel::Pool(kernel) = build(&mut ctx).unwrap() else {
            panic!("expected pool kernel");
        };

        let x = Tensor::from_vec(
            (0..16).map(|i| (i as f64 - 8.0) / 10.0).collect(),
            &[1, 1, 4, 4],
        )
        .unwrap();
        let expected = avg_pool2d(&x, &pool).unwrap();
        let q = kernel
            .forward(&input.quantize(&x), &output, &mut IntRange::EMPTY)
            .unwrap();
        assert_eq!(q.shape(), &[1, 1, 2, 2]);
        for (got, want) in output.dequantize(&q).data().iter().zip(expected.data()) {
            assert!((got - want).abs() < 0.01, "got {got}, want {want}");
        }
    }
}
