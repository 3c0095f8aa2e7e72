//! Post-Training Affine Quantization
//!
//! Converts a floating graph into a [`QuantizedModule`] from one pass over
//! calibration data. The graph is folded first; each remaining node is then
//! calibrated on the dequantized output of the integer ops before it, so
//! every range reflects the quantization error upstream.
//!
//! # Example
//! ```rust,ignore
//! let module = PostTrainingAffineQuantization::new(8, graph)
//!     .is_signed(false)
//!     .quantize_module(&[calibration])?;
//! let y = module.forward_float(&[x])?;
//! ```
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_graph::{fold_constants, EdgeSource, Graph, GraphError};
use cipherml_tensor::Tensor;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::calibration::CalibrationData;
use crate::config::QuantConfig;
use crate::error::{QuantError, QuantResult};
use crate::module::{QuantizedGraph, QuantizedModule};
use crate::ops::{IntRange, OpContext, QuantizedInput};
use crate::qparams::{QuantizedArray, MAX_N_BITS};
use crate::registry::OperatorRegistry;

/// Calibrates and quantizes a floating graph.
#[derive(Debug, Clone)]
pub struct PostTrainingAffineQuantization<'r> {
    n_bits: u32,
    is_signed: bool,
    graph: Graph,
    registry: Option<&'r OperatorRegistry>,
    bit_width_limit: Option<u32>,
}

impl<'r> PostTrainingAffineQuantization<'r> {
    /// Creates a quantizer for `graph` at `n_bits`.
    pub fn new(n_bits: u32, graph: Graph) -> Self {
        Self {
            n_bits,
            is_signed: false,
            graph,
            registry: None,
            bit_width_limit: None,
        }
    }

    /// Creates a quantizer from configuration.
    pub fn from_config(config: &QuantConfig, graph: Graph) -> Self {
        Self::new(config.n_bits, graph).is_signed(config.is_signed)
    }

    /// Builder: quantize graph inputs to a signed range.
    #[must_use]
    pub fn is_signed(mut self, is_signed: bool) -> Self {
        self.is_signed = is_signed;
        self
    }

    /// Builder: use a custom operator registry instead of the standard one.
    #[must_use]
    pub fn registry(mut self, registry: &'r OperatorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Builder: reject any operator whose calibration accumulator needs more
    /// than `limit` bits.
    #[must_use]
    pub fn bit_width_limit(mut self, limit: Option<u32>) -> Self {
        self.bit_width_limit = limit;
        self
    }

    /// Bit width of quantized values.
    pub fn n_bits(&self) -> u32 {
        self.n_bits
    }

    /// Graph being quantized.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Builds the quantized module from one calibration tensor per input.
    pub fn quantize_module(&self, calibration: &[Tensor<f64>]) -> QuantResult<QuantizedModule> {
        let n_bits = self.n_bits;
        if n_bits == 0 || n_bits > MAX_N_BITS {
            return Err(QuantError::InvalidBitWidth {
                n_bits,
                max: MAX_N_BITS,
            });
        }

        let graph = fold_constants(&self.graph)?;
        graph.check_inputs(calibration)?;
        if let Some(name) = graph.outputs().iter().find(|name| graph.is_constant(name)) {
            return Err(QuantError::ConstantOutput(name.clone()));
        }

        let standard;
        let registry = match self.registry {
            Some(registry) => registry,
            None => {
                standard = OperatorRegistry::standard();
                &standard
            }
        };

        // Calibration values of every variable edge, in the integer domain.
        let mut values: FxHashMap<String, QuantizedArray> = FxHashMap::default();
        let mut inputs = Vec::with_capacity(graph.inputs().len());
        for (info, sample) in graph.inputs().iter().zip(calibration) {
            let params = CalibrationData::new(sample)?.quant_params(n_bits, self.is_signed)?;
            debug!(
                input = %info.name,
                scale = params.scale,
                zero_point = params.zero_point,
                "calibrated input"
            );
            values.insert(info.name.clone(), QuantizedArray::with_params(sample, params));
            inputs.push((info.name.clone(), info.shape.clone(), params));
        }

        let depths = graph.depths();
        let mut ops = Vec::with_capacity(graph.len());
        for node in graph.nodes() {
            let mut q_inputs = Vec::with_capacity(node.inputs.len());
            let mut reals = Vec::with_capacity(node.inputs.len());
            for name in &node.inputs {
                let missing = || GraphError::malformed(format!("edge '{name}' has no value"));
                match graph.source(name).ok_or_else(missing)? {
                    EdgeSource::Initializer => {
                        let constant = graph.initializer(name).ok_or_else(missing)?;
                        q_inputs.push(QuantizedInput::Constant {
                            name: name.clone(),
                            value: QuantizedArray::from_float(constant, n_bits, false)?,
                            float: constant.clone(),
                        });
                        reals.push(constant.clone());
                    }
                    EdgeSource::Input(_) | EdgeSource::Node(_) => {
                        let value = values.get(name).ok_or_else(missing)?;
                        q_inputs.push(QuantizedInput::Variable {
                            name: name.clone(),
                            params: value.params,
                        });
                        reals.push(value.dequantize());
                    }
                }
            }

            let args: Vec<&Tensor<f64>> = reals.iter().collect();
            let expected = node
                .kind
                .evaluate(&args)
                .map_err(|source| GraphError::Evaluation {
                    node: node.name.clone(),
                    source,
                })?;
            let output_params = CalibrationData::new(&expected)?.quant_params(n_bits, false)?;

            let op = registry.build(OpContext {
                node,
                inputs: q_inputs,
                output_params,
                n_bits,
            })?;

            let mut range = IntRange::EMPTY;
            let output = {
                let args = op
                    .variable_inputs()
                    .map(|input| values.get(input.name()).map(|value| &value.values))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        GraphError::malformed(format!("node '{}' lost an input", node.name))
                    })?;
                op.quantized_forward_traced(&args, &mut range)?
            };
            let required = range.bit_width();
            if let Some(limit) = self.bit_width_limit {
                if required > limit {
                    return Err(QuantError::BitWidthExceeded {
                        node: node.name.clone(),
                        required,
                        limit,
                    });
                }
            }
            debug!(node = %node.name, kind = %node.kind.tag(), bits = required, "quantized node");

            values.insert(
                node.output.clone(),
                QuantizedArray {
                    values: output,
                    params: *op.output_params(),
                },
            );
            ops.push((depths[node.id.index()], op));
        }

        let outputs = graph
            .outputs()
            .iter()
            .map(|name| {
                values
                    .get(name)
                    .map(|value| (name.clone(), value.params))
                    .ok_or_else(|| GraphError::malformed(format!("output '{name}' has no value")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            nodes = ops.len(),
            folded_from = self.graph.len(),
            n_bits,
            "quantized module built"
        );
        Ok(QuantizedModule::new(QuantizedGraph::new(inputs, ops, outputs)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::QuantizedOp;
    use cipherml_graph::{GraphBuilder, OpKind, OpTag};

    fn relu_graph() -> Graph {
        GraphBuilder::new()
            .input("x", &[1, 3])
            .initializer(
                "w",
                Tensor::from_vec(vec![1.0, -1.0, 0.5, 2.0, 0.0, -0.5], &[3, 2]).unwrap(),
            )
            .node("mm", OpKind::MatMul, &["x", "w"], "h")
            .node("act", OpKind::Relu, &["h"], "y")
            .output("y")
            .build()
            .unwrap()
    }

    fn calibration() -> Tensor<f64> {
        Tensor::from_vec(
            vec![-1.0, 0.5, 0.25, 0.75, -0.5, 1.0, 0.0, 1.0, -1.0, 0.3, 0.2, 0.1],
            &[4, 3],
        )
        .unwrap()
    }

    #[test]
    fn test_quantize_module_orders_ops_by_depth() {
        let module = PostTrainingAffineQuantization::new(8, relu_graph())
            .quantize_module(&[calibration()])
            .unwrap();
        assert_eq!(module.len(), 2);
        let (depth, op) = module.get("y").unwrap();
        assert_eq!(depth, 1);
        assert_eq!(op.tag(), OpTag::Relu);
        let names: Vec<&str> = module.ops().map(QuantizedOp::name).collect();
        assert_eq!(names, vec!["mm", "act"]);
    }

    #[test]
    fn test_edges_resolve_to_variables_and_constants() {
        let module = PostTrainingAffineQuantization::new(8, relu_graph())
            .quantize_module(&[calibration()])
            .unwrap();
        let (_, mm) = module.get("h").unwrap();
        let kinds: Vec<(&str, bool)> = mm
            .inputs()
            .iter()
            .map(|input| (input.name(), input.is_constant()))
            .collect();
        assert_eq!(kinds, vec![("x", false), ("w", true)]);
        let QuantizedInput::Constant { float, .. } = &mm.inputs()[1] else {
            panic!("expected constant weight");
        };
        assert_eq!(float, relu_graph().initializer("w").unwrap());

        let (_, act) = module.get("y").unwrap();
        assert_eq!(act.inputs()[0].name(), "h");
        assert_eq!(act.inputs()[0].params(), mm.output_params());
    }

    #[test]
    fn test_invalid_bit_width() {
        for n_bits in [0, 17] {
            let err = PostTrainingAffineQuantization::new(n_bits, relu_graph())
                .quantize_module(&[calibration()])
                .unwrap_err();
            assert!(matches!(err, QuantError::InvalidBitWidth { .. }));
        }
    }

    #[test]
    fn test_calibration_shape_is_checked() {
        let wrong = Tensor::zeros(&[4, 2]);
        let err = PostTrainingAffineQuantization::new(8, relu_graph())
            .quantize_module(&[wrong])
            .unwrap_err();
        assert!(matches!(err, QuantError::Graph(GraphError::InputShape { .. })));
    }

    #[test]
    fn test_bit_width_limit() {
        let quantizer = PostTrainingAffineQuantization::new(8, relu_graph());
        let err = quantizer
            .clone()
            .bit_width_limit(Some(8))
            .quantize_module(&[calibration()])
            .unwrap_err();
        assert!(matches!(
            err,
            QuantError::BitWidthExceeded { ref node, .. } if node == "mm"
        ));
        assert!(quantizer
            .bit_width_limit(Some(32))
            .quantize_module(&[calibration()])
            .is_ok());
    }

    #[test]
    fn test_constant_output_is_rejected() {
        let graph = GraphBuilder::new()
            .input("x", &[1])
            .initializer("c", Tensor::scalar(1.0))
            .node("neg", OpKind::Sub, &["c", "c"], "zero")
            .node("id", OpKind::Identity, &["x"], "y")
            .output("y")
            .output("zero")
            .build()
            .unwrap();
        let err = PostTrainingAffineQuantization::new(8, graph)
            .quantize_module(&[Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap()])
            .unwrap_err();
        assert!(matches!(err, QuantError::ConstantOutput(ref name) if name == "zero"));
    }

    #[test]
    fn test_custom_registry() {
        let registry = OperatorRegistry::standard().without(OpTag::Relu);
        let err = PostTrainingAffineQuantization::new(8, relu_graph())
            .registry(&registry)
            .quantize_module(&[calibration()])
            .unwrap_err();
        assert!(matches!(
            err,
            QuantError::UnsupportedOperator {
                kind: OpTag::Relu,
                ..
            }
        ));
    }
}
