//! Quantized Module
//!
//! The result of post-training quantization: an integer execution plan with
//! the quantization parameters of its inputs and outputs, plus the circuit
//! compiled from it.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use cipherml_graph::GraphError;
use cipherml_tensor::Tensor;
use rustc_hash::{FxHashMap, FxHasher};

use crate::compile::{
    compile_plan, fingerprint, BitWidthReport, Circuit, CircuitBackend, CompileConfig,
    SimulationBackend,
};
use crate::error::{QuantError, QuantResult};
use crate::ops::{IntRange, QuantizedOp};
use crate::qparams::QuantParams;

// =============================================================================
// Execution Plan
// =============================================================================

/// Declared input of a quantized graph.
#[derive(Debug, Clone, PartialEq)]
struct PlanInput {
    name: String,
    shape: Vec<usize>,
    params: QuantParams,
}

/// Quantized operators in execution order, each paired with its depth.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedGraph {
    inputs: Vec<PlanInput>,
    ops: Vec<(usize, QuantizedOp)>,
    index: FxHashMap<String, usize>,
    outputs: Vec<(String, QuantParams)>,
}

impl QuantizedGraph {
    /// Assembles a plan. Ops are ordered by depth; ops of equal depth keep
    /// their relative order, so `ops` must already be topologically sorted.
    pub(crate) fn new(
        inputs: Vec<(String, Vec<usize>, QuantParams)>,
        mut ops: Vec<(usize, QuantizedOp)>,
        outputs: Vec<(String, QuantParams)>,
    ) -> Self {
        ops.sort_by_key(|(depth, _)| *depth);
        let index = ops
            .iter()
            .enumerate()
            .map(|(i, (_, op))| (op.output().to_string(), i))
            .collect();
        Self {
            inputs: inputs
                .into_iter()
                .map(|(name, shape, params)| PlanInput {
                    name,
                    shape,
                    params,
                })
                .collect(),
            ops,
            index,
            outputs,
        }
    }

    /// Declared inputs as `(name, shape, params)`.
    pub fn inputs(&self) -> impl Iterator<Item = (&str, &[usize], &QuantParams)> {
        self.inputs
            .iter()
            .map(|input| (input.name.as_str(), input.shape.as_slice(), &input.params))
    }

    /// Operators in execution order with their depth.
    pub fn ops(&self) -> impl Iterator<Item = (usize, &QuantizedOp)> {
        self.ops.iter().map(|(depth, op)| (*depth, op))
    }

    /// Declared outputs as `(name, params)`.
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &QuantParams)> {
        self.outputs.iter().map(|(name, params)| (name.as_str(), params))
    }

    /// Operator producing the edge `name`, with its depth.
    pub fn get(&self, name: &str) -> Option<(usize, &QuantizedOp)> {
        self.index
            .get(name)
            .map(|&i| (self.ops[i].0, &self.ops[i].1))
    }

    /// Number of operators.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if the plan has no operators.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn check_inputs(&self, inputs: &[Tensor<i64>]) -> QuantResult<()> {
        if inputs.len() != self.inputs.len() {
            return Err(QuantError::InputCount {
                expected: self.inputs.len(),
                actual: inputs.len(),
            });
        }
        for (declared, supplied) in self.inputs.iter().zip(inputs) {
            let matches = match (declared.shape.split_first(), supplied.shape().split_first()) {
                (None, None) => true,
                (Some((_, rest)), Some((_, supplied_rest))) => rest == supplied_rest,
                _ => false,
            };
            if !matches {
                return Err(QuantError::InputShape {
                    name: declared.name.clone(),
                    expected: declared.shape.clone(),
                    actual: supplied.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Runs every operator on quantized inputs, optionally recording the bit
    /// width each one needs.
    pub fn execute(
        &self,
        inputs: &[Tensor<i64>],
        mut report: Option<&mut BitWidthReport>,
    ) -> QuantResult<Vec<Tensor<i64>>> {
        self.check_inputs(inputs)?;
        let mut values: FxHashMap<&str, Tensor<i64>> = self
            .inputs
            .iter()
            .zip(inputs)
            .map(|(input, value)| (input.name.as_str(), value.clone()))
            .collect();

        for (_, op) in &self.ops {
            let args = op
                .variable_inputs()
                .map(|input| {
                    values.get(input.name()).ok_or_else(|| {
                        GraphError::malformed(format!("edge '{}' has no value", input.name()))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let mut range = IntRange::EMPTY;
            let result = op.quantized_forward_traced(&args, &mut range)?;
            if let Some(report) = report.as_deref_mut() {
                report.record(op.name(), range.bit_width());
            }
            values.insert(op.output(), result);
        }

        self.outputs
            .iter()
            .map(|(name, _)| {
                values.get(name.as_str()).cloned().ok_or_else(|| {
                    GraphError::malformed(format!("output '{name}' has no value")).into()
                })
            })
            .collect()
    }
}

// =============================================================================
// Quantized Module
// =============================================================================

/// A quantized network ready for integer execution and compilation.
#[derive(Debug, Clone)]
pub struct QuantizedModule {
    plan: Arc<QuantizedGraph>,
    compiled: Option<(u64, Arc<Circuit>)>,
}

impl QuantizedModule {
    pub(crate) fn new(plan: QuantizedGraph) -> Self {
        Self {
            plan: Arc::new(plan),
            compiled: None,
        }
    }

    /// Quantizes floating inputs with the calibrated input parameters.
    pub fn quantize_input(&self, inputs: &[Tensor<f64>]) -> QuantResult<Vec<Tensor<i64>>> {
        if inputs.len() != self.plan.inputs.len() {
            return Err(QuantError::InputCount {
                expected: self.plan.inputs.len(),
                actual: inputs.len(),
            });
        }
        Ok(self
            .plan
            .inputs
            .iter()
            .zip(inputs)
            .map(|(input, value)| input.params.quantize(value))
            .collect())
    }

    /// Integer forward pass.
    pub fn forward(&self, q_inputs: &[Tensor<i64>]) -> QuantResult<Vec<Tensor<i64>>> {
        self.plan.execute(q_inputs, None)
    }

    /// Maps quantized outputs back to reals.
    pub fn dequantize_output(&self, q_outputs: &[Tensor<i64>]) -> QuantResult<Vec<Tensor<f64>>> {
        if q_outputs.len() != self.plan.outputs.len() {
            return Err(QuantError::InputCount {
                expected: self.plan.outputs.len(),
                actual: q_outputs.len(),
            });
        }
        Ok(self
            .plan
            .outputs
            .iter()
            .zip(q_outputs)
            .map(|((_, params), value)| params.dequantize(value))
            .collect())
    }

    /// Quantize, run and dequantize in one step.
    pub fn forward_float(&self, inputs: &[Tensor<f64>]) -> QuantResult<Vec<Tensor<f64>>> {
        let q_inputs = self.quantize_input(inputs)?;
        let q_outputs = self.forward(&q_inputs)?;
        self.dequantize_output(&q_outputs)
    }

    /// Operator producing the edge `name`, with its depth.
    pub fn get(&self, name: &str) -> Option<(usize, &QuantizedOp)> {
        self.plan.get(name)
    }

    /// Operators in execution order.
    pub fn ops(&self) -> impl Iterator<Item = &QuantizedOp> {
        self.plan.ops().map(|(_, op)| op)
    }

    /// Number of operators.
    pub fn len(&self) -> usize {
        self.plan.len()
    }

    /// Returns true if the module has no operators.
    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }

    /// Parameters of each declared input.
    pub fn input_params(&self) -> Vec<QuantParams> {
        self.plan.inputs.iter().map(|input| input.params).collect()
    }

    /// Parameters of each declared output.
    pub fn output_params(&self) -> Vec<QuantParams> {
        self.plan.outputs.iter().map(|(_, params)| *params).collect()
    }

    /// Bits each operator needs on the given quantized inputs.
    pub fn bit_width_report(&self, q_inputs: &[Tensor<i64>]) -> QuantResult<BitWidthReport> {
        let mut report = BitWidthReport::new();
        self.plan.execute(q_inputs, Some(&mut report))?;
        Ok(report)
    }

    /// The integer execution plan.
    pub fn plan(&self) -> &Arc<QuantizedGraph> {
        &self.plan
    }

    /// Compiles with the built-in simulation backend.
    pub fn compile(
        &mut self,
        q_inputs: &[Tensor<i64>],
        config: &CompileConfig,
    ) -> QuantResult<Arc<Circuit>> {
        self.compile_with_backend(q_inputs, config, &SimulationBackend)
    }

    /// Compiles with a given backend.
    ///
    /// A module remembers its last circuit; compiling again with the same
    /// configuration and backend returns it unchanged.
    pub fn compile_with_backend(
        &mut self,
        q_inputs: &[Tensor<i64>],
        config: &CompileConfig,
        backend: &dyn CircuitBackend,
    ) -> QuantResult<Arc<Circuit>> {
        let key = {
            let mut hasher = FxHasher::default();
            fingerprint(&self.plan, config).hash(&mut hasher);
            backend.name().hash(&mut hasher);
            hasher.finish()
        };
        if let Some((cached, circuit)) = &self.compiled {
            if *cached == key {
                return Ok(Arc::clone(circuit));
            }
        }

        let circuit = Arc::new(compile_plan(&self.plan, q_inputs, config, backend, key)?);
        self.compiled = Some((key, Arc::clone(&circuit)));
        Ok(circuit)
    }

    /// Returns true once a circuit has been compiled.
    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// The compiled circuit, if any.
    pub fn circuit(&self) -> Option<&Arc<Circuit>> {
        self.compiled.as_ref().map(|(_, circuit)| circuit)
    }

    /// Runs the compiled circuit.
    pub fn forward_fhe(&self, q_inputs: &[Tensor<i64>]) -> QuantResult<Vec<Tensor<i64>>> {
        let circuit = self.circuit().ok_or(QuantError::NotCompiled)?;
        circuit.run(q_inputs)
    }
}
