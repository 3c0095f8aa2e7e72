//! Circuit Compilation
//!
//! Turns the integer plan of a [`QuantizedModule`](crate::QuantizedModule)
//! into an executable circuit for a bit-width bounded backend. Compilation
//! measures how many bits every operator needs on a representative quantized
//! input set and either rejects the plan or, in simulation mode, records an
//! advisory.
//!
//! # Example
//! ```rust,ignore
//! let config = CompileConfig::new().use_virtual_lib(true).max_bit_width(8);
//! let circuit = module.compile(&q_inputs, &config)?;
//! let outputs = module.forward_fhe(&q_inputs)?;
//! ```
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use cipherml_tensor::Tensor;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{QuantError, QuantResult};
use crate::module::QuantizedGraph;
use crate::ops::QuantizedInput;
use crate::qparams::QuantParams;
use crate::MAXIMUM_BIT_WIDTH;

// =============================================================================
// Compile Configuration
// =============================================================================

/// Configuration for circuit compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Simulation mode: bit-width violations are advisories, not errors.
    pub use_virtual_lib: bool,
    /// Largest bit width any integer in the circuit may use.
    pub max_bit_width: u32,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            use_virtual_lib: false,
            max_bit_width: MAXIMUM_BIT_WIDTH,
        }
    }
}

impl CompileConfig {
    /// Creates a compile configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: toggle simulation mode.
    #[must_use]
    pub fn use_virtual_lib(mut self, use_virtual_lib: bool) -> Self {
        self.use_virtual_lib = use_virtual_lib;
        self
    }

    /// Builder: set the bit-width ceiling.
    #[must_use]
    pub fn max_bit_width(mut self, max_bit_width: u32) -> Self {
        self.max_bit_width = max_bit_width;
        self
    }
}

// =============================================================================
// Bit Width Report
// =============================================================================

/// Bits required by each operator, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitWidthReport {
    entries: Vec<(String, u32)>,
}

impl BitWidthReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the width needed by an operator.
    pub fn record(&mut self, op: &str, bits: u32) {
        self.entries.push((op.to_string(), bits));
    }

    /// Width recorded for an operator.
    pub fn get(&self, op: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(name, _)| name == op)
            .map(|(_, bits)| *bits)
    }

    /// Widest operator and its width; the first one wins ties.
    pub fn widest(&self) -> Option<(&str, u32)> {
        self.entries
            .iter()
            .fold(None::<(&str, u32)>, |best, (name, bits)| match best {
                Some((_, b)) if b >= *bits => best,
                _ => Some((name.as_str(), *bits)),
            })
    }

    /// Largest recorded width, 0 for an empty report.
    pub fn max_bit_width(&self) -> u32 {
        self.widest().map_or(0, |(_, bits)| bits)
    }

    /// Operators whose width exceeds `limit`.
    pub fn exceeding(&self, limit: u32) -> Vec<(&str, u32)> {
        self.entries
            .iter()
            .filter(|(_, bits)| *bits > limit)
            .map(|(name, bits)| (name.as_str(), *bits))
            .collect()
    }

    /// Iterates over `(operator, bits)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(name, bits)| (name.as_str(), *bits))
    }

    /// Number of recorded operators.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Backends
// =============================================================================

/// A compiled, runnable circuit.
pub trait ExecutableCircuit: Send + Sync + fmt::Debug {
    /// Executes the circuit on quantized inputs.
    fn run(&self, inputs: &[Tensor<i64>]) -> QuantResult<Vec<Tensor<i64>>>;
}

/// Something that can compile an integer plan into a circuit.
pub trait CircuitBackend {
    /// Backend name, used in logs and errors.
    fn name(&self) -> &str;

    /// Compiles a plan. Bit-width checks have already been applied.
    fn compile(
        &self,
        plan: Arc<QuantizedGraph>,
        config: &CompileConfig,
    ) -> QuantResult<Box<dyn ExecutableCircuit>>;
}

/// Built-in backend executing the integer plan in the clear.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulationBackend;

/// Circuit produced by [`SimulationBackend`].
#[derive(Debug)]
pub struct SimulationCircuit {
    plan: Arc<QuantizedGraph>,
}

impl CircuitBackend for SimulationBackend {
    fn name(&self) -> &str {
        "simulation"
    }

    fn compile(
        &self,
        plan: Arc<QuantizedGraph>,
        _config: &CompileConfig,
    ) -> QuantResult<Box<dyn ExecutableCircuit>> {
        Ok(Box::new(SimulationCircuit { plan }))
    }
}

impl ExecutableCircuit for SimulationCircuit {
    fn run(&self, inputs: &[Tensor<i64>]) -> QuantResult<Vec<Tensor<i64>>> {
        self.plan.execute(inputs, None)
    }
}

// =============================================================================
// Circuit
// =============================================================================

/// A circuit together with what was learned while compiling it.
#[derive(Debug)]
pub struct Circuit {
    fingerprint: u64,
    backend: String,
    config: CompileConfig,
    report: BitWidthReport,
    advisory: Option<String>,
    inner: Box<dyn ExecutableCircuit>,
}

impl Circuit {
    /// Executes the circuit.
    pub fn run(&self, inputs: &[Tensor<i64>]) -> QuantResult<Vec<Tensor<i64>>> {
        self.inner.run(inputs)
    }

    /// Key of the plan and configuration this circuit was built from.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Name of the backend that built the circuit.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Configuration used for compilation.
    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Bit widths measured at compile time.
    pub fn report(&self) -> &BitWidthReport {
        &self.report
    }

    /// Bit-width violation tolerated in simulation mode.
    pub fn advisory(&self) -> Option<&str> {
        self.advisory.as_deref()
    }
}

/// Compiles `plan` after checking its measured bit widths against `config`.
pub(crate) fn compile_plan(
    plan: &Arc<QuantizedGraph>,
    q_inputs: &[Tensor<i64>],
    config: &CompileConfig,
    backend: &dyn CircuitBackend,
    fingerprint: u64,
) -> QuantResult<Circuit> {
    let mut report = BitWidthReport::new();
    plan.execute(q_inputs, Some(&mut report))?;

    let mut advisory = None;
    if let Some((node, required)) = report.widest() {
        if required > config.max_bit_width {
            if !config.use_virtual_lib {
                return Err(QuantError::BitWidthExceeded {
                    node: node.to_string(),
                    required,
                    limit: config.max_bit_width,
                });
            }
            warn!(
                node,
                required,
                limit = config.max_bit_width,
                "bit width exceeds the backend ceiling, continuing in simulation mode"
            );
            advisory = Some(format!(
                "'{node}' requires {required} bits, limit is {}",
                config.max_bit_width
            ));
        }
    }

    let inner = backend.compile(Arc::clone(plan), config)?;
    info!(
        backend = backend.name(),
        nodes = plan.len(),
        max_bit_width = report.max_bit_width(),
        "compiled circuit"
    );
    Ok(Circuit {
        fingerprint,
        backend: backend.name().to_string(),
        config: *config,
        report,
        advisory,
        inner,
    })
}

// =============================================================================
// Fingerprint
// =============================================================================

fn hash_params(params: &QuantParams, hasher: &mut FxHasher) {
    params.scale.to_bits().hash(hasher);
    params.zero_point.hash(hasher);
    params.n_bits.hash(hasher);
    params.is_signed.hash(hasher);
}

/// Hash of a plan and compile configuration.
///
/// Two plans with the same operators, parameters and constants under the same
/// configuration share a fingerprint.
pub fn fingerprint(plan: &QuantizedGraph, config: &CompileConfig) -> u64 {
    let mut hasher = FxHasher::default();
    config.hash(&mut hasher);

    for (name, shape, params) in plan.inputs() {
        name.hash(&mut hasher);
        shape.hash(&mut hasher);
        hash_params(params, &mut hasher);
    }
    for (depth, op) in plan.ops() {
        depth.hash(&mut hasher);
        op.name().hash(&mut hasher);
        op.output().hash(&mut hasher);
        // OpKind carries floats, its Debug form is a stable rendering.
        format!("{:?}", op.kind()).hash(&mut hasher);
        hash_params(op.output_params(), &mut hasher);
        for input in op.inputs() {
            input.name().hash(&mut hasher);
            hash_params(input.params(), &mut hasher);
            if let QuantizedInput::Constant { value, .. } = input {
                value.values.shape().hash(&mut hasher);
                value.values.data().hash(&mut hasher);
            }
        }
    }
    for (name, params) in plan.outputs() {
        name.hash(&mut hasher);
        hash_params(params, &mut hasher);
    }
    hasher.finish()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_config_builder() {
        let config = CompileConfig::new();
        assert!(!config.use_virtual_lib);
        assert_eq!(config.max_bit_width, MAXIMUM_BIT_WIDTH);

        let config = config.use_virtual_lib(true).max_bit_width(12);
        assert!(config.use_virtual_lib);
        assert_eq!(config.max_bit_width, 12);
    }

    #[test]
    fn test_bit_width_report() {
        let mut report = BitWidthReport::new();
        assert_eq!(report.max_bit_width(), 0);
        assert!(report.widest().is_none());

        report.record("fc1", 14);
        report.record("relu", 8);
        report.record("fc2", 14);
        assert_eq!(report.len(), 3);
        assert_eq!(report.get("relu"), Some(8));
        assert_eq!(report.widest(), Some(("fc1", 14)));
        assert_eq!(report.exceeding(8), vec![("fc1", 14), ("fc2", 14)]);
        assert!(report.exceeding(14).is_empty());
    }
}
