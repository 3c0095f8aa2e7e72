//! Quantized Operators
//!
//! A [`QuantizedOp`] is one graph node re-expressed over integers: its
//! variable inputs arrive as quantized tensors, its constant inputs were
//! quantized once at construction, and its output is produced in the
//! integer domain of its output parameters.
//!
//! # Kernels
//! - `linear` - MatMul, Gemm and Conv with the bias folded into the accumulator
//! - `elementwise` - Add/Sub over rescaled operands, Mul/Div by a constant
//! - `lookup` - univariate functions as tables over every input level
//! - `pool` - average pooling as an integer window sum and one rescale
//! - `layout` - Identity, Reshape, Flatten and Transpose
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod elementwise;
pub mod layout;
pub mod linear;
pub mod lookup;
pub mod pool;

use cipherml_graph::{Node, OpKind, OpTag};
use cipherml_tensor::Tensor;

use crate::error::{QuantError, QuantResult};
use crate::qparams::{integer_bit_width, QuantParams, QuantizedArray};

pub use elementwise::{AddSubKernel, ScaleKernel};
pub use layout::LayoutKernel;
pub use linear::LinearKernel;
pub use lookup::LookupTable;
pub use pool::PoolKernel;

// =============================================================================
// Inputs
// =============================================================================

/// One input of a quantized operator.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantizedInput {
    /// Value supplied at execution time.
    Variable {
        /// Edge name.
        name: String,
        /// Parameters of the incoming integers.
        params: QuantParams,
    },
    /// Value fixed at construction.
    Constant {
        /// Edge name.
        name: String,
        /// Pre-quantized value.
        value: QuantizedArray,
        /// Real value the constant was quantized from.
        float: Tensor<f64>,
    },
}

impl QuantizedInput {
    /// Edge name.
    pub fn name(&self) -> &str {
        match self {
            Self::Variable { name, .. } | Self::Constant { name, .. } => name,
        }
    }

    /// Returns true for constant inputs.
    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant { .. })
    }

    /// Quantization parameters of this input.
    pub fn params(&self) -> &QuantParams {
        match self {
            Self::Variable { params, .. } => params,
            Self::Constant { value, .. } => &value.params,
        }
    }
}

// =============================================================================
// Integer Range Tracking
// =============================================================================

/// Smallest and largest integer observed during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    /// Smallest value.
    pub min: i64,
    /// Largest value.
    pub max: i64,
}

impl IntRange {
    /// A range that has observed nothing.
    pub const EMPTY: Self = Self {
        min: i64::MAX,
        max: i64::MIN,
    };

    /// Returns true if nothing was observed.
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    /// Widens the range to cover a tensor.
    pub fn observe(&mut self, values: &Tensor<i64>) {
        if let (Some(min), Some(max)) = (values.min(), values.max()) {
            self.min = self.min.min(min);
            self.max = self.max.max(max);
        }
    }

    /// Widens the range to cover another range.
    pub fn merge(&mut self, other: IntRange) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Bits needed to hold every observed value; 0 if empty.
    pub fn bit_width(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            integer_bit_width(self.min, self.max)
        }
    }
}

impl Default for IntRange {
    fn default() -> Self {
        Self::EMPTY
    }
}

// =============================================================================
// Kernel
// =============================================================================

/// Prepared integer computation of an operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    /// Matrix product or convolution against a constant.
    Linear(LinearKernel),
    /// Sum of rescaled operands.
    AddSub(AddSubKernel),
    /// Product with a constant.
    Scale(ScaleKernel),
    /// Table lookup.
    Lookup(LookupTable),
    /// Average pooling.
    Pool(PoolKernel),
    /// Data movement.
    Layout(LayoutKernel),
}

/// Everything a kernel constructor needs to know about a node.
#[derive(Debug)]
pub struct OpContext<'a> {
    /// Graph node being quantized.
    pub node: &'a Node,
    /// Inputs in node order; constants are already quantized.
    pub inputs: Vec<QuantizedInput>,
    /// Parameters of the output.
    pub output_params: QuantParams,
    /// Bit width used for constants.
    pub n_bits: u32,
}

impl OpContext<'_> {
    /// Error for an operand pattern this kernel cannot express.
    pub fn unsupported(&self, reason: impl Into<String>) -> QuantError {
        QuantError::unsupported(&self.node.name, self.node.kind.tag(), reason)
    }

    /// Positions of the variable inputs.
    pub fn variable_positions(&self) -> Vec<usize> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| !input.is_constant())
            .map(|(i, _)| i)
            .collect()
    }
}

// =============================================================================
// QuantizedOp
// =============================================================================

/// A graph node bound to quantization parameters and an integer kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedOp {
    name: String,
    output: String,
    kind: OpKind,
    inputs: Vec<QuantizedInput>,
    output_params: QuantParams,
    kernel: Kernel,
}

impl QuantizedOp {
    pub(crate) fn new(context: OpContext<'_>, kernel: Kernel) -> Self {
        Self {
            name: context.node.name.clone(),
            output: context.node.output.clone(),
            kind: context.node.kind.clone(),
            inputs: context.inputs,
            output_params: context.output_params,
            kernel,
        }
    }

    /// Name of the originating node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output edge name.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Operator kind and attributes.
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    /// Operator tag.
    pub fn tag(&self) -> OpTag {
        self.kind.tag()
    }

    /// Inputs in node order.
    pub fn inputs(&self) -> &[QuantizedInput] {
        &self.inputs
    }

    /// Variable inputs in node order.
    pub fn variable_inputs(&self) -> impl Iterator<Item = &QuantizedInput> {
        self.inputs.iter().filter(|input| !input.is_constant())
    }

    /// Parameters of the output.
    pub fn output_params(&self) -> &QuantParams {
        &self.output_params
    }

    /// Prepared kernel.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Integer forward pass over the variable inputs, in node order.
    pub fn quantized_forward(&self, inputs: &[&Tensor<i64>]) -> QuantResult<QuantizedArray> {
        let mut range = IntRange::EMPTY;
        Ok(QuantizedArray {
            values: self.quantized_forward_traced(inputs, &mut range)?,
            params: self.output_params,
        })
    }

    /// Integer forward pass that also records the widest intermediate.
    pub fn quantized_forward_traced(
        &self,
        inputs: &[&Tensor<i64>],
        range: &mut IntRange,
    ) -> QuantResult<Tensor<i64>> {
        let expected = self.variable_inputs().count();
        if inputs.len() != expected {
            return Err(QuantError::InputCount {
                expected,
                actual: inputs.len(),
            });
        }

        let out = &self.output_params;
        let result = match &self.kernel {
            Kernel::Linear(k) => k.forward(inputs[0], out, range)?,
            Kernel::AddSub(k) => k.forward(inputs, out, range)?,
            Kernel::Scale(k) => k.forward(inputs[0], out, range)?,
            Kernel::Lookup(k) => k.forward(inputs[0]),
            Kernel::Pool(k) => k.forward(inputs[0], out, range)?,
            Kernel::Layout(k) => k.forward(inputs[0])?,
        };
        range.observe(&result);
        for input in inputs {
            range.observe(input);
        }
        Ok(result)
    }

    /// Floating forward pass over the variable inputs, with constants taken
    /// from their original real values.
    pub fn floating_forward(&self, inputs: &[&Tensor<f64>]) -> QuantResult<Tensor<f64>> {
        let mut variables = inputs.iter();
        let args = self
            .inputs
            .iter()
            .map(|input| match input {
                QuantizedInput::Constant { float, .. } => Ok(float),
                QuantizedInput::Variable { .. } => {
                    variables.next().copied().ok_or(QuantError::InputCount {
                        expected: self.variable_inputs().count(),
                        actual: inputs.len(),
                    })
                }
            })
            .collect::<QuantResult<Vec<&Tensor<f64>>>>()?;
        if variables.next().is_some() {
            return Err(QuantError::InputCount {
                expected: self.variable_inputs().count(),
                actual: inputs.len(),
            });
        }
        Ok(self.kind.evaluate(&args)?)
    }
}
