//! Operator Kinds
//!
//! The closed set of operators a CipherML graph can contain. Typed graphs
//! are built directly from `OpKind` values; graphs coming from an exchange
//! format go through [`OpKind::from_op_type`], which maps ONNX operator names and
//! attributes onto the same enum and is the only place an unknown operator
//! name can appear.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::ops::RangeInclusive;

use cipherml_tensor::{Conv2dParams, Pool2dParams, Tensor};
use rustc_hash::FxHashMap;

use crate::error::{GraphError, GraphResult};

// =============================================================================
// OpKind
// =============================================================================

/// Operator carried by a graph node, with its static attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Emits a literal tensor. Takes no inputs.
    Constant {
        /// The emitted value.
        value: Tensor<f64>,
    },
    /// Passes its input through.
    Identity,
    /// Elementwise addition with broadcasting.
    Add,
    /// Elementwise subtraction with broadcasting.
    Sub,
    /// Elementwise multiplication with broadcasting.
    Mul,
    /// Elementwise division with broadcasting.
    Div,
    /// NumPy-style matrix product.
    MatMul,
    /// `alpha * op(A) @ op(B) + beta * C`.
    Gemm {
        /// Scale of the product.
        alpha: f64,
        /// Scale of the bias.
        beta: f64,
        /// Transpose A before multiplying.
        trans_a: bool,
        /// Transpose B before multiplying.
        trans_b: bool,
    },
    /// `max(x, 0)`.
    Relu,
    /// `1 / (1 + exp(-x))`.
    Sigmoid,
    /// Hyperbolic tangent.
    Tanh,
    /// Natural exponential.
    Exp,
    /// Clamp into `[min, max]`. ReLU6 is `Clip { min: 0, max: 6 }`.
    Clip {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// 2-D convolution with optional bias.
    Conv(Conv2dParams),
    /// 2-D average pooling.
    AveragePool(Pool2dParams),
    /// Reshape to a target shape (`-1` inferred, `0` copied).
    Reshape {
        /// Target shape.
        shape: Vec<i64>,
    },
    /// Flatten into a matrix around `axis`.
    Flatten {
        /// Split axis.
        axis: i64,
    },
    /// Permute dimensions (empty permutation reverses them).
    Transpose {
        /// Dimension permutation.
        perm: Vec<usize>,
    },
}

impl OpKind {
    /// Returns the payload-free tag of this operator.
    pub fn tag(&self) -> OpTag {
        match self {
            Self::Constant { .. } => OpTag::Constant,
            Self::Identity => OpTag::Identity,
            Self::Add => OpTag::Add,
            Self::Sub => OpTag::Sub,
            Self::Mul => OpTag::Mul,
            Self::Div => OpTag::Div,
            Self::MatMul => OpTag::MatMul,
            Self::Gemm { .. } => OpTag::Gemm,
            Self::Relu => OpTag::Relu,
            Self::Sigmoid => OpTag::Sigmoid,
            Self::Tanh => OpTag::Tanh,
            Self::Exp => OpTag::Exp,
            Self::Clip { .. } => OpTag::Clip,
            Self::Conv(_) => OpTag::Conv,
            Self::AveragePool(_) => OpTag::AveragePool,
            Self::Reshape { .. } => OpTag::Reshape,
            Self::Flatten { .. } => OpTag::Flatten,
            Self::Transpose { .. } => OpTag::Transpose,
        }
    }

    /// Operator name as used in exchange formats.
    pub fn name(&self) -> &'static str {
        self.tag().name()
    }

    /// Accepted number of inputs.
    pub fn arity(&self) -> RangeInclusive<usize> {
        match self {
            Self::Constant { .. } => 0..=0,
            Self::Identity
            | Self::Relu
            | Self::Sigmoid
            | Self::Tanh
            | Self::Exp
            | Self::Clip { .. }
            | Self::AveragePool(_)
            | Self::Reshape { .. }
            | Self::Flatten { .. }
            | Self::Transpose { .. } => 1..=1,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::MatMul => 2..=2,
            Self::Gemm { .. } | Self::Conv(_) => 2..=3,
        }
    }

    /// Returns true for operators that only move data around.
    pub fn is_layout(&self) -> bool {
        matches!(
            self,
            Self::Identity | Self::Reshape { .. } | Self::Flatten { .. } | Self::Transpose { .. }
        )
    }

    /// Returns true for elementwise univariate functions.
    pub fn is_univariate(&self) -> bool {
        matches!(
            self,
            Self::Relu | Self::Sigmoid | Self::Tanh | Self::Exp | Self::Clip { .. }
        )
    }

    /// Builds an operator from an ONNX operator type and its attributes.
    ///
    /// `node` is only used to label errors.
    pub fn from_op_type(node: &str, op_type: &str, attrs: &Attributes) -> GraphResult<Self> {
        let invalid = |attribute: &str, reason: &str| GraphError::InvalidAttribute {
            node: node.to_string(),
            attribute: attribute.to_string(),
            reason: reason.to_string(),
        };

        let kind = match op_type {
            "Constant" => {
                let value = match (attrs.get_tensor("value"), attrs.get_float("value_float")) {
                    (Some(t), _) => t.clone(),
                    (None, Some(v)) => Tensor::scalar(v),
                    (None, None) => return Err(invalid("value", "Constant requires a value")),
                };
                Self::Constant { value }
            }
            "Identity" => Self::Identity,
            "Add" => Self::Add,
            "Sub" => Self::Sub,
            "Mul" => Self::Mul,
            "Div" => Self::Div,
            "MatMul" => Self::MatMul,
            "Gemm" => Self::Gemm {
                alpha: attrs.get_float("alpha").unwrap_or(1.0),
                beta: attrs.get_float("beta").unwrap_or(1.0),
                trans_a: attrs.get_int("transA").unwrap_or(0) != 0,
                trans_b: attrs.get_int("transB").unwrap_or(0) != 0,
            },
            "Relu" => Self::Relu,
            "Sigmoid" => Self::Sigmoid,
            "Tanh" => Self::Tanh,
            "Exp" => Self::Exp,
            "Clip" => {
                let min = attrs.get_float("min").unwrap_or(f64::NEG_INFINITY);
                let max = attrs.get_float("max").unwrap_or(f64::INFINITY);
                if min > max {
                    return Err(invalid("min", "Clip lower bound exceeds upper bound"));
                }
                Self::Clip { min, max }
            }
            "Conv" => {
                let defaults = Conv2dParams::default();
                Self::Conv(Conv2dParams {
                    strides: pair(attrs.get_ints("strides"), defaults.strides)
                        .ok_or_else(|| invalid("strides", "expected two values"))?,
                    pads: quad(attrs.get_ints("pads"))
                        .ok_or_else(|| invalid("pads", "expected four values"))?,
                    dilations: pair(attrs.get_ints("dilations"), defaults.dilations)
                        .ok_or_else(|| invalid("dilations", "expected two values"))?,
                    group: attrs.get_int("group").unwrap_or(1).max(1) as usize,
                })
            }
            "AveragePool" => {
                let kernel = pair(attrs.get_ints("kernel_shape"), [0, 0])
                    .filter(|k| k[0] > 0 && k[1] > 0)
                    .ok_or_else(|| invalid("kernel_shape", "expected two positive values"))?;
                Self::AveragePool(Pool2dParams {
                    kernel,
                    strides: pair(attrs.get_ints("strides"), [1, 1])
                        .ok_or_else(|| invalid("strides", "expected two values"))?,
                    pads: quad(attrs.get_ints("pads"))
                        .ok_or_else(|| invalid("pads", "expected four values"))?,
                    count_include_pad: attrs.get_int("count_include_pad").unwrap_or(0) != 0,
                })
            }
            "Reshape" => Self::Reshape {
                shape: attrs
                    .get_ints("shape")
                    .ok_or_else(|| invalid("shape", "Reshape requires a static target shape"))?
                    .to_vec(),
            },
            "Flatten" => Self::Flatten {
                axis: attrs.get_int("axis").unwrap_or(1),
            },
            "Transpose" => Self::Transpose {
                perm: attrs
                    .get_ints("perm")
                    .unwrap_or_default()
                    .iter()
                    .map(|&p| usize::try_from(p).map_err(|_| invalid("perm", "negative axis")))
                    .collect::<GraphResult<_>>()?,
            },
            _ => {
                return Err(GraphError::UnsupportedOperator {
                    node: node.to_string(),
                    op_type: op_type.to_string(),
                })
            }
        };
        Ok(kind)
    }
}

fn pair(values: Option<&[i64]>, default: [usize; 2]) -> Option<[usize; 2]> {
    match values {
        None => Some(default),
        Some(&[a, b]) if a >= 0 && b >= 0 => Some([a as usize, b as usize]),
        Some(_) => None,
    }
}

fn quad(values: Option<&[i64]>) -> Option<[usize; 4]> {
    match values {
        None => Some([0; 4]),
        Some(&[a, b, c, d]) if a.min(b).min(c).min(d) >= 0 => {
            Some([a as usize, b as usize, c as usize, d as usize])
        }
        Some(_) => None,
    }
}

// =============================================================================
// OpTag
// =============================================================================

/// Payload-free discriminant of [`OpKind`], used as a registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpTag {
    /// See [`OpKind::Constant`].
    Constant,
    /// See [`OpKind::Identity`].
    Identity,
    /// See [`OpKind::Add`].
    Add,
    /// See [`OpKind::Sub`].
    Sub,
    /// See [`OpKind::Mul`].
    Mul,
    /// See [`OpKind::Div`].
    Div,
    /// See [`OpKind::MatMul`].
    MatMul,
    /// See [`OpKind::Gemm`].
    Gemm,
    /// See [`OpKind::Relu`].
    Relu,
    /// See [`OpKind::Sigmoid`].
    Sigmoid,
    /// See [`OpKind::Tanh`].
    Tanh,
    /// See [`OpKind::Exp`].
    Exp,
    /// See [`OpKind::Clip`].
    Clip,
    /// See [`OpKind::Conv`].
    Conv,
    /// See [`OpKind::AveragePool`].
    AveragePool,
    /// See [`OpKind::Reshape`].
    Reshape,
    /// See [`OpKind::Flatten`].
    Flatten,
    /// See [`OpKind::Transpose`].
    Transpose,
}

impl OpTag {
    /// Every operator tag.
    pub const ALL: [OpTag; 18] = [
        Self::Constant,
        Self::Identity,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::MatMul,
        Self::Gemm,
        Self::Relu,
        Self::Sigmoid,
        Self::Tanh,
        Self::Exp,
        Self::Clip,
        Self::Conv,
        Self::AveragePool,
        Self::Reshape,
        Self::Flatten,
        Self::Transpose,
    ];

    /// Operator name as used in exchange formats.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Constant => "Constant",
            Self::Identity => "Identity",
            Self::Add => "Add",
            Self::Sub => "Sub",
            Self::Mul => "Mul",
            Self::Div => "Div",
            Self::MatMul => "MatMul",
            Self::Gemm => "Gemm",
            Self::Relu => "Relu",
            Self::Sigmoid => "Sigmoid",
            Self::Tanh => "Tanh",
            Self::Exp => "Exp",
            Self::Clip => "Clip",
            Self::Conv => "Conv",
            Self::AveragePool => "AveragePool",
            Self::Reshape => "Reshape",
            Self::Flatten => "Flatten",
            Self::Transpose => "Transpose",
        }
    }
}

impl std::fmt::Display for OpTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// A single operator attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Floating scalar.
    Float(f64),
    /// Integer scalar.
    Int(i64),
    /// Floating list.
    Floats(Vec<f64>),
    /// Integer list.
    Ints(Vec<i64>),
    /// Tensor value.
    Tensor(Tensor<f64>),
}

/// Named operator attributes, as attached to an exchange-format node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: FxHashMap<String, AttributeValue>,
}

impl Attributes {
    /// Creates an empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute.
    pub fn with(mut self, name: &str, value: AttributeValue) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    /// Returns a raw attribute.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.values.get(name)
    }

    /// Returns a float attribute; integer attributes are widened.
    pub fn get_float(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns an integer attribute.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name)? {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns an integer list attribute.
    pub fn get_ints(&self, name: &str) -> Option<&[i64]> {
        match self.values.get(name)? {
            AttributeValue::Ints(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a float list attribute.
    pub fn get_floats(&self, name: &str) -> Option<&[f64]> {
        match self.values.get(name)? {
            AttributeValue::Floats(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a tensor attribute.
    pub fn get_tensor(&self, name: &str) -> Option<&Tensor<f64>> {
        match self.values.get(name)? {
            AttributeValue::Tensor(t) => Some(t),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_cover_names() {
        for tag in OpTag::ALL {
            assert!(!tag.name().is_empty());
        }
        assert_eq!(OpKind::Relu.tag(), OpTag::Relu);
        assert_eq!(OpKind::Conv(Conv2dParams::default()).name(), "Conv");
    }

    #[test]
    fn test_arity() {
        assert_eq!(OpKind::Constant { value: Tensor::scalar(1.0) }.arity(), 0..=0);
        assert!(OpKind::Gemm {
            alpha: 1.0,
            beta: 1.0,
            trans_a: false,
            trans_b: false
        }
        .arity()
        .contains(&3));
        assert!(!OpKind::Add.arity().contains(&1));
    }

    #[test]
    fn test_parse_gemm() {
        let attrs = Attributes::new()
            .with("alpha", AttributeValue::Float(0.5))
            .with("transB", AttributeValue::Int(1));
        let kind = OpKind::from_op_type("fc", "Gemm", &attrs).unwrap();
        assert_eq!(
            kind,
            OpKind::Gemm {
                alpha: 0.5,
                beta: 1.0,
                trans_a: false,
                trans_b: true
            }
        );
    }

    #[test]
    fn test_parse_conv_defaults() {
        let kind = OpKind::from_op_type("conv", "Conv", &Attributes::new()).unwrap();
        assert_eq!(kind, OpKind::Conv(Conv2dParams::default()));

        let bad = Attributes::new().with("pads", AttributeValue::Ints(vec![1, 1]));
        assert!(matches!(
            OpKind::from_op_type("conv", "Conv", &bad),
            Err(GraphError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_parse_unknown() {
        let err = OpKind::from_op_type("n3", "Softmax", &Attributes::new()).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnsupportedOperator {
                node: "n3".to_string(),
                op_type: "Softmax".to_string()
            }
        );
    }

    #[test]
    fn test_parse_clip_bounds() {
        let attrs = Attributes::new()
            .with("min", AttributeValue::Float(0.0))
            .with("max", AttributeValue::Float(6.0));
        assert_eq!(
            OpKind::from_op_type("relu6", "Clip", &attrs).unwrap(),
            OpKind::Clip { min: 0.0, max: 6.0 }
        );
        let inverted = Attributes::new()
            .with("min", AttributeValue::Float(1.0))
            .with("max", AttributeValue::Float(0.0));
        assert!(OpKind::from_op_type("c", "Clip", &inverted).is_err());
    }
}
