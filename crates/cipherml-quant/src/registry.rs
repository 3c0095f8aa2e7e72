//! Quantized Operator Registry
//!
//! Maps every operator tag to the constructor of its integer kernel. The
//! standard table is derived from an exhaustive match over [`OpTag`], so
//! adding an operator kind forces a decision about its quantized form.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_graph::OpTag;
use rustc_hash::FxHashMap;

use crate::error::{QuantError, QuantResult};
use crate::ops::{elementwise, layout, linear, lookup, pool, Kernel, OpContext, QuantizedOp};

/// Builds the integer kernel of one node. May rewrite the context, e.g. to
/// re-quantize a bias or pin output parameters.
pub type OpConstructor = fn(&mut OpContext<'_>) -> QuantResult<Kernel>;

/// Immutable table of quantized operator constructors.
#[derive(Clone)]
pub struct OperatorRegistry {
    table: FxHashMap<OpTag, OpConstructor>,
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

fn standard_constructor(tag: OpTag) -> Option<OpConstructor> {
    match tag {
        // Folded away before quantization.
        OpTag::Constant => None,
        OpTag::MatMul | OpTag::Gemm | OpTag::Conv => Some(linear::build),
        OpTag::Add | OpTag::Sub => Some(elementwise::build_add_sub),
        OpTag::Mul | OpTag::Div => Some(elementwise::build_scale),
        OpTag::Relu | OpTag::Sigmoid | OpTag::Tanh | OpTag::Exp | OpTag::Clip => {
            Some(lookup::build)
        }
        OpTag::AveragePool => Some(pool::build),
        OpTag::Identity | OpTag::Reshape | OpTag::Flatten | OpTag::Transpose => {
            Some(layout::build)
        }
    }
}

impl OperatorRegistry {
    /// Registry with an integer kernel for every supported operator.
    pub fn standard() -> Self {
        let table = OpTag::ALL
            .iter()
            .filter_map(|&tag| standard_constructor(tag).map(|ctor| (tag, ctor)))
            .collect();
        Self { table }
    }

    /// Registry with no entries.
    pub fn empty() -> Self {
        Self {
            table: FxHashMap::default(),
        }
    }

    /// Returns a registry with `tag` mapped to `ctor`.
    #[must_use]
    pub fn with(mut self, tag: OpTag, ctor: OpConstructor) -> Self {
        self.table.insert(tag, ctor);
        self
    }

    /// Returns a registry without an entry for `tag`.
    #[must_use]
    pub fn without(mut self, tag: OpTag) -> Self {
        self.table.remove(&tag);
        self
    }

    /// Constructor registered for `tag`.
    pub fn get(&self, tag: OpTag) -> Option<OpConstructor> {
        self.table.get(&tag).copied()
    }

    /// Returns true if `tag` has a constructor.
    pub fn contains(&self, tag: OpTag) -> bool {
        self.table.contains_key(&tag)
    }

    /// Registered tags in declaration order.
    pub fn tags(&self) -> Vec<OpTag> {
        let mut tags: Vec<OpTag> = self.table.keys().copied().collect();
        tags.sort();
        tags
    }

    /// Number of registered operators.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Builds the quantized operator for a prepared context.
    pub fn build(&self, mut ctx: OpContext<'_>) -> QuantResult<QuantizedOp> {
        let tag = ctx.node.kind.tag();
        let ctor = self.get(tag).ok_or_else(|| {
            QuantError::unsupported(
                &ctx.node.name,
                tag,
                "no quantized implementation registered",
            )
        })?;
        let kernel = ctor(&mut ctx)?;
        Ok(QuantizedOp::new(ctx, kernel))
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::QuantizedInput;
    use crate::qparams::QuantParams;
    use cipherml_graph::{GraphBuilder, OpKind};

    #[test]
    fn test_standard_covers_every_non_constant_tag() {
        let registry = OperatorRegistry::standard();
        for tag in OpTag::ALL {
            assert_eq!(registry.contains(tag), tag != OpTag::Constant, "{tag}");
        }
        assert_eq!(registry.len(), OpTag::ALL.len() - 1);
    }

    #[test]
    fn test_with_and_without() {
        let registry = OperatorRegistry::standard().without(OpTag::Relu);
        assert!(!registry.contains(OpTag::Relu));

        let registry = OperatorRegistry::empty().with(OpTag::Relu, lookup::build);
        assert_eq!(registry.tags(), vec![OpTag::Relu]);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_missing_entry_names_kind() {
        let graph = GraphBuilder::new()
            .input("x", &[2])
            .node("act", OpKind::Tanh, &["x"], "y")
            .output("y")
            .build()
            .unwrap();
        let params = QuantParams::from_range(-1.0, 1.0, 4, false).unwrap();
        let ctx = OpContext {
            node: &graph.nodes()[0],
            inputs: vec![QuantizedInput::Variable {
                name: "x".to_string(),
                params,
            }],
            output_params: params,
            n_bits: 4,
        };
        let err = OperatorRegistry::empty().build(ctx).unwrap_err();
        assert!(matches!(
            err,
            QuantError::UnsupportedOperator {
                kind: OpTag::Tanh,
                ..
            }
        ));
        assert!(err.to_string().contains("Tanh"));
    }
}
