//! Graph Builder
//!
//! Fluent construction of validated graphs. This is the surface an external
//! model translator targets: declare inputs, attach initializers, append
//! nodes in topological order and name the outputs.
//!
//! # Example
//! ```rust
//! use cipherml_graph::{GraphBuilder, OpKind};
//! use cipherml_tensor::Tensor;
//!
//! let graph = GraphBuilder::new()
//!     .input("x", &[1, 2])
//!     .initializer("w", Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap())
//!     .node("mm", OpKind::MatMul, &["x", "w"], "y")
//!     .node("act", OpKind::Relu, &["y"], "z")
//!     .output("z")
//!     .build()
//!     .unwrap();
//! assert_eq!(graph.len(), 2);
//! ```
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_tensor::Tensor;
use rustc_hash::FxHashMap;

use crate::error::{GraphError, GraphResult};
use crate::ir::{Graph, Node, NodeId, ValueInfo};
use crate::op::{Attributes, OpKind};

/// Builder for [`Graph`]. Errors are deferred until [`GraphBuilder::build`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    initializers: FxHashMap<String, Tensor<f64>>,
    inputs: Vec<ValueInfo>,
    outputs: Vec<String>,
    error: Option<GraphError>,
}

impl GraphBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a graph input.
    pub fn input(mut self, name: &str, shape: &[usize]) -> Self {
        self.inputs.push(ValueInfo {
            name: name.to_string(),
            shape: shape.to_vec(),
        });
        self
    }

    /// Attaches a constant initializer.
    pub fn initializer(mut self, name: &str, value: Tensor<f64>) -> Self {
        if self.initializers.insert(name.to_string(), value).is_some() {
            self.fail(GraphError::malformed(format!(
                "initializer '{name}' is defined twice"
            )));
        }
        self
    }

    /// Appends a node producing a single output edge.
    pub fn node(mut self, name: &str, kind: OpKind, inputs: &[&str], output: &str) -> Self {
        self.nodes.push(Node {
            id: NodeId(self.nodes.len()),
            name: name.to_string(),
            kind,
            inputs: inputs.iter().map(|s| (*s).to_string()).collect(),
            output: output.to_string(),
        });
        self
    }

    /// Appends a node described by an exchange-format operator type.
    ///
    /// Every supported operator produces exactly one output edge.
    pub fn node_from_op_type(
        mut self,
        name: &str,
        op_type: &str,
        attrs: &Attributes,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Self {
        let kind = match OpKind::from_op_type(name, op_type, attrs) {
            Ok(kind) => kind,
            Err(err) => {
                self.fail(err);
                return self;
            }
        };
        match outputs {
            [output] => self.node(name, kind, inputs, output),
            _ => {
                self.fail(GraphError::malformed(format!(
                    "node '{name}' ({op_type}) must have exactly one output, got {}",
                    outputs.len()
                )));
                self
            }
        }
    }

    /// Declares a graph output.
    pub fn output(mut self, name: &str) -> Self {
        self.outputs.push(name.to_string());
        self
    }

    /// Validates and returns the graph.
    pub fn build(self) -> GraphResult<Graph> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Graph::from_parts(self.nodes, self.initializers, self.inputs, self.outputs)
    }

    fn fail(&mut self, err: GraphError) {
        self.error.get_or_insert(err);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::AttributeValue;

    fn malformed(result: GraphResult<Graph>) -> String {
        match result {
            Err(GraphError::MalformedGraph { reason }) => reason,
            other => panic!("expected malformed graph, got {other:?}"),
        }
    }

    #[test]
    fn test_build_valid_graph() {
        let graph = GraphBuilder::new()
            .input("x", &[1, 3])
            .initializer("b", Tensor::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap())
            .node("add", OpKind::Add, &["x", "b"], "y")
            .node("act", OpKind::Sigmoid, &["y"], "z")
            .output("z")
            .build()
            .unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.producer("z").unwrap().name, "act");
        assert!(graph.is_constant("b"));
        assert_eq!(graph.depths(), vec![0, 1]);
    }

    #[test]
    fn test_dangling_reference() {
        let reason = malformed(
            GraphBuilder::new()
                .input("x", &[1])
                .node("add", OpKind::Add, &["x", "missing"], "y")
                .output("y")
                .build(),
        );
        assert!(reason.contains("missing"));
    }

    #[test]
    fn test_forward_reference() {
        let reason = malformed(
            GraphBuilder::new()
                .input("x", &[1])
                .node("second", OpKind::Relu, &["a"], "b")
                .node("first", OpKind::Relu, &["x"], "a")
                .output("b")
                .build(),
        );
        assert!(reason.contains("before it is produced"));
    }

    #[test]
    fn test_cycle() {
        let reason = malformed(
            GraphBuilder::new()
                .input("x", &[1])
                .node("a", OpKind::Add, &["x", "d"], "c")
                .node("b", OpKind::Relu, &["c"], "d")
                .output("d")
                .build(),
        );
        assert!(reason.contains("cycle"));
    }

    #[test]
    fn test_duplicate_edge() {
        let reason = malformed(
            GraphBuilder::new()
                .input("x", &[1])
                .node("a", OpKind::Relu, &["x"], "y")
                .node("b", OpKind::Relu, &["x"], "y")
                .output("y")
                .build(),
        );
        assert!(reason.contains("twice"));
    }

    #[test]
    fn test_wrong_arity() {
        let reason = malformed(
            GraphBuilder::new()
                .input("x", &[1])
                .node("a", OpKind::Add, &["x"], "y")
                .output("y")
                .build(),
        );
        assert!(reason.contains("inputs"));
    }

    #[test]
    fn test_undefined_output() {
        let reason = malformed(GraphBuilder::new().input("x", &[1]).output("nope").build());
        assert!(reason.contains("nope"));
    }

    #[test]
    fn test_from_op_type() {
        let attrs = Attributes::new()
            .with("min", AttributeValue::Float(0.0))
            .with("max", AttributeValue::Float(6.0));
        let graph = GraphBuilder::new()
            .input("x", &[2])
            .node_from_op_type("relu6", "Clip", &attrs, &["x"], &["y"])
            .output("y")
            .build()
            .unwrap();
        assert_eq!(graph.nodes()[0].kind, OpKind::Clip { min: 0.0, max: 6.0 });
    }

    #[test]
    fn test_from_op_type_errors() {
        let err = GraphBuilder::new()
            .input("x", &[2])
            .node_from_op_type("sm", "Softmax", &Attributes::new(), &["x"], &["y"])
            .output("y")
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedOperator { .. }));

        let reason = malformed(
            GraphBuilder::new()
                .input("x", &[2])
                .node_from_op_type("r", "Relu", &Attributes::new(), &["x"], &["y", "z"])
                .build(),
        );
        assert!(reason.contains("exactly one output"));
    }
}
