//! Intermediate Representation
//!
//! A tensor graph is an arena of nodes addressed by [`NodeId`]. Edges are
//! plain names: a node input names a declared graph input, a constant
//! initializer or the output of an earlier node. Graphs are immutable once
//! built; transforms such as constant folding produce a new graph.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::collections::VecDeque;

use cipherml_tensor::Tensor;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{GraphError, GraphResult};
use crate::op::OpKind;

// =============================================================================
// Nodes
// =============================================================================

/// Unique identifier for a node in the graph (its topological position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Returns the raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A node in the computation graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Position of the node in topological order.
    pub id: NodeId,
    /// Human-readable node name.
    pub name: String,
    /// Operator and static attributes.
    pub kind: OpKind,
    /// Ordered input edge names.
    pub inputs: Vec<String>,
    /// Output edge name.
    pub output: String,
}

/// Declared graph input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInfo {
    /// Edge name.
    pub name: String,
    /// Declared shape. Dimension 0 is the batch dimension and may vary.
    pub shape: Vec<usize>,
}

/// Where the value of an edge comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSource {
    /// The n-th declared graph input.
    Input(usize),
    /// A constant initializer.
    Initializer,
    /// The output of a node.
    Node(NodeId),
}

// =============================================================================
// Graph
// =============================================================================

/// A validated, topologically ordered computation graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    nodes: Vec<Node>,
    initializers: FxHashMap<String, Tensor<f64>>,
    inputs: Vec<ValueInfo>,
    outputs: Vec<String>,
    producers: FxHashMap<String, NodeId>,
}

impl Graph {
    /// Assembles and validates a graph.
    ///
    /// Node ids are reassigned from their position in `nodes`.
    pub(crate) fn from_parts(
        nodes: Vec<Node>,
        initializers: FxHashMap<String, Tensor<f64>>,
        inputs: Vec<ValueInfo>,
        outputs: Vec<String>,
    ) -> GraphResult<Self> {
        let mut defined: FxHashSet<&str> = FxHashSet::default();
        for name in inputs
            .iter()
            .map(|i| i.name.as_str())
            .chain(initializers.keys().map(String::as_str))
        {
            if !defined.insert(name) {
                return Err(GraphError::malformed(format!("edge '{name}' is defined twice")));
            }
        }

        let mut producers: FxHashMap<String, NodeId> = FxHashMap::default();
        for (index, node) in nodes.iter().enumerate() {
            if !node.kind.arity().contains(&node.inputs.len()) {
                return Err(GraphError::malformed(format!(
                    "node '{}' ({}) takes {:?} inputs, got {}",
                    node.name,
                    node.kind.name(),
                    node.kind.arity(),
                    node.inputs.len()
                )));
            }
            if defined.contains(node.output.as_str())
                || producers.insert(node.output.clone(), NodeId(index)).is_some()
            {
                return Err(GraphError::malformed(format!(
                    "edge '{}' is defined twice",
                    node.output
                )));
            }
        }

        for node in &nodes {
            for input in &node.inputs {
                if !defined.contains(input.as_str()) && !producers.contains_key(input) {
                    return Err(GraphError::malformed(format!(
                        "node '{}' references undeclared edge '{input}'",
                        node.name
                    )));
                }
            }
        }

        check_acyclic(&nodes, &producers)?;

        // Declared order must already be topological.
        for (index, node) in nodes.iter().enumerate() {
            for input in &node.inputs {
                if let Some(producer) = producers.get(input) {
                    if producer.0 >= index {
                        return Err(GraphError::malformed(format!(
                            "node '{}' references edge '{input}' before it is produced",
                            node.name
                        )));
                    }
                }
            }
        }

        for output in &outputs {
            if !defined.contains(output.as_str()) && !producers.contains_key(output) {
                return Err(GraphError::malformed(format!(
                    "graph output '{output}' is never produced"
                )));
            }
        }

        let nodes = nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| Node {
                id: NodeId(index),
                ..node
            })
            .collect();

        Ok(Self {
            nodes,
            initializers,
            inputs,
            outputs,
            producers,
        })
    }

    /// Returns all nodes in topological order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns a node by id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the declared graph inputs.
    pub fn inputs(&self) -> &[ValueInfo] {
        &self.inputs
    }

    /// Returns the declared graph outputs.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Returns every constant initializer.
    pub fn initializers(&self) -> &FxHashMap<String, Tensor<f64>> {
        &self.initializers
    }

    /// Returns a constant initializer by name.
    pub fn initializer(&self, name: &str) -> Option<&Tensor<f64>> {
        self.initializers.get(name)
    }

    /// Returns true if the edge is a constant initializer.
    pub fn is_constant(&self, name: &str) -> bool {
        self.initializers.contains_key(name)
    }

    /// Returns the node producing an edge.
    pub fn producer(&self, name: &str) -> Option<&Node> {
        self.producers.get(name).map(|id| &self.nodes[id.0])
    }

    /// Resolves where an edge's value comes from.
    pub fn source(&self, name: &str) -> Option<EdgeSource> {
        if let Some(id) = self.producers.get(name) {
            return Some(EdgeSource::Node(*id));
        }
        if self.initializers.contains_key(name) {
            return Some(EdgeSource::Initializer);
        }
        self.inputs
            .iter()
            .position(|i| i.name == name)
            .map(EdgeSource::Input)
    }

    /// Topological depth of every node, indexed by node id.
    ///
    /// Nodes fed only by graph inputs and constants sit at depth 0; any
    /// other node is one deeper than its deepest producer.
    pub fn depths(&self) -> Vec<usize> {
        let mut depths = vec![0usize; self.nodes.len()];
        for node in &self.nodes {
            depths[node.id.0] = node
                .inputs
                .iter()
                .filter_map(|input| self.producers.get(input))
                .map(|producer| depths[producer.0] + 1)
                .max()
                .unwrap_or(0);
        }
        depths
    }

    /// Checks supplied inputs against the declared inputs.
    ///
    /// The leading (batch) dimension is allowed to differ.
    pub fn check_inputs<T: cipherml_tensor::Element>(
        &self,
        inputs: &[Tensor<T>],
    ) -> GraphResult<()> {
        if inputs.len() != self.inputs.len() {
            return Err(GraphError::InputCount {
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
                return Err(GraphError::InputShape {
                    name: declared.name.clone(),
                    expected: declared.shape.clone(),
                    actual: supplied.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Executes the graph in floating point and returns every edge value
    /// computed by a node or supplied as input.
    pub fn run_all(&self, inputs: &[Tensor<f64>]) -> GraphResult<FxHashMap<String, Tensor<f64>>> {
        self.check_inputs(inputs)?;
        let mut values: FxHashMap<String, Tensor<f64>> = self
            .inputs
            .iter()
            .zip(inputs)
            .map(|(info, value)| (info.name.clone(), value.clone()))
            .collect();

        for node in &self.nodes {
            let args = node
                .inputs
                .iter()
                .map(|name| {
                    values
                        .get(name)
                        .or_else(|| self.initializers.get(name))
                        .ok_or_else(|| {
                            GraphError::malformed(format!("edge '{name}' has no value"))
                        })
                })
                .collect::<GraphResult<Vec<_>>>()?;
            let value = node
                .kind
                .evaluate(&args)
                .map_err(|source| GraphError::Evaluation {
                    node: node.name.clone(),
                    source,
                })?;
            values.insert(node.output.clone(), value);
        }
        Ok(values)
    }

    /// Executes the graph in floating point and returns the declared outputs.
    pub fn run(&self, inputs: &[Tensor<f64>]) -> GraphResult<Vec<Tensor<f64>>> {
        let mut values = self.run_all(inputs)?;
        self.outputs
            .iter()
            .map(|name| {
                values
                    .remove(name)
                    .or_else(|| self.initializers.get(name).cloned())
                    .ok_or_else(|| GraphError::malformed(format!("output '{name}' has no value")))
            })
            .collect()
    }
}

/// Kahn's algorithm over node-to-node edges.
fn check_acyclic(nodes: &[Node], producers: &FxHashMap<String, NodeId>) -> GraphResult<()> {
    let mut indegree = vec![0usize; nodes.len()];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (index, node) in nodes.iter().enumerate() {
        for input in &node.inputs {
            if let Some(producer) = producers.get(input) {
                indegree[index] += 1;
                consumers[producer.0].push(index);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut visited = 0usize;
    while let Some(index) = ready.pop_front() {
        visited += 1;
        for &consumer in &consumers[index] {
            indegree[consumer] -= 1;
            if indegree[consumer] == 0 {
                ready.push_back(consumer);
            }
        }
    }

    if visited == nodes.len() {
        return Ok(());
    }
    let stuck: Vec<&str> = nodes
        .iter()
        .zip(&indegree)
        .filter(|(_, &d)| d > 0)
        .map(|(n, _)| n.name.as_str())
        .collect();
    Err(GraphError::malformed(format!(
        "cycle detected among nodes {stuck:?}"
    )))
}

// =============================================================================
// Tests
// =============================================================================
