//! Graph Optimization
//!
//! Graph-to-graph passes. Constant folding evaluates every node whose inputs
//! are all constants and binds the result as a new initializer under the
//! node's output edge name; dead code elimination drops nodes and
//! initializers that no declared output depends on.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use cipherml_tensor::Tensor;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::ir::{Graph, Node};

/// Optimization passes available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationPass {
    /// Fold nodes whose inputs are all constants.
    ConstantFolding,
    /// Remove nodes and initializers that do not reach an output.
    DeadCodeElimination,
}

/// Graph optimizer running passes in order.
#[derive(Debug, Clone)]
pub struct Optimizer {
    passes: Vec<OptimizationPass>,
}

impl Optimizer {
    /// Creates a new optimizer with no passes.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Creates an optimizer with default passes.
    pub fn default_passes() -> Self {
        Self {
            passes: vec![
                OptimizationPass::ConstantFolding,
                OptimizationPass::DeadCodeElimination,
            ],
        }
    }

    /// Adds an optimization pass.
    pub fn add_pass(&mut self, pass: OptimizationPass) {
        self.passes.push(pass);
    }

    /// Runs all optimization passes on the graph.
    pub fn optimize(&self, mut graph: Graph) -> GraphResult<Graph> {
        for pass in &self.passes {
            graph = match pass {
                OptimizationPass::ConstantFolding => constant_folding(&graph)?,
                OptimizationPass::DeadCodeElimination => dead_code_elimination(&graph)?,
            };
        }
        Ok(graph)
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::default_passes()
    }
}

/// Folds constants and removes dead code.
///
/// The result contains only nodes that depend, directly or transitively, on
/// at least one graph input. Folding a folded graph returns an equal graph.
pub fn fold_constants(graph: &Graph) -> GraphResult<Graph> {
    Optimizer::default_passes().optimize(graph.clone())
}

/// Constant folding to a fixed point.
fn constant_folding(graph: &Graph) -> GraphResult<Graph> {
    let mut constants: FxHashMap<String, Tensor<f64>> = graph.initializers().clone();
    let mut remaining: Vec<Node> = graph.nodes().to_vec();
    let mut pass = 0usize;

    loop {
        pass += 1;
        let mut kept = Vec::with_capacity(remaining.len());
        let mut folded = 0usize;

        for node in remaining {
            if !node.inputs.iter().all(|input| constants.contains_key(input)) {
                kept.push(node);
                continue;
            }
            let args: Vec<&Tensor<f64>> = node.inputs.iter().map(|i| &constants[i]).collect();
            let value = node
                .kind
                .evaluate(&args)
                .map_err(|source| GraphError::Evaluation {
                    node: node.name.clone(),
                    source,
                })?;
            constants.insert(node.output, value);
            folded += 1;
        }

        debug!(pass, folded, remaining = kept.len(), "constant folding pass");
        remaining = kept;
        if folded == 0 {
            break;
        }
    }

    let live = referenced_edges(&remaining, graph.outputs());
    constants.retain(|name, _| live.contains(name.as_str()));

    Graph::from_parts(
        remaining,
        constants,
        graph.inputs().to_vec(),
        graph.outputs().to_vec(),
    )
}

/// Dead code elimination: keep only what the outputs depend on.
fn dead_code_elimination(graph: &Graph) -> GraphResult<Graph> {
    let mut live: FxHashSet<&str> = FxHashSet::default();
    let mut worklist: Vec<&str> = graph.outputs().iter().map(String::as_str).collect();

    while let Some(edge) = worklist.pop() {
        if !live.insert(edge) {
            continue;
        }
        if let Some(node) = graph.producer(edge) {
            worklist.extend(node.inputs.iter().map(String::as_str));
        }
    }

    let nodes: Vec<Node> = graph
        .nodes()
        .iter()
        .filter(|node| live.contains(node.output.as_str()))
        .cloned()
        .collect();
    let removed = graph.len() - nodes.len();
    if removed > 0 {
        debug!(removed, "dead code elimination");
    }

    let initializers = graph
        .initializers()
        .iter()
        .filter(|(name, _)| live.contains(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    Graph::from_parts(
        nodes,
        initializers,
        graph.inputs().to_vec(),
        graph.outputs().to_vec(),
    )
}

fn referenced_edges<'a>(nodes: &'a [Node], outputs: &'a [String]) -> FxHashSet<&'a str> {
    nodes
        .iter()
        .flat_map(|node| node.inputs.iter())
        .chain(outputs.iter())
        .map(String::as_str)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
