//! Declarative transformer graphs.
//!
//! A graph is a set of operation nodes, each reading named input fields and
//! writing named output fields. Fields and operations form a bipartite
//! directed graph (field -> node -> field) which must be acyclic. Nodes run in
//! topological order; ties are broken by declaration order so execution is
//! deterministic.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;
use tracing::debug;

use crate::errors::IndexError;
use crate::operations::{Operation, OperationParams, OperationRegistry};
use crate::types::{FieldName, RawFieldMap};
use crate::value::RawValue;

/// Expansion of shorthand transformation entries.
pub mod shorthand;

pub use shorthand::{OperationSpec, expand, expand_all, intermediate_name};

/// What a node does when one of its declared inputs was never produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingInputPolicy {
    /// Fail the record with `MissingInputField`.
    #[default]
    Error,
    /// Treat the absent input as empty.
    Empty,
    /// Skip the node; its outputs stay absent.
    Skip,
}

/// Vertex of the bipartite field/operation graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GraphVertex {
    /// A named field.
    Field(FieldName),
    /// An operation node, by node name.
    Operation(String),
}

impl GraphVertex {
    /// Field or node name.
    pub fn name(&self) -> &str {
        match self {
            GraphVertex::Field(name) | GraphVertex::Operation(name) => name,
        }
    }
}

/// One operation node of a graph.
#[derive(Clone)]
pub struct GraphNode {
    name: String,
    spec: OperationSpec,
    operation: Arc<dyn Operation>,
}

impl GraphNode {
    /// Node name: `{operation}_{n}` with `n` counting from 1 per operation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered operation name.
    pub fn operation(&self) -> &str {
        &self.spec.operation
    }

    /// Input fields.
    pub fn inputs(&self) -> &[FieldName] {
        &self.spec.inputs
    }

    /// Output fields.
    pub fn outputs(&self) -> &[FieldName] {
        &self.spec.outputs
    }

    /// Parameters the node was built with.
    pub fn params(&self) -> &OperationParams {
        &self.spec.params
    }

    /// Declaration this node was built from.
    pub fn spec(&self) -> &OperationSpec {
        &self.spec
    }
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .finish()
    }
}

/// Validated, acyclic transformer graph.
#[derive(Clone, Debug, Default)]
pub struct TransformerGraph {
    nodes: Vec<GraphNode>,
    order: Vec<usize>,
    graph: DiGraph<GraphVertex, ()>,
    fields: IndexMap<FieldName, NodeIndex>,
    missing_inputs: MissingInputPolicy,
}

impl TransformerGraph {
    /// Graph without nodes; `transform` returns records unchanged.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a declarative transformation list (see [`shorthand`]).
    pub fn load(value: &Value, registry: &OperationRegistry) -> Result<Self, IndexError> {
        Self::from_specs(expand_all(value)?, registry)
    }

    /// Parse a YAML transformation list.
    pub fn from_yaml_str(text: &str, registry: &OperationRegistry) -> Result<Self, IndexError> {
        let value: Value = serde_yaml::from_str(text)?;
        Self::load(&value, registry)
    }

    /// Parse a JSON transformation list.
    pub fn from_json_str(text: &str, registry: &OperationRegistry) -> Result<Self, IndexError> {
        let value: Value = serde_json::from_str(text)?;
        Self::load(&value, registry)
    }

    /// Load a transformation file; `.yml`/`.yaml` are read as YAML, anything
    /// else as JSON.
    pub fn from_file(path: &Path, registry: &OperationRegistry) -> Result<Self, IndexError> {
        let text = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));
        if is_yaml {
            Self::from_yaml_str(&text, registry)
        } else {
            Self::from_json_str(&text, registry)
        }
    }

    /// Build from expanded node declarations.
    pub fn from_specs(
        specs: Vec<OperationSpec>,
        registry: &OperationRegistry,
    ) -> Result<Self, IndexError> {
        let mut built = Vec::with_capacity(specs.len());
        for spec in specs {
            let operation = registry.build(&spec.operation, &spec.params)?;
            built.push((spec, operation));
        }
        Self::assemble(built, MissingInputPolicy::default())
    }

    /// Set how nodes treat inputs that were never produced.
    pub fn with_missing_inputs(mut self, policy: MissingInputPolicy) -> Self {
        self.missing_inputs = policy;
        self
    }

    /// Current missing-input policy.
    pub fn missing_inputs(&self) -> MissingInputPolicy {
        self.missing_inputs
    }

    /// Concatenate two graphs; outputs of `self` become available to `other`.
    /// The missing-input policy of `self` is kept.
    pub fn compose(&self, other: &TransformerGraph) -> Result<Self, IndexError> {
        let nodes = self
            .nodes
            .iter()
            .chain(other.nodes.iter())
            .map(|node| (node.spec.clone(), Arc::clone(&node.operation)))
            .collect();
        Self::assemble(nodes, self.missing_inputs)
    }

    fn assemble(
        declared: Vec<(OperationSpec, Arc<dyn Operation>)>,
        missing_inputs: MissingInputPolicy,
    ) -> Result<Self, IndexError> {
        let mut counters: HashMap<String, usize> = HashMap::new();
        let mut nodes = Vec::with_capacity(declared.len());
        let mut producers: HashMap<FieldName, usize> = HashMap::new();

        for (position, (spec, operation)) in declared.into_iter().enumerate() {
            let counter = counters.entry(spec.operation.clone()).or_insert(0);
            *counter += 1;
            let name = format!("{}_{}", spec.operation, counter);

            operation
                .check_arity(spec.inputs.len(), spec.outputs.len())
                .map_err(|reason| {
                    IndexError::Configuration(format!(
                        "node '{name}' ({}): {reason}",
                        spec.operation
                    ))
                })?;

            let mut seen = HashSet::new();
            for output in &spec.outputs {
                if !seen.insert(output) {
                    return Err(IndexError::Configuration(format!(
                        "node '{name}' lists output '{output}' twice"
                    )));
                }
                if let Some(previous) = producers.insert(output.clone(), position) {
                    let previous: &GraphNode = &nodes[previous];
                    return Err(IndexError::Configuration(format!(
                        "field '{output}' is produced by both '{}' and '{name}'",
                        previous.name
                    )));
                }
            }
            nodes.push(GraphNode {
                name,
                spec,
                operation,
            });
        }

        let mut graph = DiGraph::new();
        let mut fields: IndexMap<FieldName, NodeIndex> = IndexMap::new();
        let mut field_index = |graph: &mut DiGraph<GraphVertex, ()>, name: &FieldName| {
            *fields
                .entry(name.clone())
                .or_insert_with(|| graph.add_node(GraphVertex::Field(name.clone())))
        };
        for node in &nodes {
            let op_index = graph.add_node(GraphVertex::Operation(node.name.clone()));
            for input in node.inputs() {
                let field = field_index(&mut graph, input);
                graph.update_edge(field, op_index, ());
            }
            for output in node.outputs() {
                let field = field_index(&mut graph, output);
                graph.add_edge(op_index, field, ());
            }
        }

        for component in tarjan_scc(&graph) {
            if component.len() > 1 {
                let members: HashSet<NodeIndex> = component.into_iter().collect();
                let cycle: Vec<FieldName> = fields
                    .iter()
                    .filter(|(_, index)| members.contains(index))
                    .map(|(name, _)| name.clone())
                    .collect();
                return Err(IndexError::CyclicGraph { fields: cycle });
            }
        }

        let order = execution_order(&nodes, &producers);
        debug!(nodes = nodes.len(), fields = fields.len(), "assembled transformer graph");
        Ok(Self {
            nodes,
            order,
            graph,
            fields,
            missing_inputs,
        })
    }

    /// Run every node over `record`. Fields no node touches pass through.
    pub fn transform(&self, record: &RawFieldMap) -> Result<RawFieldMap, IndexError> {
        let mut record = record.clone();
        'nodes: for &position in &self.order {
            let node = &self.nodes[position];
            let mut inputs = Vec::with_capacity(node.inputs().len());
            for input in node.inputs() {
                match record.get(input) {
                    Some(value) => inputs.push(value.clone()),
                    None => match self.missing_inputs {
                        MissingInputPolicy::Error => {
                            return Err(IndexError::MissingInputField {
                                node: node.name.clone(),
                                field: input.clone(),
                            });
                        }
                        MissingInputPolicy::Empty => inputs.push(RawValue::Empty),
                        MissingInputPolicy::Skip => continue 'nodes,
                    },
                }
            }
            let outputs = node
                .operation
                .apply(&inputs, node.outputs().len())
                .map_err(|failure| IndexError::Operation {
                    node: node.name.clone(),
                    operation: node.spec.operation.clone(),
                    reason: failure.0,
                })?;
            if outputs.len() != node.outputs().len() {
                return Err(IndexError::Operation {
                    node: node.name.clone(),
                    operation: node.spec.operation.clone(),
                    reason: format!(
                        "produced {} values for {} outputs",
                        outputs.len(),
                        node.outputs().len()
                    ),
                });
            }
            for (name, value) in node.outputs().iter().zip(outputs) {
                record.insert(name.clone(), value);
            }
        }
        Ok(record)
    }

    /// Run the graph and keep only leaf fields (absent leafs are empty).
    pub fn transform_outputs(&self, record: &RawFieldMap) -> Result<RawFieldMap, IndexError> {
        let transformed = self.transform(record)?;
        Ok(self
            .leafs()
            .into_iter()
            .map(|leaf| {
                let value = transformed.get(leaf).cloned().unwrap_or_default();
                (leaf.to_string(), value)
            })
            .collect())
    }

    /// Fields consumed by some node but produced by none.
    pub fn roots(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, index)| {
                self.degree(**index, Direction::Incoming) == 0
                    && self.degree(**index, Direction::Outgoing) > 0
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Fields produced by some node and consumed by none.
    pub fn leafs(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, index)| {
                self.degree(**index, Direction::Incoming) > 0
                    && self.degree(**index, Direction::Outgoing) == 0
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Every field name in the graph, in first-appearance order.
    pub fn nodes(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Fields written by any node.
    pub fn produced_fields(&self) -> IndexSet<&str> {
        self.nodes
            .iter()
            .flat_map(|node| node.outputs().iter().map(String::as_str))
            .collect()
    }

    /// Operation nodes in declaration order.
    pub fn operations(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Node names in execution order.
    pub fn execution_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|position| self.nodes[*position].name.as_str())
            .collect()
    }

    /// Directed edges of the field/operation graph, as vertex names.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| {
                (
                    self.graph[edge.source()].name(),
                    self.graph[edge.target()].name(),
                )
            })
            .collect()
    }

    /// Vertices of the field/operation graph (drawing data).
    pub fn vertices(&self) -> impl Iterator<Item = &GraphVertex> {
        self.graph.node_weights()
    }

    /// Number of operation nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph has no operation nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn degree(&self, index: NodeIndex, direction: Direction) -> usize {
        self.graph.neighbors_directed(index, direction).count()
    }
}

/// Kahn's algorithm over node dependencies, always taking the ready node
/// declared first.
fn execution_order(nodes: &[GraphNode], producers: &HashMap<FieldName, usize>) -> Vec<usize> {
    let mut pending: Vec<usize> = vec![0; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (position, node) in nodes.iter().enumerate() {
        let upstream: BTreeSet<usize> = node
            .inputs()
            .iter()
            .filter_map(|input| producers.get(input).copied())
            .collect();
        pending[position] = upstream.len();
        for producer in upstream {
            dependents[producer].push(position);
        }
    }
    let mut ready: BTreeSet<usize> = (0..nodes.len())
        .filter(|position| pending[*position] == 0)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(position) = ready.pop_first() {
        order.push(position);
        for &dependent in &dependents[position] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> OperationRegistry {
        OperationRegistry::builtin()
    }

    fn record(pairs: &[(&str, &str)]) -> RawFieldMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), RawValue::from(*value)))
            .collect()
    }

    #[test]
    fn runs_chain_and_passes_untouched_fields_through() {
        let graph = TransformerGraph::load(
            &json!([
                ["rename", "foo", "bar"],
                ["join", ["bar", "suffix"], "output_lower"],
                ["uppercase", "output_lower", "output"]
            ]),
            &registry(),
        )
        .unwrap();
        let out = graph
            .transform(&record(&[("foo", "Hello"), ("suffix", " world"), ("keep", "x")]))
            .unwrap();
        assert_eq!(out["output"], RawValue::from("HELLO WORLD"));
        assert_eq!(out["keep"], RawValue::from("x"));
        assert_eq!(out["foo"], RawValue::from("Hello"));

        let leafs = graph
            .transform_outputs(&record(&[("foo", "Hello"), ("suffix", " world")]))
            .unwrap();
        assert_eq!(leafs.len(), 1);
        assert_eq!(leafs["output"], RawValue::from("HELLO WORLD"));
    }

    #[test]
    fn split_chain_spreads_into_outputs() {
        let graph = TransformerGraph::load(
            &json!([[["split", "lowercase"], "input", ["output1", "output2"], [{"sep": "-"}, {}]]]),
            &registry(),
        )
        .unwrap();
        let out = graph
            .transform_outputs(&record(&[("input", "HELLO-WORLD")]))
            .unwrap();
        assert_eq!(out["output1"], RawValue::from("hello"));
        assert_eq!(out["output2"], RawValue::from("world"));
    }

    #[test]
    fn introspection_reports_roots_leafs_and_nodes() {
        let graph = TransformerGraph::load(
            &json!([
                ["lowercase", "OTL", "title_lower"],
                ["titlecase", "title_lower", "title"],
                ["constant", "source", "essen"]
            ]),
            &registry(),
        )
        .unwrap();
        assert_eq!(graph.roots(), vec!["OTL"]);
        assert_eq!(graph.leafs(), vec!["title", "source"]);
        assert_eq!(graph.nodes(), vec!["OTL", "title_lower", "title", "source"]);
        let names: Vec<&str> = graph.operations().iter().map(GraphNode::name).collect();
        assert_eq!(names, vec!["lowercase_1", "titlecase_1", "constant_1"]);
        assert!(graph.edges().contains(&("OTL", "lowercase_1")));
        assert!(graph.edges().contains(&("constant_1", "source")));
    }

    #[test]
    fn execution_order_is_topological_with_declaration_tie_break() {
        let graph = TransformerGraph::load(
            &json!([
                ["uppercase", "b", "c"],
                ["lowercase", "x", "y"],
                ["rename", "a", "b"]
            ]),
            &registry(),
        )
        .unwrap();
        assert_eq!(
            graph.execution_order(),
            vec!["lowercase_1", "rename_1", "uppercase_1"]
        );
        let out = graph.transform(&record(&[("a", "q"), ("x", "Z")])).unwrap();
        assert_eq!(out["c"], RawValue::from("Q"));
        assert_eq!(out["y"], RawValue::from("z"));
    }

    #[test]
    fn cycles_are_rejected_at_load() {
        let err = TransformerGraph::load(
            &json!([["rename", "a", "b"], ["rename", "b", "a"]]),
            &registry(),
        )
        .unwrap_err();
        match err {
            IndexError::CyclicGraph { fields } => assert_eq!(fields, vec!["a", "b"]),
            other => panic!("unexpected error {other}"),
        }

        let err = TransformerGraph::load(&json!([["lowercase", "a", "a"]]), &registry())
            .unwrap_err();
        assert!(matches!(err, IndexError::CyclicGraph { .. }));
    }

    #[test]
    fn compose_rejects_cycles_across_graphs() {
        let first = TransformerGraph::load(&json!([["rename", "a", "b"]]), &registry()).unwrap();
        let second = TransformerGraph::load(&json!([["rename", "b", "a"]]), &registry()).unwrap();
        let err = first.compose(&second).unwrap_err();
        assert!(matches!(err, IndexError::CyclicGraph { .. }));
    }

    #[test]
    fn compose_feeds_outputs_forward() {
        let first =
            TransformerGraph::load(&json!([["lowercase", "raw", "lower"]]), &registry()).unwrap();
        let second =
            TransformerGraph::load(&json!([["titlecase", "lower", "title"]]), &registry())
                .unwrap();
        let composed = first.compose(&second).unwrap();
        assert_eq!(composed.roots(), vec!["raw"]);
        assert_eq!(composed.leafs(), vec!["title"]);
        let out = composed.transform(&record(&[("raw", "DER MAI")])).unwrap();
        assert_eq!(out["title"], RawValue::from("Der Mai"));
    }

    #[test]
    fn unknown_operation_and_bad_arity_fail_at_load() {
        let err = TransformerGraph::load(&json!([["reverse", "a", "b"]]), &registry())
            .unwrap_err();
        assert!(matches!(err, IndexError::UnknownOperation(ref name) if name == "reverse"));

        let err = TransformerGraph::load(&json!([["lowercase", ["a", "b"], "c"]]), &registry())
            .unwrap_err();
        assert!(matches!(err, IndexError::Configuration(ref msg) if msg.contains("lowercase_1")));
    }

    #[test]
    fn duplicate_producers_are_rejected() {
        let err = TransformerGraph::load(
            &json!([["lowercase", "a", "out"], ["uppercase", "b", "out"]]),
            &registry(),
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::Configuration(ref msg) if msg.contains("'out'")));
    }

    #[test]
    fn missing_inputs_follow_policy() {
        let graph = TransformerGraph::load(&json!([["lowercase", "absent", "out"]]), &registry())
            .unwrap();
        let err = graph.transform(&RawFieldMap::new()).unwrap_err();
        assert!(matches!(
            err,
            IndexError::MissingInputField { ref node, ref field } if node == "lowercase_1" && field == "absent"
        ));

        let lenient = graph.clone().with_missing_inputs(MissingInputPolicy::Empty);
        let out = lenient.transform(&RawFieldMap::new()).unwrap();
        assert_eq!(out["out"], RawValue::Empty);

        let skipping = graph.with_missing_inputs(MissingInputPolicy::Skip);
        let out = skipping.transform(&RawFieldMap::new()).unwrap();
        assert!(!out.contains_key("out"));
    }

    #[test]
    fn operation_failures_name_the_node() {
        let graph = TransformerGraph::load(&json!([["add", ["a", "b"], "sum"]]), &registry())
            .unwrap();
        let err = graph
            .transform(&record(&[("a", "1"), ("b", "x")]))
            .unwrap_err();
        assert!(matches!(err, IndexError::Operation { ref node, .. } if node == "add_1"));
    }

    #[test]
    fn loads_yaml_forms() {
        let yaml = r#"
transformations:
  - lowercase: [my_input, my_output, {}]
  - split: [my_input, [part1, part2], {sep: '-'}]
  - [constant, dataset, essen]
"#;
        let graph = TransformerGraph::from_yaml_str(yaml, &registry()).unwrap();
        assert_eq!(graph.len(), 3);
        let out = graph
            .transform_outputs(&record(&[("my_input", "A-B")]))
            .unwrap();
        assert_eq!(out["my_output"], RawValue::from("a-b"));
        assert_eq!(out["part1"], RawValue::from("A"));
        assert_eq!(out["part2"], RawValue::from("B"));
        assert_eq!(out["dataset"], RawValue::from("essen"));
    }

    #[test]
    fn empty_graph_is_identity() {
        let graph = TransformerGraph::empty();
        let input = record(&[("a", "1")]);
        assert_eq!(graph.transform(&input).unwrap(), input);
        assert!(graph.roots().is_empty());
    }
}
