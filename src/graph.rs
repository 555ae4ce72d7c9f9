// Computation graphs, in ComfyUI's "API format".
//
// A graph maps node ids to nodes. Each node names an operation (class_type) and
// binds its inputs either to literals or to an output of another node. On the
// wire a reference is the two-element array ["<node id>", <output index>].
//
// Flow is the type-safe way to build these: it only ever hands out references to
// nodes that already exist, so a graph built through it can't dangle or loop.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComputationGraph {
    nodes: BTreeMap<String, Node>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub inputs: BTreeMap<String, Input>,
    pub class_type: String,
}

/// A node input. References are tried first, so `["4", 0]` is always an edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Input {
    Reference(NodeOutput),
    Literal(Literal),
}

/// Output `.1` of node `.0`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeOutput(pub String, pub u32);

// Order matters: `4` stays an integer, seeds up to u64::MAX stay exact, and only
// `1.0` and friends end up as floats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    String(String),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("graph has no nodes")]
    Empty,
    #[error("input `{input}` of node {node} refers to missing node {target}")]
    DanglingReference {
        node: String,
        input: String,
        target: String,
    },
    #[error("graph contains a cycle through node {0}")]
    Cycle(String),
}

impl ComputationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) a node under an explicit id.
    /// Nothing is checked here; use validate() before sending the graph anywhere.
    pub fn insert(&mut self, id: impl Into<String>, node: Node) {
        self.nodes.insert(id.into(), node);
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Checks that every reference resolves and that the graph is a DAG.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.is_empty() {
            return Err(GraphError::Empty);
        }
        for (id, node) in self.nodes.iter() {
            for (input, value) in node.inputs.iter() {
                if let Input::Reference(NodeOutput(target, _)) = value {
                    if !self.nodes.contains_key(target) {
                        return Err(GraphError::DanglingReference {
                            node: id.clone(),
                            input: input.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }
        let mut marks = HashMap::new();
        for id in self.nodes.keys() {
            self.visit(id, &mut marks)?;
        }
        Ok(())
    }

    // Depth-first search with an explicit stack, so long chains can't blow the
    // call stack. Meeting a node that is still being visited means a cycle.
    fn visit<'a>(&'a self, root: &'a str, marks: &mut HashMap<&'a str, Mark>) -> Result<(), GraphError> {
        if marks.contains_key(root) {
            return Ok(());
        }
        marks.insert(root, Mark::Visiting);
        let mut stack = vec![(root, self.dependencies_of(root))];
        while let Some((id, deps)) = stack.last_mut() {
            let id = *id;
            match deps.next() {
                Some(target) => match marks.get(target.as_str()) {
                    Some(Mark::Done) => {}
                    Some(Mark::Visiting) => return Err(GraphError::Cycle(target.clone())),
                    None => {
                        marks.insert(target, Mark::Visiting);
                        stack.push((target, self.dependencies_of(target)));
                    }
                },
                None => {
                    marks.insert(id, Mark::Done);
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    fn dependencies_of<'a>(&'a self, id: &str) -> std::vec::IntoIter<&'a String> {
        self.nodes
            .get(id)
            .map(|node| node.dependencies().map(|NodeOutput(target, _)| target).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
    }
}

#[derive(Clone, Copy)]
enum Mark {
    Visiting,
    Done,
}

impl Node {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            inputs: BTreeMap::new(),
            class_type: class_type.into(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Input>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    /// The outputs this node consumes, i.e. its incoming edges.
    pub fn dependencies(&self) -> impl Iterator<Item = &NodeOutput> {
        self.inputs.values().filter_map(|input| match input {
            Input::Reference(output) => Some(output),
            Input::Literal(_) => None,
        })
    }
}

impl From<NodeOutput> for Input {
    fn from(output: NodeOutput) -> Self {
        Input::Reference(output)
    }
}

impl From<Literal> for Input {
    fn from(literal: Literal) -> Self {
        Input::Literal(literal)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Input::Literal(Literal::String(value.to_owned()))
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Input::Literal(Literal::String(value))
    }
}

impl From<i64> for Input {
    fn from(value: i64) -> Self {
        Input::Literal(Literal::Integer(value))
    }
}

impl From<u64> for Input {
    fn from(value: u64) -> Self {
        // Small values use Integer, which is what parsing them back produces.
        match i64::try_from(value) {
            Ok(value) => Input::Literal(Literal::Integer(value)),
            Err(_) => Input::Literal(Literal::Unsigned(value)),
        }
    }
}

impl From<u32> for Input {
    fn from(value: u32) -> Self {
        Input::Literal(Literal::Integer(value.into()))
    }
}

impl From<f64> for Input {
    fn from(value: f64) -> Self {
        Input::Literal(Literal::Float(value))
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Input::Literal(Literal::Bool(value))
    }
}

/// Handle to a node that has been added to a Flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRef {
    id: String,
}

impl NodeRef {
    pub fn output(&self, index: u32) -> NodeOutput {
        NodeOutput(self.id.clone(), index)
    }
}

/// Builds a ComputationGraph. Node ids are handed out as "1", "2", ... in the
/// order nodes are added, which is what ComfyUI's own exporter does.
#[derive(Debug, Default)]
pub struct Flow {
    graph: ComputationGraph,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&mut self, class_type: &str) -> NodeBuilder<'_> {
        NodeBuilder {
            flow: self,
            node: Node::new(class_type),
        }
    }

    pub fn build(self) -> ComputationGraph {
        self.graph
    }
}

pub struct NodeBuilder<'a> {
    flow: &'a mut Flow,
    node: Node,
}

impl<'a> NodeBuilder<'a> {
    pub fn input(mut self, name: &str, value: impl Into<Input>) -> Self {
        self.node.inputs.insert(name.to_owned(), value.into());
        self
    }

    pub fn add(self) -> NodeRef {
        let id = (self.flow.graph.len() + 1).to_string();
        self.flow.graph.insert(id.clone(), self.node);
        NodeRef { id }
    }
}
