//! Execution graph: nodes, labeled edges, structural validation
//!
//! This module defines the immutable DAG the engine navigates. A graph is
//! assembled through [`GraphBuilder`], validated once, and read-only
//! thereafter; it is freely shared across workers without locking.
//!
//! # Graph Structure
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  ExecutionGraph                        │
//! │                                                        │
//! │  [source] ──out──> [gate] ──left──>  [transform A] ─┐  │
//! │                      │                              │  │
//! │                      └──right──> [transform B] ──┐  │  │
//! │                                                  ▼  ▼  │
//! │                                            [coalesce]  │
//! │                                                  │     │
//! │                                               ──out──  │
//! │                                                  ▼     │
//! │                                               [sink]   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Deterministic Node Identity
//!
//! Node ids are computed from the node's declaration position plus its
//! normalized (sorted-key) configuration, hashed with SHA-256. Re-running the
//! same topology yields identical ids, which is what makes checkpoints
//! addressable across runs. Identity is deliberately position-sensitive:
//! reordering node declarations changes ids and therefore refuses resume,
//! the conservative choice for an audit-bearing engine.
//!
//! # Validation
//!
//! [`GraphBuilder::build`] fails with a structural error if the graph
//! contains a cycle, an edge that references an unknown node, or a
//! non-sink node with no path to any sink. These are fatal at build time,
//! never tolerated at run time.

use crate::error::{PipelineError, Result};
use provenance_checkpoint::GraphHashes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};

/// Node identifier - deterministic, derived from position + config
pub type NodeId = String;

/// Edge label every routing decision resolves through
pub const DEFAULT_EDGE: &str = "out";

/// What a node does with a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Produces rows; exactly one per graph
    Source,
    /// One row in, one row out
    Transform,
    /// Routes or forks tokens by inspecting the row
    Gate,
    /// Buffers rows into a batch until a trigger fires
    Aggregation,
    /// Join point where forked/expanded siblings merge
    Coalesce,
    /// Terminal writer
    Sink,
}

/// How a token moves across an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// The token relocates to the target node
    Move,
    /// The token is duplicated onto the target (used for fork branches)
    Copy,
}

/// Declarative description of a node, supplied to the builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Human-readable name, unique within the graph
    pub name: String,

    /// Node kind
    pub kind: NodeKind,

    /// Registered plugin name this node invokes
    pub plugin: String,

    /// Plugin options, normalized into the node's config hash
    pub config: serde_json::Value,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, kind: NodeKind, plugin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            plugin: plugin.into(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// A node at build time: spec plus derived identity
#[derive(Debug, Clone)]
pub struct Node {
    /// Deterministic id (position + normalized config)
    pub id: NodeId,

    /// Declaration position, ties broken by this in topological order
    pub position: usize,

    /// The declared spec
    pub spec: NodeSpec,
}

/// Labeled, directed edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub label: String,
    pub mode: RoutingMode,
}

/// Builder that assembles and validates an [`ExecutionGraph`]
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; returns its deterministic id.
    ///
    /// The id is `<name>-<12 hex chars>` where the digest covers the
    /// declaration position and the normalized spec, so identical topologies
    /// mint identical ids run-over-run.
    pub fn add_node(&mut self, spec: NodeSpec) -> NodeId {
        let position = self.nodes.len();
        let id = derive_node_id(position, &spec);
        self.nodes.push(Node {
            id: id.clone(),
            position,
            spec,
        });
        id
    }

    /// Add a labeled edge with MOVE semantics
    pub fn add_edge(&mut self, from: &NodeId, to: &NodeId, label: impl Into<String>) {
        self.add_edge_with_mode(from, to, label, RoutingMode::Move);
    }

    /// Add a labeled edge with an explicit routing mode
    pub fn add_edge_with_mode(
        &mut self,
        from: &NodeId,
        to: &NodeId,
        label: impl Into<String>,
        mode: RoutingMode,
    ) {
        self.edges.push(Edge {
            from: from.clone(),
            to: to.clone(),
            label: label.into(),
            mode,
        });
    }

    /// Validate and freeze the graph
    pub fn build(self) -> Result<ExecutionGraph> {
        let graph = ExecutionGraph::from_parts(self.nodes, self.edges)?;
        graph.validate()?;
        Ok(graph)
    }
}

/// Immutable DAG of nodes and labeled edges
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    edges: HashMap<NodeId, Vec<Edge>>,
}

impl ExecutionGraph {
    fn from_parts(nodes: Vec<Node>, edge_list: Vec<Edge>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(PipelineError::Validation(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        let mut edges: HashMap<NodeId, Vec<Edge>> = HashMap::new();
        for edge in edge_list {
            edges.entry(edge.from.clone()).or_default().push(edge);
        }

        Ok(Self {
            nodes,
            index,
            edges,
        })
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// All nodes in declaration order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Outgoing edges of a node (empty slice for sinks)
    pub fn edges_from(&self, id: &str) -> &[Edge] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The single source node
    pub fn source(&self) -> Result<&Node> {
        let mut sources = self.nodes.iter().filter(|n| n.spec.kind == NodeKind::Source);
        match (sources.next(), sources.next()) {
            (Some(node), None) => Ok(node),
            (None, _) => Err(PipelineError::Validation(
                "graph has no source node".to_string(),
            )),
            (Some(_), Some(_)) => Err(PipelineError::Validation(
                "graph has more than one source node".to_string(),
            )),
        }
    }

    /// Resolve an outgoing edge by label.
    ///
    /// An unresolved label is a fatal integrity error, never a silent drop.
    pub fn resolve(&self, from: &str, label: &str) -> Result<&Edge> {
        self.edges_from(from)
            .iter()
            .find(|e| e.label == label)
            .ok_or_else(|| PipelineError::UnresolvedRoute {
                node: from.to_string(),
                label: label.to_string(),
            })
    }

    /// The edge a CONTINUE decision follows: the edge labeled
    /// [`DEFAULT_EDGE`], or the sole outgoing edge when there is exactly one.
    pub fn default_successor(&self, from: &str) -> Result<&Edge> {
        let edges = self.edges_from(from);
        if let Some(edge) = edges.iter().find(|e| e.label == DEFAULT_EDGE) {
            return Ok(edge);
        }
        match edges {
            [only] => Ok(only),
            _ => Err(PipelineError::UnresolvedRoute {
                node: from.to_string(),
                label: DEFAULT_EDGE.to_string(),
            }),
        }
    }

    /// Structural validation: unknown edge endpoints, cycles, dead ends
    pub fn validate(&self) -> Result<()> {
        for edges in self.edges.values() {
            for edge in edges {
                if !self.index.contains_key(&edge.from) {
                    return Err(PipelineError::Validation(format!(
                        "edge source '{}' does not exist",
                        edge.from
                    )));
                }
                if !self.index.contains_key(&edge.to) {
                    return Err(PipelineError::Validation(format!(
                        "edge target '{}' does not exist",
                        edge.to
                    )));
                }
            }
        }

        // Kahn's algorithm doubles as the cycle check
        let order = self.topological_order()?;
        debug_assert_eq!(order.len(), self.nodes.len());

        // Every non-sink node must reach a sink: reverse BFS from all sinks
        let mut reaches_sink: HashSet<&str> = self
            .nodes
            .iter()
            .filter(|n| n.spec.kind == NodeKind::Sink)
            .map(|n| n.id.as_str())
            .collect();
        let mut queue: VecDeque<&str> = reaches_sink.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            for node in &self.nodes {
                let feeds = self
                    .edges_from(&node.id)
                    .iter()
                    .any(|e| e.to == id);
                if feeds && reaches_sink.insert(node.id.as_str()) {
                    queue.push_back(node.id.as_str());
                }
            }
        }
        for node in &self.nodes {
            if node.spec.kind != NodeKind::Sink && !reaches_sink.contains(node.id.as_str()) {
                return Err(PipelineError::Validation(format!(
                    "node '{}' has no path to any sink",
                    node.id
                )));
            }
        }

        Ok(())
    }

    /// Deterministic linear ordering respecting all edges.
    ///
    /// Ties are broken by declaration order so the ordering (and therefore
    /// the topology hash) is stable run-over-run. Fails on cycles.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut indegree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edges in self.edges.values() {
            for edge in edges {
                if let Some(d) = indegree.get_mut(edge.to.as_str()) {
                    *d += 1;
                }
            }
        }

        // Ready set kept sorted by declaration position
        let mut ready: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| indegree[n.id.as_str()] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.first().copied() {
            ready.remove(0);
            order.push(node.id.clone());

            for edge in self.edges_from(&node.id) {
                let d = indegree
                    .get_mut(edge.to.as_str())
                    .ok_or_else(|| {
                        PipelineError::Validation(format!(
                            "edge target '{}' does not exist",
                            edge.to
                        ))
                    })?;
                *d -= 1;
                if *d == 0 {
                    let successor = &self.nodes[self.index[&edge.to]];
                    let at = ready
                        .binary_search_by_key(&successor.position, |n| n.position)
                        .unwrap_or_else(|i| i);
                    ready.insert(at, successor);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(PipelineError::Validation(
                "graph contains a cycle".to_string(),
            ));
        }
        Ok(order)
    }

    /// Hash over the ordered node ids and the full edge table
    pub fn topology_hash(&self) -> String {
        let mut hasher = Sha256::new();
        if let Ok(order) = self.topological_order() {
            for id in &order {
                hasher.update(id.as_bytes());
                hasher.update(b"\n");
            }
        }
        let mut edge_lines: Vec<String> = self
            .edges
            .values()
            .flatten()
            .map(|e| format!("{}->{}:{}:{:?}", e.from, e.to, e.label, e.mode))
            .collect();
        edge_lines.sort_unstable();
        for line in edge_lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        hex_digest(hasher)
    }

    /// Hash of a node's normalized configuration
    pub fn node_config_hash(&self, id: &str) -> Option<String> {
        self.node(id).map(|node| {
            let mut hasher = Sha256::new();
            hasher.update(node.spec.plugin.as_bytes());
            hasher.update(b"\n");
            hasher.update(canonical_json(&node.spec.config).as_bytes());
            hex_digest(hasher)
        })
    }

    /// Both hashes the checkpoint system pins against
    pub fn hashes(&self) -> GraphHashes {
        GraphHashes {
            topology: self.topology_hash(),
            node_configs: self
                .nodes
                .iter()
                .filter_map(|n| self.node_config_hash(&n.id).map(|h| (n.id.clone(), h)))
                .collect(),
        }
    }
}

fn derive_node_id(position: usize, spec: &NodeSpec) -> NodeId {
    let mut hasher = Sha256::new();
    hasher.update(position.to_le_bytes());
    hasher.update(spec.name.as_bytes());
    hasher.update(b"\n");
    hasher.update(spec.plugin.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_json(&spec.config).as_bytes());
    let digest = hex_digest(hasher);
    format!("{}-{}", spec.name, &digest[..12])
}

/// Canonical JSON rendering with object keys sorted recursively, so config
/// hashes are independent of declaration key order.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::Value::from(k.as_str()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
